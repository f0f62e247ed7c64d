//! Small utility helpers used across modules.

/// Milliseconds since the Unix epoch. Timestamps on challenges, quests and
/// achievements all use this clock; 0 means "not set".
pub fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// Escape the five XML special characters.
pub fn escape_xml(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&apos;"),
      _ => out.push(ch),
    }
  }
  out
}

/// Reverse of `escape_xml`, also accepting the numeric forms report writers emit.
pub fn unescape_html(s: &str) -> String {
  if !s.contains('&') {
    return s.to_string();
  }
  s.replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&apos;", "'")
    .replace("&#39;", "'")
    .replace("&#34;", "\"")
    .replace("&nbsp;", " ")
    .replace("&amp;", "&")
}

/// Source-root directory names that terminate a package path.
const SOURCE_ROOTS: [&str; 6] = ["src", "main", "test", "java", "kotlin", "scala"];

/// Compute the dotted package of a repository-relative source path,
/// e.g. `src/main/java/com/example/Complex.java` -> `com.example`.
pub fn package_name_of(path: &str) -> String {
  let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
  if parts.len() < 2 {
    return String::new();
  }
  let mut package: Vec<&str> = Vec::new();
  for part in parts[..parts.len() - 1].iter().rev() {
    if SOURCE_ROOTS.contains(part) {
      break;
    }
    package.push(part);
  }
  package.reverse();
  package.join(".")
}

/// Compile one of the crate's built-in patterns. This is the crate's only
/// panic outside tests: the argument is always a string literal, and every
/// module that owns patterns has a `built_in_patterns_compile` test forcing
/// each of its `OnceLock` statics.
pub fn static_regex(pattern: &str) -> regex::Regex {
  regex::Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole source lines or report fragments.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}
