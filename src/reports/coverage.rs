//! JaCoCo coverage: the CSV class summary, the per-class method table and the
//! annotated source listing with per-line status.

use std::{collections::HashMap, path::Path, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::util::{static_regex, unescape_html};

/// Line/branch/method counters of one class, nested classes folded in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCoverage {
  pub package: String,
  pub class: String,
  pub instructions: u32,
  pub missed_instructions: u32,
  pub branches: u32,
  pub missed_branches: u32,
  pub lines: u32,
  pub missed_lines: u32,
  pub methods: u32,
  pub missed_methods: u32,
}

impl ClassCoverage {
  /// Covered fraction of lines. A class without executable lines is fully covered.
  pub fn coverage(&self) -> f64 {
    if self.lines == 0 {
      return 1.0;
    }
    f64::from(self.lines - self.missed_lines.min(self.lines)) / f64::from(self.lines)
  }

  pub fn is_fully_covered(&self) -> bool {
    self.lines == 0 || self.missed_lines == 0
  }

  fn absorb(&mut self, other: &ClassCoverage) {
    self.instructions = self.instructions.saturating_add(other.instructions);
    self.missed_instructions = self.missed_instructions.saturating_add(other.missed_instructions);
    self.branches = self.branches.saturating_add(other.branches);
    self.missed_branches = self.missed_branches.saturating_add(other.missed_branches);
    self.lines = self.lines.saturating_add(other.lines);
    self.missed_lines = self.missed_lines.saturating_add(other.missed_lines);
    self.methods = self.methods.saturating_add(other.methods);
    self.missed_methods = self.missed_methods.saturating_add(other.missed_methods);
  }
}

/// Parsed CSV summary, keyed by (package, outer class).
#[derive(Clone, Debug, Default)]
pub struct CoverageSummary {
  classes: HashMap<(String, String), ClassCoverage>,
}

impl CoverageSummary {
  pub fn get(&self, package: &str, class: &str) -> Option<&ClassCoverage> {
    self.classes.get(&(package.to_string(), class.to_string()))
  }

  pub fn iter(&self) -> impl Iterator<Item = &ClassCoverage> {
    self.classes.values()
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  /// Line coverage over the whole project.
  pub fn project_coverage(&self) -> f64 {
    let (lines, missed) = self
      .classes
      .values()
      .fold((0u64, 0u64), |(l, m), c| (l + u64::from(c.lines), m + u64::from(c.missed_lines)));
    if lines == 0 {
      return 1.0;
    }
    (lines - missed.min(lines)) as f64 / lines as f64
  }

  pub fn insert(&mut self, entry: ClassCoverage) {
    let key = (entry.package.clone(), entry.class.clone());
    match self.classes.get_mut(&key) {
      Some(existing) => existing.absorb(&entry),
      None => {
        self.classes.insert(key, entry);
      }
    }
  }
}

fn parse_count(raw: &str, path: &Path, line_no: usize) -> Result<u32, ReportError> {
  raw.trim().parse::<u32>().map_err(|e| ReportError::Parse {
    path: path.to_path_buf(),
    message: format!("line {line_no}: bad counter {raw:?}: {e}"),
  })
}

/// Parse a JaCoCo CSV. The header row is skipped; rows with fewer than 13
/// columns are rejected as malformed.
pub fn parse_csv(text: &str, path: &Path) -> Result<CoverageSummary, ReportError> {
  let mut summary = CoverageSummary::default();
  for (idx, row) in text.lines().enumerate() {
    let row = row.trim();
    if row.is_empty() || row.starts_with("GROUP,") {
      continue;
    }
    let cols: Vec<&str> = row.split(',').collect();
    if cols.len() < 13 {
      return Err(ReportError::Parse {
        path: path.to_path_buf(),
        message: format!("line {}: expected 13 columns, found {}", idx + 1, cols.len()),
      });
    }
    let class = cols[2].split('.').next().unwrap_or(cols[2]).to_string();
    let n = |i: usize| parse_count(cols[i], path, idx + 1);
    // Missed and covered columns add up to the total.
    let total = |missed: usize| -> Result<(u32, u32), ReportError> {
      let m = n(missed)?;
      let sum = m.checked_add(n(missed + 1)?).ok_or_else(|| ReportError::Parse {
        path: path.to_path_buf(),
        message: format!("line {}: counters in columns {} and {} overflow", idx + 1, missed + 1, missed + 2),
      })?;
      Ok((m, sum))
    };
    let (missed_instructions, instructions) = total(3)?;
    let (missed_branches, branches) = total(5)?;
    let (missed_lines, lines) = total(7)?;
    let (missed_methods, methods) = total(11)?;
    summary.insert(ClassCoverage {
      package: cols[1].to_string(),
      class,
      instructions,
      missed_instructions,
      branches,
      missed_branches,
      lines,
      missed_lines,
      methods,
      missed_methods,
    });
  }
  Ok(summary)
}

/// One row of the per-class method table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
  pub name: String,
  pub first_line: u32,
  pub lines: u32,
  pub missed_lines: u32,
}

impl MethodInfo {
  pub fn covered_fraction(&self) -> f64 {
    if self.lines == 0 {
      return 1.0;
    }
    f64::from(self.lines - self.missed_lines.min(self.lines)) / f64::from(self.lines)
  }
}

fn method_row_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    static_regex(r#"(?s)<tr>(.*?)</tr>"#)
  })
}

fn method_cells_re() -> &'static [Regex; 4] {
  static RE: OnceLock<[Regex; 4]> = OnceLock::new();
  RE.get_or_init(|| {
    [
      static_regex(r#"class="el_method"[^>]*>([^<]*)</a>"#),
      static_regex(r##"href="[^"#]*#L(\d+)""##),
      static_regex(r#"id="h\d+"[^>]*>([\d,]+)<"#),
      static_regex(r#"id="i\d+"[^>]*>([\d,]+)<"#),
    ]
  })
}

fn number(raw: &str) -> u32 {
  raw.replace(',', "").parse().unwrap_or(0)
}

/// Parse the method rows of `<Class>.html`. Rows without a first-line anchor
/// (synthetic or abstract methods) are kept with `first_line = 0`.
pub fn parse_method_table(html: &str) -> Vec<MethodInfo> {
  let [name_re, line_re, missed_re, lines_re] = method_cells_re();
  method_row_re()
    .captures_iter(html)
    .filter_map(|row| {
      let row = row.get(1)?.as_str();
      let name = unescape_html(name_re.captures(row)?.get(1)?.as_str());
      let first_line = line_re
        .captures(row)
        .and_then(|c| c.get(1))
        .map(|m| number(m.as_str()))
        .unwrap_or(0);
      let missed_lines = missed_re.captures(row).and_then(|c| c.get(1)).map(|m| number(m.as_str())).unwrap_or(0);
      let lines = lines_re.captures(row).and_then(|c| c.get(1)).map(|m| number(m.as_str())).unwrap_or(0);
      Some(MethodInfo { name, first_line, lines, missed_lines: missed_lines.min(lines) })
    })
    .collect()
}

/// JaCoCo's per-line marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
  /// `fc`
  Full,
  /// `pc`
  Partial,
  /// `nc`
  None,
}

impl LineStatus {
  fn from_class(class: &str) -> Option<Self> {
    match class {
      "fc" => Some(LineStatus::Full),
      "pc" => Some(LineStatus::Partial),
      "nc" => Some(LineStatus::None),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      LineStatus::Full => "fc",
      LineStatus::Partial => "pc",
      LineStatus::None => "nc",
    }
  }
}

/// One executable line of the annotated source listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageLine {
  pub number: u32,
  pub status: LineStatus,
  /// Source text, HTML-unescaped.
  pub content: String,
  pub missed_branches: u32,
  pub total_branches: u32,
}

impl CoverageLine {
  /// Missed count a line challenge compares against its baseline.
  pub fn missed_count(&self) -> u32 {
    match self.status {
      LineStatus::Full => 0,
      LineStatus::Partial => self.missed_branches,
      LineStatus::None => self.total_branches.max(1),
    }
  }
}

fn line_span_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    static_regex(r#"<span class="(fc|pc|nc)(?: b[a-z]+)?" id="L(\d+)"(?: title="([^"]*)")?>(.*?)</span>"#)
  })
}

fn branch_title_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    static_regex(r"(?:(\d+) of (\d+) branches missed|All (\d+) branches covered)")
  })
}

/// Parse every marked line of `<Class>.<ext>.html`.
pub fn parse_source_lines(html: &str) -> Vec<CoverageLine> {
  line_span_re()
    .captures_iter(html)
    .filter_map(|c| {
      let status = LineStatus::from_class(c.get(1)?.as_str())?;
      let number = c.get(2)?.as_str().parse().ok()?;
      let content = unescape_html(c.get(4).map(|m| m.as_str()).unwrap_or(""));
      let (missed_branches, total_branches) = c
        .get(3)
        .and_then(|t| branch_title_re().captures(t.as_str()))
        .map(|b| match (b.get(1), b.get(2), b.get(3)) {
          (Some(m), Some(t), _) => (number_of(m.as_str()), number_of(t.as_str())),
          (_, _, Some(all)) => (0, number_of(all.as_str())),
          _ => (0, 0),
        })
        .unwrap_or((0, 0));
      Some(CoverageLine { number, status, content, missed_branches, total_branches })
    })
    .collect()
}

fn number_of(s: &str) -> u32 {
  s.parse().unwrap_or(0)
}

/// Locate a line by its trimmed content. When the same text appears more than
/// once, the occurrence closest to `near` wins.
pub fn find_line<'a>(lines: &'a [CoverageLine], content: &str, near: u32) -> Option<&'a CoverageLine> {
  let wanted = content.trim();
  lines
    .iter()
    .filter(|l| l.content.trim() == wanted)
    .min_by_key(|l| l.number.abs_diff(near))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn built_in_patterns_compile() {
    method_row_re();
    method_cells_re();
    line_span_re();
    branch_title_re();
  }

  const CSV: &str = "GROUP,PACKAGE,CLASS,INSTRUCTION_MISSED,INSTRUCTION_COVERED,BRANCH_MISSED,BRANCH_COVERED,LINE_MISSED,LINE_COVERED,COMPLEXITY_MISSED,COMPLEXITY_COVERED,METHOD_MISSED,METHOD_COVERED
demo,com.example,Complex,40,60,4,6,5,15,3,7,1,9
demo,com.example,Complex.Polar,10,0,0,0,5,0,1,0,1,0
demo,com.example,Empty,0,0,0,0,0,0,0,0,0,0
";

  #[test]
  fn csv_folds_nested_classes() {
    let s = parse_csv(CSV, &PathBuf::from("jacoco.csv")).unwrap();
    assert_eq!(s.len(), 2);
    let c = s.get("com.example", "Complex").unwrap();
    assert_eq!(c.lines, 25);
    assert_eq!(c.missed_lines, 10);
    assert!((c.coverage() - 0.6).abs() < 1e-9);
    assert_eq!(s.get("com.example", "Empty").unwrap().coverage(), 1.0);
  }

  #[test]
  fn csv_rejects_short_rows() {
    let err = parse_csv("a,b,c\n", &PathBuf::from("x.csv")).unwrap_err();
    assert!(matches!(err, ReportError::Parse { .. }));
  }

  #[test]
  fn csv_rejects_overflowing_counters() {
    let text = "GROUP,PACKAGE,CLASS,a,b,c,d,e,f,g,h,i,j\ng,p,A,0,0,0,0,4294967295,1,0,0,0,0\n";
    let err = parse_csv(text, &PathBuf::from("x.csv")).unwrap_err();
    match err {
      ReportError::Parse { message, .. } => assert!(message.contains("overflow"), "{message}"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn nested_class_totals_saturate() {
    let text = "g,p,A,0,0,0,0,0,4294967295,0,0,0,0\ng,p,A$1,0,0,0,0,0,10,0,0,0,0\n";
    let s = parse_csv(text, &PathBuf::from("x.csv")).unwrap();
    assert_eq!(s.get("p", "A").unwrap().lines, u32::MAX);
  }

  #[test]
  fn method_table_reads_counters_and_anchor() {
    let html = r#"<table><tbody>
<tr><td id="a1"><a href="Complex.java.html#L45" class="el_method">divide(Complex)</a></td><td class="bar" id="b0"></td><td class="ctr2" id="c0">0%</td><td class="ctr1" id="h0">1,005</td><td class="ctr2" id="i1">1,010</td></tr>
<tr><td id="a0"><a href="Complex.java.html#L12" class="el_method">Complex(double, double)</a></td><td class="ctr1" id="h3">0</td><td class="ctr2" id="i0">3</td></tr>
</tbody></table>"#;
    let methods = parse_method_table(html);
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0].name, "divide(Complex)");
    assert_eq!(methods[0].first_line, 45);
    assert_eq!(methods[0].missed_lines, 1005);
    assert_eq!(methods[0].lines, 1010);
    assert_eq!(methods[1].missed_lines, 0);
  }

  #[test]
  fn source_lines_carry_branch_counts() {
    let html = r#"<span class="fc" id="L10">    this.real = real;</span>
<span class="pc bpc" id="L11" title="1 of 2 branches missed.">    if (imag &lt; 0.0) {</span>
<span class="nc" id="L12">        return null;</span>
<span class="fc bfc" id="L13" title="All 2 branches covered.">    while (x) {</span>"#;
    let lines = parse_source_lines(html);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1].content, "    if (imag < 0.0) {");
    assert_eq!(lines[1].missed_count(), 1);
    assert_eq!(lines[2].missed_count(), 1);
    assert_eq!(lines[3].total_branches, 2);
    assert_eq!(lines[3].missed_count(), 0);
  }

  #[test]
  fn find_line_prefers_nearest_duplicate() {
    let mk = |n, s: &str| CoverageLine {
      number: n,
      status: LineStatus::None,
      content: s.into(),
      missed_branches: 0,
      total_branches: 0,
    };
    let lines = vec![mk(3, "return x;"), mk(40, "return x;"), mk(41, "y++;")];
    assert_eq!(find_line(&lines, "  return x;", 35).unwrap().number, 40);
    assert!(find_line(&lines, "z--;", 1).is_none());
  }
}
