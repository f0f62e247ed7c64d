//! Before/after rendering of a mutant for presentation.
//!
//! `render` takes the original source line and the record and returns the
//! line as the mutator changed it, or an empty string when the operator or
//! pattern is not recognised (callers show a generic message instead).
//! Lines are plain source text, not HTML.

use std::sync::OnceLock;

use regex::Regex;

use crate::reports::mutation::{MutationRecord, Mutator};
use crate::util::static_regex;

/// Marker shown for removed void calls.
pub const LINE_REMOVED: &str = "line removed";

pub fn render(line: &str, record: &MutationRecord) -> String {
  let out = match record.mutator {
    Mutator::ConditionalsBoundary => boundary(line),
    Mutator::NegateConditionals => negate(line),
    Mutator::Increments => increments(line),
    Mutator::InvertNegs => invert_negs(line),
    Mutator::Math => math(line),
    Mutator::VoidMethodCalls => Some(LINE_REMOVED.to_string()),
    Mutator::EmptyReturns
    | Mutator::FalseReturns
    | Mutator::TrueReturns
    | Mutator::NullReturns
    | Mutator::PrimitiveReturns => returns(line, record),
    Mutator::Unknown => None,
  };
  out.unwrap_or_default()
}

fn splice(line: &str, at: usize, len: usize, with: &str) -> String {
  format!("{}{}{}", &line[..at], with, &line[at + len..])
}

fn byte_at(b: &[u8], i: Option<usize>) -> u8 {
  i.and_then(|i| b.get(i).copied()).unwrap_or(0)
}

/// Last non-blank byte before `i`.
fn prev_significant(b: &[u8], i: usize) -> u8 {
  b[..i].iter().rev().copied().find(|c| !c.is_ascii_whitespace()).unwrap_or(0)
}

fn ends_operand(c: u8) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, b'_' | b')' | b']' | b'"' | b'\'' | b'$')
}

/// Leftmost comparison operator, skipping shifts and lambda arrows.
/// With `relational_only`, `==` and `!=` are ignored.
fn find_comparison(line: &str, relational_only: bool) -> Option<(usize, &'static str)> {
  let b = line.as_bytes();
  let mut i = 0;
  while i < b.len() {
    let next = byte_at(b, Some(i + 1));
    match b[i] {
      b'=' | b'!' if next == b'=' => {
        if !relational_only {
          return Some((i, if b[i] == b'=' { "==" } else { "!=" }));
        }
        i += 2;
        continue;
      }
      b'<' | b'>' if next == b[i] => {
        while i < b.len() && (b[i] == b'<' || b[i] == b'>') {
          i += 1;
        }
        if byte_at(b, Some(i)) == b'=' {
          i += 1;
        }
        continue;
      }
      b'>' if i > 0 && b[i - 1] == b'-' => {}
      b'<' => return Some((i, if next == b'=' { "<=" } else { "<" })),
      b'>' => return Some((i, if next == b'=' { ">=" } else { ">" })),
      _ => {}
    }
    i += 1;
  }
  None
}

fn boundary(line: &str) -> Option<String> {
  let (at, op) = find_comparison(line, true)?;
  let to = match op {
    "<" => "<=",
    "<=" => "<",
    ">" => ">=",
    ">=" => ">",
    _ => return None,
  };
  Some(splice(line, at, op.len(), to))
}

fn negate(line: &str) -> Option<String> {
  if let Some((at, op)) = find_comparison(line, false) {
    let to = match op {
      "==" => "!=",
      "!=" => "==",
      "<" => ">=",
      "<=" => ">",
      ">" => "<=",
      ">=" => "<",
      _ => return None,
    };
    return Some(splice(line, at, op.len(), to));
  }
  negate_condition(line)
}

fn condition_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"\b(?:if|while)\s*\("))
}

fn is_simple_operand(expr: &str) -> bool {
  !expr.is_empty()
    && !expr.chars().any(|c| c.is_whitespace() || matches!(c, '&' | '|' | '^' | '?' | ':' | '!'))
}

fn negated(expr: &str) -> String {
  if is_simple_operand(expr) {
    format!("!{expr}")
  } else {
    format!("!({expr})")
  }
}

/// No comparison on the line: negate the bare condition of an `if`/`while`
/// or a returned boolean expression.
fn negate_condition(line: &str) -> Option<String> {
  if let Some(m) = condition_re().find(line) {
    let open = m.end() - 1;
    let close = matching_paren(line, open)?;
    let inner = line[open + 1..close].trim();
    if inner.is_empty() {
      return None;
    }
    return Some(format!("{}({}){}", &line[..open], negated(inner), &line[close + 1..]));
  }
  let (start, end) = return_expression(line)?;
  Some(splice(line, start, end - start, &negated(line[start..end].trim())))
}

fn matching_paren(line: &str, open: usize) -> Option<usize> {
  let mut depth = 0usize;
  for (i, c) in line.char_indices().skip_while(|(i, _)| *i < open) {
    match c {
      '(' => depth += 1,
      ')' => {
        depth = depth.checked_sub(1)?;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
  }
  None
}

fn increments(line: &str) -> Option<String> {
  let b = line.as_bytes();
  (0..b.len().saturating_sub(1)).find_map(|i| {
    let to = match (b[i], b[i + 1]) {
      (b'+', b'+') => "--",
      (b'-', b'-') => "++",
      (b'+', b'=') => "-=",
      (b'-', b'=') => "+=",
      _ => return None,
    };
    Some(splice(line, i, 2, to))
  })
}

fn invert_negs(line: &str) -> Option<String> {
  let b = line.as_bytes();
  let at = (0..b.len()).find(|&i| {
    b[i] == b'-'
      && !matches!(byte_at(b, Some(i + 1)), b'-' | b'=' | b'>')
      && !(i > 0 && b[i - 1] == b'-')
      && !ends_operand(prev_significant(b, i))
  })?;
  Some(splice(line, at, 1, ""))
}

/// Operators in the order they are tried, with their replacement.
const MATH_SWAPS: [(&str, &str); 10] = [
  ("+", "-"),
  ("-", "+"),
  ("*", "/"),
  ("/", "*"),
  ("%", "*"),
  ("&&", "||"),
  ("||", "&&"),
  ("<<", ">>"),
  (">>>", "<<"),
  (">>", "<<"),
];

fn is_standalone(b: &[u8], i: usize, op: &str) -> bool {
  let prev = if i > 0 { b[i - 1] } else { 0 };
  let next = byte_at(b, Some(i + op.len()));
  match op {
    "+" | "-" => {
      let c = op.as_bytes()[0];
      prev != c
        && next != c
        && next != b'='
        && !(c == b'-' && next == b'>')
        && ends_operand(prev_significant(b, i))
    }
    "*" => next != b'=' && next != b'/' && prev != b'/',
    "/" => next != b'=' && next != b'/' && next != b'*' && prev != b'/' && prev != b'*',
    "%" => next != b'=',
    "<<" => next != b'=' && next != b'<' && prev != b'<',
    ">>>" => next != b'=' && prev != b'>',
    ">>" => next != b'=' && next != b'>' && prev != b'>',
    _ => true,
  }
}

fn math(line: &str) -> Option<String> {
  let b = line.as_bytes();
  MATH_SWAPS.iter().find_map(|(op, to)| {
    line
      .match_indices(op)
      .map(|(i, _)| i)
      .find(|&i| is_standalone(b, i, op))
      .map(|i| splice(line, i, op.len(), to))
  })
}

fn replacement_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"\bwith (.+?)(?: for |$)"))
}

/// Value a return mutator substitutes, taken from the record's description.
fn return_replacement(record: &MutationRecord) -> Option<String> {
  let declared = replacement_re()
    .captures(&record.description)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().trim().to_string());
  let default = match record.mutator {
    Mutator::TrueReturns => "true",
    Mutator::FalseReturns => "false",
    Mutator::NullReturns => "null",
    Mutator::PrimitiveReturns => "0",
    _ => "",
  };
  let value = declared.unwrap_or_else(|| default.to_string());
  if value.is_empty() {
    return None;
  }
  let first = value.chars().next().unwrap_or(' ');
  Some(match value.as_str() {
    "\"\"" | "null" | "true" | "false" => value,
    _ if first.is_ascii_digit() || (first == '-' && value.len() > 1) => "0".to_string(),
    _ if value.contains('.') && !value.ends_with(')') => format!("{value}()"),
    _ => value,
  })
}

/// Byte range of the returned expression: after `return ` or a lambda arrow,
/// up to the final `;`.
fn return_expression(line: &str) -> Option<(usize, usize)> {
  let end = line.rfind(';')?;
  let start = if let Some(m) = return_re().find(line) {
    m.end()
  } else {
    line.find("->").map(|i| i + 2)?
  };
  let start = start + line[start..].len() - line[start..].trim_start().len();
  (start < end).then_some((start, end))
}

fn return_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"\breturn\s"))
}

fn returns(line: &str, record: &MutationRecord) -> Option<String> {
  let value = return_replacement(record)?;
  let (start, end) = return_expression(line)?;
  Some(splice(line, start, end - start, &value))
}
