//! Surefire `TEST-*.xml` totals.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::util::static_regex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
  pub tests: u32,
  pub failures: u32,
  pub errors: u32,
  pub skipped: u32,
}

impl TestCounts {
  /// Counters saturate; a corrupt report cannot wrap the totals.
  pub fn add(&mut self, other: TestCounts) {
    self.tests = self.tests.saturating_add(other.tests);
    self.failures = self.failures.saturating_add(other.failures);
    self.errors = self.errors.saturating_add(other.errors);
    self.skipped = self.skipped.saturating_add(other.skipped);
  }
}

fn suite_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"<testsuite\b([^>]*)>"))
}

fn counter_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r#"\b(tests|failures|errors|skipped)\s*=\s*["'](\d+)["']"#))
}

/// Sum the counters of every `<testsuite>` element in one report.
pub fn parse_test_counts(xml: &str) -> TestCounts {
  let mut total = TestCounts::default();
  for suite in suite_re().captures_iter(xml) {
    let attrs = suite.get(1).map(|a| a.as_str()).unwrap_or("");
    let mut counts = TestCounts::default();
    for c in counter_re().captures_iter(attrs) {
      let value: u32 = c.get(2).and_then(|v| v.as_str().parse().ok()).unwrap_or(u32::MAX);
      match c.get(1).map(|k| k.as_str()) {
        Some("tests") => counts.tests = value,
        Some("failures") => counts.failures = value,
        Some("errors") => counts.errors = value,
        Some("skipped") => counts.skipped = value,
        _ => {}
      }
    }
    total.add(counts);
  }
  total
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn built_in_patterns_compile() {
    suite_re();
    counter_re();
  }

  #[test]
  fn sums_suite_counters() {
    let xml = r#"<?xml version="1.0"?>
<testsuite name="com.example.ComplexTest" time="0.05" tests="12" errors="1" skipped="2" failures="3">
  <testcase name="abs"/>
</testsuite>"#;
    let c = parse_test_counts(xml);
    assert_eq!(c, TestCounts { tests: 12, failures: 3, errors: 1, skipped: 2 });
    assert_eq!(parse_test_counts("<nothing/>"), TestCounts::default());
  }

  #[test]
  fn huge_counters_saturate() {
    let xml = r#"<testsuite tests="4294967295" failures="0"></testsuite>
<testsuite tests="7" failures="99999999999"></testsuite>"#;
    let c = parse_test_counts(xml);
    assert_eq!(c.tests, u32::MAX);
    assert_eq!(c.failures, u32::MAX);
    let mut total = c;
    total.add(TestCounts { tests: 1, ..Default::default() });
    assert_eq!(total.tests, u32::MAX);
  }
}
