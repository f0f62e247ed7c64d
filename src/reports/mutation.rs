//! PIT `mutations.xml` records.
//!
//! A record's identity is its structural location (file, class, method,
//! descriptor, line, mutator, description). Kill status and test counts are
//! volatile between runs and take no part in equality or hashing.

use std::{
  hash::{Hash, Hasher},
  sync::OnceLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::{static_regex, unescape_html};

/// Closed set of PIT mutators the engine knows how to present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutator {
  ConditionalsBoundary,
  Increments,
  InvertNegs,
  Math,
  NegateConditionals,
  VoidMethodCalls,
  EmptyReturns,
  FalseReturns,
  TrueReturns,
  NullReturns,
  PrimitiveReturns,
  #[serde(other)]
  Unknown,
}

impl Mutator {
  /// Map a fully qualified PIT mutator class name.
  pub fn from_class_name(name: &str) -> Self {
    let simple = name.rsplit('.').next().unwrap_or(name).trim();
    match simple {
      "ConditionalsBoundaryMutator" => Mutator::ConditionalsBoundary,
      "IncrementsMutator" => Mutator::Increments,
      "InvertNegsMutator" => Mutator::InvertNegs,
      "MathMutator" => Mutator::Math,
      "NegateConditionalsMutator" => Mutator::NegateConditionals,
      "VoidMethodCallMutator" => Mutator::VoidMethodCalls,
      "EmptyObjectReturnValsMutator" => Mutator::EmptyReturns,
      "BooleanFalseReturnValsMutator" => Mutator::FalseReturns,
      "BooleanTrueReturnValsMutator" => Mutator::TrueReturns,
      "NullReturnValsMutator" => Mutator::NullReturns,
      "PrimitiveReturnsMutator" => Mutator::PrimitiveReturns,
      _ => Mutator::Unknown,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Mutator::ConditionalsBoundary => "CONDITIONALS_BOUNDARY",
      Mutator::Increments => "INCREMENTS",
      Mutator::InvertNegs => "INVERT_NEGS",
      Mutator::Math => "MATH",
      Mutator::NegateConditionals => "NEGATE_CONDITIONALS",
      Mutator::VoidMethodCalls => "VOID_METHOD_CALLS",
      Mutator::EmptyReturns => "EMPTY_RETURNS",
      Mutator::FalseReturns => "FALSE_RETURNS",
      Mutator::TrueReturns => "TRUE_RETURNS",
      Mutator::NullReturns => "NULL_RETURNS",
      Mutator::PrimitiveReturns => "PRIMITIVE_RETURNS",
      Mutator::Unknown => "UNKNOWN",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
  NoCoverage,
  Survived,
  #[default]
  Killed,
}

impl MutationStatus {
  /// Anything PIT reports other than NO_COVERAGE and SURVIVED counts as killed
  /// (TIMED_OUT, MEMORY_ERROR, RUN_ERROR, ...).
  pub fn parse(raw: &str) -> Self {
    match raw.trim() {
      "NO_COVERAGE" => MutationStatus::NoCoverage,
      "SURVIVED" => MutationStatus::Survived,
      _ => MutationStatus::Killed,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      MutationStatus::NoCoverage => "NO_COVERAGE",
      MutationStatus::Survived => "SURVIVED",
      MutationStatus::Killed => "KILLED",
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationRecord {
  pub detected: bool,
  pub status: MutationStatus,
  pub number_of_tests_run: u32,
  pub source_file: String,
  /// Fully qualified, `$` for nested classes.
  pub mutated_class: String,
  pub mutated_method: String,
  pub method_description: String,
  pub line_number: u32,
  pub mutator: Mutator,
  #[serde(default)]
  pub killing_test: String,
  pub description: String,
}

impl MutationRecord {
  /// Does this mutant live in `package.class` (or one of its nested classes)?
  pub fn belongs_to(&self, package: &str, class: &str) -> bool {
    let fq = if package.is_empty() { class.to_string() } else { format!("{package}.{class}") };
    self.mutated_class == fq || self.mutated_class.starts_with(&format!("{fq}$"))
  }

  pub fn is_undetected(&self) -> bool {
    !self.detected && matches!(self.status, MutationStatus::Survived | MutationStatus::NoCoverage)
  }
}

impl PartialEq for MutationRecord {
  fn eq(&self, other: &Self) -> bool {
    self.source_file == other.source_file
      && self.mutated_class == other.mutated_class
      && self.mutated_method == other.mutated_method
      && self.method_description == other.method_description
      && self.line_number == other.line_number
      && self.mutator == other.mutator
      && self.description == other.description
  }
}

impl Eq for MutationRecord {}

impl Hash for MutationRecord {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.source_file.hash(state);
    self.mutated_class.hash(state);
    self.mutated_method.hash(state);
    self.method_description.hash(state);
    self.line_number.hash(state);
    self.mutator.hash(state);
    self.description.hash(state);
  }
}

fn mutation_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"(?s)<mutation\b([^>]*)>(.*?)</mutation>"))
}

fn attr_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r#"(\w+)\s*=\s*(?:'([^']*)'|"([^"]*)")"#))
}

fn child_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| static_regex(r"(?s)<(\w+)\s*(?:/>|>(.*?)</(\w+)>)"))
}

/// Parse every `<mutation>` element. Elements missing a line number or a
/// source file are skipped.
pub fn parse_mutations(xml: &str) -> Vec<MutationRecord> {
  mutation_re()
    .captures_iter(xml)
    .filter_map(|m| {
      let attrs = m.get(1).map(|a| a.as_str()).unwrap_or("");
      let body = m.get(2).map(|b| b.as_str()).unwrap_or("");

      let mut detected = false;
      let mut status = MutationStatus::Killed;
      let mut number_of_tests_run = 0;
      for a in attr_re().captures_iter(attrs) {
        let value = a.get(2).or_else(|| a.get(3)).map(|v| v.as_str()).unwrap_or("");
        match a.get(1).map(|k| k.as_str()) {
          Some("detected") => detected = value.eq_ignore_ascii_case("true"),
          Some("status") => status = MutationStatus::parse(value),
          Some("numberOfTestsRun") => number_of_tests_run = value.parse().unwrap_or(0),
          _ => {}
        }
      }

      let child = |name: &str| -> Option<String> {
        child_re()
          .captures_iter(body)
          .find(|c| c.get(1).map(|n| n.as_str()) == Some(name))
          .map(|c| unescape_html(c.get(2).map(|t| t.as_str()).unwrap_or("").trim()))
      };

      let source_file = child("sourceFile")?;
      let line_number = child("lineNumber")?.parse().ok()?;
      Some(MutationRecord {
        detected,
        status,
        number_of_tests_run,
        source_file,
        mutated_class: child("mutatedClass").unwrap_or_default(),
        mutated_method: child("mutatedMethod").unwrap_or_default(),
        method_description: child("methodDescription").unwrap_or_default(),
        line_number,
        mutator: Mutator::from_class_name(&child("mutator").unwrap_or_default()),
        killing_test: child("killingTest").unwrap_or_default(),
        description: child("description").unwrap_or_default(),
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn built_in_patterns_compile() {
    mutation_re();
    attr_re();
    child_re();
  }

  const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mutations>
<mutation detected='false' status='SURVIVED' numberOfTestsRun='2'><sourceFile>Complex.java</sourceFile><mutatedClass>com.example.Complex</mutatedClass><mutatedMethod>abs</mutatedMethod><methodDescription>()D</methodDescription><lineNumber>42</lineNumber><mutator>org.pitest.mutationtest.engine.gregor.mutators.ConditionalsBoundaryMutator</mutator><indexes><index>5</index></indexes><blocks><block>1</block></blocks><killingTest/><description>changed conditional boundary</description></mutation>
<mutation detected="true" status="TIMED_OUT" numberOfTestsRun="1"><sourceFile>Complex.java</sourceFile><mutatedClass>com.example.Complex$Polar</mutatedClass><mutatedMethod>angle</mutatedMethod><methodDescription>()D</methodDescription><lineNumber>88</lineNumber><mutator>org.pitest.mutationtest.engine.gregor.mutators.returns.PrimitiveReturnsMutator</mutator><killingTest>com.example.ComplexTest.[method:angle()]</killingTest><description>replaced double return with 0.0d for com/example/Complex$Polar::angle</description></mutation>
<mutation detected='false' status='NO_COVERAGE' numberOfTestsRun='0'><sourceFile>Complex.java</sourceFile><mutatedClass>com.example.Complex</mutatedClass><mutatedMethod>toString</mutatedMethod><methodDescription>()Ljava/lang/String;</methodDescription><lineNumber>90</lineNumber><mutator>org.pitest.mutationtest.engine.gregor.mutators.experimental.SomethingNew</mutator><killingTest/><description>x &lt; y</description></mutation>
</mutations>"#;

  #[test]
  fn parses_both_quote_styles_and_children() {
    let records = parse_mutations(XML);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, MutationStatus::Survived);
    assert_eq!(records[0].mutator, Mutator::ConditionalsBoundary);
    assert_eq!(records[0].line_number, 42);
    assert_eq!(records[0].killing_test, "");
    assert!(records[0].is_undetected());
    assert_eq!(records[1].status, MutationStatus::Killed);
    assert!(records[1].detected);
    assert_eq!(records[1].mutator, Mutator::PrimitiveReturns);
    assert!(records[1].belongs_to("com.example", "Complex"));
    assert_eq!(records[2].mutator, Mutator::Unknown);
    assert_eq!(records[2].description, "x < y");
  }

  #[test]
  fn equality_ignores_volatile_fields() {
    let records = parse_mutations(XML);
    let mut other = records[0].clone();
    other.status = MutationStatus::Killed;
    other.detected = true;
    other.number_of_tests_run = 9;
    other.killing_test = "SomeTest".into();
    assert_eq!(records[0], other);

    let mut moved = records[0].clone();
    moved.line_number += 1;
    assert_ne!(records[0], moved);

    let set: std::collections::HashSet<_> = [records[0].clone(), other].into_iter().collect();
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn unknown_status_defaults_to_killed() {
    assert_eq!(MutationStatus::parse("MEMORY_ERROR"), MutationStatus::Killed);
    assert_eq!(MutationStatus::parse("NO_COVERAGE"), MutationStatus::NoCoverage);
  }
}
