//! Achievements: definitions loaded from config, a registry mapping each
//! `AchievementKind` to its predicate, and the per-user unlocked record.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::util::escape_xml;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
  /// Completed a build-pass challenge.
  FirstBuildFail,
  /// `solve_number` challenges completed in the project.
  SolveXChallenges,
  /// `solve_number` challenges solved by a single build.
  SolveXAtOnce,
  /// `solve_number` quests completed.
  SolveXQuests,
  /// Project line coverage at or above `percent`.
  CoverageAtLeast,
  /// At least `tests_number` tests in the project's surefire reports.
  HaveXProjectTests,
  #[serde(other)]
  Unknown,
}

/// Static description of an achievement as configured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AchievementDef {
  pub kind: AchievementKind,
  pub title: String,
  pub description: String,
  #[serde(default)]
  pub secret: bool,
  #[serde(default)]
  pub params: HashMap<String, String>,
}

impl AchievementDef {
  fn new(kind: AchievementKind, title: &str, description: &str, params: &[(&str, &str)]) -> Self {
    Self {
      kind,
      title: title.to_string(),
      description: description.to_string(),
      secret: false,
      params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
  }

  fn param_u64(&self, key: &str) -> Option<u64> {
    self.params.get(key).and_then(|v| v.trim().parse().ok())
  }
}

/// Built-in set used when the config lists none.
pub fn default_definitions() -> Vec<AchievementDef> {
  use AchievementKind::*;
  vec![
    AchievementDef::new(FirstBuildFail, "Fixing my own mistake", "Let the build pass after it failed with one of your commits as head", &[]),
    AchievementDef::new(SolveXChallenges, "Challenge accepted", "Solve your first Challenge", &[("solve_number", "1")]),
    AchievementDef::new(SolveXChallenges, "Persistent tester", "Solve 10 Challenges", &[("solve_number", "10")]),
    AchievementDef::new(SolveXChallenges, "Test legend", "Solve 100 Challenges", &[("solve_number", "100")]),
    AchievementDef::new(SolveXAtOnce, "Double trouble", "Solve 2 Challenges with one build", &[("solve_number", "2")]),
    AchievementDef::new(SolveXAtOnce, "Clean sweep", "Solve 5 Challenges with one build", &[("solve_number", "5")]),
    AchievementDef::new(SolveXQuests, "Adventurer", "Solve your first Quest", &[("solve_number", "1")]),
    AchievementDef::new(CoverageAtLeast, "Well covered", "Reach 80% line coverage in the project", &[("percent", "80")]),
    AchievementDef::new(HaveXProjectTests, "Safety net", "Have 10 tests in the project", &[("tests_number", "10")]),
    AchievementDef::new(HaveXProjectTests, "Test suite", "Have 100 tests in the project", &[("tests_number", "100")]),
  ]
}

/// What a predicate may look at for one user in one build.
#[derive(Clone, Debug, Default)]
pub struct AchievementContext {
  pub completed_challenges: usize,
  pub completed_build_challenges: usize,
  pub solved_this_build: usize,
  pub completed_quests: usize,
  /// Fraction in [0, 1].
  pub project_coverage: f64,
  pub project_tests: u32,
}

/// Something that decides whether a definition is met.
pub trait AchievementPredicate: Send + Sync {
  fn check(&self, def: &AchievementDef, ctx: &AchievementContext) -> bool;
}

impl<F> AchievementPredicate for F
where
  F: Fn(&AchievementDef, &AchievementContext) -> bool + Send + Sync,
{
  fn check(&self, def: &AchievementDef, ctx: &AchievementContext) -> bool {
    self(def, ctx)
  }
}

/// Dispatch table from kind to predicate.
pub struct AchievementRegistry {
  predicates: HashMap<AchievementKind, Box<dyn AchievementPredicate>>,
}

impl Default for AchievementRegistry {
  fn default() -> Self {
    Self::with_builtin()
  }
}

impl AchievementRegistry {
  pub fn empty() -> Self {
    Self { predicates: HashMap::new() }
  }

  pub fn with_builtin() -> Self {
    let mut r = Self::empty();
    r.register(AchievementKind::FirstBuildFail, |_: &AchievementDef, ctx: &AchievementContext| {
      ctx.completed_build_challenges > 0
    });
    r.register(AchievementKind::SolveXChallenges, |def: &AchievementDef, ctx: &AchievementContext| {
      def.param_u64("solve_number").is_some_and(|n| ctx.completed_challenges as u64 >= n)
    });
    r.register(AchievementKind::SolveXAtOnce, |def: &AchievementDef, ctx: &AchievementContext| {
      def.param_u64("solve_number").is_some_and(|n| ctx.solved_this_build as u64 >= n)
    });
    r.register(AchievementKind::SolveXQuests, |def: &AchievementDef, ctx: &AchievementContext| {
      def.param_u64("solve_number").is_some_and(|n| ctx.completed_quests as u64 >= n)
    });
    r.register(AchievementKind::CoverageAtLeast, |def: &AchievementDef, ctx: &AchievementContext| {
      def.param_u64("percent").is_some_and(|p| ctx.project_coverage * 100.0 >= p as f64)
    });
    r.register(AchievementKind::HaveXProjectTests, |def: &AchievementDef, ctx: &AchievementContext| {
      def.param_u64("tests_number").is_some_and(|n| u64::from(ctx.project_tests) >= n)
    });
    r
  }

  pub fn register(&mut self, kind: AchievementKind, predicate: impl AchievementPredicate + 'static) {
    self.predicates.insert(kind, Box::new(predicate));
  }

  pub fn is_met(&self, def: &AchievementDef, ctx: &AchievementContext) -> bool {
    match self.predicates.get(&def.kind) {
      Some(p) => p.check(def, ctx),
      None => {
        warn!(target: "achievement", title = %def.title, kind = ?def.kind, "No predicate registered for achievement");
        false
      }
    }
  }
}

/// An achievement held by a user; `solved_time` is 0 while locked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Achievement {
  pub def: AchievementDef,
  #[serde(default)]
  pub solved_time: i64,
}

impl PartialEq for Achievement {
  fn eq(&self, other: &Self) -> bool {
    self.def.title == other.def.title && self.def.description == other.def.description
  }
}

impl Achievement {
  pub fn locked(def: AchievementDef) -> Self {
    Self { def, solved_time: 0 }
  }

  /// Evaluate and stamp on success.
  pub fn try_unlock(&mut self, registry: &AchievementRegistry, ctx: &AchievementContext, now: i64) -> bool {
    if self.solved_time != 0 {
      return false;
    }
    if registry.is_met(&self.def, ctx) {
      self.solved_time = now;
      debug!(target: "achievement", title = %self.def.title, "Achievement unlocked");
      true
    } else {
      false
    }
  }

  /// `Achieved 19 Oct 2026 @ 05:02 am`, or `Not solved`.
  pub fn solved_time_string(&self) -> String {
    if self.solved_time == 0 {
      return "Not solved".to_string();
    }
    match Utc.timestamp_millis_opt(self.solved_time).single() {
      Some(t) => format!("Achieved {}", t.format("%-d %b %Y @ %I:%M %P")),
      None => "Not solved".to_string(),
    }
  }

  pub fn print_to_xml(&self, indent: &str) -> String {
    format!(
      "{indent}<Achievement title=\"{}\" description=\"{}\" secret=\"{}\" solved=\"{}\"/>",
      escape_xml(&self.def.title),
      escape_xml(&self.def.description),
      self.def.secret,
      self.solved_time
    )
  }
}

impl std::fmt::Display for Achievement {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.def.title, self.def.description)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn def(kind: AchievementKind, params: &[(&str, &str)]) -> AchievementDef {
    AchievementDef::new(kind, "t", "d", params)
  }

  #[test]
  fn builtin_predicates_read_params() {
    let reg = AchievementRegistry::with_builtin();
    let ctx = AchievementContext {
      completed_challenges: 10,
      solved_this_build: 2,
      project_coverage: 0.81,
      project_tests: 10,
      ..Default::default()
    };
    assert!(reg.is_met(&def(AchievementKind::SolveXChallenges, &[("solve_number", "10")]), &ctx));
    assert!(!reg.is_met(&def(AchievementKind::SolveXChallenges, &[("solve_number", "11")]), &ctx));
    assert!(!reg.is_met(&def(AchievementKind::SolveXChallenges, &[]), &ctx));
    assert!(reg.is_met(&def(AchievementKind::SolveXAtOnce, &[("solve_number", "2")]), &ctx));
    assert!(reg.is_met(&def(AchievementKind::CoverageAtLeast, &[("percent", "80")]), &ctx));
    assert!(!reg.is_met(&def(AchievementKind::FirstBuildFail, &[]), &ctx));
    assert!(reg.is_met(&def(AchievementKind::HaveXProjectTests, &[("tests_number", "10")]), &ctx));
    assert!(!reg.is_met(&def(AchievementKind::HaveXProjectTests, &[("tests_number", "100")]), &ctx));
    assert!(!reg.is_met(&def(AchievementKind::Unknown, &[]), &ctx));
  }

  #[test]
  fn custom_predicates_can_be_registered() {
    let mut reg = AchievementRegistry::empty();
    reg.register(AchievementKind::Unknown, |_: &AchievementDef, _: &AchievementContext| true);
    assert!(reg.is_met(&def(AchievementKind::Unknown, &[]), &AchievementContext::default()));
  }

  #[test]
  fn unlock_is_stamped_once() {
    let reg = AchievementRegistry::with_builtin();
    let mut a = Achievement::locked(def(AchievementKind::SolveXChallenges, &[("solve_number", "1")]));
    let ctx = AchievementContext { completed_challenges: 1, ..Default::default() };
    assert!(a.try_unlock(&reg, &ctx, 42));
    assert!(!a.try_unlock(&reg, &ctx, 99));
    assert_eq!(a.solved_time, 42);
  }

  #[test]
  fn solved_time_renders_twelve_hour_clock() {
    let t = NaiveDate::from_ymd_opt(2026, 10, 19)
      .and_then(|d| d.and_hms_opt(5, 2, 0))
      .unwrap()
      .and_utc()
      .timestamp_millis();
    let a = Achievement { def: def(AchievementKind::SolveXQuests, &[]), solved_time: t };
    assert_eq!(a.solved_time_string(), "Achieved 19 Oct 2026 @ 05:02 am");
    assert_eq!(Achievement::locked(a.def.clone()).solved_time_string(), "Not solved");
    assert!(a.print_to_xml("  ").starts_with("  <Achievement title=\"t\""));
  }
}
