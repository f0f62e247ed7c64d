//! Challenges: one tagged enum over every variant, with the per-build
//! evaluation contract (`is_solvable`, then `is_solved`), scoring, and the
//! stable string renderings used to match UI selections back to objects.
//!
//! Baselines are captured at generation. Evaluation compares the current
//! reports against them and never mutates anything but the solved stamp and
//! the solved-time snapshot. Report problems are logged and read as
//! "not solved yet"; they never make a challenge unsolvable.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::files::{BuildContext, BuildResult, GenerationContext, SourceFileDetails};
use crate::mutation_diff;
use crate::reports::{
  coverage::{find_line, CoverageLine, MethodInfo},
  mutation::MutationRecord,
  ReportReader,
};
use crate::selector::LocationKey;
use crate::util::escape_xml;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassCoverageData {
  pub file: SourceFileDetails,
  pub lines: u32,
  pub missed_lines: u32,
  /// Covered fraction at generation.
  pub coverage: f64,
  #[serde(default)]
  pub solved_coverage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodCoverageData {
  pub file: SourceFileDetails,
  pub method: MethodInfo,
  #[serde(default)]
  pub solved_coverage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineCoverageData {
  pub file: SourceFileDetails,
  pub line: CoverageLine,
  #[serde(default)]
  pub solved_missed: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationData {
  pub file: SourceFileDetails,
  pub record: MutationRecord,
  /// Source line the mutant sits on, captured for the diff.
  #[serde(default)]
  pub source_line: String,
  #[serde(default)]
  pub solved_killed_by: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BuildData {
  /// Result of the build that triggered the challenge.
  pub failed_result: BuildResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeKind {
  ClassCoverage(ClassCoverageData),
  MethodCoverage(MethodCoverageData),
  LineCoverage(LineCoverageData),
  MutationCoverage(MutationData),
  Build(BuildData),
  Dummy { message: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
  pub id: Uuid,
  pub created: i64,
  #[serde(default)]
  pub solved: i64,
  #[serde(default)]
  pub rejected: i64,
  #[serde(default)]
  pub stored: i64,
  pub context: GenerationContext,
  pub kind: ChallengeKind,
}

impl Challenge {
  pub fn new(context: GenerationContext, kind: ChallengeKind, now: i64) -> Self {
    Self { id: Uuid::new_v4(), created: now, solved: 0, rejected: 0, stored: 0, context, kind }
  }

  pub fn dummy(context: GenerationContext, message: impl Into<String>, now: i64) -> Self {
    Self::new(context, ChallengeKind::Dummy { message: message.into() }, now)
  }

  pub fn is_dummy(&self) -> bool {
    matches!(self.kind, ChallengeKind::Dummy { .. })
  }

  pub fn is_build(&self) -> bool {
    matches!(self.kind, ChallengeKind::Build(_))
  }

  pub fn name(&self) -> &'static str {
    match &self.kind {
      ChallengeKind::ClassCoverage(_) => "Class Coverage",
      ChallengeKind::MethodCoverage(_) => "Method Coverage",
      ChallengeKind::LineCoverage(_) => "Line Coverage",
      ChallengeKind::MutationCoverage(_) => "Mutation",
      ChallengeKind::Build(_) => "Build",
      ChallengeKind::Dummy { .. } => "Dummy",
    }
  }

  pub fn file(&self) -> Option<&SourceFileDetails> {
    match &self.kind {
      ChallengeKind::ClassCoverage(d) => Some(&d.file),
      ChallengeKind::MethodCoverage(d) => Some(&d.file),
      ChallengeKind::LineCoverage(d) => Some(&d.file),
      ChallengeKind::MutationCoverage(d) => Some(&d.file),
      ChallengeKind::Build(_) | ChallengeKind::Dummy { .. } => None,
    }
  }

  /// Points awarded on completion, fixed by the generation-time baseline.
  pub fn score(&self) -> u32 {
    match &self.kind {
      ChallengeKind::ClassCoverage(d) => {
        if d.coverage >= 0.8 {
          2
        } else {
          1
        }
      }
      ChallengeKind::MethodCoverage(d) => {
        if d.method.covered_fraction() > 0.8 {
          3
        } else {
          2
        }
      }
      ChallengeKind::LineCoverage(d) => match d.line.status {
        crate::reports::coverage::LineStatus::Partial => 3,
        _ => 2,
      },
      ChallengeKind::MutationCoverage(d) => match d.record.status {
        crate::reports::mutation::MutationStatus::Survived => 5,
        _ => 4,
      },
      ChallengeKind::Build(_) => 1,
      ChallengeKind::Dummy { .. } => 0,
    }
  }

  pub fn location(&self) -> Option<LocationKey> {
    match &self.kind {
      ChallengeKind::ClassCoverage(d) => Some(d.file.location()),
      ChallengeKind::MethodCoverage(d) => Some(LocationKey::Method {
        package: d.file.package_name.clone(),
        class: d.file.class_name.clone(),
        method: d.method.name.clone(),
      }),
      ChallengeKind::LineCoverage(d) => Some(LocationKey::Line {
        package: d.file.package_name.clone(),
        class: d.file.class_name.clone(),
        line: d.line.number,
      }),
      ChallengeKind::MutationCoverage(d) => Some(LocationKey::Mutation {
        package: d.file.package_name.clone(),
        class: d.file.class_name.clone(),
        method: d.record.mutated_method.clone(),
        line: d.record.line_number,
        mutator: d.record.mutator,
        description: d.record.description.clone(),
      }),
      ChallengeKind::Build(_) => Some(LocationKey::Build { branch: self.context.branch.clone() }),
      ChallengeKind::Dummy { .. } => None,
    }
  }

  /// Mutated version of the source line, or empty when it cannot be shown.
  pub fn mutated_line(&self) -> Option<String> {
    match &self.kind {
      ChallengeKind::MutationCoverage(d) if !d.source_line.is_empty() => {
        Some(mutation_diff::render(&d.source_line, &d.record))
      }
      _ => None,
    }
  }

  /// Is this challenge still meaningful for the current build? A challenge
  /// from another branch is kept untouched.
  pub async fn is_solvable(&self, ctx: &BuildContext, reader: &ReportReader) -> bool {
    if self.context.branch != ctx.branch {
      return true;
    }
    let ws = ctx.workspace.as_path();
    match &self.kind {
      ChallengeKind::Build(_) | ChallengeKind::Dummy { .. } => true,
      ChallengeKind::ClassCoverage(d) => d.file.exists_in(ws),
      ChallengeKind::MutationCoverage(d) => d.file.exists_in(ws),
      ChallengeKind::MethodCoverage(d) => {
        if !d.file.exists_in(ws) {
          return false;
        }
        match reader.methods(ws, &d.file).await {
          Ok(methods) => methods.iter().any(|m| m.name == d.method.name),
          Err(e) => {
            warn!(target: "challenge", id = %self.id, error = %e, "Method report unavailable; keeping challenge");
            true
          }
        }
      }
      ChallengeKind::LineCoverage(d) => {
        if !d.file.exists_in(ws) {
          return false;
        }
        match reader.lines(ws, &d.file).await {
          Ok(lines) => find_line(&lines, &d.line.content, d.line.number).is_some(),
          Err(e) => {
            warn!(target: "challenge", id = %self.id, error = %e, "Source report unavailable; keeping challenge");
            true
          }
        }
      }
    }
  }

  /// Has the success condition been reached relative to the baseline? On
  /// success, `solved` is stamped with `now` and the solved-time snapshot is
  /// recorded.
  pub async fn is_solved(&mut self, ctx: &BuildContext, reader: &ReportReader, now: i64) -> bool {
    if self.context.branch != ctx.branch {
      return false;
    }
    let ws = ctx.workspace.clone();
    let id = self.id;
    let solved = match &mut self.kind {
      ChallengeKind::Dummy { .. } => true,
      ChallengeKind::Build(_) => ctx.result == BuildResult::Success,
      ChallengeKind::ClassCoverage(d) => match reader.coverage_summary(&ws).await {
        Ok(summary) => match summary.get(&d.file.package_name, &d.file.class_name) {
          Some(current) if current.missed_lines < d.missed_lines => {
            d.solved_coverage = current.coverage();
            true
          }
          _ => false,
        },
        Err(e) => {
          warn!(target: "challenge", %id, error = %e, "Coverage summary unavailable; challenge stays open");
          false
        }
      },
      ChallengeKind::MethodCoverage(d) => match reader.methods(&ws, &d.file).await {
        Ok(methods) => match methods.iter().find(|m| m.name == d.method.name) {
          Some(current) if current.missed_lines < d.method.missed_lines => {
            d.solved_coverage = current.covered_fraction();
            true
          }
          _ => false,
        },
        Err(e) => {
          warn!(target: "challenge", %id, error = %e, "Method report unavailable; challenge stays open");
          false
        }
      },
      ChallengeKind::LineCoverage(d) => match reader.lines(&ws, &d.file).await {
        Ok(lines) => match find_line(&lines, &d.line.content, d.line.number) {
          Some(current) if current.missed_count() < d.line.missed_count() => {
            d.solved_missed = Some(current.missed_count());
            true
          }
          _ => false,
        },
        Err(e) => {
          warn!(target: "challenge", %id, error = %e, "Source report unavailable; challenge stays open");
          false
        }
      },
      ChallengeKind::MutationCoverage(d) => match reader.mutations(&ws).await {
        Ok(records) => match records.iter().find(|r| **r == d.record) {
          Some(current) if current.detected => {
            d.solved_killed_by = Some(current.killing_test.clone());
            true
          }
          Some(_) => false,
          None => {
            d.solved_killed_by = Some(String::new());
            true
          }
        },
        Err(e) => {
          warn!(target: "challenge", %id, error = %e, "Mutation report unavailable; challenge stays open");
          false
        }
      },
    };
    if solved {
      self.solved = now;
      debug!(target: "challenge", %id, kind = self.name(), "Challenge solved");
    }
    solved
  }

  /// XML-escaped `Display` text; the key UI selections are matched by.
  pub fn to_escaped_string(&self) -> String {
    escape_xml(&self.to_string())
  }

  pub fn print_to_xml(&self, reason: Option<&str>, indent: &str) -> String {
    let reason = reason.map(|r| format!(" reason=\"{}\"", escape_xml(r))).unwrap_or_default();
    let common = format!("created=\"{}\" solved=\"{}\"", self.created, self.solved);
    match &self.kind {
      ChallengeKind::ClassCoverage(d) => format!(
        "{indent}<ClassCoverageChallenge {common} class=\"{}\" coverage=\"{}\" coverageAtSolved=\"{}\"{reason}/>",
        escape_xml(&d.file.class_name),
        d.coverage,
        d.solved_coverage
      ),
      ChallengeKind::MethodCoverage(d) => format!(
        "{indent}<MethodCoverageChallenge {common} class=\"{}\" method=\"{}\" coverage=\"{}\" coverageAtSolved=\"{}\"{reason}/>",
        escape_xml(&d.file.class_name),
        escape_xml(&d.method.name),
        d.method.covered_fraction(),
        d.solved_coverage
      ),
      ChallengeKind::LineCoverage(d) => format!(
        "{indent}<LineCoverageChallenge {common} class=\"{}\" line=\"{}\" status=\"{}\"{reason}/>",
        escape_xml(&d.file.class_name),
        d.line.number,
        d.line.status.as_str()
      ),
      ChallengeKind::MutationCoverage(d) => format!(
        "{indent}<MutationChallenge {common} class=\"{}\" method=\"{}\" line=\"{}\" mutator=\"{}\" status=\"{}\"{reason}/>",
        escape_xml(&d.file.class_name),
        escape_xml(&d.record.mutated_method),
        d.record.line_number,
        d.record.mutator.label(),
        d.record.status.as_str()
      ),
      ChallengeKind::Build(_) => format!(
        "{indent}<BuildChallenge {common} branch=\"{}\"{reason}/>",
        escape_xml(&self.context.branch)
      ),
      ChallengeKind::Dummy { message } => {
        format!("{indent}<DummyChallenge {common} message=\"{}\"{reason}/>", escape_xml(message))
      }
    }
  }
}

impl fmt::Display for Challenge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let branch = &self.context.branch;
    match &self.kind {
      ChallengeKind::ClassCoverage(d) => write!(
        f,
        "Write a test to cover more lines in class {} in package {} (created for branch {branch})",
        d.file.class_name, d.file.package_name
      ),
      ChallengeKind::MethodCoverage(d) => write!(
        f,
        "Write a test to cover more lines of method {} in class {} in package {} (created for branch {branch})",
        d.method.name, d.file.class_name, d.file.package_name
      ),
      ChallengeKind::LineCoverage(d) => write!(
        f,
        "Write a test to fully cover line {} in class {} in package {} (created for branch {branch})",
        d.line.number, d.file.class_name, d.file.package_name
      ),
      ChallengeKind::MutationCoverage(d) => write!(
        f,
        "Write a test to kill the mutant \"{}\" at line {} of method {} in class {} in package {} (created for branch {branch})",
        d.record.description, d.record.line_number, d.record.mutated_method, d.file.class_name, d.file.package_name
      ),
      ChallengeKind::Build(_) => write!(f, "Let the Build run successfully in branch {branch}"),
      ChallengeKind::Dummy { message } => f.write_str(message),
    }
  }
}
