//! Quests: an ordered run of challenge-like steps in one class. Only the
//! current step is evaluated; each solved step advances the quest by one.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::challenge::Challenge;
use crate::files::{BuildContext, GenerationContext};
use crate::reports::ReportReader;
use crate::util::escape_xml;

pub const NO_QUEST_MESSAGE: &str = "No quest could be generated. This could mean that none of the prerequisites \
was met, please try again later.";
pub const REJECTED_QUEST_MESSAGE: &str = "Previous quest was rejected, please run a new build to generate a new quest";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestKind {
  LinesInClass,
  MethodsInClass,
  MutantHunt,
  /// Zero-step stand-in carrying a message for the user.
  Placeholder { message: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestStep {
  pub description: String,
  pub challenge: Challenge,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quest {
  pub id: Uuid,
  pub kind: QuestKind,
  pub created: i64,
  #[serde(default)]
  pub solved: i64,
  #[serde(default)]
  pub rejected: i64,
  pub context: GenerationContext,
  pub steps: Vec<QuestStep>,
  #[serde(default)]
  pub current_step: usize,
  /// Package and class every step targets; empty for placeholders.
  #[serde(default)]
  pub package: String,
  #[serde(default)]
  pub class: String,
}

/// What one evaluation pass did to a quest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuestProgress {
  pub steps_solved: usize,
  pub points: u32,
  pub completed: bool,
}

impl Quest {
  pub fn new(
    kind: QuestKind,
    context: GenerationContext,
    package: String,
    class: String,
    steps: Vec<QuestStep>,
    now: i64,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      created: now,
      solved: 0,
      rejected: 0,
      context,
      steps,
      current_step: 0,
      package,
      class,
    }
  }

  pub fn placeholder(context: GenerationContext, message: &str, now: i64) -> Self {
    Self::new(
      QuestKind::Placeholder { message: message.to_string() },
      context,
      String::new(),
      String::new(),
      Vec::new(),
      now,
    )
  }

  pub fn is_placeholder(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn title(&self) -> String {
    match &self.kind {
      QuestKind::LinesInClass => format!("Lines over lines - Cover three lines in class {} in package {}", self.class, self.package),
      QuestKind::MethodsInClass => {
        format!("More than methods - Cover more lines of three methods in class {} in package {}", self.class, self.package)
      }
      QuestKind::MutantHunt => format!("Mutant hunt - Kill three mutants in class {} in package {}", self.class, self.package),
      QuestKind::Placeholder { message } => message.clone(),
    }
  }

  pub fn current(&self) -> Option<&QuestStep> {
    self.steps.get(self.current_step)
  }

  /// Sum of all step scores.
  pub fn score(&self) -> u32 {
    self.steps.iter().map(|s| s.challenge.score()).sum()
  }

  pub async fn is_solvable(&self, ctx: &BuildContext, reader: &ReportReader) -> bool {
    match self.current() {
      Some(step) => step.challenge.is_solvable(ctx, reader).await,
      None => true,
    }
  }

  /// Evaluate the current step. A zero-step quest is always complete.
  pub async fn evaluate(&mut self, ctx: &BuildContext, reader: &ReportReader, now: i64) -> QuestProgress {
    let mut progress = QuestProgress::default();
    if self.steps.is_empty() {
      progress.completed = true;
      return progress;
    }
    let idx = self.current_step;
    let Some(step) = self.steps.get_mut(idx) else {
      progress.completed = true;
      return progress;
    };
    if step.challenge.is_solved(ctx, reader, now).await {
      progress.steps_solved = 1;
      progress.points = step.challenge.score();
      self.current_step += 1;
      debug!(target: "quest", id = %self.id, step = idx, "Quest step solved");
    }
    if self.current_step >= self.steps.len() {
      self.solved = now;
      progress.completed = true;
    }
    progress
  }

  pub fn to_escaped_string(&self) -> String {
    escape_xml(&self.to_string())
  }

  pub fn print_to_xml(&self, reason: Option<&str>, indent: &str) -> String {
    let reason = reason.map(|r| format!(" reason=\"{}\"", escape_xml(r))).unwrap_or_default();
    let head = format!(
      "{indent}<Quest name=\"{}\" created=\"{}\" solved=\"{}\" currentStep=\"{}\" steps=\"{}\"{reason}",
      escape_xml(&self.title()),
      self.created,
      self.solved,
      self.current_step,
      self.steps.len()
    );
    if self.steps.is_empty() {
      return format!("{head}/>");
    }
    let inner = format!("{indent}    ");
    let mut out = format!("{head}>\n");
    for step in &self.steps {
      out.push_str(&step.challenge.print_to_xml(None, &inner));
      out.push('\n');
    }
    out.push_str(&format!("{indent}</Quest>"));
    out
  }
}

impl fmt::Display for Quest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      QuestKind::Placeholder { message } => f.write_str(message),
      _ => write!(f, "{} (created for branch {})", self.title(), self.context.branch),
    }
  }
}
