//! Outbound game events. The pipeline publishes onto a bounded channel and
//! never waits on delivery; a dispatcher task hands events to a `Notifier`.

use std::sync::Arc;

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
  ChallengeGenerated { user: String, project: String, challenge: String },
  ChallengeSolved { user: String, project: String, challenge: String, points: u32 },
  ChallengeUnsolvable { user: String, project: String, challenge: String },
  ChallengeRejected { user: String, project: String, challenge: String, reason: String },
  ChallengeStored { user: String, project: String, challenge: String },
  ChallengeSent { from: String, to: String, project: String, challenge: String },
  QuestStepSolved { user: String, project: String, quest: String, points: u32 },
  QuestSolved { user: String, project: String, quest: String },
  QuestUnsolvable { user: String, project: String, quest: String },
  QuestRejected { user: String, project: String, quest: String, reason: String },
  AchievementSolved { user: String, project: String, achievement: String },
  Summary(UserSummary),
}

impl GameEvent {
  pub fn user(&self) -> &str {
    match self {
      GameEvent::ChallengeGenerated { user, .. }
      | GameEvent::ChallengeSolved { user, .. }
      | GameEvent::ChallengeUnsolvable { user, .. }
      | GameEvent::ChallengeRejected { user, .. }
      | GameEvent::ChallengeStored { user, .. }
      | GameEvent::QuestStepSolved { user, .. }
      | GameEvent::QuestSolved { user, .. }
      | GameEvent::QuestUnsolvable { user, .. }
      | GameEvent::QuestRejected { user, .. }
      | GameEvent::AchievementSolved { user, .. } => user,
      GameEvent::ChallengeSent { from, .. } => from,
      GameEvent::Summary(s) => &s.user,
    }
  }
}

/// What one build pass changed for one user.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserSummary {
  pub user: String,
  pub project: String,
  pub build_number: u64,
  pub points: u32,
  pub solved_challenges: Vec<String>,
  pub unsolvable_challenges: Vec<String>,
  pub generated_challenges: Vec<String>,
  pub solved_quest_steps: Vec<String>,
  pub solved_quests: Vec<String>,
  pub unsolvable_quests: Vec<String>,
  pub generated_quests: Vec<String>,
  pub solved_achievements: Vec<String>,
}

impl UserSummary {
  pub fn new(user: impl Into<String>, project: impl Into<String>, build_number: u64) -> Self {
    Self { user: user.into(), project: project.into(), build_number, ..Default::default() }
  }

  fn groups(&self) -> [(&'static str, &[String]); 8] {
    [
      ("Challenge(s) solved", &self.solved_challenges),
      ("New unsolvable Challenge(s)", &self.unsolvable_challenges),
      ("Challenge(s) generated", &self.generated_challenges),
      ("Quest step(s) solved", &self.solved_quest_steps),
      ("Quest(s) solved", &self.solved_quests),
      ("New unsolvable Quest(s)", &self.unsolvable_quests),
      ("Quest(s) generated", &self.generated_quests),
      ("Achievement(s) solved", &self.solved_achievements),
    ]
  }

  pub fn is_empty(&self) -> bool {
    self.groups().iter().all(|(_, items)| items.is_empty())
  }

  /// Plain-text digest for the notification collaborator. Empty groups are
  /// left out.
  pub fn summary_text(&self) -> String {
    let mut out = format!(
      "Build #{} of {} for {}: {} point(s) earned\n",
      self.build_number, self.project, self.user, self.points
    );
    for (heading, items) in self.groups() {
      if items.is_empty() {
        continue;
      }
      out.push_str(&format!("\n{heading}:\n"));
      for item in items {
        out.push_str(&format!("  - {item}\n"));
      }
    }
    out
  }
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventPublisher {
  tx: mpsc::Sender<GameEvent>,
}

pub fn channel(buffer: usize) -> (EventPublisher, mpsc::Receiver<GameEvent>) {
  let (tx, rx) = mpsc::channel(buffer.max(1));
  (EventPublisher { tx }, rx)
}

impl EventPublisher {
  /// Non-blocking; a full channel drops the event with a warning.
  pub fn publish(&self, event: GameEvent) {
    match self.tx.try_send(event) {
      Ok(()) => {}
      Err(mpsc::error::TrySendError::Full(ev)) => {
        warn!(target: "events", user = %ev.user(), "Event channel full; dropping event");
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        debug!(target: "events", "Event channel closed");
      }
    }
  }
}

/// Delivery side. Implementations must not block for long; retries belong here.
pub trait Notifier: Send + Sync {
  fn notify(&self, event: &GameEvent);
}

/// Writes every summary to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, event: &GameEvent) {
    match event {
      GameEvent::Summary(s) if !s.is_empty() => {
        info!(target: "events", user = %s.user, project = %s.project, build = s.build_number, "{}", s.summary_text());
      }
      GameEvent::Summary(_) => {}
      other => debug!(target: "events", user = %other.user(), event = ?other, "Game event"),
    }
  }
}

/// Drain `rx` into `notifier` until every publisher is dropped.
pub fn spawn_dispatcher(mut rx: mpsc::Receiver<GameEvent>, notifier: Arc<dyn Notifier>) -> JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      notifier.notify(&event);
    }
    debug!(target: "events", "Event dispatcher stopped");
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Default)]
  struct Collect(Mutex<Vec<GameEvent>>);

  impl Notifier for Collect {
    fn notify(&self, event: &GameEvent) {
      self.0.lock().unwrap().push(event.clone());
    }
  }

  #[test]
  fn summary_lists_only_non_empty_groups() {
    let mut s = UserSummary::new("alice", "demo", 7);
    s.points = 3;
    s.solved_challenges.push("Let the Build run successfully in branch main".into());
    s.generated_quests.push("Mutant hunt".into());
    let text = s.summary_text();
    assert!(text.starts_with("Build #7 of demo for alice: 3 point(s) earned"));
    assert!(text.contains("Challenge(s) solved:\n  - Let the Build"));
    assert!(text.contains("Quest(s) generated:\n  - Mutant hunt"));
    assert!(!text.contains("Achievement(s) solved"));
    assert!(!s.is_empty());
    assert!(UserSummary::new("a", "p", 1).is_empty());
  }

  #[tokio::test]
  async fn full_channel_drops_instead_of_blocking() {
    let (publisher, mut rx) = channel(1);
    let ev = |c: &str| GameEvent::ChallengeStored { user: "a".into(), project: "p".into(), challenge: c.into() };
    publisher.publish(ev("one"));
    publisher.publish(ev("two"));
    assert_eq!(rx.recv().await, Some(ev("one")));
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn dispatcher_forwards_until_closed() {
    let (publisher, rx) = channel(8);
    let sink = Arc::new(Collect::default());
    let handle = spawn_dispatcher(rx, sink.clone());
    publisher.publish(GameEvent::Summary(UserSummary::new("a", "p", 1)));
    drop(publisher);
    handle.await.unwrap();
    assert_eq!(sink.0.lock().unwrap().len(), 1);
  }
}
