//! End to end: report fixtures, build passes, lifecycle moves, persistence.

mod common;

use std::{path::Path, sync::Arc};

use gamify_backend::config::GameConfig;
use gamify_backend::events::{self, GameEvent};
use gamify_backend::files::{BuildResult, Identity};
use gamify_backend::pipeline::{process_build, BuildRequest};
use gamify_backend::state::{AppState, Registration};
use gamify_backend::store::{JsonFileStore, StateStore};
use gamify_backend::vcs::{ChangedFile, StaticVcs};
use tempfile::TempDir;

fn request(ws: &Path, build_number: u64, result: BuildResult) -> BuildRequest {
  BuildRequest {
    project: "demo".into(),
    branch: "main".into(),
    workspace: ws.to_path_buf(),
    build_number,
    result,
    changes: Some(vec![ChangedFile {
      path: common::SOURCE.into(),
      authors: vec![Identity::new("alice", "alice@example.com")],
      commits_ago: 0,
    }]),
  }
}

async fn setup(dir: &Path) -> (Arc<AppState>, tokio::sync::mpsc::Receiver<GameEvent>) {
  let (publisher, rx) = events::channel(256);
  let store = Arc::new(JsonFileStore::new(dir.join("state")));
  let state = Arc::new(AppState::new(GameConfig::default(), store, Arc::new(StaticVcs::default()), publisher));
  for user in ["alice", "bob"] {
    state
      .register_user(Registration {
        user: user.into(),
        project: "demo".into(),
        git_names: vec![user.into()],
        ..Default::default()
      })
      .await
      .unwrap();
  }
  (state, rx)
}

#[tokio::test]
async fn coverage_improvements_solve_generated_challenges() {
  let dir = TempDir::new().unwrap();
  let ws = dir.path().join("ws");
  common::write_reports(&ws, false);
  let (state, mut rx) = setup(dir.path()).await;

  let report = process_build(state.clone(), request(&ws, 1, BuildResult::Success)).await;
  assert_eq!(report.users_processed, 2);
  assert!((report.project_coverage - 0.5).abs() < 1e-9);
  {
    let alice = state.user("alice").await.unwrap();
    let alice = alice.lock().await;
    let p = alice.project("demo").unwrap();
    assert_eq!(p.current_len(), 3);
    assert!(p.current_challenges().iter().all(|c| !c.is_dummy()));
    assert!(p.current_challenges().iter().all(|c| c.file().is_some_and(|f| f.class_name == "Complex")));
    assert_eq!(p.current_quests().len(), 1, "placeholder until a challenge is completed");

    let bob = state.user("bob").await.unwrap();
    let bob = bob.lock().await;
    let b = bob.project("demo").unwrap();
    assert_eq!(b.current_len(), 1);
    assert!(b.current_challenges()[0].is_dummy(), "bob changed nothing");
  }

  common::write_reports(&ws, true);
  let report = process_build(state.clone(), request(&ws, 2, BuildResult::Success)).await;
  let alice_summary = report.summaries.iter().find(|s| s.user == "alice").unwrap();
  assert_eq!(alice_summary.solved_challenges.len(), 3);
  assert!(alice_summary.points >= 3);
  {
    let alice = state.user("alice").await.unwrap();
    let alice = alice.lock().await;
    let p = alice.project("demo").unwrap();
    assert_eq!(p.completed_challenge_count(), 3);
    let earned: u64 = p.completed_challenges().iter().map(|c| u64::from(c.score())).sum();
    assert_eq!(p.score, earned);
    assert_eq!(p.current_len(), 1);
    assert!(p.current_challenges()[0].is_dummy(), "everything is covered now");
    let titles: Vec<_> = p.completed_achievements().iter().map(|a| a.def.title.as_str()).collect();
    assert!(titles.contains(&"Challenge accepted"));
    assert!(titles.contains(&"Double trouble"));
    assert!(titles.contains(&"Well covered"));
    assert!(
      p.unsolved_achievements().iter().any(|a| a.def.title == "Safety net"),
      "four surefire tests are not enough for ten"
    );

    let saved = JsonFileStore::new(dir.path().join("state")).load("alice", "demo").unwrap().unwrap();
    assert_eq!(saved.score, p.score);
    assert_eq!(saved.completed_challenge_count(), 3);

    let bob = state.user("bob").await.unwrap();
    let bob = bob.lock().await;
    let b = bob.project("demo").unwrap();
    assert_eq!((b.score, b.completed_challenge_count(), b.current_len()), (0, 0, 1));
  }

  let mut summaries = 0;
  while let Ok(ev) = rx.try_recv() {
    if matches!(ev, GameEvent::Summary(_)) {
      summaries += 1;
    }
  }
  assert_eq!(summaries, 4);
}

#[tokio::test]
async fn failed_build_gives_authors_a_build_challenge() {
  let dir = TempDir::new().unwrap();
  let ws = dir.path().join("ws");
  common::write_reports(&ws, false);
  let (state, _rx) = setup(dir.path()).await;

  process_build(state.clone(), request(&ws, 1, BuildResult::Failure)).await;
  {
    let alice = state.user("alice").await.unwrap();
    let alice = alice.lock().await;
    let p = alice.project("demo").unwrap();
    assert!(p.has_current_build_challenge());
    assert_eq!(p.current_len(), 3);
    let bob = state.user("bob").await.unwrap();
    assert!(!bob.lock().await.project("demo").unwrap().has_current_build_challenge());
  }

  process_build(state.clone(), request(&ws, 2, BuildResult::Success)).await;
  let alice = state.user("alice").await.unwrap();
  let alice = alice.lock().await;
  let p = alice.project("demo").unwrap();
  assert!(!p.has_current_build_challenge());
  assert!(p.completed_challenges().iter().any(|c| c.is_build()));
  assert!(p.completed_achievements().iter().any(|a| a.def.title == "Fixing my own mistake"));
}

#[tokio::test]
async fn vanished_source_makes_challenges_unsolvable() {
  let dir = TempDir::new().unwrap();
  let ws = dir.path().join("ws");
  common::write_reports(&ws, false);
  let (state, _rx) = setup(dir.path()).await;

  process_build(state.clone(), request(&ws, 1, BuildResult::Success)).await;
  std::fs::remove_file(ws.join(common::SOURCE)).unwrap();
  let report = process_build(state.clone(), request(&ws, 2, BuildResult::Success)).await;

  let alice_summary = report.summaries.iter().find(|s| s.user == "alice").unwrap();
  assert_eq!(alice_summary.unsolvable_challenges.len(), 3);
  let alice = state.user("alice").await.unwrap();
  let alice = alice.lock().await;
  let p = alice.project("demo").unwrap();
  assert_eq!(p.rejected_challenges().len(), 3);
  assert!(p.rejected_challenges().iter().all(|(_, r)| *r == "Challenge is not solvable anymore"));
}
