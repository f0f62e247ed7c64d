//! User-initiated lifecycle actions: reject, restore, store, undo store, send
//! and quest rejection. Every check runs before the first mutation, so a
//! failed action leaves all lists untouched. A failed save is reported as
//! `Saving` but the in-memory move stands.

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{info, instrument};

use crate::domain::{ProjectState, UserAccount};
use crate::error::ActionError;
use crate::events::GameEvent;
use crate::factory::GenerationInputs;
use crate::files::{BuildContext, BuildResult, GenerationContext};
use crate::pipeline::{files_of, fill_challenges, gather_inputs};
use crate::quest::{Quest, REJECTED_QUEST_MESSAGE};
use crate::state::AppState;
use crate::util::now_millis;

pub const DEFAULT_REASON: &str = "No reason provided";

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
  pub message: String,
  /// Display strings of challenges generated as replacements.
  pub generated: Vec<String>,
}

impl ActionOutcome {
  fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), generated: Vec::new() }
  }
}

/// An empty reason is refused; a blank one gets the default text.
fn checked_reason(reason: &str) -> Result<String, ActionError> {
  if reason.is_empty() {
    return Err(ActionError::NoReason);
  }
  let trimmed = reason.trim();
  Ok(if trimmed.is_empty() { DEFAULT_REASON.to_string() } else { trimmed.to_string() })
}

fn participating<'a>(account: &'a mut UserAccount, project: &str) -> Result<&'a mut ProjectState, ActionError> {
  account.project_mut(project).filter(|p| p.participating).ok_or(ActionError::NotParticipating)
}

/// Generate replacements for freed slots, in the workspace the freed
/// challenge came from. Skipped when that workspace is gone.
async fn replenish(
  state: &AppState,
  user: &str,
  account: &mut UserAccount,
  project: &str,
  origin: &GenerationContext,
) -> Vec<String> {
  let settings = state.config.project_settings(project);
  let has_room = account.project(project).is_some_and(|p| p.current_len() < settings.current_challenges_count);
  if !has_room || !origin.workspace.is_dir() {
    return Vec::new();
  }
  let ctx = BuildContext {
    project_name: project.to_string(),
    branch: origin.branch.clone(),
    workspace: origin.workspace.clone(),
    build_number: 0,
    result: BuildResult::Success,
    settings,
    reports: state.config.reports.clone(),
    generation: state.config.generation.clone(),
    project_coverage: 0.0,
    project_tests: 0,
  };
  let inputs = gather_inputs(&state.reader, state.vcs.as_ref(), ctx).await;
  let own_files = files_of(&inputs.files, |i| account.is_author(i));
  let Some(ps) = account.project_mut(project) else {
    return Vec::new();
  };
  let gen = GenerationInputs {
    ctx: &inputs.ctx,
    reader: &state.reader,
    summary: &inputs.summary,
    mutations: inputs.mutations.as_deref(),
  };
  let mut rng = StdRng::from_entropy();
  let ids = fill_challenges(ps, &own_files, &gen, &mut rng, now_millis()).await;
  let generated: Vec<String> = ids.into_iter().filter_map(|id| ps.challenge(id)).map(|c| c.to_string()).collect();
  for text in &generated {
    state.events.publish(GameEvent::ChallengeGenerated {
      user: user.into(),
      project: project.into(),
      challenge: text.clone(),
    });
  }
  generated
}

#[instrument(level = "info", skip(state, selector, reason), fields(%user, %project))]
pub async fn reject_challenge(
  state: &AppState,
  user: &str,
  project: &str,
  selector: &str,
  reason: &str,
) -> Result<ActionOutcome, ActionError> {
  let reason = checked_reason(reason)?;
  let shared = state.user(user).await.ok_or(ActionError::UserNotFound)?;
  let mut account = shared.lock().await;
  let ps = participating(&mut account, project)?;
  let id = ps.find_current(selector).ok_or(ActionError::NoChallengeExists)?;
  let challenge = ps.challenge(id).ok_or(ActionError::NoChallengeExists)?;
  if challenge.is_dummy() {
    return Err(ActionError::RejectDummy);
  }
  let text = challenge.to_string();
  let origin = challenge.context.clone();
  ps.reject_challenge(id, &reason, now_millis());
  info!(target: "lifecycle", %user, %id, %reason, "Challenge rejected");
  state.events.publish(GameEvent::ChallengeRejected {
    user: user.into(),
    project: project.into(),
    challenge: text,
    reason,
  });

  let mut outcome = ActionOutcome::new("Challenge rejected");
  outcome.generated = replenish(state, user, &mut account, project, &origin).await;
  state.persist(&account, project)?;
  Ok(outcome)
}

#[instrument(level = "info", skip(state, selector), fields(%user, %project))]
pub async fn restore_challenge(
  state: &AppState,
  user: &str,
  project: &str,
  selector: &str,
) -> Result<ActionOutcome, ActionError> {
  let shared = state.user(user).await.ok_or(ActionError::UserNotFound)?;
  let mut account = shared.lock().await;
  let ps = participating(&mut account, project)?;
  let id = ps.find_rejected(selector).ok_or(ActionError::NoChallengeExists)?;
  ps.restore_challenge(id);
  info!(target: "lifecycle", %user, %id, "Challenge restored");
  state.persist(&account, project)?;
  Ok(ActionOutcome::new("Challenge restored"))
}

#[instrument(level = "info", skip(state, selector), fields(%user, %project))]
pub async fn store_challenge(
  state: &AppState,
  user: &str,
  project: &str,
  selector: &str,
) -> Result<ActionOutcome, ActionError> {
  let limit = state.config.project_settings(project).stored_challenges_count;
  let shared = state.user(user).await.ok_or(ActionError::UserNotFound)?;
  let mut account = shared.lock().await;
  let ps = participating(&mut account, project)?;
  let id = ps.find_current(selector).ok_or(ActionError::NoChallengeExists)?;
  let challenge = ps.challenge(id).ok_or(ActionError::NoChallengeExists)?;
  if challenge.is_dummy() {
    return Err(ActionError::StoreDummy);
  }
  if ps.stored_len() >= limit {
    return Err(ActionError::StorageLimit);
  }
  let text = challenge.to_string();
  let origin = challenge.context.clone();
  ps.store_challenge(id, now_millis());
  info!(target: "lifecycle", %user, %id, "Challenge stored");
  state.events.publish(GameEvent::ChallengeStored { user: user.into(), project: project.into(), challenge: text });

  let mut outcome = ActionOutcome::new("Challenge stored");
  outcome.generated = replenish(state, user, &mut account, project, &origin).await;
  state.persist(&account, project)?;
  Ok(outcome)
}

#[instrument(level = "info", skip(state, selector), fields(%user, %project))]
pub async fn undo_store_challenge(
  state: &AppState,
  user: &str,
  project: &str,
  selector: &str,
) -> Result<ActionOutcome, ActionError> {
  let shared = state.user(user).await.ok_or(ActionError::UserNotFound)?;
  let mut account = shared.lock().await;
  let ps = participating(&mut account, project)?;
  let id = ps.find_stored(selector).ok_or(ActionError::NoChallengeExists)?;
  ps.undo_store_challenge(id);
  info!(target: "lifecycle", %user, %id, "Challenge taken out of storage");
  state.persist(&account, project)?;
  Ok(ActionOutcome::new("Challenge moved back to current challenges"))
}

/// Hand a stored challenge to another participant's storage. Both users are
/// locked for the whole move, so no reader sees the challenge in two places.
#[instrument(level = "info", skip(state, selector), fields(%from, %to, %project))]
pub async fn send_challenge(
  state: &AppState,
  from: &str,
  to: &str,
  project: &str,
  selector: &str,
) -> Result<ActionOutcome, ActionError> {
  if from == to {
    return Err(ActionError::ReceiverIsSelf);
  }
  let settings = state.config.project_settings(project);
  if !settings.can_send_challenge {
    return Err(ActionError::SendingDisabled);
  }
  let (mut sender, mut receiver) = state.lock_pair(from, to).await?;
  let sps = participating(&mut sender, project)?;
  let rps = participating(&mut receiver, project)?;
  let id = sps.find_stored(selector).ok_or(ActionError::NoChallengeExists)?;
  if rps.stored_len() >= settings.stored_challenges_count {
    return Err(ActionError::StorageLimit);
  }
  let challenge = sps.take_stored(id).ok_or(ActionError::NoChallengeExists)?;
  let text = challenge.to_string();
  rps.receive_stored(challenge);
  info!(target: "lifecycle", %from, %to, %id, "Challenge sent");
  state.events.publish(GameEvent::ChallengeSent {
    from: from.into(),
    to: to.into(),
    project: project.into(),
    challenge: text,
  });

  let saved_sender = state.persist(&sender, project);
  let saved_receiver = state.persist(&receiver, project);
  saved_sender.and(saved_receiver)?;
  Ok(ActionOutcome::new(format!("Challenge sent to {to}")))
}

/// Reject the current quest. A real quest is replaced by a placeholder
/// until the next build; rejecting a placeholder just drops it.
#[instrument(level = "info", skip(state, selector, reason), fields(%user, %project))]
pub async fn reject_quest(
  state: &AppState,
  user: &str,
  project: &str,
  selector: &str,
  reason: &str,
) -> Result<ActionOutcome, ActionError> {
  let reason = checked_reason(reason)?;
  let shared = state.user(user).await.ok_or(ActionError::UserNotFound)?;
  let mut account = shared.lock().await;
  let ps = participating(&mut account, project)?;
  let id = ps.find_current_quest(selector).ok_or(ActionError::NoQuestExists)?;
  let quest = ps.quest(id).ok_or(ActionError::NoQuestExists)?;
  let placeholder = quest.is_placeholder();
  let title = quest.to_string();
  let context = quest.context.clone();
  let now = now_millis();
  let lifecycle = ps.reject_quest(id, &reason, now);
  info!(target: "lifecycle", %user, %id, ?lifecycle, "Quest rejected");
  if !placeholder {
    ps.new_quest(Quest::placeholder(context, REJECTED_QUEST_MESSAGE, now));
    state.events.publish(GameEvent::QuestRejected { user: user.into(), project: project.into(), quest: title, reason });
  }
  state.persist(&account, project)?;
  Ok(ActionOutcome::new("Quest rejected"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::challenge::{BuildData, Challenge, ChallengeKind};
  use crate::config::GameConfig;
  use crate::quest::QuestStep;
  use crate::state::{test_support::state_in, Registration};
  use crate::vcs::StaticVcs;
  use std::path::Path;
  use tempfile::TempDir;
  use tokio::sync::mpsc;

  fn challenge(branch: &str) -> Challenge {
    let ctx = GenerationContext { project_name: "demo".into(), branch: branch.into(), workspace: "/gone".into() };
    Challenge::new(ctx, ChallengeKind::Build(BuildData::default()), 1)
  }

  async fn setup_with_events(dir: &Path, config: GameConfig) -> (AppState, mpsc::Receiver<GameEvent>) {
    let (state, rx) = state_in(dir, config, StaticVcs::default());
    for user in ["alice", "bob"] {
      state
        .register_user(Registration { user: user.into(), project: "demo".into(), ..Default::default() })
        .await
        .unwrap();
    }
    (state, rx)
  }

  async fn setup(dir: &Path, config: GameConfig) -> AppState {
    setup_with_events(dir, config).await.0
  }

  async fn with_project<T>(state: &AppState, user: &str, f: impl FnOnce(&mut ProjectState) -> T) -> T {
    let shared = state.user(user).await.unwrap();
    let mut account = shared.lock().await;
    f(account.project_mut("demo").unwrap())
  }

  #[test]
  fn reasons() {
    assert_eq!(checked_reason(""), Err(ActionError::NoReason));
    assert_eq!(checked_reason("   ").unwrap(), DEFAULT_REASON);
    assert_eq!(checked_reason(" too hard ").unwrap(), "too hard");
  }

  #[tokio::test]
  async fn reject_and_restore() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let id = with_project(&state, "alice", |p| p.new_challenge(challenge("main"))).await;

    assert_eq!(
      reject_challenge(&state, "alice", "demo", &id.to_string(), "").await.unwrap_err(),
      ActionError::NoReason
    );
    reject_challenge(&state, "alice", "demo", &id.to_string(), "boring").await.unwrap();
    let rejected = with_project(&state, "alice", |p| p.rejected_challenges().len()).await;
    assert_eq!(rejected, 1);

    restore_challenge(&state, "alice", "demo", &id.to_string()).await.unwrap();
    assert_eq!(with_project(&state, "alice", |p| p.current_len()).await, 1);
    assert_eq!(
      restore_challenge(&state, "alice", "demo", &id.to_string()).await.unwrap_err(),
      ActionError::NoChallengeExists
    );
  }

  #[tokio::test]
  async fn replacements_are_announced() {
    let dir = TempDir::new().unwrap();
    let (state, mut rx) = setup_with_events(dir.path(), GameConfig::default()).await;
    let origin = GenerationContext {
      project_name: "demo".into(),
      branch: "main".into(),
      workspace: dir.path().to_path_buf(),
    };
    let id = with_project(&state, "alice", |p| {
      p.new_challenge(Challenge::new(origin, ChallengeKind::Build(BuildData::default()), 1))
    })
    .await;

    let outcome = reject_challenge(&state, "alice", "demo", &id.to_string(), "flaky").await.unwrap();
    assert_eq!(outcome.generated.len(), 1, "the freed slot is refilled");

    let mut generated = Vec::new();
    while let Ok(ev) = rx.try_recv() {
      if let GameEvent::ChallengeGenerated { user, challenge, .. } = ev {
        assert_eq!(user, "alice");
        generated.push(challenge);
      }
    }
    assert_eq!(generated, outcome.generated);
  }

  #[tokio::test]
  async fn dummies_cannot_be_rejected_or_stored() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let id = with_project(&state, "alice", |p| p.new_challenge(Challenge::dummy(GenerationContext::default(), "nothing", 1))).await;
    let sel = id.to_string();
    assert_eq!(reject_challenge(&state, "alice", "demo", &sel, "x").await.unwrap_err(), ActionError::RejectDummy);
    assert_eq!(store_challenge(&state, "alice", "demo", &sel).await.unwrap_err(), ActionError::StoreDummy);
    assert_eq!(with_project(&state, "alice", |p| p.current_len()).await, 1);
  }

  #[tokio::test]
  async fn storage_limit_leaves_lists_unchanged() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let ids = with_project(&state, "alice", |p| {
      ["a", "b", "c"].iter().map(|b| p.new_challenge(challenge(b))).collect::<Vec<_>>()
    })
    .await;
    store_challenge(&state, "alice", "demo", &ids[0].to_string()).await.unwrap();
    store_challenge(&state, "alice", "demo", &ids[1].to_string()).await.unwrap();
    let err = store_challenge(&state, "alice", "demo", &ids[2].to_string()).await.unwrap_err();
    assert_eq!(err, ActionError::StorageLimit);
    let (current, stored) = with_project(&state, "alice", |p| (p.current_len(), p.stored_len())).await;
    assert_eq!((current, stored), (1, 2));

    undo_store_challenge(&state, "alice", "demo", &ids[0].to_string()).await.unwrap();
    assert_eq!(with_project(&state, "alice", |p| p.stored_len()).await, 1);
  }

  #[tokio::test]
  async fn send_moves_between_storages() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let id = with_project(&state, "alice", |p| {
      let id = p.new_challenge(challenge("main"));
      p.store_challenge(id, 2);
      id
    })
    .await;
    let sel = id.to_string();

    assert_eq!(send_challenge(&state, "alice", "alice", "demo", &sel).await.unwrap_err(), ActionError::ReceiverIsSelf);
    assert_eq!(send_challenge(&state, "alice", "carol", "demo", &sel).await.unwrap_err(), ActionError::UserNotFound);
    assert_eq!(with_project(&state, "alice", |p| p.stored_len()).await, 1);

    send_challenge(&state, "alice", "bob", "demo", &sel).await.unwrap();
    assert_eq!(with_project(&state, "alice", |p| p.membership_count(id)).await, 0);
    assert_eq!(with_project(&state, "bob", |p| p.find_stored(&sel)).await, Some(id));
  }

  #[tokio::test]
  async fn full_receiver_storage_keeps_sender_intact() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let id = with_project(&state, "alice", |p| {
      let id = p.new_challenge(challenge("main"));
      p.store_challenge(id, 2);
      id
    })
    .await;
    let limit = state.config.project_settings("demo").stored_challenges_count;
    with_project(&state, "bob", |p| {
      for n in 0..limit {
        let own = p.new_challenge(challenge(&format!("bob-{n}")));
        p.store_challenge(own, 2);
      }
    })
    .await;

    let sel = id.to_string();
    let err = send_challenge(&state, "alice", "bob", "demo", &sel).await.unwrap_err();
    assert_eq!(err, ActionError::StorageLimit);
    assert_eq!(with_project(&state, "alice", |p| p.find_stored(&sel)).await, Some(id));
    assert_eq!(with_project(&state, "alice", |p| p.membership_count(id)).await, 1);
    assert_eq!(with_project(&state, "bob", |p| p.stored_len()).await, limit);
    assert_eq!(with_project(&state, "bob", |p| p.find_stored(&sel)).await, None);
  }

  #[tokio::test]
  async fn sending_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let mut config = GameConfig::default();
    config.default_project.can_send_challenge = false;
    let state = setup(dir.path(), config).await;
    let err = send_challenge(&state, "alice", "bob", "demo", "anything").await.unwrap_err();
    assert_eq!(err, ActionError::SendingDisabled);
  }

  #[tokio::test]
  async fn rejected_quest_leaves_placeholder() {
    let dir = TempDir::new().unwrap();
    let state = setup(dir.path(), GameConfig::default()).await;
    let id = with_project(&state, "alice", |p| {
      let step = QuestStep { description: "s".into(), challenge: challenge("main") };
      p.new_quest(Quest::new(
        crate::quest::QuestKind::MutantHunt,
        GenerationContext::default(),
        "p".into(),
        "C".into(),
        vec![step],
        1,
      ))
    })
    .await;
    reject_quest(&state, "alice", "demo", &id.to_string(), "meh").await.unwrap();
    let (rejected, current) = with_project(&state, "alice", |p| {
      (p.rejected_quests().len(), p.current_quests().iter().map(|q| q.to_string()).collect::<Vec<_>>())
    })
    .await;
    assert_eq!(rejected, 1);
    assert_eq!(current, [REJECTED_QUEST_MESSAGE]);

    let placeholder = with_project(&state, "alice", |p| p.current_quest_ids()[0]).await;
    reject_quest(&state, "alice", "demo", &placeholder.to_string(), "x").await.unwrap();
    assert!(with_project(&state, "alice", |p| p.current_quests().is_empty()).await);
  }
}
