//! Per-user state. Challenges and quests live in per-project arenas keyed by
//! id; the lifecycle lists only hold ids, so an object sits in exactly one
//! list at a time. Every move removes from one list and appends to another.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::achievement::{Achievement, AchievementContext, AchievementDef, AchievementRegistry};
use crate::challenge::Challenge;
use crate::files::{BuildContext, Identity};
use crate::quest::Quest;
use crate::selector::LocationKey;
use crate::util::escape_xml;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
  pub id: Uuid,
  pub reason: String,
}

/// Which lifecycle list currently holds an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
  Current,
  Completed,
  Rejected,
  Stored,
  Unfinished,
}

/// One user's standing in one project. Unknown or newly added lists default
/// to empty when an older document is loaded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
  pub participating: bool,
  pub team: Option<String>,
  pub score: u64,
  challenges: HashMap<Uuid, Challenge>,
  current: Vec<Uuid>,
  completed: Vec<Uuid>,
  rejected: Vec<Rejection>,
  stored: Vec<Uuid>,
  quests: HashMap<Uuid, Quest>,
  current_quests: Vec<Uuid>,
  completed_quests: Vec<Uuid>,
  rejected_quests: Vec<Rejection>,
  unfinished_quests: Vec<Rejection>,
  unsolved_achievements: Vec<Achievement>,
  completed_achievements: Vec<Achievement>,
}

fn take_id(list: &mut Vec<Uuid>, id: Uuid) -> bool {
  match list.iter().position(|x| *x == id) {
    Some(pos) => {
      list.remove(pos);
      true
    }
    None => false,
  }
}

fn take_rejection(list: &mut Vec<Rejection>, id: Uuid) -> Option<Rejection> {
  let pos = list.iter().position(|r| r.id == id)?;
  Some(list.remove(pos))
}

impl ProjectState {
  pub fn participating(team: Option<String>) -> Self {
    Self { participating: true, team, ..Default::default() }
  }

  pub fn challenge(&self, id: Uuid) -> Option<&Challenge> {
    self.challenges.get(&id)
  }

  pub fn challenge_mut(&mut self, id: Uuid) -> Option<&mut Challenge> {
    self.challenges.get_mut(&id)
  }

  fn resolve<'a>(&'a self, ids: &'a [Uuid]) -> impl Iterator<Item = &'a Challenge> + 'a {
    ids.iter().filter_map(|id| self.challenges.get(id))
  }

  pub fn current_challenges(&self) -> Vec<&Challenge> {
    self.resolve(&self.current).collect()
  }

  pub fn completed_challenges(&self) -> Vec<&Challenge> {
    self.resolve(&self.completed).collect()
  }

  pub fn stored_challenges(&self) -> Vec<&Challenge> {
    self.resolve(&self.stored).collect()
  }

  pub fn rejected_challenges(&self) -> Vec<(&Challenge, &str)> {
    self
      .rejected
      .iter()
      .filter_map(|r| self.challenges.get(&r.id).map(|c| (c, r.reason.as_str())))
      .collect()
  }

  pub fn current_ids(&self) -> Vec<Uuid> {
    self.current.clone()
  }

  pub fn current_len(&self) -> usize {
    self.current.len()
  }

  pub fn stored_len(&self) -> usize {
    self.stored.len()
  }

  pub fn lifecycle_of(&self, id: Uuid) -> Option<Lifecycle> {
    if self.current.contains(&id) || self.current_quests.contains(&id) {
      Some(Lifecycle::Current)
    } else if self.completed.contains(&id) || self.completed_quests.contains(&id) {
      Some(Lifecycle::Completed)
    } else if self.rejected.iter().any(|r| r.id == id) || self.rejected_quests.iter().any(|r| r.id == id) {
      Some(Lifecycle::Rejected)
    } else if self.stored.contains(&id) {
      Some(Lifecycle::Stored)
    } else if self.unfinished_quests.iter().any(|r| r.id == id) {
      Some(Lifecycle::Unfinished)
    } else {
      None
    }
  }

  /// Number of lists `id` appears in; 1 for every live object.
  pub fn membership_count(&self, id: Uuid) -> usize {
    [
      self.current.iter().filter(|x| **x == id).count(),
      self.completed.iter().filter(|x| **x == id).count(),
      self.rejected.iter().filter(|r| r.id == id).count(),
      self.stored.iter().filter(|x| **x == id).count(),
    ]
    .iter()
    .sum()
  }

  pub fn new_challenge(&mut self, challenge: Challenge) -> Uuid {
    let id = challenge.id;
    self.challenges.insert(id, challenge);
    self.current.push(id);
    id
  }

  /// Current -> completed; adds the challenge's score. Dummies are dropped
  /// instead and score nothing.
  pub fn complete_challenge(&mut self, id: Uuid) -> Option<u32> {
    if !take_id(&mut self.current, id) {
      return None;
    }
    let challenge = self.challenges.get(&id)?;
    if challenge.is_dummy() {
      self.challenges.remove(&id);
      return Some(0);
    }
    let points = challenge.score();
    self.completed.push(id);
    self.score += u64::from(points);
    Some(points)
  }

  /// Current -> rejected.
  pub fn reject_challenge(&mut self, id: Uuid, reason: &str, now: i64) -> bool {
    if !take_id(&mut self.current, id) {
      return false;
    }
    if let Some(c) = self.challenges.get_mut(&id) {
      c.rejected = now;
    }
    self.rejected.push(Rejection { id, reason: reason.to_string() });
    true
  }

  /// Rejected -> current.
  pub fn restore_challenge(&mut self, id: Uuid) -> bool {
    if take_rejection(&mut self.rejected, id).is_none() {
      return false;
    }
    if let Some(c) = self.challenges.get_mut(&id) {
      c.rejected = 0;
    }
    self.current.push(id);
    true
  }

  /// Current -> stored.
  pub fn store_challenge(&mut self, id: Uuid, now: i64) -> bool {
    if !take_id(&mut self.current, id) {
      return false;
    }
    if let Some(c) = self.challenges.get_mut(&id) {
      c.stored = now;
    }
    self.stored.push(id);
    true
  }

  /// Stored -> current.
  pub fn undo_store_challenge(&mut self, id: Uuid) -> bool {
    if !take_id(&mut self.stored, id) {
      return false;
    }
    if let Some(c) = self.challenges.get_mut(&id) {
      c.stored = 0;
    }
    self.current.push(id);
    true
  }

  /// Remove a stored challenge from this user entirely, for handing over.
  pub fn take_stored(&mut self, id: Uuid) -> Option<Challenge> {
    if !take_id(&mut self.stored, id) {
      return None;
    }
    self.challenges.remove(&id)
  }

  pub fn receive_stored(&mut self, challenge: Challenge) {
    let id = challenge.id;
    self.challenges.insert(id, challenge);
    self.stored.push(id);
  }

  fn find_in<'a>(&'a self, ids: impl Iterator<Item = &'a Uuid>, selector: &str) -> Option<Uuid> {
    let selector = selector.trim();
    let by_id = Uuid::parse_str(selector).ok();
    ids
      .filter_map(|id| self.challenges.get(id))
      .find(|c| Some(c.id) == by_id || c.to_escaped_string() == selector || c.to_string() == selector)
      .map(|c| c.id)
  }

  /// Match a UI selection (id, display text or escaped display text).
  pub fn find_current(&self, selector: &str) -> Option<Uuid> {
    self.find_in(self.current.iter(), selector)
  }

  pub fn find_rejected(&self, selector: &str) -> Option<Uuid> {
    self.find_in(self.rejected.iter().map(|r| &r.id), selector)
  }

  pub fn find_stored(&self, selector: &str) -> Option<Uuid> {
    self.find_in(self.stored.iter(), selector)
  }

  /// Locations of every open, solved, rejected and stored challenge, plus
  /// the steps of current quests.
  pub fn existing_locations(&self) -> HashSet<LocationKey> {
    let challenge_ids = self
      .current
      .iter()
      .chain(self.completed.iter())
      .chain(self.rejected.iter().map(|r| &r.id))
      .chain(self.stored.iter());
    let mut out: HashSet<LocationKey> =
      challenge_ids.filter_map(|id| self.challenges.get(id)).filter_map(|c| c.location()).collect();
    for q in self.current_quests() {
      out.extend(q.steps.iter().filter_map(|s| s.challenge.location()));
    }
    out
  }

  pub fn has_current_build_challenge(&self) -> bool {
    self.current_challenges().iter().any(|c| c.is_build())
  }

  pub fn has_current_dummy(&self) -> bool {
    self.current_challenges().iter().any(|c| c.is_dummy())
  }

  // Quests

  pub fn quest(&self, id: Uuid) -> Option<&Quest> {
    self.quests.get(&id)
  }

  pub fn quest_mut(&mut self, id: Uuid) -> Option<&mut Quest> {
    self.quests.get_mut(&id)
  }

  pub fn current_quests(&self) -> Vec<&Quest> {
    self.current_quests.iter().filter_map(|id| self.quests.get(id)).collect()
  }

  pub fn current_quest_ids(&self) -> Vec<Uuid> {
    self.current_quests.clone()
  }

  pub fn completed_quests(&self) -> Vec<&Quest> {
    self.completed_quests.iter().filter_map(|id| self.quests.get(id)).collect()
  }

  pub fn rejected_quests(&self) -> Vec<(&Quest, &str)> {
    self
      .rejected_quests
      .iter()
      .chain(self.unfinished_quests.iter())
      .filter_map(|r| self.quests.get(&r.id).map(|q| (q, r.reason.as_str())))
      .collect()
  }

  pub fn new_quest(&mut self, quest: Quest) -> Uuid {
    let id = quest.id;
    self.quests.insert(id, quest);
    self.current_quests.push(id);
    id
  }

  /// Award points for a solved step of a current quest.
  pub fn add_score(&mut self, points: u32) {
    self.score += u64::from(points);
  }

  /// Current -> completed. Placeholders vanish instead.
  pub fn complete_quest(&mut self, id: Uuid) -> bool {
    if !take_id(&mut self.current_quests, id) {
      return false;
    }
    if self.quests.get(&id).is_some_and(|q| q.is_placeholder()) {
      self.quests.remove(&id);
    } else {
      self.completed_quests.push(id);
    }
    true
  }

  /// Current -> rejected, or unfinished when some steps were already solved.
  /// Placeholders are dropped.
  pub fn reject_quest(&mut self, id: Uuid, reason: &str, now: i64) -> Option<Lifecycle> {
    if !take_id(&mut self.current_quests, id) {
      return None;
    }
    let quest = self.quests.get_mut(&id)?;
    if quest.is_placeholder() {
      self.quests.remove(&id);
      return Some(Lifecycle::Rejected);
    }
    quest.rejected = now;
    let entry = Rejection { id, reason: reason.to_string() };
    if quest.current_step > 0 {
      self.unfinished_quests.push(entry);
      Some(Lifecycle::Unfinished)
    } else {
      self.rejected_quests.push(entry);
      Some(Lifecycle::Rejected)
    }
  }

  pub fn find_current_quest(&self, selector: &str) -> Option<Uuid> {
    let selector = selector.trim();
    let by_id = Uuid::parse_str(selector).ok();
    self
      .current_quests()
      .into_iter()
      .find(|q| Some(q.id) == by_id || q.to_escaped_string() == selector || q.to_string() == selector)
      .map(|q| q.id)
  }

  pub fn completed_challenge_count(&self) -> usize {
    self.completed.len()
  }

  // Achievements

  /// Add configured achievements this user does not hold yet.
  pub fn sync_achievements(&mut self, defs: &[AchievementDef]) {
    for def in defs {
      let candidate = Achievement::locked(def.clone());
      if !self.unsolved_achievements.contains(&candidate) && !self.completed_achievements.contains(&candidate) {
        self.unsolved_achievements.push(candidate);
      }
    }
  }

  /// Unlock every achievement whose predicate now holds.
  pub fn unlock_achievements(
    &mut self,
    registry: &AchievementRegistry,
    ctx: &AchievementContext,
    now: i64,
  ) -> Vec<Achievement> {
    let mut unlocked = Vec::new();
    let mut still_locked = Vec::new();
    for mut a in std::mem::take(&mut self.unsolved_achievements) {
      if a.try_unlock(registry, ctx, now) {
        unlocked.push(a.clone());
        self.completed_achievements.push(a);
      } else {
        still_locked.push(a);
      }
    }
    self.unsolved_achievements = still_locked;
    unlocked
  }

  pub fn unsolved_achievements(&self) -> &[Achievement] {
    &self.unsolved_achievements
  }

  pub fn completed_achievements(&self) -> &[Achievement] {
    &self.completed_achievements
  }

  pub fn achievement_context(&self, solved_this_build: usize, ctx: &BuildContext) -> AchievementContext {
    AchievementContext {
      completed_challenges: self.completed.len(),
      completed_build_challenges: self.completed_challenges().iter().filter(|c| c.is_build()).count(),
      solved_this_build,
      completed_quests: self.completed_quests.len(),
      project_coverage: ctx.project_coverage,
      project_tests: ctx.project_tests,
    }
  }

  pub fn print_to_xml(&self, pseudonym: &Uuid, project: &str, indent: &str) -> String {
    let i1 = format!("{indent}    ");
    let i2 = format!("{indent}        ");
    let mut out = format!(
      "{indent}<User id=\"{pseudonym}\" project=\"{}\" score=\"{}\">\n",
      escape_xml(project),
      self.score
    );
    let mut section = |name: &str, items: Vec<String>| {
      out.push_str(&format!("{i1}<{name} count=\"{}\">\n", items.len()));
      for item in items {
        out.push_str(&item);
        out.push('\n');
      }
      out.push_str(&format!("{i1}</{name}>\n"));
    };
    section("CurrentChallenges", self.current_challenges().iter().map(|c| c.print_to_xml(None, &i2)).collect());
    section("CompletedChallenges", self.completed_challenges().iter().map(|c| c.print_to_xml(None, &i2)).collect());
    section(
      "RejectedChallenges",
      self.rejected_challenges().iter().map(|(c, r)| c.print_to_xml(Some(r), &i2)).collect(),
    );
    section("StoredChallenges", self.stored_challenges().iter().map(|c| c.print_to_xml(None, &i2)).collect());
    section("CurrentQuests", self.current_quests().iter().map(|q| q.print_to_xml(None, &i2)).collect());
    section("CompletedQuests", self.completed_quests().iter().map(|q| q.print_to_xml(None, &i2)).collect());
    section(
      "RejectedQuests",
      self.rejected_quests().iter().map(|(q, r)| q.print_to_xml(Some(r), &i2)).collect(),
    );
    section("Achievements", self.completed_achievements.iter().map(|a| a.print_to_xml(&i2)).collect());
    out.push_str(&format!("{indent}</User>"));
    out
  }
}

/// A registered user and their per-project state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserAccount {
  pub id: String,
  pub display_name: String,
  /// Stable anonymous identifier used in exported state.
  pub pseudonym: Uuid,
  /// Commit author names and e-mails that belong to this user.
  #[serde(default)]
  pub git_names: BTreeSet<String>,
  #[serde(default)]
  pub notifications: bool,
  #[serde(default, skip_serializing)]
  pub projects: HashMap<String, ProjectState>,
}

impl UserAccount {
  pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
    let id = id.into();
    let display_name = display_name.into();
    let mut git_names = BTreeSet::new();
    git_names.insert(display_name.clone());
    Self { id, display_name, pseudonym: Uuid::new_v4(), git_names, notifications: false, projects: HashMap::new() }
  }

  pub fn is_author(&self, identity: &Identity) -> bool {
    self.git_names.contains(&identity.name) || (!identity.email.is_empty() && self.git_names.contains(&identity.email))
  }

  pub fn participates_in(&self, project: &str) -> bool {
    self.projects.get(project).is_some_and(|p| p.participating)
  }

  pub fn project(&self, project: &str) -> Option<&ProjectState> {
    self.projects.get(project)
  }

  pub fn project_mut(&mut self, project: &str) -> Option<&mut ProjectState> {
    self.projects.get_mut(project)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::challenge::{BuildData, ChallengeKind};
  use crate::files::GenerationContext;

  fn build_challenge() -> Challenge {
    Challenge::new(GenerationContext::default(), ChallengeKind::Build(BuildData::default()), 1)
  }

  fn assert_single_membership(state: &ProjectState, id: Uuid) {
    assert_eq!(state.membership_count(id), 1);
    let c = state.challenge(id).unwrap();
    let stamps = [c.solved, c.rejected, c.stored].iter().filter(|t| **t != 0).count();
    assert!(stamps <= 1);
    if state.lifecycle_of(id) == Some(Lifecycle::Current) {
      assert_eq!(stamps, 0);
    }
  }

  #[test]
  fn moves_keep_single_membership() {
    let mut s = ProjectState::participating(None);
    let id = s.new_challenge(build_challenge());
    assert_single_membership(&s, id);

    assert!(s.store_challenge(id, 5));
    assert_eq!(s.lifecycle_of(id), Some(Lifecycle::Stored));
    assert_single_membership(&s, id);
    assert!(!s.store_challenge(id, 6));

    assert!(s.undo_store_challenge(id));
    assert_single_membership(&s, id);

    assert!(s.reject_challenge(id, "meh", 7));
    assert_eq!(s.lifecycle_of(id), Some(Lifecycle::Rejected));
    assert_single_membership(&s, id);

    assert!(s.restore_challenge(id));
    assert_eq!(s.lifecycle_of(id), Some(Lifecycle::Current));
    assert_single_membership(&s, id);

    s.challenge_mut(id).unwrap().solved = 9;
    assert_eq!(s.complete_challenge(id), Some(1));
    assert_eq!(s.score, 1);
    assert_single_membership(&s, id);
  }

  #[test]
  fn dummies_are_discarded_on_completion() {
    let mut s = ProjectState::participating(None);
    let id = s.new_challenge(Challenge::dummy(GenerationContext::default(), "nothing", 1));
    assert_eq!(s.complete_challenge(id), Some(0));
    assert!(s.challenge(id).is_none());
    assert!(s.completed_challenges().is_empty());
    assert_eq!(s.score, 0);
  }

  #[test]
  fn escaped_strings_find_the_same_object() {
    let mut s = ProjectState::participating(None);
    let id = s.new_challenge(build_challenge());
    let escaped = s.challenge(id).unwrap().to_escaped_string();
    assert_eq!(s.find_current(&escaped), Some(id));
    assert_eq!(s.find_current(&id.to_string()), Some(id));
    assert_eq!(s.find_current("nope"), None);
  }

  #[test]
  fn send_transfer_moves_between_states() {
    let mut a = ProjectState::participating(None);
    let mut b = ProjectState::participating(None);
    let id = a.new_challenge(build_challenge());
    a.store_challenge(id, 3);
    let c = a.take_stored(id).unwrap();
    b.receive_stored(c);
    assert!(a.challenge(id).is_none());
    assert_eq!(b.lifecycle_of(id), Some(Lifecycle::Stored));
  }

  #[test]
  fn quest_rejection_depends_on_progress() {
    use crate::quest::{Quest, QuestKind, QuestStep};
    let mut s = ProjectState::participating(None);
    let step = || QuestStep { description: "s".into(), challenge: build_challenge() };
    let fresh = s.new_quest(Quest::new(QuestKind::LinesInClass, GenerationContext::default(), "p".into(), "C".into(), vec![step()], 1));
    let mut started = Quest::new(QuestKind::LinesInClass, GenerationContext::default(), "p".into(), "D".into(), vec![step(), step()], 1);
    started.current_step = 1;
    let started = s.new_quest(started);
    let placeholder = s.new_quest(Quest::placeholder(GenerationContext::default(), "none", 1));

    assert_eq!(s.reject_quest(fresh, "x", 2), Some(Lifecycle::Rejected));
    assert_eq!(s.reject_quest(started, "x", 2), Some(Lifecycle::Unfinished));
    assert_eq!(s.reject_quest(placeholder, "x", 2), Some(Lifecycle::Rejected));
    assert!(s.quest(placeholder).is_none());
    assert_eq!(s.rejected_quests().len(), 2);
    assert!(s.current_quests().is_empty());
  }

  #[test]
  fn xml_counts_match_children() {
    let mut s = ProjectState::participating(None);
    let a = s.new_challenge(build_challenge());
    s.new_challenge(build_challenge());
    s.reject_challenge(a, "because", 4);
    let xml = s.print_to_xml(&Uuid::nil(), "demo", "");
    assert!(xml.contains("<CurrentChallenges count=\"1\">"));
    assert!(xml.contains("<RejectedChallenges count=\"1\">"));
    assert!(xml.contains("reason=\"because\""));
    assert!(xml.contains("<StoredChallenges count=\"0\">"));
  }

  #[test]
  fn older_documents_load_with_empty_lists() {
    let s: ProjectState = serde_json::from_str(r#"{"participating": true, "score": 7}"#).unwrap();
    assert_eq!(s.score, 7);
    assert!(s.current_challenges().is_empty());
    assert!(s.unsolved_achievements().is_empty());
  }
}
