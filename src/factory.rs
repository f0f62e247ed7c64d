//! Turning selected candidates into challenges and quests.
//!
//! Each open slot picks a variant from the configured weights (mutation only
//! when the class has undetected mutants, build only after a failed build)
//! and tries to build it. When no variant works on a candidate, the next
//! candidate is tried. The current-challenge cap is never exceeded.

use std::collections::HashSet;

use rand::{distributions::WeightedIndex, prelude::Distribution, seq::SliceRandom, Rng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::challenge::{
  BuildData, Challenge, ChallengeKind, ClassCoverageData, LineCoverageData, MethodCoverageData, MutationData,
};
use crate::domain::ProjectState;
use crate::files::{BuildContext, SourceFileDetails};
use crate::quest::{Quest, QuestKind, QuestStep, NO_QUEST_MESSAGE};
use crate::reports::{coverage::CoverageSummary, mutation::MutationRecord, ReportReader};
use crate::selector::{draw_weighted, rank_weight, LocationKey};
use crate::util::trunc_for_log;

pub const NOTHING_DEVELOPED_MESSAGE: &str = "You haven't developed anything lately";

/// Steps per generated quest.
const QUEST_STEPS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
  Class,
  Method,
  Line,
  Mutation,
  Build,
}

/// Read-only inputs shared by every generation call in one build pass.
#[derive(Clone, Copy)]
pub struct GenerationInputs<'a> {
  pub ctx: &'a BuildContext,
  pub reader: &'a ReportReader,
  pub summary: &'a CoverageSummary,
  /// `None` when the build produced no mutation report.
  pub mutations: Option<&'a [MutationRecord]>,
}

impl<'a> GenerationInputs<'a> {
  fn undetected_mutants(&self, file: &SourceFileDetails) -> Vec<&'a MutationRecord> {
    self
      .mutations
      .unwrap_or_default()
      .iter()
      .filter(|r| r.is_undetected() && r.belongs_to(&file.package_name, &file.class_name))
      .collect()
  }
}

fn mutation_key(file: &SourceFileDetails, r: &MutationRecord) -> LocationKey {
  LocationKey::Mutation {
    package: file.package_name.clone(),
    class: file.class_name.clone(),
    method: r.mutated_method.clone(),
    line: r.line_number,
    mutator: r.mutator,
    description: r.description.clone(),
  }
}

/// Variants to try on `file`, drawn by weight without replacement. Mutation
/// is only offered when the class has undetected mutants, build only after
/// a failed build.
pub fn variant_order<R: Rng + ?Sized>(inputs: &GenerationInputs<'_>, file: &SourceFileDetails, rng: &mut R) -> Vec<Variant> {
  let w = &inputs.ctx.generation.weights;
  let mutation = if inputs.undetected_mutants(file).is_empty() { 0 } else { w.mutation };
  let build = if inputs.ctx.build_failed() { w.build } else { 0 };
  let mut pool = vec![
    (Variant::Class, w.class),
    (Variant::Method, w.method),
    (Variant::Line, w.line),
    (Variant::Mutation, mutation),
    (Variant::Build, build),
  ];
  pool.retain(|(_, w)| *w > 0);
  let mut order = Vec::with_capacity(pool.len());
  while !pool.is_empty() {
    let Ok(dist) = WeightedIndex::new(pool.iter().map(|(_, w)| *w)) else {
      break;
    };
    order.push(pool.swap_remove(dist.sample(rng)).0);
  }
  order
}

fn class_challenge(
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  excluded: &HashSet<LocationKey>,
  now: i64,
) -> Option<Challenge> {
  if excluded.contains(&file.location()) {
    return None;
  }
  let entry = inputs.summary.get(&file.package_name, &file.class_name)?;
  if entry.lines == 0 || entry.missed_lines == 0 {
    return None;
  }
  Some(Challenge::new(
    inputs.ctx.generation_context(),
    ChallengeKind::ClassCoverage(ClassCoverageData {
      file: file.clone(),
      lines: entry.lines,
      missed_lines: entry.missed_lines,
      coverage: entry.coverage(),
      solved_coverage: 0.0,
    }),
    now,
  ))
}

async fn method_challenges<R: Rng + ?Sized>(
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  excluded: &HashSet<LocationKey>,
  count: usize,
  rng: &mut R,
  now: i64,
) -> Vec<Challenge> {
  let methods = match inputs.reader.methods(&inputs.ctx.workspace, file).await {
    Ok(m) => m,
    Err(e) => {
      debug!(target: "challenge", class = %file.class_name, error = %e, "No method report");
      return Vec::new();
    }
  };
  let key = |m: &crate::reports::coverage::MethodInfo| LocationKey::Method {
    package: file.package_name.clone(),
    class: file.class_name.clone(),
    method: m.name.clone(),
  };
  let max_attempts = inputs.ctx.generation.max_attempts.max(count) * 2;
  draw_weighted(&methods, |m| f64::from(m.missed_lines), key, excluded, count, max_attempts, rng)
    .into_iter()
    .map(|m| {
      Challenge::new(
        inputs.ctx.generation_context(),
        ChallengeKind::MethodCoverage(MethodCoverageData { file: file.clone(), method: m.clone(), solved_coverage: 0.0 }),
        now,
      )
    })
    .collect()
}

async fn line_challenges<R: Rng + ?Sized>(
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  excluded: &HashSet<LocationKey>,
  count: usize,
  rng: &mut R,
  now: i64,
) -> Vec<Challenge> {
  let lines = match inputs.reader.lines(&inputs.ctx.workspace, file).await {
    Ok(l) => l,
    Err(e) => {
      debug!(target: "challenge", class = %file.class_name, error = %e, "No source report");
      return Vec::new();
    }
  };
  let key = |l: &crate::reports::coverage::CoverageLine| LocationKey::Line {
    package: file.package_name.clone(),
    class: file.class_name.clone(),
    line: l.number,
  };
  let max_attempts = inputs.ctx.generation.max_attempts.max(count) * 2;
  draw_weighted(&lines, |l| f64::from(l.missed_count()), key, excluded, count, max_attempts, rng)
    .into_iter()
    .map(|l| {
      Challenge::new(
        inputs.ctx.generation_context(),
        ChallengeKind::LineCoverage(LineCoverageData { file: file.clone(), line: l.clone(), solved_missed: None }),
        now,
      )
    })
    .collect()
}

async fn source_line(inputs: &GenerationInputs<'_>, file: &SourceFileDetails, number: u32) -> String {
  let path = file.absolute_path(&inputs.ctx.workspace);
  match tokio::fs::read_to_string(&path).await {
    Ok(text) => text
      .lines()
      .nth((number as usize).saturating_sub(1))
      .unwrap_or_default()
      .to_string(),
    Err(e) => {
      debug!(target: "challenge", path = %path.display(), error = %e, "Source line unavailable for mutation diff");
      String::new()
    }
  }
}

async fn mutation_challenges<R: Rng + ?Sized>(
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  excluded: &HashSet<LocationKey>,
  count: usize,
  rng: &mut R,
  now: i64,
) -> Vec<Challenge> {
  let mutants = inputs.undetected_mutants(file);
  let max_attempts = inputs.ctx.generation.max_attempts.max(count) * 2;
  let picked = draw_weighted(&mutants, |_| 1.0, |r| mutation_key(file, r), excluded, count, max_attempts, rng);
  let mut out = Vec::with_capacity(picked.len());
  for record in picked {
    let line = source_line(inputs, file, record.line_number).await;
    out.push(Challenge::new(
      inputs.ctx.generation_context(),
      ChallengeKind::MutationCoverage(MutationData {
        file: file.clone(),
        record: (*record).clone(),
        source_line: line,
        solved_killed_by: None,
      }),
      now,
    ));
  }
  out
}

fn build_challenge(inputs: &GenerationInputs<'_>, excluded: &HashSet<LocationKey>, now: i64) -> Option<Challenge> {
  let key = LocationKey::Build { branch: inputs.ctx.branch.clone() };
  if !inputs.ctx.build_failed() || excluded.contains(&key) {
    return None;
  }
  Some(Challenge::new(
    inputs.ctx.generation_context(),
    ChallengeKind::Build(BuildData { failed_result: inputs.ctx.result }),
    now,
  ))
}

/// Build one challenge of `variant` on `file`; `None` when the file offers no
/// eligible location for it.
pub async fn generate_challenge<R: Rng + ?Sized>(
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  variant: Variant,
  excluded: &HashSet<LocationKey>,
  rng: &mut R,
  now: i64,
) -> Option<Challenge> {
  match variant {
    Variant::Class => class_challenge(inputs, file, excluded, now),
    Variant::Method => method_challenges(inputs, file, excluded, 1, rng, now).await.pop(),
    Variant::Line => line_challenges(inputs, file, excluded, 1, rng, now).await.pop(),
    Variant::Mutation => mutation_challenges(inputs, file, excluded, 1, rng, now).await.pop(),
    Variant::Build => build_challenge(inputs, excluded, now),
  }
}

/// Visit order for candidates: a weighted shuffle favouring the front of
/// the (already ordered) list.
fn candidate_order<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<usize> {
  let mut pool: Vec<usize> = (0..len).collect();
  let mut order = Vec::with_capacity(len);
  while !pool.is_empty() {
    let Ok(dist) = WeightedIndex::new(pool.iter().map(|i| rank_weight(*i, len))) else {
      break;
    };
    order.push(pool.swap_remove(dist.sample(rng)));
  }
  order
}

/// Outcome of filling a user's open slots from one candidate list.
#[derive(Debug, Default)]
pub struct GenerationOutcome {
  pub generated: Vec<Uuid>,
  /// Slots were left open because candidates ran out.
  pub exhausted: bool,
}

/// Fill `state`'s current list up to the project cap from `candidates`.
pub async fn generate_new_challenges<R: Rng + ?Sized>(
  state: &mut ProjectState,
  candidates: &[SourceFileDetails],
  inputs: &GenerationInputs<'_>,
  rng: &mut R,
  now: i64,
) -> GenerationOutcome {
  let cap = inputs.ctx.settings.current_challenges_count;
  let mut outcome = GenerationOutcome::default();
  let mut excluded = state.existing_locations();
  let order = candidate_order(candidates.len(), rng);
  let mut cursor = 0usize;

  while state.current_len() < cap {
    let budget = inputs.ctx.generation.max_attempts.max(1);
    let mut made = None;
    let mut attempts = 0;
    while made.is_none() && attempts < budget && cursor < order.len() {
      attempts += 1;
      let file = &candidates[order[cursor]];
      for variant in variant_order(inputs, file, rng) {
        made = generate_challenge(inputs, file, variant, &excluded, rng, now).await;
        if made.is_some() {
          break;
        }
      }
      if made.is_none() {
        cursor += 1;
      }
    }
    match made {
      Some(challenge) => {
        debug!(
          target: "challenge",
          kind = challenge.name(),
          id = %challenge.id,
          text = %trunc_for_log(&challenge.to_string(), 160),
          "Generated challenge"
        );
        if let Some(key) = challenge.location() {
          excluded.insert(key);
        }
        outcome.generated.push(state.new_challenge(challenge));
      }
      None => {
        outcome.exhausted = true;
        break;
      }
    }
  }
  if !outcome.generated.is_empty() {
    info!(target: "challenge", generated = outcome.generated.len(), candidates = candidates.len(), "Challenges generated");
  }
  outcome
}

/// Generate the build-pass challenge after a failed build, if the user has
/// none yet and the cap allows.
pub fn generate_build_challenge(state: &mut ProjectState, inputs: &GenerationInputs<'_>, now: i64) -> Option<Uuid> {
  if state.current_len() >= inputs.ctx.settings.current_challenges_count {
    return None;
  }
  let challenge = build_challenge(inputs, &state.existing_locations(), now)?;
  Some(state.new_challenge(challenge))
}

/// Put a single dummy into an open slot when nothing else could be generated.
pub fn ensure_dummy(state: &mut ProjectState, ctx: &BuildContext, now: i64) -> Option<Uuid> {
  if state.current_len() >= ctx.settings.current_challenges_count || state.has_current_dummy() {
    return None;
  }
  warn!(target: "challenge", project = %ctx.project_name, "No candidates left; adding a dummy challenge");
  Some(state.new_challenge(Challenge::dummy(ctx.generation_context(), NOTHING_DEVELOPED_MESSAGE, now)))
}

async fn build_quest<R: Rng + ?Sized>(
  kind: QuestKind,
  inputs: &GenerationInputs<'_>,
  file: &SourceFileDetails,
  excluded: &HashSet<LocationKey>,
  rng: &mut R,
  now: i64,
) -> Option<Quest> {
  let challenges = match kind {
    QuestKind::LinesInClass => line_challenges(inputs, file, excluded, QUEST_STEPS, rng, now).await,
    QuestKind::MethodsInClass => method_challenges(inputs, file, excluded, QUEST_STEPS, rng, now).await,
    QuestKind::MutantHunt => mutation_challenges(inputs, file, excluded, QUEST_STEPS, rng, now).await,
    QuestKind::Placeholder { .. } => return None,
  };
  if challenges.len() < QUEST_STEPS {
    return None;
  }
  let steps = challenges
    .into_iter()
    .map(|challenge| QuestStep { description: challenge.to_string(), challenge })
    .collect();
  Some(Quest::new(
    kind,
    inputs.ctx.generation_context(),
    file.package_name.clone(),
    file.class_name.clone(),
    steps,
    now,
  ))
}

/// Fill open quest slots. Users below the completed-challenge threshold, or
/// with no class offering enough steps, get one placeholder instead.
pub async fn generate_new_quests<R: Rng + ?Sized>(
  state: &mut ProjectState,
  candidates: &[SourceFileDetails],
  inputs: &GenerationInputs<'_>,
  rng: &mut R,
  now: i64,
) -> Vec<Uuid> {
  let settings = &inputs.ctx.settings;
  let mut generated = Vec::new();
  let mut excluded = state.existing_locations();

  while state.current_quests().len() < settings.current_quests_count {
    let mut quest = None;
    if state.completed_challenge_count() >= settings.quest_min_completed {
      let mut kinds = vec![QuestKind::LinesInClass, QuestKind::MethodsInClass, QuestKind::MutantHunt];
      'search: for file in candidates {
        kinds.shuffle(rng);
        for kind in &kinds {
          if let Some(q) = build_quest(kind.clone(), inputs, file, &excluded, rng, now).await {
            quest = Some(q);
            break 'search;
          }
        }
      }
    }
    match quest {
      Some(q) => {
        for step in &q.steps {
          if let Some(key) = step.challenge.location() {
            excluded.insert(key);
          }
        }
        debug!(target: "quest", title = %q.title(), "Generated quest");
        generated.push(state.new_quest(q));
      }
      None => {
        if !state.current_quests().iter().any(|q| q.is_placeholder()) {
          generated.push(state.new_quest(Quest::placeholder(inputs.ctx.generation_context(), NO_QUEST_MESSAGE, now)));
        }
        break;
      }
    }
  }
  generated
}
