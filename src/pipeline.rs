//! One build pass: read the reports once, then run every participating
//! user's pipeline on a bounded worker pool. Within one user the steps are
//! strictly sequential: build challenge, solvability, solved check,
//! lifecycle move and score, quests, achievements, generation, summary,
//! persistence. Nothing here fails the build; every degraded path logs and
//! moves on.

use std::{path::PathBuf, sync::Arc};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::ProjectState;
use crate::error::ReportError;
use crate::events::{GameEvent, UserSummary};
use crate::factory::{self, GenerationInputs};
use crate::files::{BuildContext, BuildResult, SourceFileDetails};
use crate::reports::{coverage::CoverageSummary, mutation::MutationRecord, ReportReader};
use crate::selector::{filter_candidates, SelectionOptions};
use crate::state::AppState;
use crate::util::now_millis;
use crate::vcs::{ChangedFile, StaticVcs, VcsProvider};

pub const UNSOLVABLE_REASON: &str = "Challenge is not solvable anymore";
pub const UNSOLVABLE_QUEST_REASON: &str = "Quest is not solvable anymore";

/// A finished build announced by the CI side.
#[derive(Clone, Debug, Deserialize)]
pub struct BuildRequest {
    pub project: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub workspace: PathBuf,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub result: BuildResult,
    /// Inline change list; the configured VCS collaborator is used otherwise.
    #[serde(default)]
    pub changes: Option<Vec<ChangedFile>>,
}

fn default_branch() -> String {
    "main".into()
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BuildReport {
    pub project: String,
    pub build_number: u64,
    pub users_processed: usize,
    pub project_coverage: f64,
    pub summaries: Vec<UserSummary>,
}

/// Everything read once per build and shared by all user pipelines.
pub struct BuildInputs {
    pub ctx: BuildContext,
    pub summary: CoverageSummary,
    pub mutations: Option<Vec<MutationRecord>>,
    pub files: Vec<SourceFileDetails>,
}

/// Reports are "absent" for missing files; anything else is worth a warning.
fn log_report_error(what: &str, err: &ReportError) {
    match err {
        ReportError::Missing(path) => {
            debug!(target: "reports", report = what, path = %path.display(), "Report absent");
        }
        other => warn!(target: "reports", report = what, error = %other, "Report unavailable"),
    }
}

/// Read reports and the change list for a build in `ctx`.
pub async fn gather_inputs(reader: &ReportReader, vcs: &dyn VcsProvider, mut ctx: BuildContext) -> BuildInputs {
    let ws = ctx.workspace.clone();
    let summary = reader.coverage_summary(&ws).await.unwrap_or_else(|e| {
        log_report_error("coverage", &e);
        CoverageSummary::default()
    });
    let mutations = match reader.mutations(&ws).await {
        Ok(m) => Some(m),
        Err(e) => {
            log_report_error("mutations", &e);
            None
        }
    };
    ctx.project_coverage = summary.project_coverage();
    ctx.project_tests = match reader.test_counts(&ws).await {
        Ok(t) => t.tests,
        Err(e) => {
            log_report_error("junit", &e);
            0
        }
    };
    let files = vcs.changed_files(&ws, ctx.settings.search_commit_count).unwrap_or_else(|e| {
        log_report_error("changes", &e);
        Vec::new()
    });
    BuildInputs { ctx, summary, mutations, files }
}

/// Files of this build that `is_author` attributes to the user.
pub fn files_of(files: &[SourceFileDetails], is_author: impl Fn(&crate::files::Identity) -> bool) -> Vec<SourceFileDetails> {
    files.iter().filter(|f| f.changed_by.iter().any(&is_author)).cloned().collect()
}

/// Fill open challenge slots: strict candidates first, relaxed ones when
/// they run out, and a dummy if even those are exhausted.
pub async fn fill_challenges<R: Rng + ?Sized>(
    state: &mut ProjectState,
    files: &[SourceFileDetails],
    inputs: &GenerationInputs<'_>,
    rng: &mut R,
    now: i64,
) -> Vec<Uuid> {
    let ws = inputs.ctx.workspace.as_path();
    let strict = filter_candidates(files, inputs.summary, inputs.reader, ws, SelectionOptions::STRICT);
    let mut outcome = factory::generate_new_challenges(state, &strict, inputs, rng, now).await;
    if outcome.exhausted {
        let relaxed = filter_candidates(files, inputs.summary, inputs.reader, ws, SelectionOptions::RELAXED);
        let more = factory::generate_new_challenges(state, &relaxed, inputs, rng, now).await;
        outcome.generated.extend(more.generated);
        outcome.exhausted = more.exhausted;
    }
    if outcome.exhausted {
        outcome.generated.extend(factory::ensure_dummy(state, inputs.ctx, now));
    }
    outcome.generated
}

/// Run a build pass for every participating user.
#[instrument(level = "info", skip(state, req), fields(project = %req.project, branch = %req.branch, build = req.build_number))]
pub async fn process_build(state: Arc<AppState>, req: BuildRequest) -> BuildReport {
    let settings = state.config.project_settings(&req.project);
    let ctx = BuildContext {
        project_name: req.project.clone(),
        branch: req.branch.clone(),
        workspace: req.workspace.clone(),
        build_number: req.build_number,
        result: req.result,
        settings,
        reports: state.config.reports.clone(),
        generation: state.config.generation.clone(),
        project_coverage: 0.0,
        project_tests: 0,
    };
    let inputs = match req.changes {
        Some(entries) => gather_inputs(&state.reader, &StaticVcs { entries }, ctx).await,
        None => gather_inputs(&state.reader, state.vcs.as_ref(), ctx).await,
    };
    let inputs = Arc::new(inputs);
    info!(
        target: "pipeline",
        changed = inputs.files.len(),
        classes = inputs.summary.len(),
        mutations = ?inputs.mutations.as_ref().map(|m| m.len()),
        coverage = inputs.ctx.project_coverage,
        "Build inputs ready"
    );

    let workers = Arc::new(Semaphore::new(state.config.pipeline.workers.max(1)));
    let mut set = JoinSet::new();
    for user in state.user_ids().await {
        let (state, inputs, workers) = (state.clone(), inputs.clone(), workers.clone());
        set.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return None;
            };
            check_user(&state, &inputs, &user).await
        });
    }

    let mut report = BuildReport {
        project: req.project,
        build_number: req.build_number,
        project_coverage: inputs.ctx.project_coverage,
        ..Default::default()
    };
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Some(summary)) => {
                report.users_processed += 1;
                report.summaries.push(summary);
            }
            Ok(None) => {}
            Err(e) => error!(target: "pipeline", error = %e, "User pipeline panicked"),
        }
    }
    report.summaries.sort_by(|a, b| a.user.cmp(&b.user));
    info!(target: "pipeline", users = report.users_processed, "Build pass finished");
    report
}

/// One user's pass. `None` when the user does not take part in the project.
#[instrument(level = "debug", skip(state, inputs), fields(project = %inputs.ctx.project_name))]
pub async fn check_user(state: &AppState, inputs: &BuildInputs, user: &str) -> Option<UserSummary> {
    let shared = state.user(user).await?;
    let mut account = shared.lock().await;
    let ctx = &inputs.ctx;
    let project = ctx.project_name.as_str();
    if !account.participates_in(project) {
        return None;
    }
    let own_files = files_of(&inputs.files, |i| account.is_author(i));
    let defs = state.config.achievement_defs();
    let now = now_millis();
    let mut rng = StdRng::from_entropy();
    let mut summary = UserSummary::new(user, project, ctx.build_number);
    let gen = GenerationInputs {
        ctx,
        reader: &state.reader,
        summary: &inputs.summary,
        mutations: inputs.mutations.as_deref(),
    };
    let publish = |event: GameEvent| state.events.publish(event);

    let ps = account.project_mut(project)?;
    ps.sync_achievements(&defs);

    if !own_files.is_empty() {
        if let Some(id) = factory::generate_build_challenge(ps, &gen, now) {
            debug!(target: "pipeline", %user, %id, "Build challenge generated");
            summary.generated_challenges.extend(ps.challenge(id).map(|c| c.to_string()));
        }
    }

    let mut solved_this_build = 0;
    for id in ps.current_ids() {
        let solvable = match ps.challenge(id) {
            Some(c) => c.is_solvable(ctx, &state.reader).await,
            None => continue,
        };
        if !solvable {
            let text = ps.challenge(id).map(|c| c.to_string()).unwrap_or_default();
            ps.reject_challenge(id, UNSOLVABLE_REASON, now);
            info!(target: "challenge", %user, %id, "Challenge no longer solvable");
            publish(GameEvent::ChallengeUnsolvable { user: user.into(), project: project.into(), challenge: text.clone() });
            summary.unsolvable_challenges.push(text);
            continue;
        }
        let solved = match ps.challenge_mut(id) {
            Some(c) => c.is_solved(ctx, &state.reader, now).await,
            None => false,
        };
        if !solved {
            continue;
        }
        let dummy = ps.challenge(id).is_some_and(|c| c.is_dummy());
        let text = ps.challenge(id).map(|c| c.to_string()).unwrap_or_default();
        let Some(points) = ps.complete_challenge(id) else {
            continue;
        };
        if dummy {
            continue;
        }
        solved_this_build += 1;
        summary.points += points;
        info!(target: "challenge", %user, %id, points, "Challenge solved");
        publish(GameEvent::ChallengeSolved { user: user.into(), project: project.into(), challenge: text.clone(), points });
        summary.solved_challenges.push(text);
    }

    for id in ps.current_quest_ids() {
        let Some(quest) = ps.quest(id) else { continue };
        if quest.is_placeholder() {
            ps.complete_quest(id);
            continue;
        }
        let title = quest.to_string();
        if !quest.is_solvable(ctx, &state.reader).await {
            ps.reject_quest(id, UNSOLVABLE_QUEST_REASON, now);
            info!(target: "quest", %user, %id, "Quest no longer solvable");
            publish(GameEvent::QuestUnsolvable { user: user.into(), project: project.into(), quest: title.clone() });
            summary.unsolvable_quests.push(title);
            continue;
        }
        let progress = match ps.quest_mut(id) {
            Some(q) => q.evaluate(ctx, &state.reader, now).await,
            None => continue,
        };
        if progress.steps_solved > 0 {
            ps.add_score(progress.points);
            summary.points += progress.points;
            publish(GameEvent::QuestStepSolved {
                user: user.into(),
                project: project.into(),
                quest: title.clone(),
                points: progress.points,
            });
            summary.solved_quest_steps.push(title.clone());
        }
        if progress.completed {
            ps.complete_quest(id);
            info!(target: "quest", %user, %id, "Quest solved");
            publish(GameEvent::QuestSolved { user: user.into(), project: project.into(), quest: title.clone() });
            summary.solved_quests.push(title);
        }
    }

    let achievement_ctx = ps.achievement_context(solved_this_build, ctx);
    for a in ps.unlock_achievements(&state.registry, &achievement_ctx, now) {
        info!(target: "achievement", %user, title = %a.def.title, "Achievement unlocked");
        publish(GameEvent::AchievementSolved { user: user.into(), project: project.into(), achievement: a.to_string() });
        summary.solved_achievements.push(a.to_string());
    }

    if ctx.workspace.is_dir() {
        for id in fill_challenges(ps, &own_files, &gen, &mut rng, now).await {
            if let Some(c) = ps.challenge(id) {
                publish(GameEvent::ChallengeGenerated { user: user.into(), project: project.into(), challenge: c.to_string() });
                summary.generated_challenges.push(c.to_string());
            }
        }
        for id in factory::generate_new_quests(ps, &own_files, &gen, &mut rng, now).await {
            summary.generated_quests.extend(ps.quest(id).map(|q| q.to_string()));
        }
    } else {
        warn!(target: "pipeline", %user, workspace = %ctx.workspace.display(), "Workspace missing; skipping generation");
    }

    publish(GameEvent::Summary(summary.clone()));
    if let Err(e) = state.persist(&account, project) {
        error!(target: "pipeline", %user, error = %e, "State of this build pass was not saved");
    }
    Some(summary)
}
