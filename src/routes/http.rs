//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! pipeline and the lifecycle actions. Each handler is instrumented.

use std::sync::Arc;
use axum::{
  extract::{Path, State},
  http::header,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::actions::{self, ActionOutcome};
use crate::error::ActionError;
use crate::pipeline::{process_build, BuildReport, BuildRequest};
use crate::protocol::*;
use crate::state::{AppState, Registration};

type ActionResult = Result<Json<ActionOutcome>, ActionError>;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(project = %body.project, build = body.build_number))]
pub async fn http_post_build(
  State(state): State<Arc<AppState>>,
  Json(body): Json<BuildRequest>,
) -> Json<BuildReport> {
  let report = process_build(state, body).await;
  info!(target: "pipeline", users = report.users_processed, "HTTP build pass served");
  Json(report)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_user(
  State(state): State<Arc<AppState>>,
  Json(body): Json<RegisterIn>,
) -> Result<Json<RegisterOut>, ActionError> {
  let shared = state
    .register_user(Registration {
      user: body.user.clone(),
      display_name: body.display_name,
      git_names: body.git_names,
      project: body.project.clone(),
      team: body.team,
    })
    .await?;
  let pseudonym = shared.lock().await.pseudonym.to_string();
  Ok(Json(RegisterOut { user: body.user, project: body.project, pseudonym }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_project(
  State(state): State<Arc<AppState>>,
  Path((user, project)): Path<(String, String)>,
) -> Result<Json<ProjectStateOut>, ActionError> {
  let shared = state.user(&user).await.ok_or(ActionError::UserNotFound)?;
  let account = shared.lock().await;
  let p = account.project(&project).ok_or(ActionError::NotParticipating)?;
  Ok(Json(project_state_out(&user, &project, p)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_project_xml(
  State(state): State<Arc<AppState>>,
  Path((user, project)): Path<(String, String)>,
) -> Result<impl IntoResponse, ActionError> {
  let shared = state.user(&user).await.ok_or(ActionError::UserNotFound)?;
  let account = shared.lock().await;
  let p = account.project(&project).ok_or(ActionError::NotParticipating)?;
  let xml = p.print_to_xml(&account.pseudonym, &project, "");
  Ok(([(header::CONTENT_TYPE, "application/xml")], xml))
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_reject(State(state): State<Arc<AppState>>, Json(body): Json<ChallengeActionIn>) -> ActionResult {
  let reason = body.reason.unwrap_or_default();
  actions::reject_challenge(&state, &body.user, &body.project, &body.challenge, &reason).await.map(Json)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_restore(State(state): State<Arc<AppState>>, Json(body): Json<ChallengeActionIn>) -> ActionResult {
  actions::restore_challenge(&state, &body.user, &body.project, &body.challenge).await.map(Json)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_store(State(state): State<Arc<AppState>>, Json(body): Json<ChallengeActionIn>) -> ActionResult {
  actions::store_challenge(&state, &body.user, &body.project, &body.challenge).await.map(Json)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_undo_store(State(state): State<Arc<AppState>>, Json(body): Json<ChallengeActionIn>) -> ActionResult {
  actions::undo_store_challenge(&state, &body.user, &body.project, &body.challenge).await.map(Json)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, to = %body.to, project = %body.project))]
pub async fn http_post_send(State(state): State<Arc<AppState>>, Json(body): Json<SendIn>) -> ActionResult {
  actions::send_challenge(&state, &body.user, &body.to, &body.project, &body.challenge).await.map(Json)
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user, project = %body.project))]
pub async fn http_post_quest_reject(State(state): State<Arc<AppState>>, Json(body): Json<QuestRejectIn>) -> ActionResult {
  let reason = body.reason.unwrap_or_default();
  actions::reject_quest(&state, &body.user, &body.project, &body.quest, &reason).await.map(Json)
}
