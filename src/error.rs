//! Error types. Report problems never escape the engine (they degrade to
//! "stays open" / "zero candidates"); action errors are user-facing validation
//! failures that leave state untouched.

use std::path::PathBuf;

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;

/// A coverage, mutation or test report could not be used this round.
#[derive(Debug, Error)]
pub enum ReportError {
  #[error("report {0} does not exist")]
  Missing(PathBuf),

  #[error("failed to read report {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed report {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("timed out reading report {0}")]
  Timeout(PathBuf),
}

/// Failure of a user-initiated lifecycle action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
  #[error("Please insert your reason for rejection")]
  NoReason,

  #[error("The challenge does not exist")]
  NoChallengeExists,

  #[error("The quest does not exist")]
  NoQuestExists,

  #[error("Dummies cannot be rejected - please run another build")]
  RejectDummy,

  #[error("Dummies cannot be stored - please run another build")]
  StoreDummy,

  #[error("Storage Limit reached")]
  StorageLimit,

  #[error("Cannot send challenges to yourself")]
  ReceiverIsSelf,

  #[error("User not found")]
  UserNotFound,

  #[error("The user does not participate in the project")]
  NotParticipating,

  #[error("Sending challenges is disabled for this project")]
  SendingDisabled,

  #[error("There was an error with saving")]
  Saving,
}

impl ActionError {
  pub fn status_code(&self) -> StatusCode {
    match self {
      ActionError::NoChallengeExists | ActionError::NoQuestExists | ActionError::UserNotFound => {
        StatusCode::NOT_FOUND
      }
      ActionError::Saving => StatusCode::INTERNAL_SERVER_ERROR,
      _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
  }

  /// Stable machine-readable code for API responses.
  pub fn error_code(&self) -> &'static str {
    match self {
      ActionError::NoReason => "NO_REASON",
      ActionError::NoChallengeExists => "NO_CHALLENGE_EXISTS",
      ActionError::NoQuestExists => "NO_QUEST_EXISTS",
      ActionError::RejectDummy => "REJECT_DUMMY",
      ActionError::StoreDummy => "STORE_DUMMY",
      ActionError::StorageLimit => "STORAGE_LIMIT",
      ActionError::ReceiverIsSelf => "RECEIVER_IS_SELF",
      ActionError::UserNotFound => "USER_NOT_FOUND",
      ActionError::NotParticipating => "NOT_PARTICIPATING",
      ActionError::SendingDisabled => "SENDING_DISABLED",
      ActionError::Saving => "SAVING",
    }
  }
}

impl IntoResponse for ActionError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      tracing::error!(target: "lifecycle", error = %self, "Action failed");
    }
    let body = Json(json!({
      "error": {
        "code": self.error_code(),
        "message": self.to_string(),
      }
    }));
    (status, body).into_response()
  }
}

/// Persistence collaborator failure.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("state i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("state (de)serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}
