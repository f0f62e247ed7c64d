//! The JSON API driven through the router without a listener.

mod common;

use std::sync::Arc;

use axum::{
  body::{to_bytes, Body},
  http::{header, Request, StatusCode},
  Router,
};
use gamify_backend::config::GameConfig;
use gamify_backend::events;
use gamify_backend::files::Identity;
use gamify_backend::routes::build_router;
use gamify_backend::state::AppState;
use gamify_backend::store::JsonFileStore;
use gamify_backend::vcs::{ChangedFile, StaticVcs};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn app(dir: &std::path::Path) -> Router {
  let (publisher, _rx) = events::channel(16);
  let vcs = StaticVcs {
    entries: vec![ChangedFile {
      path: common::SOURCE.into(),
      authors: vec![Identity::new("alice", "")],
      commits_ago: 0,
    }],
  };
  let store = Arc::new(JsonFileStore::new(dir.join("state")));
  build_router(Arc::new(AppState::new(GameConfig::default(), store, Arc::new(vcs), publisher)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let req = Request::builder().method(method).uri(uri);
  let req = match body {
    Some(b) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(b.to_string())),
    None => req.body(Body::empty()),
  }
  .unwrap();
  let res = app.clone().oneshot(req).await.unwrap();
  let status = res.status();
  let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
  let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, value)
}

#[tokio::test]
async fn health() {
  let dir = TempDir::new().unwrap();
  let (status, body) = call(&app(dir.path()), "GET", "/api/v1/health", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn build_store_send_and_errors() {
  let dir = TempDir::new().unwrap();
  let ws = dir.path().join("ws");
  common::write_reports(&ws, false);
  let app = app(dir.path());

  for user in ["alice", "bob"] {
    let (status, body) =
      call(&app, "POST", "/api/v1/users", Some(json!({ "user": user, "project": "demo", "gitNames": [user] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], user);
  }

  let (status, report) = call(
    &app,
    "POST",
    "/api/v1/builds",
    Some(json!({ "project": "demo", "workspace": ws, "build_number": 1, "result": "SUCCESS" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(report["users_processed"], 2);

  let (_, state) = call(&app, "GET", "/api/v1/users/alice/projects/demo", None).await;
  let current = state["currentChallenges"].as_array().unwrap();
  assert_eq!(current.len(), 3);
  let first = current[0]["escaped"].as_str().unwrap().to_string();

  let (status, body) = call(
    &app,
    "POST",
    "/api/v1/challenges/reject",
    Some(json!({ "user": "alice", "project": "demo", "challenge": first, "reason": "" })),
  )
  .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["error"]["code"], "NO_REASON");

  let (status, body) = call(
    &app,
    "POST",
    "/api/v1/challenges/store",
    Some(json!({ "user": "alice", "project": "demo", "challenge": first })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["generated"].as_array().unwrap().len(), 1, "freed slot is refilled");

  let (_, state) = call(&app, "GET", "/api/v1/users/alice/projects/demo", None).await;
  assert_eq!(state["storedChallenges"].as_array().unwrap().len(), 1);
  let current = state["currentChallenges"].as_array().unwrap();
  assert_eq!(current.len(), 3);
  assert!(current.iter().all(|c| c["kind"] != "Dummy"));

  let (status, body) = call(
    &app,
    "POST",
    "/api/v1/challenges/send",
    Some(json!({ "user": "alice", "to": "alice", "project": "demo", "challenge": first })),
  )
  .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["error"]["code"], "RECEIVER_IS_SELF");

  let (status, _) = call(
    &app,
    "POST",
    "/api/v1/challenges/send",
    Some(json!({ "user": "alice", "to": "bob", "project": "demo", "challenge": first })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (_, alice) = call(&app, "GET", "/api/v1/users/alice/projects/demo", None).await;
  let (_, bob) = call(&app, "GET", "/api/v1/users/bob/projects/demo", None).await;
  assert!(alice["storedChallenges"].as_array().unwrap().is_empty());
  assert_eq!(bob["storedChallenges"][0]["escaped"], first.as_str());

  let (status, body) = call(
    &app,
    "POST",
    "/api/v1/challenges/restore",
    Some(json!({ "user": "alice", "project": "demo", "challenge": "nothing like this" })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"]["code"], "NO_CHALLENGE_EXISTS");

  let (status, _) = call(&app, "GET", "/api/v1/users/carol/projects/demo", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn xml_export_counts_match_children() {
  let dir = TempDir::new().unwrap();
  let ws = dir.path().join("ws");
  common::write_reports(&ws, false);
  let app = app(dir.path());
  call(&app, "POST", "/api/v1/users", Some(json!({ "user": "alice", "project": "demo" }))).await;
  call(&app, "POST", "/api/v1/builds", Some(json!({ "project": "demo", "workspace": ws }))).await;

  let req = Request::builder().uri("/api/v1/users/alice/projects/demo/xml").body(Body::empty()).unwrap();
  let res = app.clone().oneshot(req).await.unwrap();
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(res.headers()[header::CONTENT_TYPE], "application/xml");
  let xml = String::from_utf8(to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
  assert!(xml.starts_with("<User id=\""));
  assert!(xml.contains("<CurrentChallenges count=\"3\">"));
  assert!(xml.contains("<StoredChallenges count=\"0\">"));
  assert!(xml.trim_end().ends_with("</User>"));
}
