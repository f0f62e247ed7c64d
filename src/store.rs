//! Persistence collaborator: per-user profiles and per-(user, project) state.
//!
//! `JsonFileStore` layout:
//!   <dir>/<user>.json              profile
//!   <dir>/<user>/<project>.json    project state
//! File names are sanitised, so each project document also carries the raw
//! project name. Writes go to a temp file first and are renamed into place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ProjectState, UserAccount};
use crate::error::StoreError;

pub trait StateStore: Send + Sync {
  fn list_users(&self) -> Result<Vec<String>, StoreError>;
  fn load_profile(&self, user: &str) -> Result<Option<UserAccount>, StoreError>;
  fn save_profile(&self, account: &UserAccount) -> Result<(), StoreError>;
  fn load(&self, user: &str, project: &str) -> Result<Option<ProjectState>, StoreError>;
  fn save(&self, user: &str, project: &str, state: &ProjectState) -> Result<(), StoreError>;

  /// Profile plus every saved project.
  fn load_account(&self, user: &str) -> Result<Option<UserAccount>, StoreError>;
}

/// On-disk project document. Files written before the name was stored
/// have no `project` key.
#[derive(Deserialize)]
struct ProjectFile {
  #[serde(default)]
  project: Option<String>,
  #[serde(flatten)]
  state: ProjectState,
}

#[derive(Serialize)]
struct ProjectFileRef<'a> {
  project: &'a str,
  #[serde(flatten)]
  state: &'a ProjectState,
}

#[derive(Clone, Debug)]
pub struct JsonFileStore {
  dir: PathBuf,
}

/// Keep ids usable as a single path component.
fn file_component(raw: &str) -> String {
  let cleaned: String = raw
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
    .collect();
  match cleaned.trim_start_matches('.') {
    "" => "_".to_string(),
    s => s.to_string(),
  }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
  move |source| StoreError::Io { path: path.to_path_buf(), source }
}

impl JsonFileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn profile_path(&self, user: &str) -> PathBuf {
    self.dir.join(format!("{}.json", file_component(user)))
  }

  fn project_path(&self, user: &str, project: &str) -> PathBuf {
    self.dir.join(file_component(user)).join(format!("{}.json", file_component(project)))
  }

  fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read_to_string(path) {
      Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io(path)(e)),
    }
  }

  fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(io(parent))?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(io(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io(path))?;
    debug!(target: "gamify_backend", path = %path.display(), "State saved");
    Ok(())
  }
}

impl StateStore for JsonFileStore {
  fn list_users(&self) -> Result<Vec<String>, StoreError> {
    let entries = match std::fs::read_dir(&self.dir) {
      Ok(e) => e,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io(&self.dir)(e)),
    };
    let mut users = Vec::new();
    for entry in entries {
      let path = entry.map_err(io(&self.dir))?.path();
      if path.extension().is_some_and(|e| e == "json") {
        if let Some(account) = Self::read_json::<UserAccount>(&path)? {
          users.push(account.id);
        }
      }
    }
    users.sort();
    Ok(users)
  }

  fn load_profile(&self, user: &str) -> Result<Option<UserAccount>, StoreError> {
    Self::read_json(&self.profile_path(user))
  }

  fn save_profile(&self, account: &UserAccount) -> Result<(), StoreError> {
    Self::write_json(&self.profile_path(&account.id), account)
  }

  fn load(&self, user: &str, project: &str) -> Result<Option<ProjectState>, StoreError> {
    let file = Self::read_json::<ProjectFile>(&self.project_path(user, project))?;
    Ok(file.map(|f| f.state))
  }

  fn save(&self, user: &str, project: &str, state: &ProjectState) -> Result<(), StoreError> {
    Self::write_json(&self.project_path(user, project), &ProjectFileRef { project, state })
  }

  fn load_account(&self, user: &str) -> Result<Option<UserAccount>, StoreError> {
    let Some(mut account) = self.load_profile(user)? else {
      return Ok(None);
    };
    let dir = self.dir.join(file_component(user));
    let entries = match std::fs::read_dir(&dir) {
      Ok(e) => e,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(account)),
      Err(e) => return Err(io(&dir)(e)),
    };
    for entry in entries {
      let path = entry.map_err(io(&dir))?.path();
      let (Some(stem), Some("json")) = (path.file_stem().and_then(|s| s.to_str()), path.extension().and_then(|e| e.to_str()))
      else {
        continue;
      };
      if let Some(file) = Self::read_json::<ProjectFile>(&path)? {
        let name = file.project.unwrap_or_else(|| stem.to_string());
        account.projects.insert(name, file.state);
      }
    }
    Ok(Some(account))
  }
}
