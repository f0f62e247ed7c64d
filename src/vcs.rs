//! The version-control collaborator: which files changed recently, and who
//! changed them. History walking itself happens outside; we read its output.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReportError;
use crate::files::{Identity, SourceFileDetails};

pub trait VcsProvider: Send + Sync {
  /// Files touched in the last `since_commits` commits, most recent first.
  fn changed_files(&self, workspace: &Path, since_commits: usize) -> Result<Vec<SourceFileDetails>, ReportError>;

  fn authors_of(&self, file: &SourceFileDetails) -> BTreeSet<Identity> {
    file.changed_by.clone()
  }
}

/// One manifest entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
  pub path: String,
  #[serde(default)]
  pub authors: Vec<Identity>,
  /// Age in commits of the latest change; 0 is HEAD.
  #[serde(default)]
  pub commits_ago: usize,
}

impl ChangedFile {
  fn to_details(&self) -> SourceFileDetails {
    SourceFileDetails::new(self.path.clone()).with_authors(self.authors.iter().cloned())
  }
}

fn select(entries: &[ChangedFile], since_commits: usize) -> Vec<SourceFileDetails> {
  let mut recent: Vec<&ChangedFile> = entries.iter().filter(|e| e.commits_ago < since_commits).collect();
  recent.sort_by_key(|e| e.commits_ago);
  let mut out: Vec<SourceFileDetails> = Vec::with_capacity(recent.len());
  for entry in recent {
    match out.iter_mut().find(|f| f.path == entry.path) {
      Some(existing) => entry.authors.iter().cloned().for_each(|a| existing.add_author(a)),
      None => out.push(entry.to_details()),
    }
  }
  out
}

/// Reads a JSON array of `ChangedFile` written by the build's VCS step. A
/// relative manifest path is resolved against the workspace.
#[derive(Clone, Debug)]
pub struct ManifestVcs {
  pub manifest: PathBuf,
}

impl ManifestVcs {
  pub fn new(manifest: impl Into<PathBuf>) -> Self {
    Self { manifest: manifest.into() }
  }
}

impl VcsProvider for ManifestVcs {
  fn changed_files(&self, workspace: &Path, since_commits: usize) -> Result<Vec<SourceFileDetails>, ReportError> {
    let path = if self.manifest.is_absolute() { self.manifest.clone() } else { workspace.join(&self.manifest) };
    let text = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => ReportError::Missing(path.clone()),
      _ => ReportError::Io { path: path.clone(), source: e },
    })?;
    let entries: Vec<ChangedFile> =
      serde_json::from_str(&text).map_err(|e| ReportError::Parse { path: path.clone(), message: e.to_string() })?;
    let files = select(&entries, since_commits);
    debug!(target: "pipeline", manifest = %path.display(), entries = entries.len(), files = files.len(), "Read change manifest");
    Ok(files)
  }
}

/// A fixed change list, e.g. one posted along with a build.
#[derive(Clone, Debug, Default)]
pub struct StaticVcs {
  pub entries: Vec<ChangedFile>,
}

impl VcsProvider for StaticVcs {
  fn changed_files(&self, _workspace: &Path, since_commits: usize) -> Result<Vec<SourceFileDetails>, ReportError> {
    Ok(select(&self.entries, since_commits))
  }
}
