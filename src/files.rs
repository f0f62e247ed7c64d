//! Source files as received from the VCS collaborator, author identities, and
//! the per-build context every challenge is generated and evaluated in.

use std::{
  collections::BTreeSet,
  hash::{Hash, Hasher},
  path::{Path, PathBuf},
  sync::OnceLock,
};

use serde::{Deserialize, Serialize};

use crate::config::{GenerationSettings, ProjectSettings, ReportPaths};
use crate::reports::coverage::CoverageSummary;
use crate::selector::LocationKey;
use crate::util::package_name_of;

/// A commit author as reported by the VCS.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
  pub name: String,
  #[serde(default)]
  pub email: String,
}

impl Identity {
  pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
    Self { name: name.into(), email: email.into() }
  }
}

/// One source file of the repository. Path, package, class name and extension
/// are derived once at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceFileDetails {
  pub path: String,
  pub package_name: String,
  pub class_name: String,
  pub extension: String,
  #[serde(default)]
  pub changed_by: BTreeSet<Identity>,
  #[serde(skip)]
  coverage: OnceLock<f64>,
}

impl SourceFileDetails {
  pub fn new(path: impl Into<String>) -> Self {
    let path = path.into();
    let file_part = path.rsplit('/').next().unwrap_or(&path).to_string();
    let (class_name, extension) = match file_part.split_once('.') {
      Some((class, ext)) => (class.to_string(), ext.to_string()),
      None => (file_part.clone(), String::new()),
    };
    let package_name = package_name_of(&path);
    Self {
      path,
      package_name,
      class_name,
      extension,
      changed_by: BTreeSet::new(),
      coverage: OnceLock::new(),
    }
  }

  pub fn with_authors(mut self, authors: impl IntoIterator<Item = Identity>) -> Self {
    self.changed_by.extend(authors);
    self
  }

  pub fn add_author(&mut self, identity: Identity) {
    self.changed_by.insert(identity);
  }

  /// `Complex.java`, the name mutation reports use.
  pub fn file_name(&self) -> String {
    if self.extension.is_empty() {
      self.class_name.clone()
    } else {
      format!("{}.{}", self.class_name, self.extension)
    }
  }

  /// Test sources never become challenge targets.
  pub fn is_test_file(&self) -> bool {
    self.path.split('/').any(|p| p == "test" || p == "tests")
  }

  pub fn absolute_path(&self, workspace: &Path) -> PathBuf {
    workspace.join(self.path.trim_start_matches('/'))
  }

  pub fn exists_in(&self, workspace: &Path) -> bool {
    self.absolute_path(workspace).is_file()
  }

  /// JaCoCo per-class method table.
  pub fn method_report_path(&self, workspace: &Path, paths: &ReportPaths) -> PathBuf {
    workspace
      .join(&paths.coverage_html_dir)
      .join(&self.package_name)
      .join(format!("{}.html", self.class_name))
  }

  /// JaCoCo annotated source with per-line coverage.
  pub fn source_report_path(&self, workspace: &Path, paths: &ReportPaths) -> PathBuf {
    workspace
      .join(&paths.coverage_html_dir)
      .join(&self.package_name)
      .join(format!("{}.html", self.file_name()))
  }

  /// Line coverage in [0, 1] from the summary, computed once per instance.
  /// Files without a summary row count as uncovered; files with no executable
  /// lines count as fully covered.
  pub fn coverage(&self, summary: &CoverageSummary) -> f64 {
    *self.coverage.get_or_init(|| {
      summary
        .get(&self.package_name, &self.class_name)
        .map(|c| c.coverage())
        .unwrap_or(0.0)
    })
  }

  pub fn location(&self) -> LocationKey {
    LocationKey::Class { package: self.package_name.clone(), class: self.class_name.clone() }
  }
}

impl PartialEq for SourceFileDetails {
  fn eq(&self, other: &Self) -> bool {
    self.path == other.path
      && self.package_name == other.package_name
      && self.class_name == other.class_name
      && self.extension == other.extension
  }
}

impl Eq for SourceFileDetails {}

impl Hash for SourceFileDetails {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.path.hash(state);
    self.package_name.hash(state);
    self.class_name.hash(state);
    self.extension.hash(state);
  }
}

/// Outcome of the build the engine runs after.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
  #[default]
  Success,
  Unstable,
  Failure,
  Aborted,
  NotBuilt,
}

/// Where a challenge was generated; kept on the challenge for re-evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerationContext {
  pub project_name: String,
  pub branch: String,
  pub workspace: PathBuf,
}

/// Everything a build pass knows about the current build.
#[derive(Clone, Debug)]
pub struct BuildContext {
  pub project_name: String,
  pub branch: String,
  pub workspace: PathBuf,
  pub build_number: u64,
  pub result: BuildResult,
  pub settings: ProjectSettings,
  pub reports: ReportPaths,
  pub generation: GenerationSettings,
  pub project_coverage: f64,
  pub project_tests: u32,
}

impl BuildContext {
  pub fn generation_context(&self) -> GenerationContext {
    GenerationContext {
      project_name: self.project_name.clone(),
      branch: self.branch.clone(),
      workspace: self.workspace.clone(),
    }
  }

  pub fn build_failed(&self) -> bool {
    self.result != BuildResult::Success
  }
}
