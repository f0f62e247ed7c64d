//! Loading game configuration (per-project limits, report locations,
//! generation weights, achievement definitions) from TOML.
//!
//! See `GameConfig` for the expected schema. Every table is optional.

use std::{collections::HashMap, path::PathBuf};

use serde::Deserialize;
use tracing::{error, info};

use crate::achievement::AchievementDef;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GameConfig {
  #[serde(default)]
  pub reports: ReportPaths,
  #[serde(default)]
  pub generation: GenerationSettings,
  #[serde(default)]
  pub pipeline: PipelineSettings,
  /// Project-specific overrides, keyed by project name.
  #[serde(default)]
  pub project: HashMap<String, ProjectSettings>,
  /// Fallback for projects without their own table.
  #[serde(default)]
  pub default_project: ProjectSettings,
  #[serde(default)]
  pub achievements: Vec<AchievementDef>,
}

impl GameConfig {
  pub fn project_settings(&self, project: &str) -> ProjectSettings {
    self
      .project
      .get(project)
      .cloned()
      .unwrap_or_else(|| self.default_project.clone())
  }

  /// Configured achievement definitions, or the built-in set when none are given.
  pub fn achievement_defs(&self) -> Vec<AchievementDef> {
    if self.achievements.is_empty() {
      crate::achievement::default_definitions()
    } else {
      self.achievements.clone()
    }
  }
}

/// Per-project limits.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
  pub current_challenges_count: usize,
  pub current_quests_count: usize,
  pub stored_challenges_count: usize,
  pub can_send_challenge: bool,
  pub search_commit_count: usize,
  /// Completed challenges a user needs before quests are offered.
  pub quest_min_completed: usize,
}

impl Default for ProjectSettings {
  fn default() -> Self {
    Self {
      current_challenges_count: 3,
      current_quests_count: 1,
      stored_challenges_count: 2,
      can_send_challenge: true,
      search_commit_count: 50,
      quest_min_completed: 1,
    }
  }
}

/// Report locations relative to the build workspace.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReportPaths {
  pub coverage_csv: PathBuf,
  pub coverage_html_dir: PathBuf,
  pub mutation_xml: PathBuf,
  pub junit_dir: PathBuf,
  pub timeout_ms: u64,
}

impl Default for ReportPaths {
  fn default() -> Self {
    Self {
      coverage_csv: PathBuf::from("target/site/jacoco/jacoco.csv"),
      coverage_html_dir: PathBuf::from("target/site/jacoco"),
      mutation_xml: PathBuf::from("target/pit-reports/mutations.xml"),
      junit_dir: PathBuf::from("target/surefire-reports"),
      timeout_ms: 5_000,
    }
  }
}

/// Relative probabilities of each challenge variant.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VariantWeights {
  pub class: u32,
  pub method: u32,
  pub line: u32,
  pub mutation: u32,
  pub build: u32,
}

impl Default for VariantWeights {
  fn default() -> Self {
    Self { class: 1, method: 2, line: 3, mutation: 2, build: 0 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  pub weights: VariantWeights,
  /// Upper bound on construction attempts per requested slot.
  pub max_attempts: usize,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self { weights: VariantWeights::default(), max_attempts: 10 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
  /// Concurrent per-user pipelines during one build pass.
  pub workers: usize,
  pub event_buffer: usize,
  pub state_dir: PathBuf,
  /// JSON manifest of recently changed files written by the VCS tooling.
  pub changes_manifest: Option<PathBuf>,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      workers: 8,
      event_buffer: 256,
      state_dir: PathBuf::from("./gamify-state"),
      changes_manifest: None,
    }
  }
}

/// Parse a config document. Separate from the env lookup for testability.
pub fn parse_config(text: &str) -> Result<GameConfig, toml::de::Error> {
  toml::from_str::<GameConfig>(text)
}

/// Attempt to load `GameConfig` from GAME_CONFIG_PATH. On any parsing/IO error,
/// logs and returns the defaults.
pub fn load_game_config_from_env() -> GameConfig {
  let Ok(path) = std::env::var("GAME_CONFIG_PATH") else {
    info!(target: "gamify_backend", "GAME_CONFIG_PATH not set; using default configuration");
    return GameConfig::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "gamify_backend", %path, projects = cfg.project.len(), "Loaded game config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "gamify_backend", %path, error = %e, "Failed to parse TOML config");
        GameConfig::default()
      }
    },
    Err(e) => {
      error!(target: "gamify_backend", %path, error = %e, "Failed to read TOML config file");
      GameConfig::default()
    }
  }
}
