//! Application state: user registry, report reader, achievement table,
//! persistence and event collaborators.
//!
//! Each user sits behind their own async mutex so per-build passes for
//! different users run in parallel. The outer map lock is only held to look
//! an account up or to register a new one. Operations that touch two users
//! (sending a challenge) take both locks in id order.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info, instrument, warn};

use crate::achievement::AchievementRegistry;
use crate::config::{load_game_config_from_env, GameConfig};
use crate::domain::{ProjectState, UserAccount};
use crate::error::{ActionError, StoreError};
use crate::events::{self, EventPublisher, GameEvent};
use crate::reports::ReportReader;
use crate::store::{JsonFileStore, StateStore};
use crate::vcs::{ManifestVcs, VcsProvider};

pub type SharedUser = Arc<Mutex<UserAccount>>;

pub struct AppState {
    pub config: GameConfig,
    pub reader: ReportReader,
    pub registry: AchievementRegistry,
    pub store: Arc<dyn StateStore>,
    pub vcs: Arc<dyn VcsProvider>,
    pub events: EventPublisher,
    users: RwLock<HashMap<String, SharedUser>>,
}

/// Registration input for `AppState::register_user`.
#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub user: String,
    pub display_name: Option<String>,
    pub git_names: Vec<String>,
    pub project: String,
    pub team: Option<String>,
}

impl AppState {
    pub fn new(
        config: GameConfig,
        store: Arc<dyn StateStore>,
        vcs: Arc<dyn VcsProvider>,
        events: EventPublisher,
    ) -> Self {
        Self {
            reader: ReportReader::new(config.reports.clone()),
            registry: AchievementRegistry::with_builtin(),
            config,
            store,
            vcs,
            events,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Build state from env: load config, open the JSON store under the
    /// configured state dir, and read back every saved user. Returns the
    /// receiving end of the event channel for the dispatcher.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> (Self, mpsc::Receiver<GameEvent>) {
        let config = load_game_config_from_env();
        let store = Arc::new(JsonFileStore::new(config.pipeline.state_dir.clone()));
        let manifest = config
            .pipeline
            .changes_manifest
            .clone()
            .unwrap_or_else(|| PathBuf::from("changes.json"));
        let vcs = Arc::new(ManifestVcs::new(manifest));
        let (publisher, rx) = events::channel(config.pipeline.event_buffer);
        let state = Self::new(config, store, vcs, publisher);
        match state.load_users().await {
            Ok(n) => info!(target: "gamify_backend", users = n, "Loaded saved users"),
            Err(e) => error!(target: "gamify_backend", error = %e, "Failed to load saved users; starting empty"),
        }
        (state, rx)
    }

    /// Read every persisted account into memory. Accounts already present
    /// are replaced.
    pub async fn load_users(&self) -> Result<usize, StoreError> {
        let ids = self.store.list_users()?;
        let mut loaded = HashMap::new();
        for id in ids {
            if let Some(account) = self.store.load_account(&id)? {
                loaded.insert(id, Arc::new(Mutex::new(account)));
            }
        }
        let n = loaded.len();
        self.users.write().await.extend(loaded);
        Ok(n)
    }

    pub async fn user(&self, id: &str) -> Option<SharedUser> {
        self.users.read().await.get(id).cloned()
    }

    pub async fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Lock two distinct users, always in id order. Returns the guards in
    /// argument order.
    pub async fn lock_pair(
        &self,
        a: &str,
        b: &str,
    ) -> Result<(OwnedMutexGuard<UserAccount>, OwnedMutexGuard<UserAccount>), ActionError> {
        let ua = self.user(a).await.ok_or(ActionError::UserNotFound)?;
        let ub = self.user(b).await.ok_or(ActionError::UserNotFound)?;
        if a <= b {
            let ga = ua.lock_owned().await;
            let gb = ub.lock_owned().await;
            Ok((ga, gb))
        } else {
            let gb = ub.lock_owned().await;
            let ga = ua.lock_owned().await;
            Ok((ga, gb))
        }
    }

    /// Create the user if needed and make them a participant of `project`.
    /// Idempotent; extra git names are merged in.
    #[instrument(level = "info", skip(self, reg), fields(user = %reg.user, project = %reg.project))]
    pub async fn register_user(&self, reg: Registration) -> Result<SharedUser, ActionError> {
        let shared = {
            let mut users = self.users.write().await;
            users
                .entry(reg.user.clone())
                .or_insert_with(|| {
                    let name = reg.display_name.clone().unwrap_or_else(|| reg.user.clone());
                    Arc::new(Mutex::new(UserAccount::new(reg.user.clone(), name)))
                })
                .clone()
        };
        {
            let mut account = shared.lock().await;
            account.git_names.extend(reg.git_names.iter().cloned());
            let defs = self.config.achievement_defs();
            let project = account
                .projects
                .entry(reg.project.clone())
                .or_insert_with(|| ProjectState::participating(reg.team.clone()));
            project.participating = true;
            if reg.team.is_some() {
                project.team = reg.team.clone();
            }
            project.sync_achievements(&defs);
            self.persist(&account, &reg.project)?;
            info!(target: "lifecycle", user = %reg.user, project = %reg.project, "User participates");
        }
        Ok(shared)
    }

    /// Save the profile and one project of `account`.
    pub fn persist(&self, account: &UserAccount, project: &str) -> Result<(), ActionError> {
        let result = self.store.save_profile(account).and_then(|_| match account.project(project) {
            Some(state) => self.store.save(&account.id, project, state),
            None => Ok(()),
        });
        result.map_err(|e| {
            warn!(target: "lifecycle", user = %account.id, %project, error = %e, "Saving user state failed");
            ActionError::Saving
        })
    }
}
