//! Gamified testing backend: turns coverage and mutation reports into
//! per-user challenges, quests and achievements, re-evaluates them on every
//! build, and serves the results over a small JSON API.

pub mod achievement;
pub mod actions;
pub mod challenge;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod factory;
pub mod files;
pub mod mutation_diff;
pub mod pipeline;
pub mod protocol;
pub mod quest;
pub mod reports;
pub mod routes;
pub mod selector;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;
pub mod vcs;
