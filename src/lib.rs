//! taskflow - local-first project and task tracking
//!
//! Projects and tasks live as human-readable files under a root directory:
//! one `project.json` per project, one YAML file per task, and one YAML file
//! per work iteration. Everything is re-read from disk on every call, so
//! hand edits and concurrent tools are picked up without any cache.
//!
//! # Module Organization
//!
//! - `model`: projects, tasks, iterations and their state transitions
//! - `storage`: on-disk layout, atomic writes, tolerant record loading
//! - `identity`: task ID allocation and counter recovery
//! - `manager`: every user-facing operation
//! - `search`: cross-project substring search with snippets
//! - `template`: built-in and custom task templates
//! - `config`: configuration loading from `taskflow.toml`
//! - `cli`, `api`, `control`: the CLI, REST and control-channel adapters

pub mod api;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod identity;
pub mod manager;
pub mod model;
pub mod output;
pub mod search;
pub mod storage;
pub mod template;

pub use error::{Error, Result};
