//! Domain records for projects, tasks and iterations.
//!
//! The structs double as the on-disk schema: every required field must be
//! present when a record is loaded, so a hand-edited file with a missing or
//! mistyped field is rejected instead of being half-trusted.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Summary used when a task completion closes an iteration that has neither
/// a summary nor notes.
pub const FALLBACK_SUMMARY: &str = "Completed with task";

const MAX_PROJECT_NAME_LEN: usize = 64;

/// Current time truncated to whole seconds, the precision stored on disk.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

// =============================================================================
// Statuses
// =============================================================================

/// Lifecycle status of a task.
///
/// The three core states drive the state machine. `Extension` carries a
/// project-specific status (e.g. `ARCHIVED`) configured in `tasks.extra_statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
    Extension(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Extension(name) => name,
        }
    }

    pub fn is_core(&self) -> bool {
        !matches!(self, TaskStatus::Extension(_))
    }

    /// Parse a status name. Core names are case-insensitive and the legacy
    /// `DONE` spelling maps to `COMPLETED`; anything else becomes an
    /// upper-cased extension status.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("status cannot be empty".to_string()));
        }
        let upper = trimmed.to_ascii_uppercase().replace(['-', ' '], "_");
        let status = match upper.as_str() {
            "TODO" => TaskStatus::Todo,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "COMPLETED" | "DONE" => TaskStatus::Completed,
            _ => {
                if !upper.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
                    return Err(Error::Validation(format!("invalid status '{trimmed}'")));
                }
                TaskStatus::Extension(upper)
            }
        };
        Ok(status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        TaskStatus::parse(&value).map_err(|err| err.to_string())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "completed" => Ok(ProjectStatus::Completed),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(Error::Validation(format!(
                "invalid project status '{other}' (expected active|completed|archived)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    InProgress,
    Completed,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationStatus::InProgress => "in_progress",
            IterationStatus::Completed => "completed",
        }
    }
}

// =============================================================================
// Project
// =============================================================================

/// A top-level namespace owning a directory of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub created: DateTime<Utc>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub description: String,
    /// Next task number to hand out. `None` when the stored value is missing
    /// or not a positive integer; the identity allocator recovers it.
    #[serde(
        default,
        deserialize_with = "lenient_counter",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) next_task_id: Option<u64>,
    #[serde(default)]
    pub total_tasks: u64,
    #[serde(default)]
    pub completed_tasks: u64,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: now(),
            status: ProjectStatus::Active,
            description: description.into(),
            next_task_id: Some(1),
            total_tasks: 0,
            completed_tasks: 0,
        }
    }

    pub fn next_task_id(&self) -> Option<u64> {
        self.next_task_id
    }

    pub fn record_task_completed(&mut self) {
        self.completed_tasks = self.completed_tasks.saturating_add(1);
    }

    pub fn record_task_reopened(&mut self) {
        self.completed_tasks = self.completed_tasks.saturating_sub(1);
    }
}

fn lenient_counter<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|value| value.as_u64())
        .filter(|counter| *counter > 0))
}

/// Check that a project name is a filesystem-safe slug.
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("project name cannot be empty".to_string()));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(Error::Validation(format!(
            "project name longer than {MAX_PROJECT_NAME_LEN} characters"
        )));
    }
    if name.starts_with('.') {
        return Err(Error::Validation(format!(
            "project name '{name}' cannot start with '.'"
        )));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(Error::Validation(format!(
            "project name '{name}' may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

// =============================================================================
// Task
// =============================================================================

/// Fields needed to create a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
}

/// A unit of work inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    pub project: String,
    pub description: String,
    pub notes: String,
    pub current_iteration: u32,
    pub total_iterations: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, project: impl Into<String>, fields: NewTask) -> Self {
        Self {
            id: id.into(),
            title: fields.title,
            status: TaskStatus::Todo,
            created: now(),
            started: None,
            completed: None,
            project: project.into(),
            description: fields.description,
            notes: fields.notes,
            current_iteration: 0,
            total_iterations: 0,
        }
    }

    /// TODO (or a parked extension status) -> IN_PROGRESS.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.status {
            TaskStatus::Todo | TaskStatus::Extension(_) => {
                self.status = TaskStatus::InProgress;
                self.started.get_or_insert(at);
                Ok(())
            }
            _ => Err(self.blocked("start")),
        }
    }

    /// IN_PROGRESS -> COMPLETED.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.blocked("complete"));
        }
        self.status = TaskStatus::Completed;
        self.completed = Some(at);
        Ok(())
    }

    /// COMPLETED -> IN_PROGRESS.
    pub fn reopen(&mut self) -> Result<()> {
        if self.status != TaskStatus::Completed {
            return Err(self.blocked("continue"));
        }
        self.status = TaskStatus::InProgress;
        self.completed = None;
        Ok(())
    }

    /// Allocate the next iteration and make it current.
    pub fn begin_iteration(&mut self, at: DateTime<Utc>) -> Iteration {
        let number = self.total_iterations + 1;
        self.total_iterations = number;
        self.current_iteration = number;
        Iteration::new(self.id.clone(), number, at)
    }

    fn blocked(&self, action: &str) -> Error {
        Error::InvalidState(format!(
            "cannot {action} task {} while it is {}",
            self.id, self.status
        ))
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// A tracked work session within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub task_id: String,
    pub iteration: u32,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    pub status: IterationStatus,
    pub notes: String,
    pub summary: String,
    pub user_feedback: String,
    pub next_steps: String,
}

impl Iteration {
    pub fn new(task_id: impl Into<String>, iteration: u32, at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            iteration,
            started: at,
            completed: None,
            status: IterationStatus::InProgress,
            notes: String::new(),
            summary: String::new(),
            user_feedback: String::new(),
            next_steps: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IterationStatus::InProgress
    }

    pub fn add_note(&mut self, note: &str) -> Result<()> {
        self.ensure_open()?;
        append_line(&mut self.notes, note);
        Ok(())
    }

    pub fn set_summary(&mut self, summary: &str) -> Result<()> {
        self.ensure_open()?;
        self.summary = summary.to_string();
        Ok(())
    }

    pub fn add_feedback(&mut self, feedback: &str) -> Result<()> {
        self.ensure_open()?;
        append_line(&mut self.user_feedback, feedback);
        Ok(())
    }

    pub fn set_next_steps(&mut self, next_steps: &str) -> Result<()> {
        self.ensure_open()?;
        self.next_steps = next_steps.to_string();
        Ok(())
    }

    /// in_progress -> completed. A summary is mandatory.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.summary.trim().is_empty() {
            return Err(Error::Validation(format!(
                "iteration {} of task {} needs a summary before it can be completed",
                self.iteration, self.task_id
            )));
        }
        self.status = IterationStatus::Completed;
        self.completed = Some(at);
        Ok(())
    }

    /// Complete as part of a task completion, deriving a summary from the
    /// accumulated notes when none was written.
    pub fn complete_with_fallback(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.summary.trim().is_empty() {
            self.summary = if self.notes.trim().is_empty() {
                FALLBACK_SUMMARY.to_string()
            } else {
                self.notes.clone()
            };
        }
        self.complete(at)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "iteration {} of task {} is already completed",
                self.iteration, self.task_id
            )))
        }
    }
}

fn append_line(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(text);
}
