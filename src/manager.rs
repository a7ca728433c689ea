//! Business operations over projects, tasks and iterations.
//!
//! The manager keeps no cache. Every operation re-reads the records it touches
//! right before mutating them, so edits made by hand or merged in by Git are
//! visible on the next call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::allocate_task_id;
use crate::model::{
    self, validate_project_name, Iteration, NewTask, Project, ProjectStatus, Task, TaskStatus,
};
use crate::search::{RecentActivity, RelatedTask, SearchEngine, SearchQuery, SearchResults};
use crate::storage::Storage;
use crate::template::{TemplateRegistry, Variables};

/// Partial update of a task's editable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

impl TaskUpdate {
    /// Build an update from a JSON object, rejecting unknown fields.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation("task update must be an object".to_string()));
        }
        serde_json::from_value(value).map_err(|err| Error::Validation(err.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.notes.is_none()
            && self.status.is_none()
    }
}

/// Fields for `quick_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuickUpdate {
    pub note: Option<String>,
    pub summary: Option<String>,
    pub next_steps: Option<String>,
}

/// Overrides for `clone_task`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneOptions {
    pub title: Option<String>,
    pub notes: Option<String>,
}

/// A task together with its iteration history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDetails {
    pub task: Task,
    pub iterations: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Iteration>,
}

/// Aggregated counts for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub project: String,
    pub status: ProjectStatus,
    pub description: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    pub active_iterations: usize,
    pub completion_percentage: f64,
    pub by_status: BTreeMap<String, usize>,
}

/// Entry point for every user-facing operation.
#[derive(Debug, Clone)]
pub struct Manager {
    storage: Storage,
    config: Config,
}

impl Manager {
    pub fn new(config: Config) -> Self {
        Self {
            storage: Storage::new(config.root.clone()),
            config,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse a status name and check it is allowed in this installation.
    pub fn parse_status(&self, raw: &str) -> Result<TaskStatus> {
        let status = TaskStatus::parse(raw)?;
        if !self.config.tasks.allows(&status) {
            return Err(Error::Validation(format!(
                "unknown status '{raw}' (expected TODO, IN_PROGRESS, COMPLETED{})",
                self.config
                    .tasks
                    .extra_statuses
                    .iter()
                    .map(|extra| format!(", {extra}"))
                    .collect::<String>()
            )));
        }
        Ok(status)
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn create_project(&self, name: &str, description: &str) -> Result<Project> {
        validate_project_name(name)?;
        for existing in self.storage.list_projects()? {
            let existing = existing?;
            if existing.eq_ignore_ascii_case(name) {
                return Err(Error::Conflict(format!(
                    "project '{name}' collides with existing project '{existing}'"
                )));
            }
        }

        let project = Project::new(name, description);
        self.storage.write_project(&project)?;
        tracing::info!(project = name, "created project");
        Ok(project)
    }

    pub fn get_project(&self, name: &str) -> Result<Project> {
        self.storage.read_project(name)
    }

    /// Project names, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut names = self.storage.list_projects()?.collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    pub fn set_project_status(&self, name: &str, status: &str) -> Result<Project> {
        let status = ProjectStatus::parse(status)?;
        let mut project = self.storage.read_project(name)?;
        if project.status != status {
            project.status = status;
            self.storage.write_project(&project)?;
            tracing::info!(project = name, status = status.as_str(), "project status changed");
        }
        Ok(project)
    }

    pub fn project_status(&self, name: &str) -> Result<ProjectSummary> {
        let project = self.storage.read_project(name)?;
        let tasks = self.list_tasks(name, None)?;

        let mut by_status = BTreeMap::new();
        let mut completed = 0;
        let mut active_iterations = 0;
        for task in &tasks {
            *by_status.entry(task.status.to_string()).or_insert(0) += 1;
            if task.status == TaskStatus::Completed {
                completed += 1;
            }
            if task.status == TaskStatus::InProgress && task.current_iteration > 0 {
                active_iterations += 1;
            }
        }

        let total = tasks.len();
        let completion_percentage = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        };

        Ok(ProjectSummary {
            project: project.name,
            status: project.status,
            description: project.description,
            total_tasks: total,
            completed_tasks: completed,
            pending_tasks: total - completed,
            active_iterations,
            completion_percentage,
            by_status,
        })
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub fn create_task(&self, project: &str, fields: NewTask) -> Result<Task> {
        if fields.title.trim().is_empty() {
            return Err(Error::Validation("task title cannot be empty".to_string()));
        }
        let mut record = self.storage.read_project(project)?;
        let id = allocate_task_id(&self.storage, &mut record, self.config.tasks.id_width)?;
        let task = Task::new(id, project, fields);

        self.storage.write_task(project, &task)?;
        record.total_tasks = record.total_tasks.saturating_add(1);
        self.storage.write_project(&record)?;
        tracing::info!(project, id = %task.id, "created task");
        Ok(task)
    }

    pub fn get_task(&self, project: &str, id: &str) -> Result<TaskDetails> {
        let task = self.read_task(project, id)?;
        let iterations = self.storage.list_iterations(project, id)?;
        let expected: Vec<u32> = (1..=task.total_iterations).collect();
        if iterations != expected {
            tracing::warn!(project, id, found = ?iterations, total = task.total_iterations,
                "iteration files are not contiguous");
        }
        let current = self.current_iteration(project, &task)?;
        Ok(TaskDetails {
            task,
            iterations,
            current,
        })
    }

    /// Tasks of a project in ID order, optionally filtered by status.
    pub fn list_tasks(&self, project: &str, status: Option<&TaskStatus>) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for id in self.storage.list_tasks(project)? {
            let task = self.storage.read_task(project, &id)?;
            if status.map_or(true, |wanted| &task.status == wanted) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    pub fn update_task(&self, project: &str, id: &str, update: TaskUpdate) -> Result<TaskDetails> {
        if update.is_empty() {
            return Err(Error::Validation("no fields to update".to_string()));
        }
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(Error::Validation("task title cannot be empty".to_string()));
            }
        }
        let target = update
            .status
            .as_deref()
            .map(|raw| self.parse_status(raw))
            .transpose()?;
        // Fail on a missing task before any transition runs.
        self.read_task(project, id)?;

        if let Some(target) = target {
            self.transition(project, id, target)?;
        }

        let mut task = self.read_task(project, id)?;
        let mut changed = false;
        for (field, value) in [
            (&mut task.title, update.title),
            (&mut task.description, update.description),
            (&mut task.notes, update.notes),
        ] {
            if let Some(value) = value {
                if *field != value {
                    *field = value;
                    changed = true;
                }
            }
        }
        if changed {
            self.storage.write_task(project, &task)?;
            tracing::info!(project, id, "updated task fields");
        }
        self.get_task(project, id)
    }

    /// Route a status change through the state machine.
    fn transition(&self, project: &str, id: &str, target: TaskStatus) -> Result<()> {
        let mut task = self.read_task(project, id)?;
        let current = task.status.clone();
        if current == target {
            return Ok(());
        }

        match (&current, &target) {
            (TaskStatus::Todo | TaskStatus::Extension(_), TaskStatus::InProgress) => {
                self.start_iteration(project, id).map(drop)
            }
            (TaskStatus::Completed, TaskStatus::InProgress) => {
                self.continue_task(project, id, None).map(drop)
            }
            (TaskStatus::InProgress, TaskStatus::Completed) => {
                self.complete_task(project, id).map(drop)
            }
            (TaskStatus::Extension(_), TaskStatus::Todo) | (_, TaskStatus::Extension(_)) => {
                if current == TaskStatus::Completed {
                    task.completed = None;
                    let mut record = self.storage.read_project(project)?;
                    record.record_task_reopened();
                    self.storage.write_task(project, &task_with_status(task, target.clone()))?;
                    self.storage.write_project(&record)?;
                } else {
                    self.storage
                        .write_task(project, &task_with_status(task, target.clone()))?;
                }
                tracing::info!(project, id, from = %current, to = %target, "task status changed");
                Ok(())
            }
            _ => Err(Error::InvalidState(format!(
                "cannot move task {id} from {current} to {target}"
            ))),
        }
    }

    /// Start work on a task: opens the next iteration.
    pub fn start_iteration(&self, project: &str, id: &str) -> Result<Iteration> {
        let mut task = self.read_task(project, id)?;
        let open = self
            .current_iteration(project, &task)?
            .filter(Iteration::is_open);

        match (task.status.clone(), open) {
            (TaskStatus::Completed, _) => Err(Error::InvalidState(format!(
                "task {id} is COMPLETED; continue it to open a new iteration"
            ))),
            (TaskStatus::InProgress, Some(iteration)) => Err(Error::InvalidState(format!(
                "task {id} already has iteration {} in progress",
                iteration.iteration
            ))),
            (_, Some(iteration)) => {
                // Parked under an extension status with an open iteration: resume it.
                task.start(model::now())?;
                self.storage.write_task(project, &task)?;
                tracing::info!(project, id, iteration = iteration.iteration, "resumed task");
                Ok(iteration)
            }
            (status, None) => {
                if status != TaskStatus::InProgress {
                    task.start(model::now())?;
                }
                self.open_iteration(project, &mut task, None)
            }
        }
    }

    pub fn add_note(&self, project: &str, id: &str, note: &str) -> Result<Iteration> {
        self.edit_current(project, id, |iteration| iteration.add_note(note))
    }

    pub fn set_summary(&self, project: &str, id: &str, summary: &str) -> Result<Iteration> {
        self.edit_current(project, id, |iteration| iteration.set_summary(summary))
    }

    pub fn add_feedback(&self, project: &str, id: &str, feedback: &str) -> Result<Iteration> {
        self.edit_current(project, id, |iteration| iteration.add_feedback(feedback))
    }

    pub fn set_next_steps(&self, project: &str, id: &str, next_steps: &str) -> Result<Iteration> {
        self.edit_current(project, id, |iteration| iteration.set_next_steps(next_steps))
    }

    pub fn complete_iteration(&self, project: &str, id: &str) -> Result<Iteration> {
        let iteration = self.edit_current(project, id, |iteration| {
            iteration.complete(model::now())
        })?;
        tracing::info!(project, id, iteration = iteration.iteration, "completed iteration");
        Ok(iteration)
    }

    /// Close the task, auto-completing its open iteration.
    pub fn complete_task(&self, project: &str, id: &str) -> Result<Task> {
        let mut task = self.read_task(project, id)?;
        let now = model::now();
        if task.status != TaskStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "cannot complete task {id} while it is {}",
                task.status
            )));
        }

        if let Some(mut iteration) = self.current_iteration(project, &task)? {
            if iteration.is_open() {
                iteration.complete_with_fallback(now)?;
                self.storage.write_iteration(project, &iteration)?;
            }
        }

        task.complete(now)?;
        let mut record = self.storage.read_project(project)?;
        record.record_task_completed();
        self.storage.write_task(project, &task)?;
        self.storage.write_project(&record)?;
        tracing::info!(project, id, "completed task");
        Ok(task)
    }

    /// Apply several iteration fields at once, opening an iteration if needed.
    pub fn quick_update(&self, project: &str, id: &str, fields: QuickUpdate) -> Result<Iteration> {
        if fields.note.is_none() && fields.summary.is_none() && fields.next_steps.is_none() {
            return Err(Error::Validation(
                "quick update needs a note, summary or next steps".to_string(),
            ));
        }
        let task = self.read_task(project, id)?;
        if task.status == TaskStatus::Completed {
            return Err(Error::InvalidState(format!(
                "task {id} is COMPLETED; continue it before adding updates"
            )));
        }

        let mut iteration = match self
            .current_iteration(project, &task)?
            .filter(Iteration::is_open)
        {
            Some(iteration) => iteration,
            None => self.start_iteration(project, id)?,
        };
        if let Some(note) = &fields.note {
            iteration.add_note(note)?;
        }
        if let Some(summary) = &fields.summary {
            iteration.set_summary(summary)?;
        }
        if let Some(next_steps) = &fields.next_steps {
            iteration.set_next_steps(next_steps)?;
        }
        self.storage.write_iteration(project, &iteration)?;
        Ok(iteration)
    }

    /// Reopen a completed task in a fresh iteration.
    pub fn continue_task(&self, project: &str, id: &str, reason: Option<&str>) -> Result<Iteration> {
        let mut task = self.read_task(project, id)?;
        task.reopen()?;
        let note = reason
            .filter(|reason| !reason.trim().is_empty())
            .map(|reason| format!("Continuation reason: {reason}"));

        let mut record = self.storage.read_project(project)?;
        let iteration = self.open_iteration(project, &mut task, note)?;
        record.record_task_reopened();
        self.storage.write_project(&record)?;
        tracing::info!(project, id, iteration = iteration.iteration, "continued task");
        Ok(iteration)
    }

    /// New TODO task derived from an existing one. Iterations are not copied.
    pub fn clone_task(&self, project: &str, id: &str, options: CloneOptions) -> Result<Task> {
        let source = self.read_task(project, id)?;
        let notes = options.notes.unwrap_or_else(|| {
            let mut notes = format!("Cloned from task {}", source.id);
            if !source.notes.is_empty() {
                notes.push_str("\n\n");
                notes.push_str(&source.notes);
            }
            notes
        });
        let fields = NewTask {
            title: options
                .title
                .unwrap_or_else(|| format!("{} (copy)", source.title)),
            description: source.description,
            notes,
        };
        let task = self.create_task(project, fields)?;
        tracing::info!(project, source = id, id = %task.id, "cloned task");
        Ok(task)
    }

    /// Remove a task and its iterations. The ID is never reissued.
    pub fn delete_task(&self, project: &str, id: &str) -> Result<Task> {
        let task = self.read_task(project, id)?;
        let mut record = self.storage.read_project(project)?;
        self.storage.delete_task(project, id)?;
        record.total_tasks = record.total_tasks.saturating_sub(1);
        if task.status == TaskStatus::Completed {
            record.record_task_reopened();
        }
        self.storage.write_project(&record)?;
        tracing::info!(project, id, "deleted task");
        Ok(task)
    }

    // =========================================================================
    // Iterations
    // =========================================================================

    pub fn get_iteration(&self, project: &str, id: &str, number: u32) -> Result<Iteration> {
        self.read_task(project, id)?;
        self.storage
            .read_iteration(project, id, number)
            .map_err(|err| match err {
                Error::NotFound(_) => {
                    Error::NotFound(format!("iteration {number} of task {id} in '{project}'"))
                }
                other => other,
            })
    }

    pub fn list_iterations(&self, project: &str, id: &str) -> Result<Vec<Iteration>> {
        self.read_task(project, id)?;
        self.storage
            .list_iterations(project, id)?
            .into_iter()
            .map(|number| self.storage.read_iteration(project, id, number))
            .collect()
    }

    // =========================================================================
    // Search and templates
    // =========================================================================

    pub fn search(&self, query: SearchQuery) -> Result<SearchResults<'_>> {
        SearchEngine::new(&self.storage, &self.config.search).search(query)
    }

    pub fn related_tasks(&self, project: &str, id: &str) -> Result<Vec<RelatedTask>> {
        SearchEngine::new(&self.storage, &self.config.search).related(project, id)
    }

    /// Tasks touched within the last `days` days across all projects.
    pub fn recent_activity(&self, days: u32) -> Result<Vec<RecentActivity>> {
        SearchEngine::new(&self.storage, &self.config.search).recent(days)
    }

    pub fn templates(&self) -> Result<TemplateRegistry> {
        TemplateRegistry::load(self.config.templates_dir())
    }

    pub fn create_from_template(
        &self,
        project: &str,
        template: &str,
        variables: &Variables,
    ) -> Result<Task> {
        let fields = self.templates()?.instantiate(template, variables)?;
        let task = self.create_task(project, fields)?;
        tracing::info!(project, template, id = %task.id, "created task from template");
        Ok(task)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn read_task(&self, project: &str, id: &str) -> Result<Task> {
        if !self.storage.project_exists(project) {
            return Err(Error::NotFound(format!("project '{project}'")));
        }
        self.storage.read_task(project, id)
    }

    fn current_iteration(&self, project: &str, task: &Task) -> Result<Option<Iteration>> {
        if task.current_iteration == 0 {
            return Ok(None);
        }
        self.storage
            .read_iteration(project, &task.id, task.current_iteration)
            .map(Some)
            .map_err(|err| match err {
                Error::NotFound(_) => Error::Storage(format!(
                    "task {} points at missing iteration {}",
                    task.id, task.current_iteration
                )),
                other => other,
            })
    }

    /// Create iteration `total + 1`, writing it before the task that points at it.
    fn open_iteration(
        &self,
        project: &str,
        task: &mut Task,
        note: Option<String>,
    ) -> Result<Iteration> {
        let next = task.total_iterations + 1;
        if self.storage.iteration_exists(project, &task.id, next)? {
            return Err(Error::Storage(format!(
                "iteration {next} of task {} already exists on disk; total_iterations is out of sync",
                task.id
            )));
        }

        let mut iteration = task.begin_iteration(model::now());
        if let Some(note) = note {
            iteration.add_note(&note)?;
        }
        self.storage.write_iteration(project, &iteration)?;
        self.storage.write_task(project, task)?;
        tracing::info!(project, id = %task.id, iteration = iteration.iteration, "started iteration");
        Ok(iteration)
    }

    fn edit_current(
        &self,
        project: &str,
        id: &str,
        edit: impl FnOnce(&mut Iteration) -> Result<()>,
    ) -> Result<Iteration> {
        let task = self.read_task(project, id)?;
        let mut iteration = self.current_iteration(project, &task)?.ok_or_else(|| {
            Error::NotFound(format!("task {id} has no current iteration; start one first"))
        })?;
        edit(&mut iteration)?;
        self.storage.write_iteration(project, &iteration)?;
        Ok(iteration)
    }
}

fn task_with_status(mut task: Task, status: TaskStatus) -> Task {
    task.status = status;
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IterationStatus;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Manager) {
        let temp = TempDir::new().expect("tempdir");
        let config = Config {
            root: temp.path().join("projects"),
            ..Config::default()
        };
        let manager = Manager::new(config);
        manager.create_project("alpha", "Home energy").expect("project");
        (temp, manager)
    }

    fn new_task(manager: &Manager, title: &str) -> Task {
        manager
            .create_task(
                "alpha",
                NewTask {
                    title: title.to_string(),
                    description: "heat pump efficiency".to_string(),
                    notes: "measure first".to_string(),
                },
            )
            .expect("create task")
    }

    #[test]
    fn failed_task_write_keeps_counter() {
        let (_temp, manager) = setup();
        let storage = manager.storage();
        let before = storage.read_project("alpha").unwrap().next_task_id();
        // a directory squatting on the canonical file name blocks the write
        fs::create_dir_all(storage.tasks_dir("alpha").unwrap().join("001-x.yaml")).unwrap();

        let err = manager
            .create_task(
                "alpha",
                NewTask {
                    title: "x".to_string(),
                    ..NewTask::default()
                },
            )
            .expect_err("blocked write");
        assert_eq!(err.kind(), "storage");

        let project = storage.read_project("alpha").unwrap();
        assert_eq!(project.next_task_id(), before);
        assert_eq!(project.total_tasks, 0);
        assert_eq!(new_task(&manager, "y").id, "001");
        assert_eq!(new_task(&manager, "z").id, "002");
    }

    #[test]
    fn project_names_collide_case_insensitively() {
        let (_temp, manager) = setup();
        let err = manager.create_project("ALPHA", "").expect_err("collision");
        assert!(matches!(err, Error::Conflict(_)));
        let err = manager.create_project("bad name", "").expect_err("invalid");
        assert!(matches!(err, Error::Validation(_)));
        manager.create_project("beta", "").expect("beta");
        assert_eq!(manager.list_projects().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn ids_stay_monotonic_across_restart() {
        let (temp, manager) = setup();
        let a = new_task(&manager, "One");
        let b = new_task(&manager, "Two");
        manager.delete_task("alpha", &b.id).expect("delete");

        let restarted = Manager::new(Config {
            root: temp.path().join("projects"),
            ..Config::default()
        });
        let c = restarted
            .create_task(
                "alpha",
                NewTask {
                    title: "Three".to_string(),
                    ..NewTask::default()
                },
            )
            .expect("create");
        assert_eq!(a.id, "001");
        assert_eq!(b.id, "002");
        assert_eq!(c.id, "003");

        let project = restarted.get_project("alpha").unwrap();
        assert_eq!(project.total_tasks, 2);
        assert_eq!(project.next_task_id(), Some(4));
    }

    #[test]
    fn create_task_rejects_blank_title_and_missing_project() {
        let (_temp, manager) = setup();
        let blank = NewTask {
            title: "   ".to_string(),
            ..NewTask::default()
        };
        assert!(matches!(
            manager.create_task("alpha", blank),
            Err(Error::Validation(_))
        ));
        let fields = NewTask {
            title: "x".to_string(),
            ..NewTask::default()
        };
        assert!(matches!(
            manager.create_task("ghost", fields),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn iteration_edits_require_current_iteration() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        let err = manager.add_note("alpha", &task.id, "hi").expect_err("none");
        assert!(matches!(err, Error::NotFound(_)));

        let first = manager.start_iteration("alpha", &task.id).expect("start");
        assert_eq!(first.iteration, 1);
        let err = manager.start_iteration("alpha", &task.id).expect_err("open");
        assert!(matches!(err, Error::InvalidState(_)));

        manager.add_note("alpha", &task.id, "a").unwrap();
        manager.add_note("alpha", &task.id, "b").unwrap();
        manager.add_feedback("alpha", &task.id, "ok").unwrap();
        manager.set_next_steps("alpha", &task.id, "order parts").unwrap();
        let err = manager
            .complete_iteration("alpha", &task.id)
            .expect_err("summary");
        assert!(matches!(err, Error::Validation(_)));

        manager.set_summary("alpha", &task.id, "done").unwrap();
        let done = manager.complete_iteration("alpha", &task.id).unwrap();
        assert_eq!(done.notes, "a\nb");
        assert_eq!(done.status, IterationStatus::Completed);

        let err = manager.add_note("alpha", &task.id, "late").expect_err("closed");
        assert!(matches!(err, Error::InvalidState(_)));

        let second = manager.start_iteration("alpha", &task.id).expect("next");
        assert_eq!(second.iteration, 2);
    }

    #[test]
    fn complete_task_auto_completes_open_iteration() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        manager.start_iteration("alpha", &task.id).unwrap();
        manager.add_note("alpha", &task.id, "bled radiators").unwrap();

        let done = manager.complete_task("alpha", &task.id).expect("complete");
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed.is_some());

        let iteration = manager.get_iteration("alpha", &task.id, 1).unwrap();
        assert_eq!(iteration.status, IterationStatus::Completed);
        assert_eq!(iteration.summary, "bled radiators");
        assert_eq!(manager.get_project("alpha").unwrap().completed_tasks, 1);

        let err = manager.complete_task("alpha", &task.id).expect_err("twice");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn complete_task_requires_in_progress() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        let err = manager.complete_task("alpha", &task.id).expect_err("todo");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn continue_task_opens_next_iteration() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        manager.start_iteration("alpha", &task.id).unwrap();
        manager.complete_task("alpha", &task.id).unwrap();

        let next = manager
            .continue_task("alpha", &task.id, Some("still noisy"))
            .expect("continue");
        assert_eq!(next.iteration, 2);
        assert_eq!(next.status, IterationStatus::InProgress);
        assert_eq!(next.notes, "Continuation reason: still noisy");

        let details = manager.get_task("alpha", &task.id).unwrap();
        assert_eq!(details.task.status, TaskStatus::InProgress);
        assert_eq!(details.task.current_iteration, 2);
        assert_eq!(details.iterations, vec![1, 2]);
        assert!(details.task.completed.is_none());
        assert_eq!(manager.get_project("alpha").unwrap().completed_tasks, 0);

        let err = manager
            .continue_task("alpha", &task.id, None)
            .expect_err("not completed");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn clone_resets_state_and_skips_iterations() {
        let (_temp, manager) = setup();
        let source = new_task(&manager, "Tune");
        manager.start_iteration("alpha", &source.id).unwrap();

        let copy = manager
            .clone_task("alpha", &source.id, CloneOptions::default())
            .expect("clone");
        assert_ne!(copy.id, source.id);
        assert_eq!(copy.status, TaskStatus::Todo);
        assert_eq!(copy.total_iterations, 0);
        assert_eq!(copy.title, "Tune (copy)");
        assert_eq!(copy.description, source.description);
        assert!(copy.notes.starts_with("Cloned from task 001"));
        assert!(manager
            .storage()
            .list_iterations("alpha", &copy.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn update_task_rejects_unknown_fields() {
        let err = TaskUpdate::from_json(serde_json::json!({"priority": "high"}))
            .expect_err("unknown field");
        assert!(matches!(err, Error::Validation(_)));
        assert!(TaskUpdate::from_json(serde_json::json!(["title"])).is_err());
    }

    #[test]
    fn update_task_routes_status_through_state_machine() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");

        let update = TaskUpdate {
            status: Some("completed".to_string()),
            ..TaskUpdate::default()
        };
        let err = manager
            .update_task("alpha", &task.id, update)
            .expect_err("todo -> completed");
        assert!(matches!(err, Error::InvalidState(_)));

        let update = TaskUpdate {
            status: Some("IN_PROGRESS".to_string()),
            title: Some("Tune heat pump".to_string()),
            ..TaskUpdate::default()
        };
        let details = manager.update_task("alpha", &task.id, update).unwrap();
        assert_eq!(details.task.status, TaskStatus::InProgress);
        assert_eq!(details.task.title, "Tune heat pump");
        assert_eq!(details.current.map(|it| it.iteration), Some(1));

        let update = TaskUpdate {
            status: Some("BOGUS".to_string()),
            ..TaskUpdate::default()
        };
        assert!(matches!(
            manager.update_task("alpha", &task.id, update),
            Err(Error::Validation(_))
        ));

        let archive = TaskUpdate {
            status: Some("archived".to_string()),
            ..TaskUpdate::default()
        };
        let details = manager.update_task("alpha", &task.id, archive).unwrap();
        assert_eq!(
            details.task.status,
            TaskStatus::Extension("ARCHIVED".to_string())
        );

        // Back to work resumes the still-open iteration.
        let resume = TaskUpdate {
            status: Some("in_progress".to_string()),
            ..TaskUpdate::default()
        };
        let details = manager.update_task("alpha", &task.id, resume).unwrap();
        assert_eq!(details.task.status, TaskStatus::InProgress);
        assert_eq!(details.task.total_iterations, 1);
    }

    #[test]
    fn quick_update_starts_iteration_when_needed() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        let err = manager
            .quick_update("alpha", &task.id, QuickUpdate::default())
            .expect_err("empty");
        assert!(matches!(err, Error::Validation(_)));

        let iteration = manager
            .quick_update(
                "alpha",
                &task.id,
                QuickUpdate {
                    note: Some("checked filters".to_string()),
                    summary: Some("filters fine".to_string()),
                    next_steps: Some("check pressure".to_string()),
                },
            )
            .expect("quick");
        assert_eq!(iteration.iteration, 1);
        assert_eq!(iteration.notes, "checked filters");
        assert_eq!(iteration.summary, "filters fine");
        assert_eq!(
            manager.get_task("alpha", &task.id).unwrap().task.status,
            TaskStatus::InProgress
        );

        manager.complete_task("alpha", &task.id).unwrap();
        let err = manager
            .quick_update(
                "alpha",
                &task.id,
                QuickUpdate {
                    note: Some("late".to_string()),
                    ..QuickUpdate::default()
                },
            )
            .expect_err("completed");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn project_status_is_idempotent() {
        let (_temp, manager) = setup();
        let a = new_task(&manager, "One");
        new_task(&manager, "Two");
        manager.start_iteration("alpha", &a.id).unwrap();
        manager.complete_task("alpha", &a.id).unwrap();

        let first = manager.project_status("alpha").unwrap();
        let second = manager.project_status("alpha").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_tasks, 2);
        assert_eq!(first.completed_tasks, 1);
        assert_eq!(first.pending_tasks, 1);
        assert_eq!(first.completion_percentage, 50.0);
        assert_eq!(first.by_status.get("TODO"), Some(&1));
        assert_eq!(first.by_status.get("COMPLETED"), Some(&1));
    }

    #[test]
    fn external_edits_are_picked_up() {
        let (_temp, manager) = setup();
        let task = new_task(&manager, "Tune");
        let path = manager
            .storage()
            .task_file("alpha", &task.id, &task.title)
            .unwrap();
        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("measure first", "edited by hand");
        std::fs::write(&path, edited).unwrap();

        let details = manager.get_task("alpha", &task.id).unwrap();
        assert_eq!(details.task.notes, "edited by hand");
    }

    #[test]
    fn set_project_status_validates() {
        let (_temp, manager) = setup();
        let project = manager.set_project_status("alpha", "archived").unwrap();
        assert_eq!(project.status, ProjectStatus::Archived);
        assert!(matches!(
            manager.set_project_status("alpha", "frozen"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn create_from_template_expands_variables() {
        let (_temp, manager) = setup();
        let mut vars = Variables::new();
        vars.insert("component".to_string(), "boiler".to_string());
        vars.insert("issue".to_string(), "no hot water".to_string());
        let task = manager
            .create_from_template("alpha", "bug_investigation", &vars)
            .expect("template");
        assert!(task.title.contains("boiler"));

        vars.remove("issue");
        let err = manager
            .create_from_template("alpha", "bug_investigation", &vars)
            .expect_err("missing var");
        assert!(matches!(err, Error::Validation(_)));
    }
}
