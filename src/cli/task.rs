//! taskflow task commands

use crate::error::Result;
use crate::manager::{CloneOptions, QuickUpdate, TaskDetails, TaskUpdate};
use crate::model::{NewTask, Task};
use crate::output::{emit_success, Report};

use super::Session;

/// Options for `task new`
pub struct NewOptions {
    pub project: String,
    pub title: String,
    pub description: String,
    pub notes: String,
}

/// Options for `task update`
pub struct UpdateOptions {
    pub project: String,
    pub id: String,
    pub update: TaskUpdate,
}

pub fn run_new(session: &Session, options: NewOptions) -> Result<()> {
    let task = session.manager.create_task(
        &options.project,
        NewTask {
            title: options.title,
            description: options.description,
            notes: options.notes,
        },
    )?;

    let mut report = Report::new(format!("Created task {} in {}", task.id, task.project));
    report.field("title", task.title.clone());
    report.next(format!("taskflow task start {} {}", task.project, task.id));

    emit_success(session.output, "task new", &task, Some(&report))
}

pub fn run_list(session: &Session, project: &str, status: Option<&str>) -> Result<()> {
    let status = status.map(|raw| session.manager.parse_status(raw)).transpose()?;
    let tasks = session.manager.list_tasks(project, status.as_ref())?;

    let mut report = Report::new(format!("{} task(s) in {project}", tasks.len()));
    for task in &tasks {
        report.item(task_line(task));
    }

    emit_success(session.output, "task list", &tasks, Some(&report))
}

pub fn run_show(session: &Session, project: &str, id: &str) -> Result<()> {
    let details = session.manager.get_task(project, id)?;
    let report = details_output(&details);
    emit_success(session.output, "task show", &details, Some(&report))
}

pub fn run_update(session: &Session, options: UpdateOptions) -> Result<()> {
    let details = session
        .manager
        .update_task(&options.project, &options.id, options.update)?;

    let report = details_output(&details);
    emit_success(session.output, "task update", &details, Some(&report))
}

pub fn run_complete(session: &Session, project: &str, id: &str) -> Result<()> {
    let task = session.manager.complete_task(project, id)?;

    let mut report = Report::new(format!("Completed task {}", task.id));
    report.field("title", task.title.clone());
    report.field("iterations", task.total_iterations.to_string());

    emit_success(session.output, "task complete", &task, Some(&report))
}

pub fn run_continue(session: &Session, project: &str, id: &str, reason: Option<&str>) -> Result<()> {
    let iteration = session.manager.continue_task(project, id, reason)?;

    let mut report = Report::new(format!(
        "Continued task {id} in iteration {}",
        iteration.iteration
    ));
    report.field_if("notes", &iteration.notes);
    report.next(format!("taskflow iter note {project} {id} \"<note>\""));

    emit_success(session.output, "task continue", &iteration, Some(&report))
}

pub fn run_clone(session: &Session, project: &str, id: &str, options: CloneOptions) -> Result<()> {
    let task = session.manager.clone_task(project, id, options)?;

    let mut report = Report::new(format!("Cloned task {id} as {}", task.id));
    report.field("title", task.title.clone());

    emit_success(session.output, "task clone", &task, Some(&report))
}

pub fn run_delete(session: &Session, project: &str, id: &str) -> Result<()> {
    let task = session.manager.delete_task(project, id)?;

    let report = Report::new(format!("Deleted task {} ({})", task.id, task.title));
    emit_success(session.output, "task delete", &task, Some(&report))
}

pub fn run_quick(session: &Session, project: &str, id: &str, fields: QuickUpdate) -> Result<()> {
    let iteration = session.manager.quick_update(project, id, fields)?;

    let mut report = Report::new(format!(
        "Updated iteration {} of task {id}",
        iteration.iteration
    ));
    report.field_if("summary", &iteration.summary);
    report.field_if("next steps", &iteration.next_steps);

    emit_success(session.output, "task quick", &iteration, Some(&report))
}

fn task_line(task: &Task) -> String {
    let iteration = if task.current_iteration > 0 {
        format!(" (iter {})", task.current_iteration)
    } else {
        String::new()
    };
    format!("{} [{}] {}{iteration}", task.id, task.status, task.title)
}

fn details_output(details: &TaskDetails) -> Report {
    let task = &details.task;
    let mut report = Report::new(task_line(task));
    report.field("project", task.project.clone());
    report.field("created", task.created.to_rfc3339());
    report.field_if("description", &task.description);
    report.field_if("notes", &task.notes);
    report.field("iterations", task.total_iterations.to_string());
    if let Some(current) = &details.current {
        report.item(format!(
            "iteration {} ({})",
            current.iteration,
            current.status.as_str()
        ));
        if !current.notes.is_empty() {
            report.item(format!("notes: {}", current.notes));
        }
        if !current.summary.is_empty() {
            report.item(format!("summary: {}", current.summary));
        }
        if !current.next_steps.is_empty() {
            report.item(format!("next steps: {}", current.next_steps));
        }
    }
    report
}
