//! taskflow iteration commands

use crate::error::Result;
use crate::model::Iteration;
use crate::output::{emit_success, Report};

use super::Session;

/// Which field an `iter` edit touches.
#[derive(Debug, Clone, Copy)]
pub enum Edit {
    Note,
    Summary,
    Feedback,
    NextSteps,
}

pub fn run_start(session: &Session, project: &str, id: &str) -> Result<()> {
    let iteration = session.manager.start_iteration(project, id)?;

    let mut report = Report::new(format!(
        "Started iteration {} of task {id}",
        iteration.iteration
    ));
    report.next(format!("taskflow iter note {project} {id} \"<note>\""));

    emit_success(session.output, "iter start", &iteration, Some(&report))
}

pub fn run_edit(session: &Session, edit: Edit, project: &str, id: &str, text: &str) -> Result<()> {
    let manager = &session.manager;
    let (iteration, command, verb) = match edit {
        Edit::Note => (manager.add_note(project, id, text)?, "iter note", "Added note to"),
        Edit::Summary => (
            manager.set_summary(project, id, text)?,
            "iter summary",
            "Set summary of",
        ),
        Edit::Feedback => (
            manager.add_feedback(project, id, text)?,
            "iter feedback",
            "Added feedback to",
        ),
        Edit::NextSteps => (
            manager.set_next_steps(project, id, text)?,
            "iter next",
            "Set next steps of",
        ),
    };

    let report = Report::new(format!(
        "{verb} iteration {} of task {id}",
        iteration.iteration
    ));
    emit_success(session.output, command, &iteration, Some(&report))
}

pub fn run_complete(session: &Session, project: &str, id: &str) -> Result<()> {
    let iteration = session.manager.complete_iteration(project, id)?;

    let mut report = Report::new(format!(
        "Completed iteration {} of task {id}",
        iteration.iteration
    ));
    report.field("summary", iteration.summary.clone());
    report.next(format!("taskflow task complete {project} {id}"));

    emit_success(session.output, "iter complete", &iteration, Some(&report))
}

pub fn run_show(session: &Session, project: &str, id: &str, number: Option<u32>) -> Result<()> {
    let iteration = match number {
        Some(number) => session.manager.get_iteration(project, id, number)?,
        None => session
            .manager
            .get_task(project, id)?
            .current
            .ok_or_else(|| {
                crate::error::Error::NotFound(format!(
                    "task {id} has no current iteration; start one first"
                ))
            })?,
    };

    let report = iteration_output(&iteration);
    emit_success(session.output, "iter show", &iteration, Some(&report))
}

pub fn run_list(session: &Session, project: &str, id: &str) -> Result<()> {
    let iterations = session.manager.list_iterations(project, id)?;

    let mut report = Report::new(format!("{} iteration(s) of task {id}", iterations.len()));
    for iteration in &iterations {
        let summary = iteration.summary.lines().next().unwrap_or_default();
        report.item(format!(
            "{:03} [{}] {summary}",
            iteration.iteration,
            iteration.status.as_str()
        ));
    }

    emit_success(session.output, "iter list", &iterations, Some(&report))
}

fn iteration_output(iteration: &Iteration) -> Report {
    let mut report = Report::new(format!(
        "Iteration {} of task {} ({})",
        iteration.iteration,
        iteration.task_id,
        iteration.status.as_str()
    ));
    report.field("started", iteration.started.to_rfc3339());
    if let Some(completed) = iteration.completed {
        report.field("completed", completed.to_rfc3339());
    }
    report.field_if("notes", &iteration.notes);
    report.field_if("summary", &iteration.summary);
    report.field_if("feedback", &iteration.user_feedback);
    report.field_if("next steps", &iteration.next_steps);
    report
}
