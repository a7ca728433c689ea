//! taskflow project commands

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, Report};

use super::Session;

pub fn run_new(session: &Session, name: &str, description: &str) -> Result<()> {
    let project = session.manager.create_project(name, description)?;

    let mut report = Report::new(format!("Created project {}", project.name));
    report.field_if("description", &project.description);
    report.next(format!("taskflow task new {} \"<title>\"", project.name));

    emit_success(session.output, "project new", &project, Some(&report))
}

pub fn run_list(session: &Session) -> Result<()> {
    #[derive(Serialize)]
    struct ProjectRow {
        name: String,
        status: &'static str,
        description: String,
        total_tasks: u64,
        completed_tasks: u64,
    }

    let mut rows = Vec::new();
    for name in session.manager.list_projects()? {
        let project = session.manager.get_project(&name)?;
        rows.push(ProjectRow {
            name: project.name,
            status: project.status.as_str(),
            description: project.description,
            total_tasks: project.total_tasks,
            completed_tasks: project.completed_tasks,
        });
    }

    let mut report = Report::new(format!("{} project(s)", rows.len()));
    for row in &rows {
        report.item(format!(
            "{} [{}] {}/{} done{}",
            row.name,
            row.status,
            row.completed_tasks,
            row.total_tasks,
            if row.description.is_empty() {
                String::new()
            } else {
                format!(" - {}", row.description)
            }
        ));
    }
    if rows.is_empty() {
        report.next("taskflow project new <name>");
    }

    emit_success(session.output, "project list", &rows, Some(&report))
}

pub fn run_status(session: &Session, name: &str) -> Result<()> {
    let summary = session.manager.project_status(name)?;

    let mut report = Report::new(format!(
        "Project {} ({})",
        summary.project,
        summary.status.as_str()
    ));
    report.field("tasks", summary.total_tasks.to_string());
    report.field("completed", summary.completed_tasks.to_string());
    report.field("pending", summary.pending_tasks.to_string());
    report.field("active iterations", summary.active_iterations.to_string());
    report.field(
        "progress",
        format!("{:.1}%", summary.completion_percentage),
    );
    for (status, count) in &summary.by_status {
        report.item(format!("{status}: {count}"));
    }

    emit_success(session.output, "project status", &summary, Some(&report))
}

pub fn run_set_status(session: &Session, name: &str, status: &str) -> Result<()> {
    let project = session.manager.set_project_status(name, status)?;

    let report = Report::new(format!(
        "Project {} is now {}",
        project.name,
        project.status.as_str()
    ));
    emit_success(session.output, "project set-status", &project, Some(&report))
}
