//! taskflow search command

use crate::error::Result;
use crate::output::{emit_success, Report};
use crate::search::SearchQuery;

use super::Session;

/// Options for the search command
pub struct SearchOptions {
    pub query: String,
    pub status: Option<String>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

pub fn run(session: &Session, options: SearchOptions) -> Result<()> {
    let status = options
        .status
        .as_deref()
        .map(|raw| session.manager.parse_status(raw))
        .transpose()?;
    let query = SearchQuery {
        text: options.query.clone(),
        status,
        project: options.project,
        limit: options.limit,
    };

    let hits = session.manager.search(query)?.collect::<Result<Vec<_>>>()?;

    let mut report = Report::new(format!("{} match(es) for \"{}\"", hits.len(), options.query));
    for hit in &hits {
        let location = match hit.iteration {
            Some(number) => format!("{}/{} iter {number}", hit.project, hit.task_id),
            None => format!("{}/{}", hit.project, hit.task_id),
        };
        report.item(format!(
            "{location} [{}] {}: {}",
            hit.status,
            hit.field.as_str(),
            hit.snippet.text
        ));
    }

    emit_success(session.output, "search", &hits, Some(&report))
}

pub fn run_related(session: &Session, project: &str, id: &str) -> Result<()> {
    let related = session.manager.related_tasks(project, id)?;

    let mut report = Report::new(format!("{} task(s) related to {project}/{id}", related.len()));
    for task in &related {
        report.item(format!(
            "{} [{}] {} ({:.0}%)",
            task.task_id,
            task.status,
            task.title,
            task.score * 100.0
        ));
    }
    if let Some(best) = related.first() {
        report.next(format!("taskflow task show {project} {}", best.task_id));
    }

    emit_success(session.output, "search related", &related, Some(&report))
}

pub fn run_recent(session: &Session, days: u32) -> Result<()> {
    let recent = session.manager.recent_activity(days)?;

    let mut report = Report::new(format!(
        "{} task(s) touched in the last {days} day(s)",
        recent.len()
    ));
    for item in &recent {
        report.item(format!(
            "{} {}/{} [{}] {}",
            item.updated.format("%Y-%m-%d %H:%M"),
            item.project,
            item.task_id,
            item.status,
            item.title
        ));
    }

    emit_success(session.output, "search recent", &recent, Some(&report))
}
