//! taskflow template commands

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, Report};
use crate::template::{Template, TemplateOrigin, Variables};

use super::Session;

pub fn run_list(session: &Session) -> Result<()> {
    let templates = session.manager.templates()?.list();

    let mut report = Report::new(format!("{} template(s)", templates.len()));
    for summary in &templates {
        let origin = match summary.origin {
            TemplateOrigin::Builtin => "builtin",
            TemplateOrigin::Custom => "custom",
        };
        report.item(format!(
            "{} ({origin}): {} [{}]",
            summary.name,
            summary.title,
            summary.variables.join(", ")
        ));
    }

    emit_success(session.output, "template list", &templates, Some(&report))
}

pub fn run_apply(session: &Session, project: &str, template: &str, vars: Variables) -> Result<()> {
    let task = session.manager.create_from_template(project, template, &vars)?;

    let mut report = Report::new(format!("Created task {} from {template}", task.id));
    report.field("title", task.title.clone());
    report.next(format!("taskflow task show {project} {}", task.id));

    emit_success(session.output, "template apply", &task, Some(&report))
}

pub fn run_save(session: &Session, name: &str, template: Template) -> Result<()> {
    #[derive(Serialize)]
    struct Saved<'a> {
        name: &'a str,
        path: String,
        variables: Vec<String>,
    }

    let variables = template.variables().into_iter().collect();
    let mut registry = session.manager.templates()?;
    let path = registry.save(name, template)?;

    let saved = Saved {
        name,
        path: path.display().to_string(),
        variables,
    };
    let mut report = Report::new(format!("Saved template {name}"));
    report.field("path", saved.path.clone());
    emit_success(session.output, "template save", &saved, Some(&report))
}
