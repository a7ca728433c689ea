//! Shared output formatting for taskflow CLI commands.
//!
//! Every command produces a [`Report`] for people and a serializable value
//! for `--json`. Both successes and failures use one envelope shape, tagged
//! with [`SCHEMA_VERSION`].

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "taskflow.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Plain-text rendering of a command result: a headline, `key: value`
/// fields, free-form items and suggested follow-up commands.
#[derive(Debug, Clone, Default)]
pub struct Report {
    headline: String,
    fields: Vec<(String, String)>,
    items: Vec<String>,
    next: Vec<String>,
}

impl Report {
    pub fn new(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            ..Self::default()
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Skips empty values.
    pub fn field_if(&mut self, key: impl Into<String>, value: &str) {
        if !value.is_empty() {
            self.field(key, value);
        }
    }

    pub fn item(&mut self, line: impl Into<String>) {
        self.items.push(line.into());
    }

    pub fn next(&mut self, command: impl Into<String>) {
        self.next.push(command.into());
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline)?;
        if !self.fields.is_empty() {
            f.write_str("\n\nSummary:")?;
            for (key, value) in &self.fields {
                match value.as_str() {
                    "" => write!(f, "\n- {key}")?,
                    value => write!(f, "\n- {key}: {value}")?,
                }
            }
        }
        for (title, lines) in [("Details", &self.items), ("Next steps", &self.next)] {
            if lines.is_empty() {
                continue;
            }
            write!(f, "\n\n{title}:")?;
            for line in lines {
                write!(f, "\n- {line}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a, B: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(flatten)]
    body: B,
    #[serde(skip_serializing_if = "no_steps")]
    next_steps: &'a [String],
}

fn no_steps(steps: &&[String]) -> bool {
    steps.is_empty()
}

impl<B: Serialize> Envelope<'_, B> {
    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct Success<'a, T: Serialize> {
    data: &'a T,
}

#[derive(Serialize)]
struct Failure {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: Option<&Report>,
) -> Result<()> {
    if options.json {
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            body: Success { data },
            next_steps: report.map_or(&[][..], |report| report.next.as_slice()),
        }
        .print();
    }
    if let Some(report) = report.filter(|_| !options.quiet) {
        println!("{report}");
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = recovery_hints(err);
    if json {
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            body: Failure {
                error: ErrorBody {
                    message: err.to_string(),
                    code: err.exit_code(),
                    kind: err.kind(),
                    details: err.details(),
                },
            },
            next_steps: &next_steps,
        }
        .print();
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn infer_command_name_from_args() -> String {
    command_name_from(std::env::args().skip(1))
}

/// Options that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &["--root", "--config"];

/// Whether `second` names a subcommand of `first` rather than an argument.
fn is_subcommand(first: &str, second: &str) -> bool {
    match first {
        "project" | "task" | "iter" | "template" | "config" => true,
        "search" => matches!(second, "related" | "recent"),
        _ => false,
    }
}

fn command_name_from(args: impl IntoIterator<Item = String>) -> String {
    let mut words = Vec::with_capacity(2);
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        words.push(arg);
        if words.len() == 2 {
            break;
        }
    }

    match words.as_slice() {
        [] => "taskflow".to_string(),
        [first, second] if is_subcommand(first, second) => format!("{first} {second}"),
        [first, ..] => first.clone(),
    }
}

fn recovery_hints(err: &Error) -> Vec<String> {
    let hint = match err {
        Error::InvalidConfig(_) => "fix taskflow.toml or run `taskflow config init`".to_string(),
        Error::NotFound(what) if what.starts_with("project") => "taskflow project list".to_string(),
        Error::NotFound(what) if what.contains("no current iteration") => {
            "taskflow iter start <project> <id>".to_string()
        }
        Error::Corrupt { path, .. } => format!("inspect or restore {}", path.display()),
        _ => return Vec::new(),
    };
    vec![hint]
}
