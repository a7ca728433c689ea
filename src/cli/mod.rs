//! Command-line interface for taskflow
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::output::OutputOptions;
use crate::search::DEFAULT_RECENT_DAYS;
use crate::template::Variables;

mod config;
mod iter;
mod project;
mod search;
mod serve;
mod task;
mod template;

/// taskflow - local-first project and task tracker
///
/// Projects, tasks and iterations are stored as JSON/YAML files that can be
/// read, edited and merged by hand.
#[derive(Parser, Debug)]
#[command(name = "taskflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Projects root directory (overrides the config file)
    #[arg(long, global = true, env = "TASKFLOW_ROOT")]
    pub root: Option<PathBuf>,

    /// Config file to load instead of the default lookup
    #[arg(long, global = true, env = "TASKFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Work on a task's current iteration
    #[command(subcommand)]
    Iter(IterCommands),

    /// Search tasks and iterations for text
    #[command(args_conflicts_with_subcommands = true)]
    Search {
        #[command(subcommand)]
        view: Option<SearchCommands>,

        /// Literal text to look for (empty lists every task in scope)
        #[arg(default_value = "")]
        query: String,

        /// Only tasks currently in this status
        #[arg(long)]
        status: Option<String>,

        /// Only this project
        #[arg(long)]
        project: Option<String>,

        /// Stop after this many hits
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Task templates
    #[command(subcommand)]
    Template(TemplateCommands),

    /// Run the REST API server
    Serve {
        /// Bind host (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (defaults to server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the JSON control channel
    Control {
        /// Serve a single session over stdin/stdout instead of TCP
        #[arg(long)]
        stdio: bool,

        /// Bind host (defaults to control.host)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (defaults to control.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project
    New {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List projects
    List,

    /// Show task counts for a project
    Status { name: String },

    /// Set a project's status (active, completed, archived)
    SetStatus { name: String, status: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        project: String,
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// List tasks in a project
    List {
        project: String,

        /// Only tasks in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a task with its current iteration
    Show { project: String, id: String },

    /// Edit task fields or change its status
    Update {
        project: String,
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        status: Option<String>,
    },

    /// Start the task (opens the next iteration)
    Start { project: String, id: String },

    /// Complete the task
    Complete { project: String, id: String },

    /// Reopen a completed task in a new iteration
    Continue {
        project: String,
        id: String,

        /// Why the work is being picked up again
        #[arg(long)]
        reason: Option<String>,
    },

    /// Copy a task into a new TODO task
    Clone {
        project: String,
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a task and its iterations
    Delete { project: String, id: String },

    /// Add a note, summary and/or next steps in one go
    Quick {
        project: String,
        id: String,

        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        summary: Option<String>,

        #[arg(long)]
        next_steps: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum IterCommands {
    /// Start the next iteration
    Start { project: String, id: String },

    /// Append a note
    Note {
        project: String,
        id: String,
        text: String,
    },

    /// Replace the summary
    Summary {
        project: String,
        id: String,
        text: String,
    },

    /// Append user feedback
    Feedback {
        project: String,
        id: String,
        text: String,
    },

    /// Replace the next steps
    Next {
        project: String,
        id: String,
        text: String,
    },

    /// Complete the current iteration (requires a summary)
    Complete { project: String, id: String },

    /// Show one iteration (defaults to the current one)
    Show {
        project: String,
        id: String,
        number: Option<u32>,
    },

    /// List all iterations of a task
    List { project: String, id: String },
}

#[derive(Subcommand, Debug)]
pub enum SearchCommands {
    /// Tasks in the same project that share keywords with a task
    Related {
        project: String,
        id: String,
    },

    /// Tasks touched recently across all projects, newest first
    Recent {
        /// Size of the window in days
        #[arg(long, default_value_t = DEFAULT_RECENT_DAYS)]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// List templates and their variables
    List,

    /// Create a task from a template
    Apply {
        project: String,
        template: String,

        /// Variable binding, repeatable: --var key=value
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Save a custom template
    Save {
        name: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a config file with default values
    Init {
        /// Destination (defaults to ./taskflow.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Resolved configuration plus output options for one invocation.
pub(crate) struct Session {
    pub manager: Manager,
    pub output: OutputOptions,
}

impl Session {
    pub fn config(&self) -> &Config {
        self.manager.config()
    }
}

impl Cli {
    /// Load the configuration with CLI overrides applied.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::discover(self.config.as_deref())?;
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        if let Commands::Config(ConfigCommands::Init { path, force }) = &self.command {
            return config::run_init(path.clone(), *force, output);
        }

        let session = Session {
            manager: Manager::new(self.load_config()?),
            output,
        };
        tracing::debug!(root = %session.config().root.display(), "resolved projects root");

        match self.command {
            Commands::Project(cmd) => match cmd {
                ProjectCommands::New { name, description } => {
                    project::run_new(&session, &name, &description)
                }
                ProjectCommands::List => project::run_list(&session),
                ProjectCommands::Status { name } => project::run_status(&session, &name),
                ProjectCommands::SetStatus { name, status } => {
                    project::run_set_status(&session, &name, &status)
                }
            },
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    project,
                    title,
                    description,
                    notes,
                } => task::run_new(
                    &session,
                    task::NewOptions {
                        project,
                        title,
                        description,
                        notes,
                    },
                ),
                TaskCommands::List { project, status } => {
                    task::run_list(&session, &project, status.as_deref())
                }
                TaskCommands::Show { project, id } => task::run_show(&session, &project, &id),
                TaskCommands::Update {
                    project,
                    id,
                    title,
                    description,
                    notes,
                    status,
                } => task::run_update(
                    &session,
                    task::UpdateOptions {
                        project,
                        id,
                        update: crate::manager::TaskUpdate {
                            title,
                            description,
                            notes,
                            status,
                        },
                    },
                ),
                TaskCommands::Start { project, id } => iter::run_start(&session, &project, &id),
                TaskCommands::Complete { project, id } => {
                    task::run_complete(&session, &project, &id)
                }
                TaskCommands::Continue {
                    project,
                    id,
                    reason,
                } => task::run_continue(&session, &project, &id, reason.as_deref()),
                TaskCommands::Clone {
                    project,
                    id,
                    title,
                    notes,
                } => task::run_clone(
                    &session,
                    &project,
                    &id,
                    crate::manager::CloneOptions { title, notes },
                ),
                TaskCommands::Delete { project, id } => task::run_delete(&session, &project, &id),
                TaskCommands::Quick {
                    project,
                    id,
                    note,
                    summary,
                    next_steps,
                } => task::run_quick(
                    &session,
                    &project,
                    &id,
                    crate::manager::QuickUpdate {
                        note,
                        summary,
                        next_steps,
                    },
                ),
            },
            Commands::Iter(cmd) => match cmd {
                IterCommands::Start { project, id } => iter::run_start(&session, &project, &id),
                IterCommands::Note { project, id, text } => {
                    iter::run_edit(&session, iter::Edit::Note, &project, &id, &text)
                }
                IterCommands::Summary { project, id, text } => {
                    iter::run_edit(&session, iter::Edit::Summary, &project, &id, &text)
                }
                IterCommands::Feedback { project, id, text } => {
                    iter::run_edit(&session, iter::Edit::Feedback, &project, &id, &text)
                }
                IterCommands::Next { project, id, text } => {
                    iter::run_edit(&session, iter::Edit::NextSteps, &project, &id, &text)
                }
                IterCommands::Complete { project, id } => {
                    iter::run_complete(&session, &project, &id)
                }
                IterCommands::Show {
                    project,
                    id,
                    number,
                } => iter::run_show(&session, &project, &id, number),
                IterCommands::List { project, id } => iter::run_list(&session, &project, &id),
            },
            Commands::Search {
                view: Some(SearchCommands::Related { project, id }),
                ..
            } => search::run_related(&session, &project, &id),
            Commands::Search {
                view: Some(SearchCommands::Recent { days }),
                ..
            } => search::run_recent(&session, days),
            Commands::Search {
                view: None,
                query,
                status,
                project,
                limit,
            } => search::run(
                &session,
                search::SearchOptions {
                    query,
                    status,
                    project,
                    limit,
                },
            ),
            Commands::Template(cmd) => match cmd {
                TemplateCommands::List => template::run_list(&session),
                TemplateCommands::Apply {
                    project,
                    template,
                    vars,
                } => template::run_apply(&session, &project, &template, parse_vars(&vars)?),
                TemplateCommands::Save {
                    name,
                    title,
                    description,
                    notes,
                } => template::run_save(
                    &session,
                    &name,
                    crate::template::Template {
                        title,
                        description,
                        notes,
                    },
                ),
            },
            Commands::Serve { host, port } => serve::run_rest(&session, host, port),
            Commands::Control { stdio, host, port } => {
                serve::run_control(&session, stdio, host, port)
            }
            Commands::Config(_) => Ok(()),
        }
    }
}

/// Parse repeated `key=value` arguments.
fn parse_vars(raw: &[String]) -> Result<Variables> {
    let mut vars = Variables::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            Error::Validation(format!("variable '{entry}' must look like key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Validation(format!("variable '{entry}' has no name")));
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
