//! Message-based control channel.
//!
//! Newline-delimited JSON over TCP or stdio. Each line is one request
//! `{id, method, params}`; each response is one line
//! `{id, success, result?, error?}`. Successful mutations are broadcast to
//! every connected client as a notification line.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::{CloneOptions, Manager, QuickUpdate, TaskUpdate};
use crate::model::{Iteration, NewTask, Task};
use crate::search::{SearchQuery, DEFAULT_RECENT_DAYS};
use crate::template::{Template, Variables};

const NOTIFICATION_CAPACITY: usize = 256;

/// One request line.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// One response line.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    /// Error response carrying the error kind as its code.
    pub fn from_error(id: Option<Value>, err: &Error) -> Self {
        let mut response = Self::error(id, err.kind().to_ascii_uppercase(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = err.details();
        }
        response
    }
}

/// Change announcement sent to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    TaskUpdated { project: String, task_id: String },
    ProjectUpdated { project: String },
}

impl Notification {
    fn task(project: &str, task_id: &str) -> Self {
        Notification::TaskUpdated {
            project: project.to_string(),
            task_id: task_id.to_string(),
        }
    }

    fn project(project: &str) -> Self {
        Notification::ProjectUpdated {
            project: project.to_string(),
        }
    }
}

/// Response to one request plus the notification it triggers, if any.
#[derive(Debug)]
pub struct Outcome {
    pub response: RpcResponse,
    pub notification: Option<Notification>,
}

impl Outcome {
    fn reply(response: RpcResponse) -> Self {
        Self {
            response,
            notification: None,
        }
    }
}

enum CallError {
    UnknownMethod,
    InvalidParams(String),
    Failed(Error),
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        CallError::Failed(err)
    }
}

type Call = std::result::Result<(Value, Option<Notification>), CallError>;

/// Parse one request line and run it against a fresh manager.
pub fn handle_line(config: &Config, line: &str) -> Outcome {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable control request");
            return Outcome::reply(RpcResponse::parse_error());
        }
    };
    let manager = Manager::new(config.clone());
    dispatch(&manager, request)
}

/// Route a request to the matching manager operation.
pub fn dispatch(manager: &Manager, request: RpcRequest) -> Outcome {
    let RpcRequest { method, params, id } = request;
    let params = params.unwrap_or(Value::Null);
    tracing::debug!(method = %method, "control request");

    match call(manager, &method, params) {
        Ok((result, notification)) => Outcome {
            response: RpcResponse::success(id, result),
            notification,
        },
        Err(CallError::UnknownMethod) => {
            Outcome::reply(RpcResponse::method_not_found(id, &method))
        }
        Err(CallError::InvalidParams(message)) => {
            Outcome::reply(RpcResponse::invalid_params(id, message))
        }
        Err(CallError::Failed(err)) => {
            if err.kind() == "storage" {
                tracing::error!(method = %method, error = %err, "control request failed");
            }
            Outcome::reply(RpcResponse::from_error(id, &err))
        }
    }
}

// =============================================================================
// Params
// =============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectRef {
    project: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateProject {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetProjectStatus {
    project: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ListTasks {
    project: String,
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTask {
    project: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    notes: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskRef {
    project: String,
    id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateTask {
    project: String,
    id: String,
    changes: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskText {
    project: String,
    id: String,
    text: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ContinueTask {
    project: String,
    id: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CloneTask {
    project: String,
    id: String,
    title: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QuickTask {
    project: String,
    id: String,
    note: Option<String>,
    summary: Option<String>,
    next_steps: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IterationRef {
    project: String,
    id: String,
    number: u32,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Search {
    #[serde(default)]
    query: String,
    status: Option<String>,
    project: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Recent {
    days: Option<u32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ApplyTemplate {
    project: String,
    template: String,
    #[serde(default)]
    variables: Variables,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SaveTemplate {
    name: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    notes: String,
}

fn params<T: DeserializeOwned>(value: Value) -> std::result::Result<T, CallError> {
    serde_json::from_value(value).map_err(|err| CallError::InvalidParams(err.to_string()))
}

/// Like [`params`] but a missing params object means "all defaults".
fn optional_params<T: DeserializeOwned + Default>(value: Value) -> std::result::Result<T, CallError> {
    if value.is_null() {
        Ok(T::default())
    } else {
        params(value)
    }
}

fn to_value<T: Serialize>(value: &T) -> std::result::Result<Value, CallError> {
    serde_json::to_value(value).map_err(|err| CallError::Failed(err.into()))
}

fn task_changed(task: &Task) -> Call {
    Ok((to_value(task)?, Some(Notification::task(&task.project, &task.id))))
}

fn iteration_changed(project: &str, iteration: &Iteration) -> Call {
    Ok((
        to_value(iteration)?,
        Some(Notification::task(project, &iteration.task_id)),
    ))
}

fn read<T: Serialize>(value: T) -> Call {
    Ok((to_value(&value)?, None))
}

fn call(manager: &Manager, method: &str, raw: Value) -> Call {
    match method {
        "project.create" => {
            let p: CreateProject = params(raw)?;
            let project = manager.create_project(&p.name, &p.description)?;
            Ok((to_value(&project)?, Some(Notification::project(&project.name))))
        }
        "project.list" => read(
            manager
                .list_projects()?
                .iter()
                .map(|name| manager.get_project(name))
                .collect::<Result<Vec<_>>>()?,
        ),
        "project.get" => {
            let p: ProjectRef = params(raw)?;
            read(manager.get_project(&p.project)?)
        }
        "project.status" => {
            let p: ProjectRef = params(raw)?;
            read(manager.project_status(&p.project)?)
        }
        "project.set_status" => {
            let p: SetProjectStatus = params(raw)?;
            let project = manager.set_project_status(&p.project, &p.status)?;
            Ok((to_value(&project)?, Some(Notification::project(&project.name))))
        }

        "task.create" => {
            let p: CreateTask = params(raw)?;
            let task = manager.create_task(
                &p.project,
                NewTask {
                    title: p.title,
                    description: p.description,
                    notes: p.notes,
                },
            )?;
            task_changed(&task)
        }
        "task.list" => {
            let p: ListTasks = params(raw)?;
            let status = p
                .status
                .as_deref()
                .map(|raw| manager.parse_status(raw))
                .transpose()?;
            read(manager.list_tasks(&p.project, status.as_ref())?)
        }
        "task.get" => {
            let p: TaskRef = params(raw)?;
            read(manager.get_task(&p.project, &p.id)?)
        }
        "task.update" => {
            let p: UpdateTask = params(raw)?;
            let update = TaskUpdate::from_json(p.changes)?;
            let details = manager.update_task(&p.project, &p.id, update)?;
            Ok((
                to_value(&details)?,
                Some(Notification::task(&p.project, &p.id)),
            ))
        }
        "task.start" | "iteration.start" => {
            let p: TaskRef = params(raw)?;
            iteration_changed(&p.project, &manager.start_iteration(&p.project, &p.id)?)
        }
        "task.complete" => {
            let p: TaskRef = params(raw)?;
            task_changed(&manager.complete_task(&p.project, &p.id)?)
        }
        "task.continue" => {
            let p: ContinueTask = params(raw)?;
            let iteration = manager.continue_task(&p.project, &p.id, p.reason.as_deref())?;
            iteration_changed(&p.project, &iteration)
        }
        "task.clone" => {
            let p: CloneTask = params(raw)?;
            let options = CloneOptions {
                title: p.title,
                notes: p.notes,
            };
            task_changed(&manager.clone_task(&p.project, &p.id, options)?)
        }
        "task.delete" => {
            let p: TaskRef = params(raw)?;
            task_changed(&manager.delete_task(&p.project, &p.id)?)
        }
        "task.quick" => {
            let p: QuickTask = params(raw)?;
            let fields = QuickUpdate {
                note: p.note,
                summary: p.summary,
                next_steps: p.next_steps,
            };
            iteration_changed(&p.project, &manager.quick_update(&p.project, &p.id, fields)?)
        }

        "iteration.note" => {
            let p: TaskText = params(raw)?;
            iteration_changed(&p.project, &manager.add_note(&p.project, &p.id, &p.text)?)
        }
        "iteration.summary" => {
            let p: TaskText = params(raw)?;
            iteration_changed(&p.project, &manager.set_summary(&p.project, &p.id, &p.text)?)
        }
        "iteration.feedback" => {
            let p: TaskText = params(raw)?;
            iteration_changed(&p.project, &manager.add_feedback(&p.project, &p.id, &p.text)?)
        }
        "iteration.next_steps" => {
            let p: TaskText = params(raw)?;
            iteration_changed(
                &p.project,
                &manager.set_next_steps(&p.project, &p.id, &p.text)?,
            )
        }
        "iteration.complete" => {
            let p: TaskRef = params(raw)?;
            iteration_changed(&p.project, &manager.complete_iteration(&p.project, &p.id)?)
        }
        "iteration.get" => {
            let p: IterationRef = params(raw)?;
            read(manager.get_iteration(&p.project, &p.id, p.number)?)
        }
        "iteration.list" => {
            let p: TaskRef = params(raw)?;
            read(manager.list_iterations(&p.project, &p.id)?)
        }

        "search" => {
            let p: Search = optional_params(raw)?;
            let status = p
                .status
                .as_deref()
                .map(|raw| manager.parse_status(raw))
                .transpose()?;
            let query = SearchQuery {
                text: p.query,
                status,
                project: p.project,
                limit: p.limit,
            };
            read(manager.search(query)?.collect::<Result<Vec<_>>>()?)
        }
        "search.related" => {
            let p: TaskRef = params(raw)?;
            read(manager.related_tasks(&p.project, &p.id)?)
        }
        "search.recent" => {
            let p: Recent = optional_params(raw)?;
            read(manager.recent_activity(p.days.unwrap_or(DEFAULT_RECENT_DAYS))?)
        }

        "template.list" => read(manager.templates()?.list()),
        "template.apply" => {
            let p: ApplyTemplate = params(raw)?;
            task_changed(&manager.create_from_template(&p.project, &p.template, &p.variables)?)
        }
        "template.save" => {
            let p: SaveTemplate = params(raw)?;
            let template = Template {
                title: p.title,
                description: p.description,
                notes: p.notes,
            };
            let path = manager.templates()?.save(&p.name, template)?;
            read(serde_json::json!({
                "name": p.name,
                "path": path.display().to_string(),
            }))
        }

        _ => Err(CallError::UnknownMethod),
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Accept TCP clients until the process is stopped.
pub async fn serve_tcp(config: Config, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, root = %config.root.display(), "control channel listening");

    let config = Arc::new(config);
    let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "control client connected");
        let config = Arc::clone(&config);
        let events = events.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            match serve_connection(reader, writer, config, events).await {
                Ok(()) => tracing::debug!(%peer, "control client disconnected"),
                Err(err) => tracing::warn!(%peer, error = %err, "control connection failed"),
            }
        });
    }
}

/// Serve a single session over stdin/stdout.
pub async fn serve_stdio(config: Config) -> Result<()> {
    let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
    serve_connection(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Arc::new(config),
        events,
    )
    .await
}

/// Read request lines until EOF, interleaving broadcast notifications.
pub async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    config: Arc<Config>,
    events: broadcast::Sender<Notification>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut notifications = events.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let config = Arc::clone(&config);
                let outcome = tokio::task::spawn_blocking(move || handle_line(&config, &line))
                    .await
                    .map_err(|err| Error::Storage(format!("control worker failed: {err}")))?;
                write_line(&mut writer, &outcome.response).await?;
                if let Some(notification) = outcome.notification {
                    // No receivers is fine.
                    let _ = events.send(notification);
                }
            }
            received = notifications.recv() => match received {
                Ok(notification) => write_line(&mut writer, &notification).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "control client fell behind; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
