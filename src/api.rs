//! REST API over the manager.
//!
//! Handlers are thin: each request builds a fresh [`Manager`] over the
//! configured root and runs the operation on the blocking pool.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, JsonError, Result};
use crate::manager::{CloneOptions, Manager, QuickUpdate, TaskUpdate};
use crate::model::NewTask;
use crate::search::{SearchQuery, DEFAULT_RECENT_DAYS};
use crate::template::{Template, Variables};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    config: Arc<Config>,
}

impl ApiState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Error wrapper mapping error kinds to HTTP status codes.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(JsonError::from(&self.0))).into_response()
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        "not_found" => StatusCode::NOT_FOUND,
        "validation" => StatusCode::BAD_REQUEST,
        "conflict" => StatusCode::CONFLICT,
        "invalid_state" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;
type CreatedResult = std::result::Result<(StatusCode, Json<Value>), ApiError>;

/// Build the router with all routes.
pub fn router(config: Config) -> Router {
    let state = ApiState::new(config);
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{project}", get(get_project))
        .route(
            "/projects/{project}/status",
            get(project_status).put(set_project_status),
        )
        .route(
            "/projects/{project}/tasks",
            get(list_tasks).post(create_task),
        )
        .route(
            "/projects/{project}/tasks/from-template",
            post(create_from_template),
        )
        .route(
            "/projects/{project}/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/projects/{project}/tasks/{id}/start", post(start_iteration))
        .route("/projects/{project}/tasks/{id}/complete", post(complete_task))
        .route("/projects/{project}/tasks/{id}/continue", post(continue_task))
        .route("/projects/{project}/tasks/{id}/clone", post(clone_task))
        .route("/projects/{project}/tasks/{id}/quick", post(quick_update))
        .route(
            "/projects/{project}/tasks/{id}/iterations",
            get(list_iterations),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/start",
            post(start_iteration),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/note",
            post(add_note),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/summary",
            post(set_summary),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/feedback",
            post(add_feedback),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/next-steps",
            post(set_next_steps),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/complete",
            post(complete_iteration),
        )
        .route(
            "/projects/{project}/tasks/{id}/iterations/{number}",
            get(get_iteration),
        )
        .route(
            "/projects/{project}/tasks/{id}/related",
            get(related_tasks),
        )
        .route("/search", get(search))
        .route("/recent", get(recent_activity))
        .route("/templates", get(list_templates).post(save_template))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: Config, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, root = %config.root.display(), "REST API listening");
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Run `op` against a fresh manager on the blocking pool.
async fn with_manager<T, F>(state: &ApiState, op: F) -> ApiResult
where
    F: FnOnce(&Manager) -> Result<T> + Send + 'static,
    T: Serialize,
{
    let config = Arc::clone(&state.config);
    let value = tokio::task::spawn_blocking(move || {
        let manager = Manager::new(config.as_ref().clone());
        let result = op(&manager)?;
        Ok::<_, Error>(serde_json::to_value(result)?)
    })
    .await
    .map_err(|err| Error::Storage(format!("request worker failed: {err}")))??;
    Ok(Json(value))
}

fn created(response: ApiResult) -> CreatedResult {
    response.map(|json| (StatusCode::CREATED, json))
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|err| Error::Validation(err.to_string()))
}

// =============================================================================
// Bodies
// =============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateProjectBody {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTaskBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    notes: String,
}

impl From<CreateTaskBody> for NewTask {
    fn from(body: CreateTaskBody) -> Self {
        NewTask {
            title: body.title,
            description: body.description,
            notes: body.notes,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusBody {
    status: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TextBody {
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ContinueBody {
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FromTemplateBody {
    template: String,
    #[serde(default)]
    variables: Variables,
}

#[derive(Deserialize)]
struct SaveTemplateBody {
    name: String,
    #[serde(flatten)]
    template: Template,
}

#[derive(Deserialize)]
struct TaskFilter {
    status: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    status: Option<String>,
    project: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct RecentParams {
    days: Option<u32>,
}

/// Bodies of action endpoints may be omitted entirely.
fn optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| Error::Validation(err.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_projects(State(state): State<ApiState>) -> ApiResult {
    with_manager(&state, |manager| {
        manager
            .list_projects()?
            .iter()
            .map(|name| manager.get_project(name))
            .collect::<Result<Vec<_>>>()
    })
    .await
}

async fn create_project(State(state): State<ApiState>, Json(body): Json<Value>) -> CreatedResult {
    let body: CreateProjectBody = parse_body(body)?;
    created(
        with_manager(&state, move |manager| {
            manager.create_project(&body.name, &body.description)
        })
        .await,
    )
}

async fn get_project(State(state): State<ApiState>, Path(project): Path<String>) -> ApiResult {
    with_manager(&state, move |manager| manager.get_project(&project)).await
}

async fn project_status(State(state): State<ApiState>, Path(project): Path<String>) -> ApiResult {
    with_manager(&state, move |manager| manager.project_status(&project)).await
}

async fn set_project_status(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let body: StatusBody = parse_body(body)?;
    with_manager(&state, move |manager| {
        manager.set_project_status(&project, &body.status)
    })
    .await
}

async fn list_tasks(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult {
    with_manager(&state, move |manager| {
        let status = filter
            .status
            .as_deref()
            .map(|raw| manager.parse_status(raw))
            .transpose()?;
        manager.list_tasks(&project, status.as_ref())
    })
    .await
}

async fn create_task(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> CreatedResult {
    let fields: NewTask = parse_body::<CreateTaskBody>(body)?.into();
    created(with_manager(&state, move |manager| manager.create_task(&project, fields)).await)
}

async fn create_from_template(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> CreatedResult {
    let body: FromTemplateBody = parse_body(body)?;
    created(
        with_manager(&state, move |manager| {
            manager.create_from_template(&project, &body.template, &body.variables)
        })
        .await,
    )
}

async fn get_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.get_task(&project, &id)).await
}

async fn update_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let update = TaskUpdate::from_json(body)?;
    with_manager(&state, move |manager| manager.update_task(&project, &id, update)).await
}

async fn delete_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.delete_task(&project, &id)).await
}

async fn complete_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.complete_task(&project, &id)).await
}

async fn continue_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let body: ContinueBody = optional_body(&body)?;
    with_manager(&state, move |manager| {
        manager.continue_task(&project, &id, body.reason.as_deref())
    })
    .await
}

async fn clone_task(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    body: Bytes,
) -> CreatedResult {
    let options: CloneOptions = optional_body(&body)?;
    created(with_manager(&state, move |manager| manager.clone_task(&project, &id, options)).await)
}

async fn quick_update(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let fields: QuickUpdate = parse_body(body)?;
    with_manager(&state, move |manager| manager.quick_update(&project, &id, fields)).await
}

async fn list_iterations(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.list_iterations(&project, &id)).await
}

async fn get_iteration(
    State(state): State<ApiState>,
    Path((project, id, number)): Path<(String, String, u32)>,
) -> ApiResult {
    with_manager(&state, move |manager| {
        manager.get_iteration(&project, &id, number)
    })
    .await
}

async fn start_iteration(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.start_iteration(&project, &id)).await
}

async fn add_note(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let body: TextBody = parse_body(body)?;
    with_manager(&state, move |manager| manager.add_note(&project, &id, &body.text)).await
}

async fn set_summary(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let body: TextBody = parse_body(body)?;
    with_manager(&state, move |manager| {
        manager.set_summary(&project, &id, &body.text)
    })
    .await
}

async fn add_feedback(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let body: TextBody = parse_body(body)?;
    with_manager(&state, move |manager| {
        manager.add_feedback(&project, &id, &body.text)
    })
    .await
}

async fn set_next_steps(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let body: TextBody = parse_body(body)?;
    with_manager(&state, move |manager| {
        manager.set_next_steps(&project, &id, &body.text)
    })
    .await
}

async fn complete_iteration(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.complete_iteration(&project, &id)).await
}

async fn search(State(state): State<ApiState>, Query(params): Query<SearchParams>) -> ApiResult {
    with_manager(&state, move |manager| {
        let status = params
            .status
            .as_deref()
            .map(|raw| manager.parse_status(raw))
            .transpose()?;
        let query = SearchQuery {
            text: params.q,
            status,
            project: params.project,
            limit: params.limit,
        };
        manager.search(query)?.collect::<Result<Vec<_>>>()
    })
    .await
}

async fn related_tasks(
    State(state): State<ApiState>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult {
    with_manager(&state, move |manager| manager.related_tasks(&project, &id)).await
}

async fn recent_activity(
    State(state): State<ApiState>,
    Query(params): Query<RecentParams>,
) -> ApiResult {
    let days = params.days.unwrap_or(DEFAULT_RECENT_DAYS);
    with_manager(&state, move |manager| manager.recent_activity(days)).await
}

async fn list_templates(State(state): State<ApiState>) -> ApiResult {
    with_manager(&state, |manager| Ok(manager.templates()?.list())).await
}

async fn save_template(State(state): State<ApiState>, Json(body): Json<Value>) -> CreatedResult {
    let body: SaveTemplateBody = parse_body(body)?;
    created(
        with_manager(&state, move |manager| {
            let mut registry = manager.templates()?;
            registry.save(&body.name, body.template.clone())?;
            Ok(serde_json::json!({
                "name": body.name,
                "template": body.template,
            }))
        })
        .await,
    )
}
