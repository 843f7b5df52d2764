//! Task Lambda - Direct REST access to the caller's tasks.
//!
//! Endpoints:
//! - GET /tasks - List tasks (?completed=&priority=&limit=&offset=)
//! - POST /tasks - Create a task
//! - GET /tasks/{id} - Get a task
//! - PUT /tasks/{id} - Update a task
//! - PATCH /tasks/{id}/complete - Toggle completion
//! - DELETE /tasks/{id} - Delete a task

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::http::{error_response, error_response_for, json_response, ApiResponse};
use shared::models::{parse_timestamp, NewTask, Priority, TaskFilter, TaskPatch};
use shared::repository::MAX_TASK_PAGE;
use shared::{
    authenticate, get_database_credentials, parse_body, resolve_user, Config, PgTaskRepository,
    PgUserRepository, TaskService, UserId, UserRepository,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Create task request. Ownership always comes from the caller, so any
/// owner-like field in the body is ignored.
#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    title: String,
    description: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
}

/// Update task request
#[derive(Debug, Deserialize)]
struct UpdateTaskRequest {
    title: Option<String>,
    description: Option<String>,
    completed: Option<bool>,
    priority: Option<String>,
    due_date: Option<String>,
}

/// Application state
struct AppState {
    users: Arc<dyn UserRepository>,
    tasks: TaskService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

        let credentials = get_database_credentials(&secrets_client, &config.db_secret_arn).await?;
        let pool = shared::db::create_pool(&config, &credentials).await?;

        Ok(Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            tasks: TaskService::new(Arc::new(PgTaskRepository::new(pool))),
        })
    }
}

fn parse_task_id(raw: &str) -> shared::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| shared::Error::Validation(format!("Invalid task id '{}'", raw)))
}

fn parse_filter(event: &Request) -> shared::Result<TaskFilter> {
    let params = event.query_string_parameters();

    let completed = match params.first("completed") {
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(other) => {
            return Err(shared::Error::Validation(format!(
                "Invalid completed '{}': expected true or false",
                other
            )))
        }
        None => None,
    };
    let priority = params.first("priority").map(str::parse::<Priority>).transpose()?;

    let limit = match params.first("limit") {
        Some(raw) => {
            let limit: i64 = raw
                .parse()
                .map_err(|_| shared::Error::Validation(format!("Invalid limit '{}'", raw)))?;
            if !(1..=MAX_TASK_PAGE).contains(&limit) {
                return Err(shared::Error::Validation(format!(
                    "limit must be between 1 and {}",
                    MAX_TASK_PAGE
                )));
            }
            Some(limit)
        }
        None => None,
    };
    let offset = match params.first("offset") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(offset) if offset >= 0 => Some(offset),
            _ => {
                return Err(shared::Error::Validation(
                    "offset must be a non-negative integer".to_string(),
                ))
            }
        },
        None => None,
    };

    Ok(TaskFilter {
        completed,
        priority,
        limit,
        offset,
    })
}

async fn create_task(
    state: &AppState,
    user_id: &UserId,
    request: CreateTaskRequest,
) -> shared::Result<(u16, Value)> {
    let fields = NewTask {
        title: request.title,
        description: request.description,
        priority: request
            .priority
            .as_deref()
            .map(str::parse::<Priority>)
            .transpose()?
            .unwrap_or_default(),
        due_date: request.due_date.as_deref().map(parse_timestamp).transpose()?,
    };
    let task = state.tasks.create(user_id, fields).await?;
    info!(user_id = %user_id, task_id = %task.id, "Created task");

    Ok((201, serde_json::to_value(&task)?))
}

async fn update_task(
    state: &AppState,
    user_id: &UserId,
    id: Uuid,
    request: UpdateTaskRequest,
) -> shared::Result<(u16, Value)> {
    state.tasks.owned(user_id, id).await?;
    let patch = TaskPatch {
        title: request.title,
        description: request.description,
        completed: request.completed,
        priority: request.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        due_date: request.due_date.as_deref().map(parse_timestamp).transpose()?,
    };
    if patch.is_empty() {
        return Err(shared::Error::Validation("No fields to update".to_string()));
    }
    let task = state.tasks.update(user_id, id, patch).await?;
    info!(user_id = %user_id, task_id = %task.id, "Updated task");

    Ok((200, serde_json::to_value(&task)?))
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path).to_string();
    let method = event.method().as_str().to_string();

    info!("Received request: method={}, path={}", method, path);

    if method == "OPTIONS" {
        return json_response(200, &json!({}));
    }

    let caller = match authenticate(&event) {
        Ok(caller) => caller,
        Err(e) => {
            return error_response(401, format!("Authentication required: {}", e.client_message()))
        }
    };
    let user_id = match resolve_user(state.users.as_ref(), &caller).await {
        Ok(id) => id,
        Err(e) => return error_response_for(&e),
    };

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let outcome = match (method.as_str(), segments.as_slice()) {
        ("GET", ["tasks"]) => match parse_filter(&event) {
            Ok(filter) => state.tasks.list(&user_id, &filter).await.map(|tasks| {
                let count = tasks.len();
                (200, json!({ "tasks": tasks, "count": count }))
            }),
            Err(e) => Err(e),
        },

        ("POST", ["tasks"]) => {
            let request: CreateTaskRequest = parse_body!(event.body());
            create_task(&state, &user_id, request).await
        }

        ("GET", ["tasks", id]) => match parse_task_id(id) {
            Ok(id) => match state.tasks.get(&user_id, id).await {
                Ok(task) => serde_json::to_value(&task).map(|v| (200, v)).map_err(Into::into),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        },

        ("PUT", ["tasks", id]) => {
            let request: UpdateTaskRequest = parse_body!(event.body());
            match parse_task_id(id) {
                Ok(id) => update_task(&state, &user_id, id, request).await,
                Err(e) => Err(e),
            }
        }

        ("PATCH", ["tasks", id, "complete"]) => match parse_task_id(id) {
            Ok(id) => match state.tasks.toggle_complete(&user_id, id).await {
                Ok(task) => serde_json::to_value(&task).map(|v| (200, v)).map_err(Into::into),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        },

        ("DELETE", ["tasks", id]) => match parse_task_id(id) {
            Ok(id) => state
                .tasks
                .delete(&user_id, id)
                .await
                .map(|task| (200, json!({ "task_id": task.id, "deleted": true }))),
            Err(e) => Err(e),
        },

        _ => return error_response(404, "Not found"),
    };

    match outcome {
        Ok((status, data)) => json_response(status, &ApiResponse::success(data)),
        Err(e) => {
            if e.status_code() >= 500 {
                error!(user_id = %user_id, "Task request failed: {}", e);
            }
            error_response_for(&e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
