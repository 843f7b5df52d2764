//! One handler per tool. The caller's identity always arrives as a separate
//! parameter; argument structs have no identity field to deserialize into.

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::registry::ToolKind;
use super::result::ToolCallResult;
use crate::models::{parse_timestamp, NewTask, Priority, Task, TaskFilter, TaskPatch, UserId};
use crate::tasks::TaskService;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct AddTaskArgs {
    title: String,
    description: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListTasksArgs {
    completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskArgs {
    task_id: String,
    title: Option<String>,
    description: Option<String>,
    completed: Option<bool>,
    priority: Option<String>,
    due_date: Option<String>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| Error::Validation(format!("Invalid arguments: {}", e)))
}

fn parse_task_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| Error::Validation(format!("Invalid task_id '{}'", raw)))
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id.to_string(),
        "title": task.title,
        "description": task.description,
        "completed": task.completed,
        "priority": task.priority,
        "due_date": task.due_date.map(|d| d.to_rfc3339()),
        "created_at": task.created_at.to_rfc3339(),
        "updated_at": task.updated_at.to_rfc3339(),
    })
}

/// Run the handler selected by `kind`.
pub(super) async fn run(
    kind: ToolKind,
    tasks: &TaskService,
    caller: &UserId,
    arguments: Value,
) -> Result<ToolCallResult> {
    match kind {
        ToolKind::AddTask => add_task(tasks, caller, parse_args(arguments)?).await,
        ToolKind::ListTasks => list_tasks(tasks, caller, parse_args(arguments)?).await,
        ToolKind::CompleteTask => complete_task(tasks, caller, parse_args(arguments)?).await,
        ToolKind::DeleteTask => delete_task(tasks, caller, parse_args(arguments)?).await,
        ToolKind::UpdateTask => update_task(tasks, caller, parse_args(arguments)?).await,
    }
}

async fn add_task(tasks: &TaskService, caller: &UserId, args: AddTaskArgs) -> Result<ToolCallResult> {
    let fields = NewTask {
        title: args.title,
        description: args.description,
        priority: args.priority.as_deref().map(str::parse::<Priority>).transpose()?.unwrap_or_default(),
        due_date: args.due_date.as_deref().map(parse_timestamp).transpose()?,
    };
    let task = tasks.create(caller, fields).await?;

    Ok(ToolCallResult::ok(format!("Task '{}' added successfully", task.title))
        .with("task_id", json!(task.id.to_string()))
        .with("task", task_json(&task)))
}

async fn list_tasks(
    tasks: &TaskService,
    caller: &UserId,
    args: ListTasksArgs,
) -> Result<ToolCallResult> {
    let filter = TaskFilter {
        completed: args.completed,
        ..Default::default()
    };
    let found = tasks.list(caller, &filter).await?;
    let listed: Vec<Value> = found.iter().map(task_json).collect();

    Ok(ToolCallResult::ok(format!("Retrieved {} tasks", listed.len()))
        .with("count", json!(listed.len()))
        .with("tasks", Value::Array(listed)))
}

async fn complete_task(
    tasks: &TaskService,
    caller: &UserId,
    args: TaskIdArgs,
) -> Result<ToolCallResult> {
    let task = tasks.toggle_complete(caller, parse_task_id(&args.task_id)?).await?;
    let status = if task.completed { "completed" } else { "marked incomplete" };

    Ok(ToolCallResult::ok(format!("Task '{}' {}", task.title, status))
        .with("task_id", json!(task.id.to_string()))
        .with("completed", json!(task.completed)))
}

async fn delete_task(tasks: &TaskService, caller: &UserId, args: TaskIdArgs) -> Result<ToolCallResult> {
    let task = tasks.delete(caller, parse_task_id(&args.task_id)?).await?;

    Ok(ToolCallResult::ok(format!("Task '{}' deleted successfully", task.title))
        .with("task_id", json!(task.id.to_string())))
}

async fn update_task(
    tasks: &TaskService,
    caller: &UserId,
    args: UpdateTaskArgs,
) -> Result<ToolCallResult> {
    let id = parse_task_id(&args.task_id)?;
    // Ownership is settled before the payload is looked at.
    tasks.owned(caller, id).await?;
    let patch = TaskPatch {
        title: args.title,
        description: args.description,
        completed: args.completed,
        priority: args.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        due_date: args.due_date.as_deref().map(parse_timestamp).transpose()?,
    };
    let task = tasks.update(caller, id, patch).await?;

    Ok(ToolCallResult::ok(format!("Task '{}' updated successfully", task.title))
        .with("task_id", json!(task.id.to_string()))
        .with("task", task_json(&task)))
}
