//! Execution boundary between model-issued tool calls and task storage.

use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

use super::handlers;
use super::registry::{ToolKind, ToolRegistry};
use super::result::{ToolCallResult, NOT_AUTHORIZED, NOT_FOUND};
use crate::models::UserId;
use crate::repository::TaskRepository;
use crate::tasks::TaskService;
use crate::Error;

/// Argument keys that could carry an identity. Dropped before any handler
/// sees the arguments.
const IDENTITY_KEYS: [&str; 3] = ["user_id", "owner", "owner_id"];

/// Routes tool calls to their handlers on behalf of an authenticated caller.
///
/// Every call returns a `ToolCallResult`; nothing is raised to the caller.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    tasks: TaskService,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            registry,
            tasks: TaskService::new(repo),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a call whose arguments are still an unparsed JSON blob.
    ///
    /// A malformed blob fails only this call.
    pub async fn execute_json(
        &self,
        tool_name: &str,
        caller: &UserId,
        arguments_json: &str,
    ) -> ToolCallResult {
        if self.registry.lookup(tool_name).is_none() {
            return unknown_tool(tool_name);
        }
        let arguments = if arguments_json.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str(arguments_json) {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = tool_name, user_id = %caller, "Malformed tool arguments: {}", e);
                    return ToolCallResult::failure(
                        format!("Malformed arguments: {}", e),
                        format!("Could not parse arguments for '{}'", tool_name),
                    );
                }
            }
        };
        self.execute(tool_name, caller, arguments).await
    }

    /// Execute `tool_name` for `caller`.
    pub async fn execute(&self, tool_name: &str, caller: &UserId, arguments: Value) -> ToolCallResult {
        let Some(kind) = self.registry.lookup(tool_name) else {
            return unknown_tool(tool_name);
        };

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => strip_identity(tool_name, other),
        };
        let outcome = AssertUnwindSafe(handlers::run(kind, &self.tasks, caller, arguments))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => failure_for(kind, err),
            Err(_) => ToolCallResult::failure(
                "internal fault while executing tool",
                format!("Error executing tool '{}'", tool_name),
            ),
        };

        info!(
            tool = tool_name,
            user_id = %caller,
            success = result.success,
            error = result.error.as_deref().unwrap_or(""),
            "Tool executed"
        );
        result
    }
}

fn unknown_tool(tool_name: &str) -> ToolCallResult {
    warn!(tool = tool_name, "Unknown tool requested");
    ToolCallResult::failure(NOT_FOUND, format!("Tool '{}' is not available", tool_name))
}

fn strip_identity(tool_name: &str, mut arguments: Value) -> Value {
    if let Some(object) = arguments.as_object_mut() {
        for key in IDENTITY_KEYS {
            if object.remove(key).is_some() {
                warn!(tool = tool_name, key, "Ignoring caller-supplied identity argument");
            }
        }
    }
    arguments
}

fn failure_for(kind: ToolKind, err: Error) -> ToolCallResult {
    let verb = match kind {
        ToolKind::DeleteTask => "delete",
        ToolKind::ListTasks => "list",
        _ => "update",
    };
    match err {
        Error::NotFound(_) => ToolCallResult::failure(NOT_FOUND, "Task not found"),
        Error::NotAuthorized(_) => {
            ToolCallResult::failure(NOT_AUTHORIZED, format!("Not authorized to {} this task", verb))
        }
        Error::Validation(msg) => {
            ToolCallResult::failure(msg, format!("Invalid arguments for '{}'", kind.name()))
        }
        other => {
            let message = match kind {
                ToolKind::AddTask => "Failed to add task",
                ToolKind::ListTasks => "Failed to list tasks",
                ToolKind::CompleteTask => "Failed to update task completion status",
                ToolKind::DeleteTask => "Failed to delete task",
                ToolKind::UpdateTask => "Failed to update task",
            };
            ToolCallResult::failure(other.to_string(), message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTaskRepository;
    use crate::models::{NewTask, Priority, TaskFilter};
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    fn dispatcher() -> (ToolDispatcher, Arc<InMemoryTaskRepository>) {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::new()), repo.clone());
        (dispatcher, repo)
    }

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    async fn seed(repo: &InMemoryTaskRepository, owner: &UserId, title: &str) -> Uuid {
        repo.create_task(
            owner,
            NewTask {
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher.execute("drop_tables", &user(), json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn test_add_task_ignores_spoofed_owner() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();
        let victim = user();
        let result = dispatcher
            .execute(
                "add_task",
                &caller,
                json!({"title": "buy milk", "user_id": victim.to_string(), "owner": victim.to_string()}),
            )
            .await;

        assert!(result.success, "{:?}", result);
        let stored = repo.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, caller);
        assert_eq!(stored[0].priority, Priority::Medium);
        assert!(!stored[0].completed);
        assert_eq!(result.get("task_id"), Some(&json!(stored[0].id.to_string())));
    }

    #[tokio::test]
    async fn test_list_tasks_empty() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher.execute("list_tasks", &user(), json!({})).await;
        let value = result.to_value();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["tasks"], json!([]));
        assert_eq!(value["count"], json!(0));
    }

    #[tokio::test]
    async fn test_list_tasks_filters_by_completion_and_owner() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();
        let done = seed(&repo, &caller, "done").await;
        seed(&repo, &caller, "open").await;
        seed(&repo, &user(), "someone else's").await;
        dispatcher
            .execute("complete_task", &caller, json!({"task_id": done.to_string()}))
            .await;

        let result = dispatcher
            .execute("list_tasks", &caller, json!({"completed": true}))
            .await;
        assert_eq!(result.get("count"), Some(&json!(1)));
        assert_eq!(result.get("tasks").unwrap()[0]["title"], json!("done"));

        let all = dispatcher.execute("list_tasks", &caller, json!({})).await;
        assert_eq!(all.get("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_complete_task_twice_restores_state() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();
        let id = seed(&repo, &caller, "toggle me").await;
        let args = json!({"task_id": id.to_string()});

        let first = dispatcher.execute("complete_task", &caller, args.clone()).await;
        assert_eq!(first.get("completed"), Some(&json!(true)));
        let second = dispatcher.execute("complete_task", &caller, args).await;
        assert_eq!(second.get("completed"), Some(&json!(false)));
        assert!(!repo.get_task(id).await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn test_foreign_task_is_not_authorized_and_unchanged() {
        let (dispatcher, repo) = dispatcher();
        let owner = user();
        let intruder = user();
        let id = seed(&repo, &owner, "private").await;
        let before = repo.all().await;

        for (tool, args) in [
            ("complete_task", json!({"task_id": id.to_string()})),
            ("delete_task", json!({"task_id": id.to_string()})),
            ("update_task", json!({"task_id": id.to_string(), "title": "mine now"})),
            ("update_task", json!({"task_id": id.to_string(), "title": ""})),
            ("update_task", json!({"task_id": id.to_string(), "priority": "urgent"})),
            ("update_task", json!({"task_id": id.to_string(), "due_date": "someday"})),
        ] {
            let result = dispatcher.execute(tool, &intruder, args).await;
            assert!(!result.success, "{} should fail", tool);
            assert_eq!(result.error.as_deref(), Some(NOT_AUTHORIZED), "{}", tool);
        }

        let listed = dispatcher.execute("list_tasks", &intruder, json!({})).await;
        assert_eq!(listed.get("count"), Some(&json!(0)));
        assert_eq!(repo.all().await, before);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found_for_every_operation() {
        let (dispatcher, _) = dispatcher();
        let caller = user();
        let missing = Uuid::new_v4().to_string();

        for (tool, args) in [
            ("complete_task", json!({"task_id": &missing})),
            ("delete_task", json!({"task_id": &missing})),
            ("update_task", json!({"task_id": &missing, "priority": "high"})),
        ] {
            let result = dispatcher.execute(tool, &caller, args).await;
            assert_eq!(result.error.as_deref(), Some(NOT_FOUND), "{}", tool);
        }
    }

    #[tokio::test]
    async fn test_update_task_partial() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();
        let id = seed(&repo, &caller, "draft").await;
        let before = repo.get_task(id).await.unwrap().unwrap();

        let result = dispatcher
            .execute(
                "update_task",
                &caller,
                json!({"task_id": id.to_string(), "priority": "high", "due_date": "2030-01-01T09:00:00Z"}),
            )
            .await;
        assert!(result.success, "{:?}", result);

        let after = repo.get_task(id).await.unwrap().unwrap();
        assert_eq!(after.title, "draft");
        assert_eq!(after.priority, Priority::High);
        assert!(after.due_date.is_some());
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_validation_errors_are_contained() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();

        let bad_priority = dispatcher
            .execute("add_task", &caller, json!({"title": "x", "priority": "urgent"}))
            .await;
        assert!(!bad_priority.success);
        assert!(bad_priority.error.unwrap().contains("Invalid priority"));

        let bad_date = dispatcher
            .execute("add_task", &caller, json!({"title": "x", "due_date": "someday"}))
            .await;
        assert!(bad_date.error.unwrap().contains("Invalid date"));

        let missing_title = dispatcher.execute("add_task", &caller, json!({})).await;
        assert!(missing_title.error.unwrap().contains("title"));

        let bad_id = dispatcher
            .execute("delete_task", &caller, json!({"task_id": "not-a-uuid"}))
            .await;
        assert!(bad_id.error.unwrap().contains("Invalid task_id"));

        assert!(repo.all().await.is_empty());
        assert!(repo.list_tasks(&caller, &TaskFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_arguments_mean_no_arguments() {
        let (dispatcher, repo) = dispatcher();
        let caller = user();
        seed(&repo, &caller, "water plants").await;

        let listed = dispatcher.execute("list_tasks", &caller, Value::Null).await;
        assert!(listed.success);
        assert_eq!(listed.get("count"), Some(&json!(1)));

        let from_blob = dispatcher.execute_json("list_tasks", &caller, "null").await;
        assert!(from_blob.success);

        let add = dispatcher.execute("add_task", &caller, Value::Null).await;
        assert!(!add.success);
        assert!(add.error.unwrap().contains("title"));
    }

    #[tokio::test]
    async fn test_malformed_json_blob() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher.execute_json("add_task", &user(), "{title: oops").await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Malformed arguments"));

        let empty = dispatcher.execute_json("list_tasks", &user(), "").await;
        assert!(empty.success);
    }

    struct FailingRepository;

    #[async_trait]
    impl TaskRepository for FailingRepository {
        async fn create_task(&self, _: &UserId, _: NewTask) -> crate::Result<crate::models::Task> {
            Err(Error::Internal("connection reset".into()))
        }
        async fn get_task(&self, _: Uuid) -> crate::Result<Option<crate::models::Task>> {
            panic!("storage driver bug")
        }
        async fn list_tasks(
            &self,
            _: &UserId,
            _: &TaskFilter,
        ) -> crate::Result<Vec<crate::models::Task>> {
            Err(Error::Internal("connection reset".into()))
        }
        async fn update_task(
            &self,
            _: Uuid,
            _: &crate::models::TaskPatch,
        ) -> crate::Result<Option<crate::models::Task>> {
            Err(Error::Internal("connection reset".into()))
        }
        async fn toggle_completed(&self, _: Uuid) -> crate::Result<Option<crate::models::Task>> {
            Err(Error::Internal("connection reset".into()))
        }
        async fn delete_task(&self, _: Uuid) -> crate::Result<bool> {
            Err(Error::Internal("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_faults_become_envelopes() {
        let dispatcher =
            ToolDispatcher::new(Arc::new(ToolRegistry::new()), Arc::new(FailingRepository));
        let caller = user();

        let add = dispatcher.execute("add_task", &caller, json!({"title": "x"})).await;
        assert!(!add.success);
        assert_eq!(add.message, "Failed to add task");
        assert!(add.error.unwrap().contains("connection reset"));

        let panicked = dispatcher
            .execute("delete_task", &caller, json!({"task_id": Uuid::new_v4().to_string()}))
            .await;
        assert!(!panicked.success);
        assert_eq!(panicked.error.as_deref(), Some("internal fault while executing tool"));
    }
}
