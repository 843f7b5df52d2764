use serde::Serialize;
use serde_json::{json, Value};

/// The callable task operations. Each variant selects one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    AddTask,
    ListTasks,
    CompleteTask,
    DeleteTask,
    UpdateTask,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::AddTask,
        ToolKind::ListTasks,
        ToolKind::CompleteTask,
        ToolKind::DeleteTask,
        ToolKind::UpdateTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::AddTask => "add_task",
            ToolKind::ListTasks => "list_tasks",
            ToolKind::CompleteTask => "complete_task",
            ToolKind::DeleteTask => "delete_task",
            ToolKind::UpdateTask => "update_task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn schema(&self) -> ToolSchema {
        let task_id = json!({"type": "string", "description": "ID of the task"});
        let priority = |description: &str| {
            json!({"type": "string", "enum": ["low", "medium", "high"], "description": description})
        };

        let (description, parameters) = match self {
            ToolKind::AddTask => (
                "Add a new task to the user's task list",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Title of the task"},
                        "description": {"type": "string", "description": "Description of the task (optional)"},
                        "priority": priority("Priority level (default: medium)"),
                        "due_date": {"type": "string", "description": "Due date in ISO-8601 format (optional)"}
                    },
                    "required": ["title"]
                }),
            ),
            ToolKind::ListTasks => (
                "List all tasks for the user, with optional filtering",
                json!({
                    "type": "object",
                    "properties": {
                        "completed": {"type": "boolean", "description": "Filter by completion status (optional)"}
                    }
                }),
            ),
            ToolKind::CompleteTask => (
                "Toggle the completion status of a task",
                json!({
                    "type": "object",
                    "properties": {"task_id": task_id},
                    "required": ["task_id"]
                }),
            ),
            ToolKind::DeleteTask => (
                "Delete a task from the user's task list",
                json!({
                    "type": "object",
                    "properties": {"task_id": task_id},
                    "required": ["task_id"]
                }),
            ),
            ToolKind::UpdateTask => (
                "Update properties of an existing task",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": task_id,
                        "title": {"type": "string", "description": "New title (optional)"},
                        "description": {"type": "string", "description": "New description (optional)"},
                        "completed": {"type": "boolean", "description": "New completion status (optional)"},
                        "priority": priority("New priority level (optional)"),
                        "due_date": {"type": "string", "description": "New due date in ISO-8601 format (optional)"}
                    },
                    "required": ["task_id"]
                }),
            ),
        };

        ToolSchema {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Model-facing description of one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Fixed catalog of tools offered to the model.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    entries: Vec<(ToolKind, ToolSchema)>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_tools(&ToolKind::ALL)
    }
}

impl ToolRegistry {
    /// Registry with every task tool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry exposing only `kinds`, in the given order.
    pub fn with_tools(kinds: &[ToolKind]) -> Self {
        Self {
            entries: kinds.iter().map(|kind| (*kind, kind.schema())).collect(),
        }
    }

    /// Schema for `tool_name`. Unknown names get a placeholder schema
    /// instead of an error.
    pub fn describe(&self, tool_name: &str) -> ToolSchema {
        self.entries
            .iter()
            .find(|(kind, _)| kind.name() == tool_name)
            .map(|(_, schema)| schema.clone())
            .unwrap_or_else(|| ToolSchema {
                name: tool_name.to_string(),
                description: format!("Unknown tool: {}", tool_name),
                parameters: json!({"type": "object", "properties": {}}),
            })
    }

    pub fn lookup(&self, tool_name: &str) -> Option<ToolKind> {
        self.entries
            .iter()
            .map(|(kind, _)| *kind)
            .find(|kind| kind.name() == tool_name)
    }

    /// Every registered schema, in catalog order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(|(_, schema)| schema.clone()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(kind, _)| kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_complete() {
        let registry = ToolRegistry::new();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec!["add_task", "list_tasks", "complete_task", "delete_task", "update_task"]
        );
        for name in names {
            assert_eq!(registry.lookup(name).map(|k| k.name()), Some(name));
        }
    }

    #[test]
    fn test_describe_unknown_is_total() {
        let registry = ToolRegistry::new();
        let schema = registry.describe("launch_rocket");
        assert_eq!(schema.name, "launch_rocket");
        assert_eq!(schema.description, "Unknown tool: launch_rocket");
        assert_eq!(schema.parameters["properties"], json!({}));
        assert!(registry.lookup("launch_rocket").is_none());
    }

    #[test]
    fn test_schema_constraints() {
        let registry = ToolRegistry::new();
        let add = registry.describe("add_task");
        assert_eq!(add.parameters["required"], json!(["title"]));
        assert_eq!(
            add.parameters["properties"]["priority"]["enum"],
            json!(["low", "medium", "high"])
        );
        let update = registry.describe("update_task");
        assert_eq!(update.parameters["required"], json!(["task_id"]));
        assert!(registry.describe("list_tasks").parameters.get("required").is_none());
    }

    #[test]
    fn test_restricted_registry() {
        let registry = ToolRegistry::with_tools(&[ToolKind::ListTasks]);
        assert_eq!(registry.schemas().len(), 1);
        assert!(registry.lookup("delete_task").is_none());
    }
}
