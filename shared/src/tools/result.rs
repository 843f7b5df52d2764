use serde::Serialize;
use serde_json::{Map, Value};

/// `error` value for a task or tool that does not exist.
pub const NOT_FOUND: &str = "not found";
/// `error` value for a task owned by someone else.
pub const NOT_AUTHORIZED: &str = "not authorized";

/// Uniform envelope returned by every tool execution.
///
/// Serializes flat: `{"success", "message", ...data, "error"?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Map::new(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Attach an operation-specific field.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.data.clone();
        object.insert("success".to_string(), Value::Bool(self.success));
        object.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(error) = &self.error {
            object.insert("error".to_string(), Value::String(error.clone()));
        }
        Value::Object(object)
    }
}
