//! Language-model capability used by the chat orchestrator.
//!
//! `LanguageModel` is the seam; `OpenAiChatModel` talks to an
//! OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::tools::ToolSchema;

/// Faults raised by the model capability.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No API key is configured
    #[error("model API key is not configured")]
    MissingCredential,

    /// Request never produced a response
    #[error("model transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the provider
    #[error("model returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Response could not be interpreted
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// True when the fault is a credential configuration problem rather than
    /// a transient one.
    pub fn is_credential_fault(&self) -> bool {
        matches!(
            self,
            ModelError::MissingCredential | ModelError::Upstream { status: 401 | 403, .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedToolCall {
    pub call_id: String,
    pub tool_name: String,
    /// Raw JSON argument blob, exactly as the model produced it.
    pub arguments_json: String,
}

/// One entry of the model-facing message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    pub tool_calls: Vec<RequestedToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// The assistant turn that requested `calls`.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<RequestedToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
}

/// What the model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Reply text; may be empty.
    Text(String),
    /// Requests for tool execution, with any text that accompanied them.
    ToolCalls {
        content: Option<String>,
        calls: Vec<RequestedToolCall>,
    },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelReply, ModelError>;
}

/// Client for an OpenAI-compatible chat-completions API.
pub struct OpenAiChatModel {
    http_client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        http_client: reqwest::Client,
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if !request.tools.is_empty() && request.tool_choice == ToolChoice::Auto {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": message.role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.call_id,
                    "type": "function",
                    "function": {"name": call.tool_name, "arguments": call.arguments_json},
                })
            })
            .collect();
    }
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    wire
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_completion(body: &str) -> Result<ModelReply, ModelError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Malformed("response has no choices".to_string()))?;

    let message = choice.message;
    if message.tool_calls.is_empty() {
        return Ok(ModelReply::Text(message.content.unwrap_or_default()));
    }
    Ok(ModelReply::ToolCalls {
        content: message.content.filter(|c| !c.trim().is_empty()),
        calls: message
            .tool_calls
            .into_iter()
            .map(|call| RequestedToolCall {
                call_id: call.id,
                tool_name: call.function.name,
                arguments_json: call.function.arguments,
            })
            .collect(),
    })
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelReply, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::MissingCredential)?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling chat completions"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ModelError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn model() -> OpenAiChatModel {
        OpenAiChatModel::new(
            reqwest::Client::new(),
            Some("sk-test".into()),
            "https://api.example.com/v1/",
            "gpt-test",
        )
    }

    #[test]
    fn test_parse_text_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), ModelReply::Text("Hello!".into()));
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"add_task","arguments":"{\"title\":\"buy milk\"}"}},
            {"id":"call_2","type":"function","function":{"name":"list_tasks","arguments":"{}"}}
        ]}}]}"#;
        let ModelReply::ToolCalls { content, calls } = parse_completion(body).unwrap() else {
            panic!("expected tool calls");
        };
        assert!(content.is_none());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "call_1");
        assert_eq!(calls[0].tool_name, "add_task");
        assert_eq!(calls[0].arguments_json, r#"{"title":"buy milk"}"#);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_completion("<html>"), Err(ModelError::Malformed(_))));
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::assistant_tool_calls(
                    None,
                    vec![RequestedToolCall {
                        call_id: "call_1".into(),
                        tool_name: "list_tasks".into(),
                        arguments_json: "{}".into(),
                    }],
                ),
                ChatMessage::tool_result("call_1", r#"{"success":true}"#),
            ],
            tools: ToolRegistry::new().schemas(),
            tool_choice: ToolChoice::Auto,
        };
        let body = model().request_body(&request);
        assert_eq!(body["model"], json!("gpt-test"));
        assert_eq!(body["tool_choice"], json!("auto"));
        assert_eq!(body["tools"].as_array().unwrap().len(), 5);
        assert_eq!(body["tools"][0]["function"]["name"], json!("add_task"));
        assert_eq!(body["messages"][1]["tool_calls"][0]["id"], json!("call_1"));
        assert_eq!(body["messages"][1]["content"], Value::Null);
        assert_eq!(body["messages"][2]["role"], json!("tool"));
        assert_eq!(body["messages"][2]["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn test_request_without_tools_omits_choice() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
        };
        let body = model().request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let client = OpenAiChatModel::new(reqwest::Client::new(), None, "http://127.0.0.1:9", "m");
        let err = client
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user("hi")],
                tools: Vec::new(),
                tool_choice: ToolChoice::Auto,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingCredential));
        assert!(err.is_credential_fault());
    }

    #[test]
    fn test_credential_fault_classification() {
        assert!(ModelError::Upstream { status: 401, body: String::new() }.is_credential_fault());
        assert!(!ModelError::Upstream { status: 500, body: String::new() }.is_credential_fault());
        assert!(!ModelError::Transport("timeout".into()).is_credential_fault());
    }
}
