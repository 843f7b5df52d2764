//! Per-message chat flow: history, model call, optional tool round, recall.

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::conversation::ConversationStore;
use crate::llm::{
    ChatMessage, CompletionRequest, LanguageModel, ModelError, ModelReply, RequestedToolCall,
    ToolChoice,
};
use crate::models::{Conversation, MessageRole, UserId};
use crate::repository::UserRepository;
use crate::tools::ToolDispatcher;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant for managing tasks. \
You can help users add, list, update, complete, and delete tasks. \
Always use the provided tools to perform these operations. Be friendly and confirm actions with the user.
The available tools are:
- add_task: Add a new task with title, description, priority, and due date
- list_tasks: List tasks with optional filtering by completion status
- complete_task: Toggle completion status of a task by ID
- delete_task: Delete a task by ID
- update_task: Update properties of a task by ID

Always confirm with the user before performing destructive actions like deleting tasks.

IMPORTANT: You MUST respond to every user message. Even if no tools are needed, acknowledge the message and offer help.";

pub const EMPTY_REPLY_FALLBACK: &str =
    "I'm here to help you manage your tasks. How can I assist you today?";

pub const CREDENTIAL_FALLBACK: &str = "I'm sorry, I can't process requests right now because \
the AI service hasn't been set up yet. Please ask an administrator to configure the AI service key.";

pub const MODEL_FAULT_FALLBACK: &str =
    "I'm sorry, I couldn't process that request right now. Could you try again or rephrase it?";

/// A tool call that was executed during the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallDescriptor {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: Uuid,
    pub response: String,
    pub tool_calls: Vec<ToolCallDescriptor>,
    /// RFC 3339
    pub timestamp: String,
}

#[derive(Error, Debug)]
pub enum ChatFailure {
    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    Internal(String),
}

impl ChatFailure {
    /// `{error}` body for the transport layer. Internal detail stays in the
    /// logs.
    pub fn to_body(&self) -> Value {
        match self {
            ChatFailure::UserNotFound => json!({ "error": self.to_string() }),
            ChatFailure::Internal(_) => json!({ "error": "Failed to process chat message" }),
        }
    }
}

impl From<crate::Error> for ChatFailure {
    fn from(err: crate::Error) -> Self {
        ChatFailure::Internal(err.to_string())
    }
}

/// Where one request currently is. Each arm carries what the next step
/// needs.
enum Stage {
    Received,
    HistoryLoaded {
        conversation: Conversation,
        prompt: Vec<ChatMessage>,
    },
    ToolsRequested {
        conversation: Conversation,
        prompt: Vec<ChatMessage>,
        content: Option<String>,
        calls: Vec<RequestedToolCall>,
    },
    ToolsExecuted {
        conversation: Conversation,
        prompt: Vec<ChatMessage>,
        executed: Vec<ToolCallDescriptor>,
    },
    Replied {
        conversation: Conversation,
        reply: Result<String, ModelError>,
        executed: Vec<ToolCallDescriptor>,
    },
}

pub struct ChatOrchestrator {
    users: Arc<dyn UserRepository>,
    conversations: Arc<dyn ConversationStore>,
    dispatcher: ToolDispatcher,
    model: Arc<dyn LanguageModel>,
    history_limit: usize,
}

impl ChatOrchestrator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        conversations: Arc<dyn ConversationStore>,
        dispatcher: ToolDispatcher,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            users,
            conversations,
            dispatcher,
            model,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Handle one user message. Faults never escape: a missing user is
    /// `UserNotFound`, anything else unexpected is `Internal`.
    pub async fn handle_message(
        &self,
        user: &UserId,
        message: &str,
    ) -> Result<ChatReply, ChatFailure> {
        match AssertUnwindSafe(self.run(user, message)).catch_unwind().await {
            Ok(outcome) => {
                if let Err(e) = &outcome {
                    error!(user_id = %user, "Chat request failed: {}", e);
                }
                outcome
            }
            Err(_) => {
                error!(user_id = %user, "Chat request panicked");
                Err(ChatFailure::Internal(
                    "Internal error while processing the message".to_string(),
                ))
            }
        }
    }

    async fn run(&self, user: &UserId, message: &str) -> Result<ChatReply, ChatFailure> {
        let mut stage = Stage::Received;
        loop {
            stage = match stage {
                Stage::Received => {
                    if !self.users.exists(user).await? {
                        return Err(ChatFailure::UserNotFound);
                    }
                    let conversation = self.conversations.get_or_create_active(user).await?;
                    // Persisted before the model is called; history then
                    // includes it exactly once.
                    self.conversations
                        .append(&conversation, user, MessageRole::User, message)
                        .await?;
                    let history = self
                        .conversations
                        .recent_history(&conversation, self.history_limit)
                        .await?;

                    let mut prompt = Vec::with_capacity(history.len() + 1);
                    prompt.push(ChatMessage::system(SYSTEM_PROMPT));
                    prompt.extend(history.into_iter().map(|m| match m.role {
                        MessageRole::User => ChatMessage::user(m.content),
                        MessageRole::Assistant => ChatMessage::assistant(m.content),
                    }));
                    Stage::HistoryLoaded {
                        conversation,
                        prompt,
                    }
                }

                Stage::HistoryLoaded {
                    conversation,
                    prompt,
                } => {
                    let request = CompletionRequest {
                        messages: prompt.clone(),
                        tools: self.dispatcher.registry().schemas(),
                        tool_choice: ToolChoice::Auto,
                    };
                    match self.model.complete(request).await {
                        Ok(ModelReply::ToolCalls { content, calls }) if !calls.is_empty() => {
                            Stage::ToolsRequested {
                                conversation,
                                prompt,
                                content,
                                calls,
                            }
                        }
                        Ok(ModelReply::ToolCalls { content, .. }) => Stage::Replied {
                            conversation,
                            reply: Ok(content.unwrap_or_default()),
                            executed: Vec::new(),
                        },
                        Ok(ModelReply::Text(text)) => Stage::Replied {
                            conversation,
                            reply: Ok(text),
                            executed: Vec::new(),
                        },
                        Err(e) => Stage::Replied {
                            conversation,
                            reply: Err(e),
                            executed: Vec::new(),
                        },
                    }
                }

                Stage::ToolsRequested {
                    conversation,
                    mut prompt,
                    content,
                    calls,
                } => {
                    let mut executed = Vec::with_capacity(calls.len());
                    let mut results = Vec::with_capacity(calls.len());
                    // Sequential, in emitted order.
                    for call in &calls {
                        let result = self
                            .dispatcher
                            .execute_json(&call.tool_name, user, &call.arguments_json)
                            .await;
                        results.push(ChatMessage::tool_result(
                            call.call_id.clone(),
                            result.to_value().to_string(),
                        ));
                        executed.push(ToolCallDescriptor {
                            name: call.tool_name.clone(),
                            arguments: serde_json::from_str(&call.arguments_json)
                                .unwrap_or_else(|_| Value::String(call.arguments_json.clone())),
                        });
                    }
                    info!(
                        user_id = %user,
                        conversation_id = %conversation.id,
                        count = calls.len(),
                        "Executed tool calls"
                    );

                    prompt.push(ChatMessage::assistant_tool_calls(content, calls));
                    prompt.extend(results);
                    Stage::ToolsExecuted {
                        conversation,
                        prompt,
                        executed,
                    }
                }

                Stage::ToolsExecuted {
                    conversation,
                    prompt,
                    executed,
                } => {
                    let request = CompletionRequest {
                        messages: prompt,
                        tools: Vec::new(),
                        tool_choice: ToolChoice::None,
                    };
                    let reply = match self.model.complete(request).await {
                        Ok(ModelReply::Text(text)) => Ok(text),
                        Ok(ModelReply::ToolCalls { content, .. }) => {
                            warn!(user_id = %user, "Model requested tools during recall; ignoring");
                            Ok(content.unwrap_or_default())
                        }
                        Err(e) => Err(e),
                    };
                    Stage::Replied {
                        conversation,
                        reply,
                        executed,
                    }
                }

                Stage::Replied {
                    conversation,
                    reply,
                    executed,
                } => {
                    let response = reply_or_fallback(user, reply);
                    self.conversations
                        .append(&conversation, user, MessageRole::Assistant, &response)
                        .await?;
                    self.conversations.touch(&conversation).await?;

                    return Ok(ChatReply {
                        conversation_id: conversation.id,
                        response,
                        tool_calls: executed,
                        timestamp: Utc::now().to_rfc3339(),
                    });
                }
            };
        }
    }
}

fn reply_or_fallback(user: &UserId, reply: Result<String, ModelError>) -> String {
    match reply {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => EMPTY_REPLY_FALLBACK.to_string(),
        Err(e) if e.is_credential_fault() => {
            error!(user_id = %user, "Model credential fault: {}", e);
            CREDENTIAL_FALLBACK.to_string()
        }
        Err(e) => {
            error!(user_id = %user, "Model call failed: {}", e);
            MODEL_FAULT_FALLBACK.to_string()
        }
    }
}
