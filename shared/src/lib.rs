//! Shared library for the Task Assistant Lambda functions.
//!
//! Task storage, the tool layer the assistant calls into, conversation
//! persistence, the language-model client and the chat orchestrator.

pub mod auth;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod http;
pub mod llm;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod secrets;
pub mod tasks;
pub mod tools;

pub use auth::{authenticate, extract_user_from_context, resolve_user, validate_token, AuthenticatedUser, CognitoClaims};
pub use config::Config;
pub use conversation::{ConversationStore, PgConversationStore};
pub use error::{Error, Result};
pub use llm::{LanguageModel, ModelError, OpenAiChatModel};
pub use models::{Priority, Task, UserId};
pub use orchestrator::{ChatFailure, ChatOrchestrator, ChatReply};
pub use repository::{PgTaskRepository, PgUserRepository, TaskRepository, UserRepository};
pub use secrets::{get_database_credentials, get_secret, resolve_api_key, DatabaseCredentials};
pub use tasks::TaskService;
pub use tools::{ToolCallResult, ToolDispatcher, ToolRegistry};
