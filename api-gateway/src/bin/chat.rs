//! Chat Lambda - Conversational task assistant.
//!
//! Endpoints:
//! - POST /chat - Send a message to the assistant
//! - GET /chat - List the caller's conversations
//! - GET /chat?conversationId={id} - Messages of one conversation

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::Deserialize;
use serde_json::json;
use shared::http::{error_response, error_response_for, json_response};
use shared::{
    authenticate, get_database_credentials, parse_body, resolve_api_key, ChatFailure,
    ChatOrchestrator, Config, ConversationStore, OpenAiChatModel, PgConversationStore,
    PgTaskRepository, PgUserRepository, ToolDispatcher, ToolRegistry, UserId, UserRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Chat request
#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default, alias = "user_message")]
    message: String,
}

/// Application state
struct AppState {
    users: Arc<dyn UserRepository>,
    conversations: Arc<dyn ConversationStore>,
    orchestrator: ChatOrchestrator,
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

        let api_key = resolve_api_key(&secrets_client, &config).await?;
        if api_key.is_none() {
            warn!("No model API key configured; chat replies will use the fallback message");
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let model = OpenAiChatModel::new(
            http_client,
            api_key,
            config.openai_base_url.clone(),
            config.openai_model.clone(),
        );

        let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool.clone()));
        let conversations: Arc<dyn ConversationStore> =
            Arc::new(PgConversationStore::new(pool.clone()));
        let dispatcher = ToolDispatcher::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(PgTaskRepository::new(pool)),
        );
        let orchestrator = ChatOrchestrator::new(
            Arc::clone(&users),
            Arc::clone(&conversations),
            dispatcher,
            Arc::new(model),
        )
        .with_history_limit(config.history_limit);

        Ok(Self {
            users,
            conversations,
            orchestrator,
        })
    }
}

async fn send_message(
    state: &AppState,
    user_id: &UserId,
    request: ChatRequest,
) -> Result<Response<Body>, Error> {
    let message = request.message.trim();
    if message.is_empty() {
        return error_response(400, "Message must not be empty");
    }

    match state.orchestrator.handle_message(user_id, message).await {
        Ok(reply) => {
            info!(
                user_id = %user_id,
                conversation_id = %reply.conversation_id,
                tool_calls = reply.tool_calls.len(),
                "Chat reply sent"
            );
            json_response(200, &reply)
        }
        Err(failure @ ChatFailure::UserNotFound) => json_response(404, &failure.to_body()),
        Err(failure) => json_response(500, &failure.to_body()),
    }
}

async fn list_conversations(state: &AppState, user_id: &UserId) -> Result<Response<Body>, Error> {
    match state.conversations.list_for_user(user_id).await {
        Ok(conversations) => json_response(200, &json!({ "conversations": conversations })),
        Err(e) => {
            error!(user_id = %user_id, "Failed to list conversations: {}", e);
            error_response_for(&e)
        }
    }
}

async fn conversation_messages(
    state: &AppState,
    user_id: &UserId,
    raw_id: &str,
) -> Result<Response<Body>, Error> {
    let Ok(conversation_id) = Uuid::parse_str(raw_id) else {
        return error_response(400, format!("Invalid conversationId '{}'", raw_id));
    };

    let conversation = match state.conversations.get(conversation_id).await {
        Ok(Some(c)) if c.user_id == user_id.as_uuid() => c,
        Ok(_) => return error_response(404, "Conversation not found"),
        Err(e) => {
            error!(user_id = %user_id, "Failed to load conversation: {}", e);
            return error_response_for(&e);
        }
    };

    match state.conversations.messages(&conversation).await {
        Ok(messages) => json_response(
            200,
            &json!({ "conversation_id": conversation.id, "messages": messages }),
        ),
        Err(e) => {
            error!(user_id = %user_id, "Failed to load messages: {}", e);
            error_response_for(&e)
        }
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path).trim_end_matches('/');
    let method = event.method().as_str();

    info!("Received request: method={}, path={}", method, path);

    if method == "OPTIONS" {
        return json_response(200, &json!({}));
    }
    if path != "/chat" {
        return error_response(404, "Not found");
    }

    let caller = match authenticate(&event) {
        Ok(caller) => caller,
        Err(e) => {
            return error_response(401, format!("Authentication required: {}", e.client_message()))
        }
    };
    let user_id = match state.users.find_by_cognito_sub(&caller.cognito_sub).await {
        Ok(Some(id)) => id,
        Ok(None) => return json_response(404, &ChatFailure::UserNotFound.to_body()),
        Err(e) => {
            error!("Failed to look up user: {}", e);
            return error_response_for(&e);
        }
    };

    match method {
        "POST" => {
            let request: ChatRequest = parse_body!(event.body());
            send_message(&state, &user_id, request).await
        }
        "GET" => {
            let params = event.query_string_parameters();
            match params.first("conversationId") {
                Some(id) => conversation_messages(&state, &user_id, id).await,
                None => list_conversations(&state, &user_id).await,
            }
        }
        _ => error_response(405, "Method not allowed"),
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
