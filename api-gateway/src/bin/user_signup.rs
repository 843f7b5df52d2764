//! User Signup Lambda - Cognito Post-Confirmation Trigger
//!
//! Registers the confirmed Cognito user so task and chat requests can be
//! attributed to a user row.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::{get_database_credentials, Config, PgUserRepository, UserRepository};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Cognito trigger event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CognitoTriggerEvent {
    version: String,
    trigger_source: String,
    region: String,
    user_pool_id: String,
    user_name: String,
    request: CognitoRequest,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct CognitoRequest {
    user_attributes: UserAttributes,
}

#[derive(Debug, Deserialize, Serialize)]
struct UserAttributes {
    sub: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct CognitoResponse {}

/// Response must match input structure for Cognito triggers
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CognitoTriggerResponse {
    version: String,
    trigger_source: String,
    region: String,
    user_pool_id: String,
    user_name: String,
    request: serde_json::Value,
    response: CognitoResponse,
}

impl CognitoTriggerResponse {
    fn echo(trigger: CognitoTriggerEvent) -> Result<Self, Error> {
        Ok(Self {
            request: serde_json::to_value(&trigger.request)?,
            version: trigger.version,
            trigger_source: trigger.trigger_source,
            region: trigger.region,
            user_pool_id: trigger.user_pool_id,
            user_name: trigger.user_name,
            response: CognitoResponse {},
        })
    }
}

/// Application state
struct AppState {
    users: Arc<dyn UserRepository>,
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
            users: Arc::new(PgUserRepository::new(pool)),
        })
    }
}

fn display_name(attrs: &UserAttributes) -> String {
    attrs
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| attrs.email.split('@').next().unwrap_or("User").to_string())
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<CognitoTriggerEvent>,
) -> Result<CognitoTriggerResponse, Error> {
    let trigger = event.payload;

    info!(
        "Processing {} trigger for user {}",
        trigger.trigger_source, trigger.user_name
    );

    // Only process PostConfirmation triggers
    if !trigger.trigger_source.starts_with("PostConfirmation") {
        info!("Skipping non-PostConfirmation trigger");
        return CognitoTriggerResponse::echo(trigger);
    }

    let attrs = &trigger.request.user_attributes;
    match state
        .users
        .upsert(&attrs.sub, &attrs.email, &display_name(attrs))
        .await
    {
        Ok(user_id) => info!(user_id = %user_id, "Registered user {}", attrs.email),
        // Don't fail the Cognito flow - user can still sign in
        Err(e) => error!("Failed to register user {}: {}", attrs.sub, e),
    }

    // Return the event back to Cognito (required format)
    CognitoTriggerResponse::echo(trigger)
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
