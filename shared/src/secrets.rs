//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Config, Error, Result};

/// Secret values cached for the lifetime of the Lambda container.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Database credentials from Secrets Manager.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    if let Some(value) = cache().read().await.get(secret_arn) {
        return Ok(value.clone());
    }

    debug!(secret_arn, "Fetching secret");
    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    cache()
        .write()
        .await
        .insert(secret_arn.to_string(), secret_string.clone());

    Ok(secret_string)
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;

    serde_json::from_str(&secret_string)
        .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
}

/// Resolve the model API key.
///
/// A key set directly in the environment wins over the secret. `Ok(None)`
/// means no credential is configured at all.
pub async fn resolve_api_key(client: &SecretsClient, config: &Config) -> Result<Option<String>> {
    if let Some(key) = &config.openai_api_key {
        return Ok(Some(key.clone()));
    }
    let Some(arn) = &config.openai_api_key_secret_arn else {
        return Ok(None);
    };
    let raw = get_secret(client, arn).await?;
    Ok(parse_api_key_secret(&raw))
}

/// Accepts either a bare key or a JSON document with an `api_key` field.
fn parse_api_key_secret(raw: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct KeyDocument {
        #[serde(alias = "OPENAI_API_KEY", alias = "apiKey")]
        api_key: String,
    }

    let trimmed = raw.trim();
    let key = match serde_json::from_str::<KeyDocument>(trimmed) {
        Ok(doc) => doc.api_key,
        Err(_) if trimmed.starts_with('{') => return None,
        Err(_) => trimmed.to_string(),
    };
    (!key.trim().is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let json = r#"{"username":"admin","password":"secret123","host":"db.example.com","port":5432,"dbname":"tasks"}"#;
        let creds: DatabaseCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "secret123");
        assert_eq!(creds.dbname.as_deref(), Some("tasks"));
    }

    #[test]
    fn test_parse_api_key_forms() {
        assert_eq!(parse_api_key_secret("sk-plain\n").as_deref(), Some("sk-plain"));
        assert_eq!(
            parse_api_key_secret(r#"{"api_key":"sk-json"}"#).as_deref(),
            Some("sk-json")
        );
        assert_eq!(
            parse_api_key_secret(r#"{"OPENAI_API_KEY":"sk-env"}"#).as_deref(),
            Some("sk-env")
        );
        assert_eq!(parse_api_key_secret(r#"{"other":"x"}"#), None);
        assert_eq!(parse_api_key_secret("   "), None);
    }
}
