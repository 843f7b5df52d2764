//! Configuration management for Lambda functions.

use std::env;

use crate::{Error, Result};

/// Default number of past messages handed to the model.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database host
    pub db_host: String,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: String,
    /// AWS region
    pub aws_region: String,
    /// Model API key, when provided directly
    pub openai_api_key: Option<String>,
    /// ARN of a secret holding the model API key
    pub openai_api_key_secret_arn: Option<String>,
    /// Root of the chat-completions API
    pub openai_base_url: String,
    /// Model id sent with every completion request
    pub openai_model: String,
    /// Messages of history included in each prompt
    pub history_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let history_limit = match env::var("CHAT_HISTORY_LIMIT") {
            Ok(raw) => raw.parse::<usize>().map_err(|e| {
                Error::Config(format!("CHAT_HISTORY_LIMIT must be a positive integer: {}", e))
            })?,
            Err(_) => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            db_host: required("DB_HOST")?,
            db_name: env::var("DB_NAME").unwrap_or_else(|_| "task_assistant".to_string()),
            db_secret_arn: required("DB_SECRET_ARN")?,
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_api_key_secret_arn: non_empty("OPENAI_API_KEY_SECRET_ARN"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            history_limit,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{} not set", name)))
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test that touches the process environment.
    #[test]
    fn test_from_env() {
        env::set_var("DB_HOST", "db.internal");
        env::set_var("DB_SECRET_ARN", "arn:aws:secretsmanager:eu-west-1:123:secret:db");
        env::set_var("AWS_REGION", "eu-west-1");
        env::set_var("CHAT_HISTORY_LIMIT", "4");
        env::set_var("OPENAI_API_KEY", "  ");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_host, "db.internal");
        assert_eq!(config.aws_region, "eu-west-1");
        assert_eq!(config.history_limit, 4);
        assert!(config.openai_api_key.is_none());

        env::set_var("CHAT_HISTORY_LIMIT", "many");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));
        env::remove_var("CHAT_HISTORY_LIMIT");
        assert_eq!(Config::from_env().unwrap().history_limit, DEFAULT_HISTORY_LIMIT);

        env::remove_var("DB_HOST");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));
    }
}
