//! Conversation and message persistence.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Conversation, ConversationSummary, Message, MessageRole, MessageRow, UserId};
use crate::Result;

/// Persistence-facing convenience over conversations and their messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The most recently created conversation of `user`, created on first use.
    async fn get_or_create_active(&self, user: &UserId) -> Result<Conversation>;

    /// Store a message and bump the conversation's `updated_at`.
    async fn append(
        &self,
        conversation: &Conversation,
        user: &UserId,
        role: MessageRole,
        content: &str,
    ) -> Result<Message>;

    /// Up to `limit` most recent messages, oldest first.
    async fn recent_history(&self, conversation: &Conversation, limit: usize)
        -> Result<Vec<Message>>;

    /// Bump `updated_at` to now.
    async fn touch(&self, conversation: &Conversation) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Every message of the conversation, oldest first.
    async fn messages(&self, conversation: &Conversation) -> Result<Vec<Message>>;

    /// Conversations of `user`, most recently updated first.
    async fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>>;
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, user_id, role, content, created_at";

/// Postgres-backed conversation store.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: Uuid,
    updated_at: chrono::DateTime<Utc>,
    last_message: Option<String>,
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_or_create_active(&self, user: &UserId) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        // Serializes first contact per user so concurrent requests cannot
        // each create a conversation. Released on commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await?;

        let existing: Option<Conversation> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let conversation = match existing {
            Some(conversation) => conversation,
            None => {
                let now = Utc::now();
                sqlx::query_as(
                    r#"
                    INSERT INTO conversations (user_id, created_at, updated_at)
                    VALUES ($1, $2, $2)
                    RETURNING id, user_id, created_at, updated_at
                    "#,
                )
                .bind(user.as_uuid())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(conversation)
    }

    async fn append(
        &self,
        conversation: &Conversation,
        user: &UserId,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        // The conversation's updated_at moves with every appended message.
        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            WITH bumped AS (
                UPDATE conversations SET updated_at = $5 WHERE id = $1
            )
            INSERT INTO messages (conversation_id, user_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(conversation.id)
        .bind(user.as_uuid())
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn recent_history(
        &self,
        conversation: &Conversation,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM (
                SELECT {} FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
            MESSAGE_COLUMNS, MESSAGE_COLUMNS
        ))
        .bind(conversation.id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn touch(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation.id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as(
            "SELECT id, user_id, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn messages(&self, conversation: &Conversation) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(conversation.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.updated_at, latest.content AS last_message
            FROM conversations c
            LEFT JOIN LATERAL (
                SELECT content FROM messages m
                WHERE m.conversation_id = c.id
                ORDER BY m.created_at DESC
                LIMIT 1
            ) latest ON TRUE
            WHERE c.user_id = $1
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                conversation_id: row.id,
                last_message: row.last_message.unwrap_or_default(),
                updated_at: row.updated_at,
            })
            .collect())
    }
}
