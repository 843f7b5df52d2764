//! Storage seams for users and tasks.
//!
//! The traits are what the tool dispatcher and the task API depend on. The
//! Postgres implementations are the production backing; `crate::memory` has
//! in-process versions.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewTask, Task, TaskFilter, TaskPatch, TaskRow, UserId};
use crate::Result;

/// Maximum page size for task listings.
pub const MAX_TASK_PAGE: i64 = 100;

const TASK_COLUMNS: &str =
    "id, user_id, title, description, completed, priority, due_date, created_at, updated_at";

/// Typed storage of tasks, scoped by owner where applicable.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task owned by `owner`.
    async fn create_task(&self, owner: &UserId, fields: NewTask) -> Result<Task>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Tasks of `owner`, oldest first.
    async fn list_tasks(&self, owner: &UserId, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Apply a partial update and refresh `updated_at`.
    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Option<Task>>;

    /// Flip `completed` in one atomic statement.
    async fn toggle_completed(&self, id: Uuid) -> Result<Option<Task>>;

    /// Returns `false` when no such task existed.
    async fn delete_task(&self, id: Uuid) -> Result<bool>;
}

/// Lookup of provisioned users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn exists(&self, user: &UserId) -> Result<bool>;

    async fn find_by_cognito_sub(&self, cognito_sub: &str) -> Result<Option<UserId>>;

    /// Create the user row, or refresh the email of an existing one.
    async fn upsert(&self, cognito_sub: &str, email: &str, display_name: &str) -> Result<UserId>;
}

/// Postgres-backed task storage.
#[derive(Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create_task(&self, owner: &UserId, fields: NewTask) -> Result<Task> {
        let row: TaskRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO tasks (user_id, title, description, priority, due_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(owner.as_uuid())
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.priority.as_str())
        .bind(fields.due_date)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, owner: &UserId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query = format!("SELECT {} FROM tasks WHERE user_id = $1", TASK_COLUMNS);
        let mut param_num = 2;

        if filter.completed.is_some() {
            query.push_str(&format!(" AND completed = ${}", param_num));
            param_num += 1;
        }
        if filter.priority.is_some() {
            query.push_str(&format!(" AND priority = ${}", param_num));
            param_num += 1;
        }
        query.push_str(&format!(
            " ORDER BY created_at ASC LIMIT ${} OFFSET ${}",
            param_num,
            param_num + 1
        ));

        let mut query_builder = sqlx::query_as::<_, TaskRow>(&query).bind(owner.as_uuid());
        if let Some(completed) = filter.completed {
            query_builder = query_builder.bind(completed);
        }
        if let Some(priority) = filter.priority {
            query_builder = query_builder.bind(priority.as_str());
        }
        let limit = filter.limit.unwrap_or(MAX_TASK_PAGE).clamp(1, MAX_TASK_PAGE);
        let offset = filter.offset.unwrap_or(0).max(0);
        query_builder = query_builder.bind(limit).bind(offset);

        query_builder
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Option<Task>> {
        let mut updates = Vec::new();
        let mut param_num = 2;

        for (column, present) in [
            ("title", patch.title.is_some()),
            ("description", patch.description.is_some()),
            ("completed", patch.completed.is_some()),
            ("priority", patch.priority.is_some()),
            ("due_date", patch.due_date.is_some()),
        ] {
            if present {
                updates.push(format!("{} = ${}", column, param_num));
                param_num += 1;
            }
        }
        updates.push(format!("updated_at = ${}", param_num));

        let query = format!(
            "UPDATE tasks SET {} WHERE id = $1 RETURNING {}",
            updates.join(", "),
            TASK_COLUMNS
        );

        let mut query_builder = sqlx::query_as::<_, TaskRow>(&query).bind(id);
        if let Some(title) = &patch.title {
            query_builder = query_builder.bind(title);
        }
        if let Some(description) = &patch.description {
            query_builder = query_builder.bind(description);
        }
        if let Some(completed) = patch.completed {
            query_builder = query_builder.bind(completed);
        }
        if let Some(priority) = patch.priority {
            query_builder = query_builder.bind(priority.as_str());
        }
        if let Some(due_date) = patch.due_date {
            query_builder = query_builder.bind(due_date);
        }
        query_builder = query_builder.bind(Utc::now());

        let row = query_builder.fetch_optional(&self.pool).await?;
        row.map(Task::try_from).transpose()
    }

    async fn toggle_completed(&self, id: Uuid) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tasks
            SET completed = NOT completed, updated_at = $2
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Postgres-backed user lookup.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn exists(&self, user: &UserId) -> Result<bool> {
        let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    async fn find_by_cognito_sub(&self, cognito_sub: &str) -> Result<Option<UserId>> {
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE cognito_sub = $1::text")
                .bind(cognito_sub)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.map(UserId::new))
    }

    async fn upsert(&self, cognito_sub: &str, email: &str, display_name: &str) -> Result<UserId> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (email, display_name, cognito_sub)
            VALUES ($1, $2, $3)
            ON CONFLICT (cognito_sub) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = COALESCE(NULLIF(users.display_name, ''), EXCLUDED.display_name),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(email)
        .bind(display_name)
        .bind(cognito_sub)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserId::new(id))
    }
}
