//! Ownership-checked task operations.
//!
//! Both the REST API and the tool handlers go through `TaskService`, so a
//! task is only ever read or mutated after its owner has been compared with
//! the caller. A missing task is `NotFound`; someone else's task is
//! `NotAuthorized`.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::{NewTask, Task, TaskFilter, TaskPatch, UserId};
use crate::repository::TaskRepository;
use crate::{Error, Result};

#[derive(Clone)]
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
}

impl TaskService {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self { repo }
    }

    /// Fetch a task and verify `caller` owns it.
    pub async fn owned(&self, caller: &UserId, id: Uuid) -> Result<Task> {
        let task = self
            .repo
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound("Task not found".to_string()))?;

        if &task.user_id != caller {
            return Err(Error::NotAuthorized(
                "Task belongs to another user".to_string(),
            ));
        }
        Ok(task)
    }

    pub async fn create(&self, caller: &UserId, fields: NewTask) -> Result<Task> {
        let fields = fields.validated()?;
        self.repo.create_task(caller, fields).await
    }

    pub async fn list(&self, caller: &UserId, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.repo.list_tasks(caller, filter).await
    }

    pub async fn get(&self, caller: &UserId, id: Uuid) -> Result<Task> {
        self.owned(caller, id).await
    }

    pub async fn update(&self, caller: &UserId, id: Uuid, patch: TaskPatch) -> Result<Task> {
        self.owned(caller, id).await?;
        let patch = patch.validated()?;
        self.repo
            .update_task(id, &patch)
            .await?
            .ok_or_else(|| Error::NotFound("Task not found".to_string()))
    }

    /// Flip completion. Calling it twice restores the original state.
    pub async fn toggle_complete(&self, caller: &UserId, id: Uuid) -> Result<Task> {
        self.owned(caller, id).await?;
        self.repo
            .toggle_completed(id)
            .await?
            .ok_or_else(|| Error::NotFound("Task not found".to_string()))
    }

    /// Delete and return the removed task.
    pub async fn delete(&self, caller: &UserId, id: Uuid) -> Result<Task> {
        let task = self.owned(caller, id).await?;
        if !self.repo.delete_task(id).await? {
            return Err(Error::NotFound("Task not found".to_string()));
        }
        Ok(task)
    }
}
