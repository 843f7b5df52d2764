//! In-process implementations of the storage traits.
//!
//! Used by the test suites and for running the orchestrator without a
//! database. Insertion order stands in for timestamp order.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::models::{
    Conversation, ConversationSummary, Message, MessageRole, NewTask, Task, TaskFilter, TaskPatch,
    UserId,
};
use crate::repository::{TaskRepository, UserRepository, MAX_TASK_PAGE};
use crate::Result;

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored task.
    pub async fn all(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create_task(&self, owner: &UserId, fields: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            user_id: *owner,
            title: fields.title,
            description: fields.description,
            completed: false,
            priority: fields.priority,
            due_date: fields.due_date,
            created_at: now,
            updated_at: now,
        };
        self.tasks.lock().await.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.lock().await.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, owner: &UserId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let limit = filter.limit.unwrap_or(MAX_TASK_PAGE).clamp(1, MAX_TASK_PAGE) as usize;
        let offset = filter.offset.unwrap_or(0).max(0) as usize;

        Ok(self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|t| &t.user_id == owner)
            .filter(|t| filter.completed.map_or(true, |c| t.completed == c))
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        Ok(tasks.iter_mut().find(|t| t.id == id).map(|task| {
            patch.apply_to(task, Utc::now());
            task.clone()
        }))
    }

    async fn toggle_completed(&self, id: Uuid) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        Ok(tasks.iter_mut().find(|t| t.id == id).map(|task| {
            task.completed = !task.completed;
            task.updated_at = Utc::now();
            task.clone()
        }))
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        Ok(tasks.len() != before)
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    // cognito_sub -> user id
    users: Mutex<HashMap<String, UserId>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its id.
    pub async fn add_user(&self, cognito_sub: &str) -> UserId {
        let id = UserId::new(Uuid::new_v4());
        self.users.lock().await.insert(cognito_sub.to_string(), id);
        id
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn exists(&self, user: &UserId) -> Result<bool> {
        Ok(self.users.lock().await.values().any(|id| id == user))
    }

    async fn find_by_cognito_sub(&self, cognito_sub: &str) -> Result<Option<UserId>> {
        Ok(self.users.lock().await.get(cognito_sub).copied())
    }

    async fn upsert(&self, cognito_sub: &str, _email: &str, _display_name: &str) -> Result<UserId> {
        Ok(*self
            .users
            .lock()
            .await
            .entry(cognito_sub.to_string())
            .or_insert_with(|| UserId::new(Uuid::new_v4())))
    }
}

#[derive(Default)]
struct ConversationState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    state: Mutex<ConversationState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations held for `user`.
    pub async fn conversation_count(&self, user: &UserId) -> usize {
        self.state
            .lock()
            .await
            .conversations
            .iter()
            .filter(|c| c.user_id == user.as_uuid())
            .count()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create_active(&self, user: &UserId) -> Result<Conversation> {
        let mut state = self.state.lock().await;
        if let Some(latest) = state
            .conversations
            .iter()
            .rev()
            .find(|c| c.user_id == user.as_uuid())
        {
            return Ok(latest.clone());
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: user.as_uuid(),
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn append(
        &self,
        conversation: &Conversation,
        user: &UserId,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            user_id: user.as_uuid(),
            role,
            content: content.to_string(),
            created_at: now,
        };
        let mut state = self.state.lock().await;
        if let Some(stored) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            stored.updated_at = now;
        }
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_history(
        &self,
        conversation: &Conversation,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        let all: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation.id)
            .collect();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).cloned().collect())
    }

    async fn touch(&self, conversation: &Conversation) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            stored.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .state
            .lock()
            .await
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn messages(&self, conversation: &Conversation) -> Result<Vec<Message>> {
        Ok(self
            .state
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation.id)
            .cloned()
            .collect())
    }

    async fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let state = self.state.lock().await;
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .iter()
            .filter(|c| c.user_id == user.as_uuid())
            .map(|c| ConversationSummary {
                conversation_id: c.id,
                last_message: state
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.conversation_id == c.id)
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                updated_at: c.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_history_keeps_latest_in_order() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let conversation = store.get_or_create_active(&user).await.unwrap();

        for i in 0..15 {
            store
                .append(&conversation, &user, MessageRole::User, &format!("msg {}", i))
                .await
                .unwrap();
        }

        let history = store.recent_history(&conversation, 10).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (5..15).map(|i| format!("msg {}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_recent_history_short_and_empty() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let conversation = store.get_or_create_active(&user).await.unwrap();

        assert!(store.recent_history(&conversation, 10).await.unwrap().is_empty());

        store
            .append(&conversation, &user, MessageRole::User, "hi")
            .await
            .unwrap();
        assert_eq!(store.recent_history(&conversation, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_conversation() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let first = store.get_or_create_active(&user).await.unwrap();
        let second = store.get_or_create_active(&user).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.conversation_count(&user).await, 1);
    }

    /// Open an additional conversation for `user`, bypassing get-or-create.
    async fn open_conversation(store: &InMemoryConversationStore, user: &UserId) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: user.as_uuid(),
            created_at: now,
            updated_at: now,
        };
        store
            .state
            .lock()
            .await
            .conversations
            .push(conversation.clone());
        conversation
    }

    #[tokio::test]
    async fn test_append_bumps_updated_at() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let conversation = store.get_or_create_active(&user).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let message = store
            .append(&conversation, &user, MessageRole::User, "hi")
            .await
            .unwrap();

        let stored = store.get(conversation.id).await.unwrap().unwrap();
        assert!(stored.updated_at > conversation.created_at);
        assert_eq!(stored.updated_at, message.created_at);
    }

    #[tokio::test]
    async fn test_list_for_user_newest_first_with_last_message() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let other = UserId::new(Uuid::new_v4());
        let older = open_conversation(&store, &user).await;
        let newer = open_conversation(&store, &user).await;
        open_conversation(&store, &other).await;

        store
            .append(&newer, &user, MessageRole::User, "first in newer")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append(&older, &user, MessageRole::User, "question")
            .await
            .unwrap();
        store
            .append(&older, &user, MessageRole::Assistant, "answer")
            .await
            .unwrap();

        let summaries = store.list_for_user(&user).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, older.id);
        assert_eq!(summaries[0].last_message, "answer");
        assert_eq!(summaries[1].conversation_id, newer.id);
        assert_eq!(summaries[1].last_message, "first in newer");
        assert!(summaries[0].updated_at > summaries[1].updated_at);
    }

    #[tokio::test]
    async fn test_messages_are_scoped_and_ascending() {
        let store = InMemoryConversationStore::new();
        let user = UserId::new(Uuid::new_v4());
        let first = open_conversation(&store, &user).await;
        let second = open_conversation(&store, &user).await;

        for i in 0..3 {
            store
                .append(&first, &user, MessageRole::User, &format!("a{}", i))
                .await
                .unwrap();
            store
                .append(&second, &user, MessageRole::User, &format!("b{}", i))
                .await
                .unwrap();
        }

        let messages = store.messages(&first).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a0", "a1", "a2"]);
        assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(messages.iter().all(|m| m.conversation_id == first.id));
    }
}
