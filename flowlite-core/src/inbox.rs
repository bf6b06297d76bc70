//! Task inbox: the read-side projection of human tasks.
//!
//! The engine publishes `TaskEvent`s as it creates, completes or deletes
//! tasks; the inbox owns the queryable view.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::types::{ExecutionId, InstanceId, Task, TaskId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum TaskEvent {
    Created(Task),
    Completed(Task),
    /// Cancelled by a boundary, a terminate end or instance deletion.
    Deleted { task: Task, reason: String },
}

impl TaskEvent {
    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::Created(task)
            | TaskEvent::Completed(task)
            | TaskEvent::Deleted { task, .. } => task,
        }
    }
}

/// Task filter. Unset fields match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskQuery {
    pub instance_id: Option<InstanceId>,
    pub execution_id: Option<ExecutionId>,
    pub name: Option<String>,
    pub active: Option<bool>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.instance_id.is_none_or(|id| task.instance_id == id)
            && self.execution_id.is_none_or(|id| task.execution_id == id)
            && self.name.as_ref().is_none_or(|n| &task.name == n)
            && self.active.is_none_or(|a| task.active == a)
    }
}

#[async_trait]
pub trait TaskInbox: Send + Sync {
    async fn apply(&self, events: &[TaskEvent]) -> Result<()>;
    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>>;
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>>;
}

// ── MemoryTaskInbox ──

/// In-memory TaskInbox. Lists in creation order; completed and deleted tasks
/// stay queryable as inactive.
pub struct MemoryTaskInbox {
    inner: RwLock<Vec<Task>>,
}

impl MemoryTaskInbox {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryTaskInbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskInbox for MemoryTaskInbox {
    async fn apply(&self, events: &[TaskEvent]) -> Result<()> {
        let mut tasks = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        for event in events {
            let task = event.task();
            match tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        }
        Ok(())
    }

    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let tasks = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(tasks.iter().filter(|t| query.matches(t)).cloned().collect())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let tasks = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(tasks.iter().find(|t| t.task_id == task_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn task(instance_id: InstanceId, name: &str) -> Task {
        Task {
            task_id: Uuid::now_v7(),
            instance_id,
            execution_id: Uuid::now_v7(),
            node_id: name.to_lowercase(),
            name: name.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_apply_and_query() {
        let inbox = MemoryTaskInbox::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let step_1 = task(a, "Step 1");
        let step_2 = task(a, "Step 2");
        let other = task(b, "Step 1");
        inbox
            .apply(&[
                TaskEvent::Created(step_1.clone()),
                TaskEvent::Created(step_2.clone()),
                TaskEvent::Created(other.clone()),
            ])
            .await
            .unwrap();

        let mut done = step_1.clone();
        done.active = false;
        inbox.apply(&[TaskEvent::Completed(done)]).await.unwrap();

        let active = inbox.list(&TaskQuery::new().active()).await.unwrap();
        assert_eq!(active.len(), 2);

        let named = inbox.list(&TaskQuery::new().name("Step 1")).await.unwrap();
        assert_eq!(named.len(), 2);

        let in_a = inbox
            .list(&TaskQuery::new().instance(a).active())
            .await
            .unwrap();
        assert_eq!(in_a, vec![step_2.clone()]);

        let by_exec = inbox
            .list(&TaskQuery::new().execution(other.execution_id))
            .await
            .unwrap();
        assert_eq!(by_exec.len(), 1);

        let fetched = inbox.get(step_1.task_id).await.unwrap().unwrap();
        assert!(!fetched.active);
        assert!(inbox.get(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_task_becomes_inactive() {
        let inbox = MemoryTaskInbox::new();
        let t = task(Uuid::now_v7(), "Review");
        inbox.apply(&[TaskEvent::Created(t.clone())]).await.unwrap();

        let mut cancelled = t.clone();
        cancelled.active = false;
        inbox
            .apply(&[TaskEvent::Deleted {
                task: cancelled,
                reason: "RESET DATA".to_string(),
            }])
            .await
            .unwrap();
        assert!(inbox
            .list(&TaskQuery::new().active())
            .await
            .unwrap()
            .is_empty());
    }
}
