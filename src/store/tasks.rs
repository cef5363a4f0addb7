//! Task record storage and the task state machine (SQLite).

use crate::TaskId;
use crate::error::{DbError, Result};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Processing state of a task.
///
/// `Responded`, `Error`, and `FatalError` are terminal for the automated
/// path; only the operator override (`Awaiting_Approval -> Responded`) touches
/// a task after the dispatcher is done with it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created at message ingestion, not yet picked up.
    Pending,
    /// Claimed by a dispatcher; guards against double-processing.
    Processing,
    /// A drafted reply is waiting for a human to approve or resend.
    AwaitingApproval,
    /// Reply delivered (by the dispatcher or by an operator).
    Responded,
    /// Retries exhausted, unclassified failure, or missing credentials.
    Error,
    /// Agent could not be constructed at all (bad key, bad model config).
    FatalError,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::AwaitingApproval,
        TaskStatus::Responded,
        TaskStatus::Error,
        TaskStatus::FatalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Processing => "Processing",
            TaskStatus::AwaitingApproval => "Awaiting_Approval",
            TaskStatus::Responded => "Responded",
            TaskStatus::Error => "Error",
            TaskStatus::FatalError => "FatalError",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(TaskStatus::Pending),
            "Processing" => Some(TaskStatus::Processing),
            "Awaiting_Approval" => Some(TaskStatus::AwaitingApproval),
            "Responded" => Some(TaskStatus::Responded),
            "Error" => Some(TaskStatus::Error),
            "FatalError" => Some(TaskStatus::FatalError),
            _ => None,
        }
    }

    /// Whether the automated path is done with a task in this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Responded | TaskStatus::Error | TaskStatus::FatalError
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inbound message and its full processing record. Never deleted; the
/// tasks table doubles as the conversation audit trail.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: TaskId,
    pub tenant_id: String,
    pub channel_user_id: String,
    pub user_message: String,
    pub agent_response: Option<String>,
    pub trace: Option<String>,
    pub operator_response: Option<String>,
    pub reply_token: String,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub response_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new inbound message. Tasks always start in `Pending`.
    pub async fn create(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
        reply_token: &str,
        user_message: &str,
    ) -> Result<TaskId> {
        let result = sqlx::query(
            "INSERT INTO tasks (tenant_id, channel_user_id, reply_token, user_message, status) \
             VALUES (?, ?, ?, ?, 'Pending')",
        )
        .bind(tenant_id)
        .bind(channel_user_id)
        .bind(reply_token)
        .bind(user_message)
        .execute(&self.pool)
        .await
        .context("failed to insert task")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch task")?;

        row.map(task_from_row).transpose()
    }

    /// List a tenant's tasks in a given state, most recent first.
    pub async fn list_by_status(&self, tenant_id: &str, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE tenant_id = ? AND status = ? \
             ORDER BY created_at DESC, task_id DESC",
        )
        .bind(tenant_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("failed to list tasks by status")?;

        rows.into_iter().map(task_from_row).collect()
    }

    /// Atomically claim a pending task for processing.
    ///
    /// Returns false when the task was not in `Pending` (already claimed by
    /// another dispatcher, or already processed). Callers must skip the task
    /// in that case.
    pub async fn claim(&self, task_id: TaskId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'Processing' WHERE task_id = ? AND status = 'Pending'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("failed to claim task")?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a task to a new status, enforcing the state machine.
    pub async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()> {
        let current = self
            .get(task_id)
            .await?
            .ok_or(DbError::TaskNotFound { task_id })?;

        if !can_transition(current.status, status) {
            return Err(DbError::InvalidTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        // Guard on the observed status so a concurrent writer can't sneak a
        // transition in between the read and the write.
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE task_id = ? AND status = ?")
            .bind(status.as_str())
            .bind(task_id)
            .bind(current.status.as_str())
            .execute(&self.pool)
            .await
            .context("failed to update task status")?;

        if result.rows_affected() == 0 {
            return Err(DbError::InvalidTransition {
                from: "<concurrently changed>".into(),
                to: status.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Persist the agent's reply and extracted trace.
    ///
    /// Marks the task `Responded` and stamps the response time as a side
    /// effect. Callers that need `Awaiting_Approval` (auto-reply off, or
    /// delivery failed) set the status afterwards.
    pub async fn set_response(
        &self,
        task_id: TaskId,
        customer_message: &str,
        trace: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET agent_response = ?, trace = ?, status = 'Responded', \
             response_timestamp = datetime('now') WHERE task_id = ?",
        )
        .bind(customer_message)
        .bind(trace)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("failed to persist agent response")?;

        Ok(())
    }

    /// Persist a human operator's reply, marking the task `Responded`.
    pub async fn set_operator_response(&self, task_id: TaskId, response: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET operator_response = ?, status = 'Responded', \
             response_timestamp = datetime('now') WHERE task_id = ?",
        )
        .bind(response)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("failed to persist operator response")?;

        Ok(())
    }

    /// Load the last `limit` answered exchanges for one end user, oldest
    /// first. Feeds the agent's conversation memory.
    pub async fn recent_exchanges(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
        limit: i64,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT user_message, agent_response FROM tasks \
             WHERE tenant_id = ? AND channel_user_id = ? \
               AND status = 'Responded' AND agent_response IS NOT NULL \
             ORDER BY created_at DESC, task_id DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(channel_user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load exchange history")?;

        let mut exchanges: Vec<(String, String)> = rows
            .into_iter()
            .map(|row| {
                let user: String = row.try_get("user_message").unwrap_or_default();
                let agent: String = row.try_get("agent_response").unwrap_or_default();
                (user, agent)
            })
            .collect();

        // Reverse to chronological order
        exchanges.reverse();
        Ok(exchanges)
    }
}

/// The task state machine.
///
/// Forward-only: once a dispatch sequence has fully resolved a task in
/// `Responded`, `Error`, or `FatalError`, the automated path never moves it
/// again. The exceptions are the operator override that resolves a held
/// reply and the same-sequence downgrades out of `Responded` listed below.
fn can_transition(current: TaskStatus, next: TaskStatus) -> bool {
    if current == next {
        return true;
    }

    matches!(
        (current, next),
        (TaskStatus::Pending, TaskStatus::Processing)
            | (TaskStatus::Pending, TaskStatus::Responded)
            | (TaskStatus::Pending, TaskStatus::AwaitingApproval)
            | (TaskStatus::Pending, TaskStatus::Error)
            | (TaskStatus::Pending, TaskStatus::FatalError)
            | (TaskStatus::Processing, TaskStatus::Responded)
            | (TaskStatus::Processing, TaskStatus::AwaitingApproval)
            | (TaskStatus::Processing, TaskStatus::Error)
            | (TaskStatus::Processing, TaskStatus::FatalError)
            | (TaskStatus::AwaitingApproval, TaskStatus::Responded)
            // set_response marks Responded as a side effect. The dispatcher
            // downgrades it in the same sequence when the reply cannot go
            // out: held for approval (auto-reply off, delivery failed) or
            // Error (tenant has no delivery credentials).
            | (TaskStatus::Responded, TaskStatus::AwaitingApproval)
            | (TaskStatus::Responded, TaskStatus::Error)
    )
}

fn task_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Task> {
    let status_value: String = row
        .try_get("status")
        .context("failed to read task status")?;
    let status = TaskStatus::parse(&status_value)
        .with_context(|| format!("invalid task status in database: {status_value}"))?;

    Ok(Task {
        task_id: row.try_get("task_id").context("failed to read task_id")?,
        tenant_id: row
            .try_get("tenant_id")
            .context("failed to read tenant_id")?,
        channel_user_id: row
            .try_get("channel_user_id")
            .context("failed to read channel_user_id")?,
        user_message: row
            .try_get("user_message")
            .context("failed to read user_message")?,
        agent_response: row.try_get("agent_response").ok(),
        trace: row.try_get("trace").ok(),
        operator_response: row.try_get("operator_response").ok(),
        reply_token: row
            .try_get("reply_token")
            .context("failed to read reply_token")?,
        status,
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .map(|v| v.and_utc())
            .context("failed to read created_at")?,
        response_timestamp: row
            .try_get::<Option<chrono::NaiveDateTime>, _>("response_timestamp")
            .ok()
            .flatten()
            .map(|v| v.and_utc()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;

    async fn setup_store() -> TaskStore {
        TaskStore::new(memory_pool().await)
    }

    async fn new_task(store: &TaskStore) -> TaskId {
        store
            .create("tenant-1", "line-user-1", "reply-token", "มีเมนูอะไรบ้าง")
            .await
            .expect("task should be created")
    }

    #[tokio::test]
    async fn creates_in_pending() {
        let store = setup_store().await;
        let task_id = new_task(&store).await;

        let task = store
            .get(task_id)
            .await
            .expect("fetch should succeed")
            .expect("task should exist");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.agent_response.is_none());
        assert!(task.response_timestamp.is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = setup_store().await;
        let task_id = new_task(&store).await;

        assert!(store.claim(task_id).await.expect("first claim"));
        assert!(
            !store.claim(task_id).await.expect("second claim"),
            "a claimed task must not be claimable again"
        );
    }

    #[tokio::test]
    async fn terminal_states_reject_automated_transitions() {
        let store = setup_store().await;

        for terminal in [TaskStatus::Responded, TaskStatus::Error, TaskStatus::FatalError] {
            let task_id = new_task(&store).await;
            store
                .set_status(task_id, terminal)
                .await
                .expect("transition to terminal should succeed");

            let error = store
                .set_status(task_id, TaskStatus::Processing)
                .await
                .expect_err("terminal -> Processing must fail");
            assert!(error.to_string().contains("invalid task status transition"));
        }
    }

    #[tokio::test]
    async fn every_status_is_reachable_from_pending() {
        // The trigger path owns the task it just created, so Pending keeps
        // direct edges to every outcome.
        let store = setup_store().await;

        for next in TaskStatus::ALL {
            let task_id = new_task(&store).await;
            store
                .set_status(task_id, next)
                .await
                .unwrap_or_else(|error| panic!("Pending -> {next} should be legal: {error}"));
        }
    }

    #[tokio::test]
    async fn held_tasks_cannot_move_backward() {
        let store = setup_store().await;

        for next in [TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Error] {
            let task_id = new_task(&store).await;
            store
                .set_status(task_id, TaskStatus::AwaitingApproval)
                .await
                .expect("hold should be legal");

            store
                .set_status(task_id, next)
                .await
                .expect_err("a held task only resolves to Responded");
        }
    }

    #[tokio::test]
    async fn set_response_marks_responded_and_stamps_time() {
        let store = setup_store().await;
        let task_id = new_task(&store).await;

        store
            .set_response(task_id, "ร้านเรามีข้าวผัดกะเพราไก่ค่ะ", Some("SQL: SELECT ..."))
            .await
            .expect("response should persist");

        let task = store.get(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Responded);
        assert_eq!(task.agent_response.as_deref(), Some("ร้านเรามีข้าวผัดกะเพราไก่ค่ะ"));
        assert_eq!(task.trace.as_deref(), Some("SQL: SELECT ..."));
        assert!(task.response_timestamp.is_some());
    }

    #[tokio::test]
    async fn response_then_hold_for_approval() {
        // The dispatcher persists the reply first, then downgrades the status
        // when auto-reply is off or delivery fails.
        let store = setup_store().await;
        let task_id = new_task(&store).await;

        store.claim(task_id).await.unwrap();
        store
            .set_response(task_id, "drafted reply", None)
            .await
            .unwrap();
        store
            .set_status(task_id, TaskStatus::AwaitingApproval)
            .await
            .expect("hold-after-persist downgrade should be legal");

        let task = store.get(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::AwaitingApproval);
        assert_eq!(
            task.agent_response.as_deref(),
            Some("drafted reply"),
            "the drafted reply must survive the downgrade"
        );
    }

    #[tokio::test]
    async fn operator_override_resolves_held_task() {
        let store = setup_store().await;
        let task_id = new_task(&store).await;

        store.claim(task_id).await.unwrap();
        store
            .set_status(task_id, TaskStatus::AwaitingApproval)
            .await
            .unwrap();
        store
            .set_operator_response(task_id, "ขอโทษด้วยนะคะ เดี๋ยวแอดมินตอบเองค่ะ")
            .await
            .unwrap();

        let task = store.get(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Responded);
        assert!(task.operator_response.is_some());
        assert!(task.response_timestamp.is_some());
    }

    #[tokio::test]
    async fn recent_exchanges_chronological_and_limited() {
        let store = setup_store().await;

        for i in 0..4 {
            let task_id = store
                .create("tenant-1", "line-user-1", "token", &format!("q{i}"))
                .await
                .unwrap();
            store
                .set_response(task_id, &format!("a{i}"), None)
                .await
                .unwrap();
        }
        // An unanswered task must not appear in history.
        store
            .create("tenant-1", "line-user-1", "token", "unanswered")
            .await
            .unwrap();

        let exchanges = store
            .recent_exchanges("tenant-1", "line-user-1", 3)
            .await
            .unwrap();
        assert_eq!(exchanges.len(), 3);
        assert_eq!(exchanges[0].0, "q1");
        assert_eq!(exchanges[2], ("q3".to_string(), "a3".to_string()));
    }

    #[tokio::test]
    async fn list_by_status_is_most_recent_first() {
        let store = setup_store().await;
        let first = new_task(&store).await;
        let second = new_task(&store).await;

        let pending = store
            .list_by_status("tenant-1", TaskStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].task_id, second);
        assert_eq!(pending[1].task_id, first);
    }
}
