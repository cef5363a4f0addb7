//! Dispatch orchestrator: drives one task from claimed to terminal state.
//!
//! The orchestrator never propagates failures to its caller. Every outcome,
//! including agent construction failure and delivery failure, ends in a task
//! state write; anything that cannot be handled is logged and the task is
//! left in the most honest state the store will accept.

use crate::agent::{AgentFactory, InvokeError};
use crate::config::DispatchConfig;
use crate::dispatch::retry::{self, RetryError, RetryPolicy};
use crate::dispatch::splitter::{self, DEFAULT_MARKERS, Marker};
use crate::error::Result;
use crate::messaging::ChannelClient;
use crate::store::{TaskStatus, TaskStore, TenantStore};
use crate::TaskId;
use std::sync::Arc;
use std::time::Duration;

/// Sent to the customer when the agent could not produce a reply.
const BUSY_NOTICE: &str = "ขออภัยค่ะ ระบบกำลังประมวลผลเยอะ รบกวนลองใหม่อีกครั้งค่ะ";

pub struct Dispatcher {
    tasks: TaskStore,
    tenants: TenantStore,
    agents: Arc<dyn AgentFactory>,
    channel: Arc<dyn ChannelClient>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    markers: &'static [Marker],
}

impl Dispatcher {
    pub fn new(
        tasks: TaskStore,
        tenants: TenantStore,
        agents: Arc<dyn AgentFactory>,
        channel: Arc<dyn ChannelClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            tasks,
            tenants,
            agents,
            channel,
            policy: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.base_delay,
            },
            attempt_timeout: config.attempt_timeout,
            markers: DEFAULT_MARKERS,
        }
    }

    /// Override the marker vocabulary the splitter scans for.
    pub fn with_markers(mut self, markers: &'static [Marker]) -> Self {
        self.markers = markers;
        self
    }

    /// Process one task end to end. Infallible by contract: all failure
    /// modes terminate in a task state, never in a returned error.
    pub async fn process(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
        message_text: &str,
        task_id: TaskId,
    ) {
        // Claim before doing any work so two dispatchers polling the same
        // tenant cannot answer the same message twice.
        match self.tasks.claim(task_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id, "task no longer pending, skipping");
                return;
            }
            Err(error) => {
                tracing::error!(task_id, %error, "failed to claim task");
                return;
            }
        }

        if let Err(error) = self
            .run(tenant_id, channel_user_id, message_text, task_id)
            .await
        {
            // Only reachable when a state write itself failed; the task may
            // be stuck in Processing until an operator intervenes.
            tracing::error!(task_id, %error, "task processing failed past the state machine");
        }
    }

    /// Process every pending task for one tenant, most recent first.
    pub async fn process_pending(&self, tenant_id: &str) {
        let pending = match self.tasks.list_by_status(tenant_id, TaskStatus::Pending).await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::error!(tenant_id, %error, "failed to list pending tasks");
                return;
            }
        };

        if pending.is_empty() {
            return;
        }
        tracing::info!(tenant_id, count = pending.len(), "processing pending tasks");

        for task in pending {
            self.process(
                &task.tenant_id,
                &task.channel_user_id,
                &task.user_message,
                task.task_id,
            )
            .await;
        }
    }

    async fn run(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
        message_text: &str,
        task_id: TaskId,
    ) -> Result<()> {
        // Read the flag up front so a settings change mid-dispatch cannot
        // split the decision between persistence and delivery.
        let auto_reply = self.tenants.auto_reply_enabled(tenant_id).await;

        // Construction failure means the tenant's model config is broken;
        // retrying the same broken config would spin forever.
        let agent = match self.agents.build(tenant_id, channel_user_id).await {
            Ok(agent) => agent,
            Err(error) => {
                tracing::error!(task_id, tenant_id, %error, "agent construction failed");
                self.tasks.set_status(task_id, TaskStatus::FatalError).await?;
                return Ok(());
            }
        };

        let timeout = self.attempt_timeout;
        let agent = agent.as_ref();
        let attempt = || async move {
            match tokio::time::timeout(timeout, agent.invoke(message_text)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(InvokeError::Transient(format!(
                    "attempt deadline of {}s elapsed",
                    timeout.as_secs()
                ))),
            }
        };

        let raw = match retry::run_with_retry(&self.policy, attempt).await {
            Ok(raw) => raw,
            Err(RetryError::Exhausted(error)) => {
                tracing::error!(task_id, %error, "retry budget exhausted");
                self.tasks.set_status(task_id, TaskStatus::Error).await?;
                self.push_busy_notice(tenant_id, channel_user_id, task_id).await;
                return Ok(());
            }
            Err(RetryError::Fatal(error)) => {
                tracing::error!(task_id, %error, "non-retryable invocation failure");
                self.tasks.set_status(task_id, TaskStatus::Error).await?;
                self.push_busy_notice(tenant_id, channel_user_id, task_id).await;
                return Ok(());
            }
        };

        let reply = splitter::split(&raw, self.markers);
        self.tasks
            .set_response(task_id, &reply.customer_message, reply.trace.as_deref())
            .await?;

        if !auto_reply {
            self.tasks
                .set_status(task_id, TaskStatus::AwaitingApproval)
                .await?;
            tracing::info!(task_id, "auto-reply disabled, reply held for approval");
            return Ok(());
        }

        let credentials = match self.tenants.credentials(tenant_id).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                tracing::error!(task_id, tenant_id, "no channel credentials, cannot deliver");
                self.tasks.set_status(task_id, TaskStatus::Error).await?;
                return Ok(());
            }
            Err(error) => {
                tracing::error!(task_id, tenant_id, %error, "credential lookup failed");
                self.tasks.set_status(task_id, TaskStatus::Error).await?;
                return Ok(());
            }
        };

        match self
            .channel
            .push(
                channel_user_id,
                &reply.customer_message,
                &credentials.channel_access_token,
            )
            .await
        {
            Ok(()) => {
                // set_response already marked the task Responded.
                tracing::info!(task_id, "reply delivered");
            }
            Err(error) => {
                tracing::warn!(task_id, %error, "delivery failed, reply held for approval");
                self.tasks
                    .set_status(task_id, TaskStatus::AwaitingApproval)
                    .await?;
            }
        }

        Ok(())
    }

    /// Best-effort courtesy message after a failed dispatch. Needs the
    /// tenant's credentials; without them the failure state already tells
    /// the operator everything.
    async fn push_busy_notice(&self, tenant_id: &str, channel_user_id: &str, task_id: TaskId) {
        let credentials = match self.tenants.credentials(tenant_id).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(task_id, %error, "credential lookup failed for busy notice");
                return;
            }
        };

        if let Err(error) = self
            .channel
            .push(channel_user_id, BUSY_NOTICE, &credentials.channel_access_token)
            .await
        {
            tracing::warn!(task_id, %error, "busy notice delivery failed");
        }
    }
}
