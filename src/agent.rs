//! Agent collaborator interface and invocation failure classification.

pub mod gemini;

pub use gemini::GeminiAgentFactory;

/// Why an agent invocation failed, pre-classified by the adapter.
///
/// Adapters that know the upstream status code tag the failure directly.
/// [`InvokeError::classify`] is the compatibility fallback for transport
/// layers that only surface an error string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// Upstream rate-limiting or overload. Eligible for bounded retry.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Anything else. Retrying will not help.
    #[error("agent invocation failed: {0}")]
    Fatal(String),
}

impl InvokeError {
    /// Classify an untyped failure description by its text.
    ///
    /// Rate-limit and overload responses carry their status code somewhere in
    /// the message ("429", "500", "503"); everything else is fatal.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_text(&message) {
            InvokeError::Transient(message)
        } else {
            InvokeError::Fatal(message)
        }
    }

    /// Classify by HTTP status code where the adapter has one.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("upstream returned {status}: {}", message.into());
        if matches!(status, 429 | 500 | 503) {
            InvokeError::Transient(message)
        } else {
            InvokeError::Fatal(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, InvokeError::Transient(_))
    }
}

/// Whether an error message carries a retryable status-code marker.
fn is_transient_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("500") || lower.contains("503")
}

/// Agent construction failure. Always fatal config: a task whose agent
/// cannot be built goes straight to `FatalError` with no retry.
#[derive(Debug, thiserror::Error)]
#[error("failed to construct agent: {0}")]
pub struct BuildError(pub String);

/// A constructed agent, ready to answer one end user's messages.
#[async_trait::async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Ask the agent for a reply to one customer message. The returned text
    /// is raw model output; the dispatcher splits it into the customer-facing
    /// part and the internal trace.
    async fn invoke(&self, message: &str) -> Result<String, InvokeError>;
}

/// Builds an agent bound to one tenant and end user.
///
/// Construction loads per-tenant context (store profile, conversation
/// history), so the dispatcher builds a fresh agent per task.
#[async_trait::async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
    ) -> Result<Box<dyn AgentInvoker>, BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_markers_classify_as_transient() {
        assert!(InvokeError::classify("HTTP 429 Too Many Requests").is_transient());
        assert!(InvokeError::classify("got 503 service unavailable").is_transient());
        assert!(InvokeError::classify("Internal error (500)").is_transient());
    }

    #[test]
    fn other_failures_classify_as_fatal() {
        assert!(!InvokeError::classify("401 unauthorized").is_transient());
        assert!(!InvokeError::classify("connection reset by peer").is_transient());
        assert!(!InvokeError::classify("").is_transient());
    }

    #[test]
    fn from_status_respects_the_retryable_set() {
        assert!(InvokeError::from_status(429, "slow down").is_transient());
        assert!(InvokeError::from_status(503, "overloaded").is_transient());
        assert!(InvokeError::from_status(500, "oops").is_transient());
        assert!(!InvokeError::from_status(400, "bad request").is_transient());
        assert!(!InvokeError::from_status(404, "no such model").is_transient());
    }
}
