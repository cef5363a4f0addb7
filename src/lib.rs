//! Shopbot: routes storefront chat messages to an AI agent and decides
//! whether the drafted reply goes out automatically or waits for a human.

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod store;

pub use error::{Error, Result};

use std::sync::Arc;

/// Tenant (store account) identifier type.
pub type TenantId = Arc<str>;

/// Persisted task identifier type.
pub type TaskId = i64;

/// An inbound customer message, as handed over by the webhook front end.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// End-user identifier on the messaging channel (LINE user id).
    pub channel_user_id: String,
    /// Raw message text.
    pub text: String,
    /// Channel acknowledgment token for the inbound event. Stored for audit;
    /// outbound sends use push (tokens expire too fast for slow agent calls).
    pub reply_token: String,
}
