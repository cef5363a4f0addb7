//! Outbound messaging channel interface and adapters.

pub mod line;

pub use line::LinePushClient;

use crate::error::DeliveryError;

/// An outbound messaging channel that can push text to an end user.
///
/// Push, not reply: by the time the agent has an answer, the inbound
/// webhook's reply token has usually expired, so delivery always goes
/// through the push endpoint with the tenant's own access token.
#[async_trait::async_trait]
pub trait ChannelClient: Send + Sync {
    async fn push(
        &self,
        channel_user_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<(), DeliveryError>;
}
