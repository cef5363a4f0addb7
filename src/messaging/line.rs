//! LINE Messaging API push client.

use crate::error::DeliveryError;
use crate::messaging::ChannelClient;

const LINE_API_BASE: &str = "https://api.line.me";

/// Pushes text messages through the LINE Messaging API, authenticated per
/// call with the tenant's channel access token.
#[derive(Debug, Clone)]
pub struct LinePushClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for LinePushClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LinePushClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: LINE_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

fn push_payload(channel_user_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "to": channel_user_id,
        "messages": [{ "type": "text", "text": text }],
    })
}

#[async_trait::async_trait]
impl ChannelClient for LinePushClient {
    async fn push(
        &self,
        channel_user_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(format!("{}/v2/bot/message/push", self.base_url))
            .bearer_auth(access_token)
            .json(&push_payload(channel_user_id, text))
            .send()
            .await
            .map_err(|error| DeliveryError::Request(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(channel_user_id, "push delivered");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wraps_text_in_a_single_message() {
        let payload = push_payload("U1234", "สวัสดีค่ะ");
        assert_eq!(payload["to"], "U1234");
        assert_eq!(payload["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["messages"][0]["type"], "text");
        assert_eq!(payload["messages"][0]["text"], "สวัสดีค่ะ");
    }
}
