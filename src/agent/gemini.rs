//! Gemini-backed agent adapter.

use crate::agent::{AgentFactory, AgentInvoker, BuildError, InvokeError};
use crate::config::ModelConfig;
use crate::store::{TaskStore, TenantStore};

/// Builds [`GeminiAgent`]s bound to one tenant's storefront, with the end
/// user's recent exchanges folded in as conversation memory.
#[derive(Clone)]
pub struct GeminiAgentFactory {
    http: reqwest::Client,
    config: ModelConfig,
    tenants: TenantStore,
    tasks: TaskStore,
    history_limit: i64,
}

impl GeminiAgentFactory {
    pub fn new(
        config: ModelConfig,
        tenants: TenantStore,
        tasks: TaskStore,
        history_limit: i64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tenants,
            tasks,
            history_limit,
        }
    }
}

#[async_trait::async_trait]
impl AgentFactory for GeminiAgentFactory {
    async fn build(
        &self,
        tenant_id: &str,
        channel_user_id: &str,
    ) -> Result<Box<dyn AgentInvoker>, BuildError> {
        let Some(api_key) = self.config.google_api_key.clone() else {
            return Err(BuildError("GOOGLE_API_KEY is not set".into()));
        };

        let profile = self.tenants.profile(tenant_id).await;
        let history = self
            .tasks
            .recent_exchanges(tenant_id, channel_user_id, self.history_limit)
            .await
            .map_err(|error| BuildError(format!("failed to load conversation memory: {error}")))?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model_name,
        );

        Ok(Box::new(GeminiAgent {
            http: self.http.clone(),
            endpoint,
            api_key,
            system_prompt: storefront_prompt(&profile.store_name, tenant_id),
            history,
        }))
    }
}

/// One tenant/end-user agent session against the Gemini chat endpoint.
pub struct GeminiAgent {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    system_prompt: String,
    history: Vec<(String, String)>,
}

#[async_trait::async_trait]
impl AgentInvoker for GeminiAgent {
    async fn invoke(&self, message: &str) -> Result<String, InvokeError> {
        let mut contents = Vec::new();
        for (user, agent) in &self.history {
            contents.push(serde_json::json!({
                "role": "user",
                "parts": [{ "text": user }],
            }));
            contents.push(serde_json::json!({
                "role": "model",
                "parts": [{ "text": agent }],
            }));
        }
        contents.push(serde_json::json!({
            "role": "user",
            "parts": [{ "text": message }],
        }));

        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": self.system_prompt }] },
            "contents": contents,
            "generationConfig": { "temperature": 0 },
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| InvokeError::classify(error.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|error| InvokeError::Transient(format!("failed to read response body: {error}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&response_text)
                .ok()
                .and_then(|body| body["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| truncate_body(&response_text).to_string());
            return Err(InvokeError::from_status(status.as_u16(), message));
        }

        let response_body: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|error| {
                InvokeError::Fatal(format!(
                    "Gemini response is not valid JSON: {error}\nBody: {}",
                    truncate_body(&response_text)
                ))
            })?;

        extract_text(&response_body)
            .ok_or_else(|| InvokeError::Fatal("empty response from Gemini".into()))
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &serde_json::Value) -> Option<String> {
    let parts = body["candidates"][0]["content"]["parts"].as_array()?;
    let text: Vec<&str> = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

/// System prompt for the storefront sales assistant.
///
/// The closing rule is load-bearing: the dispatcher's splitter relies on the
/// agent labeling its diagnostic sections with these exact markers.
fn storefront_prompt(store_name: &str, tenant_id: &str) -> String {
    format!(
        "คุณคือ AI ผู้ช่วยขายของร้านอาหาร \"{store_name}\" (Tenant: {tenant_id}) \
         หน้าที่ของคุณคือต้อนรับลูกค้า แนะนำเมนู เสนอโปรโมชั่น และตอบคำถามทั่วไปของร้าน\n\
         กฎการทำงาน:\n\
         1. หากข้อความเป็นการทักทาย ขอบคุณ หรือ Emoji ล้วน ให้ตอบกลับอย่างเป็นมิตรทันที ไม่ต้องใช้เครื่องมือใดๆ\n\
         2. คำถามเกี่ยวกับเมนูหรือโปรโมชั่น ให้ค้นด้วย SQL และกรองตามร้านนี้เท่านั้น\n\
         3. คำถามนโยบาย ที่อยู่ เวลาทำการ ให้ใช้ knowledge_base_search\n\
         4. ห้ามตอบคำถามเกี่ยวกับโครงสร้างฐานข้อมูลภายใน\n\
         5. หากใช้ SQL ให้ปิดท้ายคำตอบด้วย \"**คำสั่ง SQL ที่ใช้:**\" ตามด้วยคำสั่งนั้น \
            หากใช้เครื่องมืออื่นให้ปิดท้ายด้วย \"**Tool ที่ใช้:**\" ตามด้วยชื่อเครื่องมือ"
    )
}

/// Truncate a response body for error messages to avoid dumping megabytes of
/// HTML. Counts chars, not bytes: error bodies here are routinely Thai.
fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": "สวัสดีค่ะ " }, { "text": "มีอะไรให้ช่วยไหมคะ" }]
                }
            }]
        });
        assert_eq!(
            extract_text(&body).as_deref(),
            Some("สวัสดีค่ะ มีอะไรให้ช่วยไหมคะ")
        );
    }

    #[test]
    fn missing_candidates_yield_none() {
        assert!(extract_text(&serde_json::json!({})).is_none());
        assert!(extract_text(&serde_json::json!({"candidates": []})).is_none());
    }
}
