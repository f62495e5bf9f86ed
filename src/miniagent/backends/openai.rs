use crate::miniagent::backend::{ChatBackend, ChatRequest, ChatResponse, MessageChunkStream};
use crate::miniagent::backends::common::{
    messages_to_openai, parse_completion, sse_chunk_stream, tools_to_openai,
};
use crate::miniagent::backends::http_pool::get_http_client;
use crate::miniagent::config::BackendConfig;
use crate::miniagent::error::BackendError;
use crate::miniagent::retry::parse_retry_after;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Backend speaking the OpenAI chat completions protocol, which most hosted
/// providers (SiliconFlow, ZhipuAI, DeepSeek, Moonshot, ...) accept.
pub struct OpenAICompatibleBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl OpenAICompatibleBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = get_http_client(&config.base_url)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn build_payload(&self, request: &ChatRequest, stream: bool) -> Result<Value, BackendError> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai(&request.messages).await?,
            "stream": stream,
        });
        if let Some(body) = payload.as_object_mut() {
            if !request.tools.is_empty() {
                body.insert("tools".into(), json!(tools_to_openai(&request.tools)));
            }
            if let Some(temperature) = self.config.temperature {
                body.insert("temperature".into(), json!(temperature));
            }
            if let Some(max_tokens) = self.config.max_tokens {
                body.insert("max_tokens".into(), json!(max_tokens));
            }
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        log::error!(
            "OpenAICompatibleBackend::post({}): HTTP {}: {}",
            self.config.name,
            status,
            message
        );

        Err(if status == StatusCode::TOO_MANY_REQUESTS {
            BackendError::RateLimited {
                message,
                retry_after,
            }
        } else {
            BackendError::Status {
                status: status.as_u16(),
                message,
            }
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else if error.is_decode() {
        BackendError::Malformed(error.to_string())
    } else {
        BackendError::Connection(error.to_string())
    }
}

/// Extract `error.message` from a JSON error body, else the raw (shortened) body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[async_trait]
impl ChatBackend for OpenAICompatibleBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        log::debug!(
            "OpenAICompatibleBackend::send({}): {} message(s), {} tool(s)",
            self.config.name,
            request.messages.len(),
            request.tools.len()
        );
        let payload = self.build_payload(request, false).await?;
        let response = self.post(&payload).await?;
        let body: Value = response.json().await.map_err(map_reqwest_error)?;
        let (message, usage) = parse_completion(&body)?;
        Ok(ChatResponse {
            message,
            usage,
            backend: self.config.name.clone(),
        })
    }

    async fn send_stream(&self, request: &ChatRequest) -> Result<MessageChunkStream, BackendError> {
        log::debug!("OpenAICompatibleBackend::send_stream({})", self.config.name);
        let payload = self.build_payload(request, true).await?;
        let response = self.post(&payload).await?;
        Ok(sse_chunk_stream(response))
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
