//! Configuration for backends and agents.
//!
//! Plain structs with `Default` impls; callers construct them however they like.
//! [`BackendConfig::from_env`] resolves a named provider preset from
//! environment variables:
//!
//! * `<PROVIDER>_API_KEY` (required)
//! * `<PROVIDER>_BASE_URL` (overrides the preset endpoint)
//! * `<PROVIDER>_MODEL` (overrides the preset model)
//!
//! ```rust,no_run
//! use miniagent::BackendConfig;
//!
//! let primary = BackendConfig::from_env("siliconflow")?;
//! let fallback = BackendConfig::from_env("zhipuai")?;
//! # Ok::<(), miniagent::AgentError>(())
//! ```

use crate::miniagent::error::AgentError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Known OpenAI-compatible providers: `(name, base_url, default model)`.
const PRESETS: &[(&str, &str, &str)] = &[
    ("openai", "https://api.openai.com/v1", "gpt-4o-mini"),
    (
        "siliconflow",
        "https://api.siliconflow.cn/v1",
        "Qwen/Qwen2.5-7B-Instruct",
    ),
    ("zhipuai", "https://open.bigmodel.cn/api/paas/v4", "glm-4-flash"),
    ("deepseek", "https://api.deepseek.com/v1", "deepseek-chat"),
    ("moonshot", "https://api.moonshot.cn/v1", "moonshot-v1-8k"),
];

/// Default per-request timeout for backend calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials, endpoint and model for one backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name used in logs and failure reports.
    pub name: String,
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Bound on a single attempt.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// Keep the key out of debug output.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Names of the built-in provider presets.
    pub fn presets() -> Vec<&'static str> {
        PRESETS.iter().map(|(name, _, _)| *name).collect()
    }

    /// Resolve `provider` from environment variables. Providers without a preset
    /// need both `<PROVIDER>_BASE_URL` and `<PROVIDER>_MODEL`.
    pub fn from_env(provider: &str) -> Result<Self, AgentError> {
        let prefix = provider.to_ascii_uppercase().replace('-', "_");
        let var = |suffix: &str| {
            std::env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        let preset = PRESETS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(provider));

        let api_key = var("API_KEY").ok_or_else(|| {
            AgentError::Config(format!("{}_API_KEY is not set", prefix))
        })?;
        let base_url = var("BASE_URL")
            .or_else(|| preset.map(|(_, url, _)| url.to_string()))
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "unknown provider '{}': set {}_BASE_URL",
                    provider, prefix
                ))
            })?;
        let model = var("MODEL")
            .or_else(|| preset.map(|(_, _, model)| model.to_string()))
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "unknown provider '{}': set {}_MODEL",
                    provider, prefix
                ))
            })?;

        log::debug!(
            "BackendConfig::from_env({}): base_url={}, model={}",
            provider,
            base_url,
            model
        );
        Ok(Self::new(provider.to_ascii_lowercase(), base_url, api_key, model))
    }
}

/// What the ReAct loop does when a tool call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolFailurePolicy {
    /// Unknown tools and invalid arguments abort the reply; timeouts and
    /// execution faults are fed back to the model as `tool` messages.
    #[default]
    AbortOnMismatch,
    /// Every failure is fed back to the model.
    FeedBackAll,
}

/// Per-agent limits for the ReAct loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model calls per `reply`.
    pub max_iterations: usize,
    /// Bound on a single tool invocation.
    #[serde(with = "duration_secs")]
    pub tool_timeout: Duration,
    pub tool_failure_policy: ToolFailurePolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tool_timeout: Duration::from_secs(30),
            tool_failure_policy: ToolFailurePolicy::default(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if secs.is_finite() && secs >= 0.0 {
            Ok(Duration::from_secs_f64(secs))
        } else {
            Err(serde::de::Error::custom("duration must be a non-negative number of seconds"))
        }
    }
}
