//! ollama http client: one-shot generation and a liveness probe.
//!
//! native uses a blocking `ureq` agent (callers keep it off the main
//! thread); wasm uses `gloo-net` fetch, which yields to the browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::settings::Settings;

pub const GENERATE_PATH: &str = "/api/generate";
pub const TAGS_PATH: &str = "/api/tags";

/// anything that can turn a prompt into a reply.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Generator: Send + Sync {
    /// one non-streaming completion.
    async fn generate(&self, prompt: &str, settings: &Settings) -> ChatResult<String>;

    /// `true` only when the host answered with a 2xx. never errors.
    async fn check_liveness(&self) -> bool;
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: GenerateOptions,
}

impl<'a> GenerateRequest<'a> {
    pub fn new(prompt: &'a str, settings: &'a Settings) -> Self {
        Self {
            model: &settings.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: settings.temperature,
                num_predict: settings.max_tokens,
            },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// pull the reply out of a 2xx body. an `error` field wins over `response`.
fn parse_generate_body(body: &str) -> ChatResult<String> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
    if let Some(message) = parsed.error {
        return Err(ChatError::Api { message });
    }
    parsed
        .response
        .ok_or_else(|| ChatError::MalformedResponse("missing `response` field".into()))
}

/// client for a single ollama host.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    #[cfg(not(target_arch = "wasm32"))]
    agent: ureq::Agent,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient").field("base_url", &self.base_url).finish()
    }
}

impl OllamaClient {
    pub fn new(config: &ChatConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        #[cfg(not(target_arch = "wasm32"))]
        {
            // statuses are mapped to `ChatError::Http` here, not by ureq.
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(config.request_timeout)
                .build()
                .into();
            Self { base_url, agent }
        }

        #[cfg(target_arch = "wasm32")]
        {
            Self { base_url }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn generate_url(&self) -> String {
        format!("{}{}", self.base_url, GENERATE_PATH)
    }

    pub fn tags_url(&self) -> String {
        format!("{}{}", self.base_url, TAGS_PATH)
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str, settings: &Settings) -> ChatResult<String> {
        let url = self.generate_url();
        let payload = GenerateRequest::new(prompt, settings);

        // ureq is blocking; the caller runs us on a worker
        let resp = self
            .agent
            .post(&url)
            .header("accept", "application/json")
            .send_json(&payload)
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ChatError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        // ureq 3.1: read body via Body::read_to_string()
        let body = resp
            .into_body()
            .read_to_string()
            .map_err(|e| ChatError::Network(e.to_string()))?;
        parse_generate_body(&body)
    }

    async fn check_liveness(&self) -> bool {
        match self.agent.get(&self.tags_url()).call() {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str, settings: &Settings) -> ChatResult<String> {
        use gloo_net::http::Request;

        let payload = GenerateRequest::new(prompt, settings);
        let resp = Request::post(&self.generate_url())
            .header("accept", "application/json")
            .json(&payload)
            .map_err(|e| ChatError::Network(e.to_string()))?
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        if !resp.ok() {
            return Err(ChatError::Http {
                status: resp.status(),
                status_text: resp.status_text(),
            });
        }

        let body = resp.text().await.map_err(|e| ChatError::Network(e.to_string()))?;
        parse_generate_body(&body)
    }

    async fn check_liveness(&self) -> bool {
        use gloo_net::http::Request;

        match Request::get(&self.tags_url()).send().await {
            Ok(resp) => resp.ok(),
            Err(_) => false,
        }
    }
}
