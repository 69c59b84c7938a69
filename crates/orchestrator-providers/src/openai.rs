//! OpenAI provider adapter.
//!
//! Speaks the `/chat/completions` API, which also covers OpenAI-compatible
//! endpoints (vLLM, Together, proxies) via a base URL override.

use crate::common::{
    cost_for_usage, map_status_error, map_transport_error, parse_retry_after, SseFramer,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use orchestrator_core::{
    approximate_tokens, ChunkStream, CostEstimate, GatewayError, GatewayResult, GenerationRequest,
    ModelProvider, ProfileSeed, ProviderId, ProviderResponse, StreamChunk, TaskType, UsageUnits,
    DEFAULT_OUTPUT_TOKENS,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Provider instance ID.
    pub id: String,
    /// API key.
    pub api_key: SecretString,
    /// API base URL.
    pub base_url: String,
    /// Model served by this instance.
    pub default_model: String,
    /// Task types this instance serves.
    pub supported_tasks: Vec<TaskType>,
    /// Cost per 1K input tokens (USD).
    pub input_cost_per_1k: f64,
    /// Cost per 1K output tokens (USD).
    pub output_cost_per_1k: f64,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout for the full response.
    pub read_timeout: Duration,
}

impl OpenAiConfig {
    /// Create a configuration with standard defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            id: id.into(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            supported_tasks: TaskType::ALL.to_vec(),
            input_cost_per_1k: 0.000_15,
            output_cost_per_1k: 0.000_6,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
        }
    }

    /// Override the base URL (OpenAI-compatible endpoints).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the served model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the supported task types.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<TaskType>) -> Self {
        self.supported_tasks = tasks;
        self
    }

    /// Set pricing rates per 1K tokens.
    #[must_use]
    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Set connect and read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

/// OpenAI provider implementation.
pub struct OpenAiProvider {
    provider_id: ProviderId,
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Errors
    /// Returns a configuration error if the HTTP client cannot be created.
    pub fn new(config: OpenAiConfig) -> GatewayResult<Self> {
        if config.api_key.expose_secret().is_empty() {
            return Err(GatewayError::configuration(format!(
                "provider '{}' has an empty API key",
                config.id
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| {
                GatewayError::configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            provider_id: ProviderId::new(config.id.clone()),
            config,
            client,
        })
    }

    fn body_for(&self, request: &GenerationRequest, stream: bool) -> ChatCompletionBody {
        ChatCompletionBody {
            model: self.config.default_model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then(|| StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn post(
        &self,
        body: &ChatCompletionBody,
    ) -> GatewayResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(&self.provider_id, &e, self.config.read_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(&self.provider_id, status, retry_after, &text));
        }
        Ok(response)
    }

    fn normalize(
        &self,
        request: &GenerationRequest,
        completion: ChatCompletion,
    ) -> GatewayResult<ProviderResponse> {
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GatewayError::provider_internal(
                    self.provider_id.clone(),
                    "response contained no choices",
                    None,
                )
            })?;

        let (units, cost_estimated) = match completion.usage {
            Some(usage) => (
                UsageUnits::new(usage.prompt_tokens, usage.completion_tokens),
                false,
            ),
            None => (
                UsageUnits::new(
                    approximate_tokens(&request.prompt),
                    approximate_tokens(&text),
                ),
                true,
            ),
        };

        Ok(ProviderResponse {
            text,
            model: completion
                .model
                .unwrap_or_else(|| self.config.default_model.clone()),
            units,
            cost_usd: cost_for_usage(
                units,
                self.config.input_cost_per_1k,
                self.config.output_cost_per_1k,
            ),
            cost_estimated,
            cache_ttl: None,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn profile_seed(&self) -> ProfileSeed {
        ProfileSeed {
            provider_id: self.provider_id.clone(),
            supported_tasks: self.config.supported_tasks.clone(),
            default_model: self.config.default_model.clone(),
            input_cost_per_1k: self.config.input_cost_per_1k,
            output_cost_per_1k: self.config.output_cost_per_1k,
        }
    }

    fn estimate_cost(&self, request: &GenerationRequest) -> CostEstimate {
        let units = UsageUnits::new(
            approximate_tokens(&request.prompt),
            request.max_tokens.unwrap_or(DEFAULT_OUTPUT_TOKENS),
        );
        CostEstimate::new(cost_for_usage(
            units,
            self.config.input_cost_per_1k,
            self.config.output_cost_per_1k,
        ))
    }

    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<ProviderResponse> {
        debug!(provider = %self.provider_id, model = %self.config.default_model, "dispatching");

        let body = self.body_for(request, false);
        let response = self.post(&body).await?;
        let completion: ChatCompletion = response.json().await.map_err(|e| {
            GatewayError::provider_internal(
                self.provider_id.clone(),
                format!("malformed response body: {e}"),
                None,
            )
        })?;

        self.normalize(request, completion)
    }

    async fn stream_generate(&self, request: &GenerationRequest) -> GatewayResult<ChunkStream> {
        let body = self.body_for(request, true);
        let response = self.post(&body).await?;

        let provider_id = self.provider_id.clone();
        let read_timeout = self.config.read_timeout;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut framer = SseFramer::new();
            let mut usage: Option<UsageUnits> = None;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| map_transport_error(&provider_id, &e, read_timeout))?;
                for payload in framer.feed(&chunk) {
                    if payload == "[DONE]" {
                        yield StreamChunk::done(usage.take());
                        return;
                    }
                    let parsed: StreamPayload =
                        serde_json::from_str(&payload).map_err(|e| {
                            GatewayError::provider_internal(
                                provider_id.clone(),
                                format!("malformed stream chunk: {e}"),
                                None,
                            )
                        })?;
                    if let Some(reported) = parsed.usage {
                        usage = Some(UsageUnits::new(
                            reported.prompt_tokens,
                            reported.completion_tokens,
                        ));
                    }
                    if let Some(delta) = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                    {
                        if !delta.is_empty() {
                            yield StreamChunk::delta(delta);
                        }
                    }
                }
            }
            // Stream ended without [DONE]; still terminate cleanly.
            yield StreamChunk::done(usage.take());
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
