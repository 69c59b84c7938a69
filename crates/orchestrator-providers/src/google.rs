//! Google Gemini provider adapter.
//!
//! Speaks the Google AI Studio API
//! (`generativelanguage.googleapis.com/v1beta/models/{MODEL}:generateContent`).

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

/// Google provider configuration.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
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

impl GoogleConfig {
    /// Create a configuration with standard defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            id: id.into(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-1.5-flash".to_string(),
            supported_tasks: TaskType::ALL.to_vec(),
            input_cost_per_1k: 0.000_075,
            output_cost_per_1k: 0.000_3,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
        }
    }

    /// Override the base URL.
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

    /// Endpoint URL for the configured model.
    fn endpoint_url(&self, streaming: bool) -> String {
        let action = if streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let suffix = if streaming { "&alt=sse" } else { "" };
        format!(
            "{}/models/{}:{}?key={}{}",
            self.base_url,
            self.default_model,
            action,
            self.api_key.expose_secret(),
            suffix
        )
    }
}

/// Google Gemini provider implementation.
pub struct GoogleProvider {
    provider_id: ProviderId,
    config: GoogleConfig,
    client: Client,
}

impl GoogleProvider {
    /// Create a new Google provider.
    ///
    /// # Errors
    /// Returns a configuration error if the HTTP client cannot be created.
    pub fn new(config: GoogleConfig) -> GatewayResult<Self> {
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

    fn body_for(&self, request: &GenerationRequest) -> GenerateContentBody {
        GenerateContentBody {
            contents: vec![WireContent {
                parts: vec![WirePart::text(request.prompt.clone())],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }

    async fn post(&self, streaming: bool, body: &GenerateContentBody) -> GatewayResult<reqwest::Response> {
        let response = self
            .client
            .post(self.config.endpoint_url(streaming))
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
        content: GenerateContentResponse,
    ) -> GatewayResult<ProviderResponse> {
        let text: String = content
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GatewayError::provider_internal(
                self.provider_id.clone(),
                "response contained no candidates",
                None,
            ));
        }

        let (units, cost_estimated) = match content.usage_metadata {
            Some(usage) => (
                UsageUnits::new(usage.prompt_token_count, usage.candidates_token_count),
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
            model: self.config.default_model.clone(),
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
impl ModelProvider for GoogleProvider {
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

        let body = self.body_for(request);
        let response = self.post(false, &body).await?;
        let content: GenerateContentResponse = response.json().await.map_err(|e| {
            GatewayError::provider_internal(
                self.provider_id.clone(),
                format!("malformed response body: {e}"),
                None,
            )
        })?;

        self.normalize(request, content)
    }

    async fn stream_generate(&self, request: &GenerationRequest) -> GatewayResult<ChunkStream> {
        let body = self.body_for(request);
        let response = self.post(true, &body).await?;

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
                    let parsed: GenerateContentResponse =
                        serde_json::from_str(&payload).map_err(|e| {
                            GatewayError::provider_internal(
                                provider_id.clone(),
                                format!("malformed stream chunk: {e}"),
                                None,
                            )
                        })?;

                    if let Some(reported) = parsed.usage_metadata {
                        usage = Some(UsageUnits::new(
                            reported.prompt_token_count,
                            reported.candidates_token_count,
                        ));
                    }
                    let delta: String = parsed
                        .candidates
                        .into_iter()
                        .next()
                        .map(|candidate| {
                            candidate
                                .content
                                .parts
                                .into_iter()
                                .filter_map(|part| part.text)
                                .collect()
                        })
                        .unwrap_or_default();
                    if !delta.is_empty() {
                        yield StreamChunk::delta(delta);
                    }
                }
            }
            yield StreamChunk::done(usage.take());
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentBody {
    contents: Vec<WireContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
}

impl WirePart {
    fn text(value: String) -> Self {
        Self { text: Some(value) }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(GoogleConfig::new(
            "google-primary",
            SecretString::new("g-test".to_string()),
        ))
        .expect("valid config")
    }

    fn request() -> GenerationRequest {
        GenerationRequest::builder()
            .tenant("family-1")
            .user("user-1")
            .task_type(TaskType::Recommendation)
            .prompt("Suggest family activities in Lisbon")
            .build()
            .expect("valid request")
    }

    #[test]
    fn test_endpoint_url_shapes() {
        let config = GoogleConfig::new("g", SecretString::new("key".to_string()));
        assert!(config
            .endpoint_url(false)
            .ends_with("models/gemini-1.5-flash:generateContent?key=key"));
        assert!(config.endpoint_url(true).contains("streamGenerateContent"));
        assert!(config.endpoint_url(true).ends_with("&alt=sse"));
    }

    #[test]
    fn test_body_shape() {
        let body = provider().body_for(&request());
        assert_eq!(body.contents.len(), 1);
        assert_eq!(
            body.contents[0].parts[0].text.as_deref(),
            Some("Suggest family activities in Lisbon")
        );
    }

    #[test]
    fn test_normalize_with_usage_metadata() {
        let content: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Tram 28, then the aquarium."}]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 30}
        }))
        .expect("parses");

        let normalized = provider()
            .normalize(&request(), content)
            .expect("normalizes");
        assert_eq!(normalized.units.total(), 42);
        assert!(!normalized.cost_estimated);
        assert_eq!(normalized.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_normalize_no_candidates_fails() {
        let content: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).expect("parses");
        assert!(provider().normalize(&request(), content).is_err());
    }

    #[test]
    fn test_wire_part_helper() {
        let part = WirePart::text("hello".to_string());
        assert_eq!(part.text.as_deref(), Some("hello"));
    }
}
