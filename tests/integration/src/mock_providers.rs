//! Scripted in-process providers for engine tests.

use async_trait::async_trait;
use futures::stream;
use orchestrator_core::{
    ChunkStream, CostEstimate, GatewayError, GatewayResult, GenerationRequest, ModelProvider,
    ProfileSeed, ProviderId, ProviderResponse, StreamChunk, TaskType, UsageUnits,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Succeed with the given text and usage.
    Success {
        /// Generated text.
        text: String,
        /// Reported usage.
        units: UsageUnits,
    },
    /// Fail with a timeout.
    Timeout,
    /// Fail with a rate limit.
    RateLimited,
    /// Fail with a provider 5xx.
    Internal,
    /// Fail with bad credentials.
    InvalidCredentials,
}

/// A provider whose behavior is scripted per call.
///
/// Outcomes are consumed from a queue; when the queue is empty the last
/// configured outcome repeats.
pub struct ScriptedProvider {
    id: ProviderId,
    supported_tasks: Vec<TaskType>,
    model: String,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
    delay: Duration,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// A provider that always succeeds.
    pub fn succeeding(id: &str, text: &str) -> Self {
        Self::new(
            id,
            Outcome::Success {
                text: text.to_string(),
                units: UsageUnits::new(100, 200),
            },
        )
    }

    /// A provider that always fails with the given outcome.
    pub fn failing(id: &str, outcome: Outcome) -> Self {
        Self::new(id, outcome)
    }

    /// Create with a repeating outcome.
    pub fn new(id: &str, fallback: Outcome) -> Self {
        Self {
            id: ProviderId::new(id),
            supported_tasks: TaskType::ALL.to_vec(),
            model: format!("{id}-model"),
            input_cost_per_1k: 0.001,
            output_cost_per_1k: 0.002,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Restrict the supported task types.
    pub fn with_tasks(mut self, tasks: Vec<TaskType>) -> Self {
        self.supported_tasks = tasks;
        self
    }

    /// Set pricing rates per 1K tokens.
    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Delay every call by `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue outcomes consumed before the fallback repeats.
    pub fn with_script(self, outcomes: Vec<Outcome>) -> Self {
        *self.script.lock().expect("script lock") = outcomes.into();
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn resolve(&self, outcome: Outcome) -> GatewayResult<ProviderResponse> {
        match outcome {
            Outcome::Success { text, units } => Ok(ProviderResponse {
                text,
                model: self.model.clone(),
                units,
                cost_usd: self.usage_cost(units),
                cost_estimated: false,
                cache_ttl: None,
            }),
            Outcome::Timeout => Err(GatewayError::timeout(
                self.id.clone(),
                Duration::from_secs(30),
            )),
            Outcome::RateLimited => Err(GatewayError::rate_limited(self.id.clone(), None)),
            Outcome::Internal => Err(GatewayError::provider_internal(
                self.id.clone(),
                "upstream exploded",
                Some(500),
            )),
            Outcome::InvalidCredentials => {
                Err(GatewayError::invalid_credentials(self.id.clone()))
            }
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn profile_seed(&self) -> ProfileSeed {
        ProfileSeed {
            provider_id: self.id.clone(),
            supported_tasks: self.supported_tasks.clone(),
            default_model: self.model.clone(),
            input_cost_per_1k: self.input_cost_per_1k,
            output_cost_per_1k: self.output_cost_per_1k,
        }
    }

    fn estimate_cost(&self, request: &GenerationRequest) -> CostEstimate {
        let units = orchestrator_core::estimated_units(request);
        CostEstimate::new(
            f64::from(units) / 1000.0 * (self.input_cost_per_1k + self.output_cost_per_1k) / 2.0,
        )
    }

    async fn generate(&self, _request: &GenerationRequest) -> GatewayResult<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.resolve(self.next_outcome())
    }

    async fn stream_generate(&self, request: &GenerationRequest) -> GatewayResult<ChunkStream> {
        let response = self.generate(request).await?;
        let halfway = response.text.len() / 2;
        let (head, tail) = response.text.split_at(halfway);
        let chunks = vec![
            Ok(StreamChunk::delta(head.to_string())),
            Ok(StreamChunk::delta(tail.to_string())),
            Ok(StreamChunk::done(Some(response.units))),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}
