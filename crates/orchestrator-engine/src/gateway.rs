//! The gateway engine: the `execute` pipeline.
//!
//! Flow per request: validate → cache lookup → budget reservation → routing
//! → breaker-guarded provider attempts → settle (commit/release, usage
//! record, cache write).
//!
//! Dispatch runs on a spawned task so a caller that goes away (or a deadline
//! that expires mid-call) leaves the in-flight provider call to complete and
//! settle its cost; no further candidates are attempted in that case.

use orchestrator_budget::BudgetManager;
use orchestrator_core::{
    estimated_units, AttemptFailure, ChunkStream, Fingerprint, GatewayError, GatewayResult,
    GenerationRequest, GenerationResponse, ModelProvider, ProviderId, UsageRecord, UsageUnits,
};
use orchestrator_providers::ProviderRegistry;
use orchestrator_resilience::{CircuitBreaker, CircuitBreakerRegistry, ResponseCache, RetryPolicy};
use orchestrator_routing::{Candidate, Router};
use orchestrator_telemetry::Metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overall deadline applied when the caller sets none.
    pub default_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
        }
    }
}

/// An established streaming generation.
pub struct StreamHandle {
    /// Provider serving the stream.
    pub provider_id: ProviderId,
    /// Model serving the stream.
    pub model: String,
    /// The chunk stream. Budget settlement happens when it finishes.
    pub stream: ChunkStream,
}

/// The orchestration gateway engine.
pub struct Gateway {
    providers: Arc<ProviderRegistry>,
    router: Arc<Router>,
    breakers: Arc<CircuitBreakerRegistry>,
    budget: Arc<BudgetManager>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    config: EngineConfig,
}

/// Builder for [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    providers: Option<Arc<ProviderRegistry>>,
    router: Option<Arc<Router>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    budget: Option<Arc<BudgetManager>>,
    cache: Option<Arc<ResponseCache>>,
    retry: Option<RetryPolicy>,
    metrics: Option<Arc<Metrics>>,
    config: Option<EngineConfig>,
}

impl GatewayBuilder {
    /// Set the provider registry.
    #[must_use]
    pub fn providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Set the router.
    #[must_use]
    pub fn router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Set the circuit breaker registry.
    #[must_use]
    pub fn breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Set the budget manager.
    #[must_use]
    pub fn budget(mut self, budget: Arc<BudgetManager>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Set the response cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the metrics registry.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    /// Returns a configuration error if a required component is missing.
    pub fn build(self) -> GatewayResult<Gateway> {
        Ok(Gateway {
            providers: self
                .providers
                .ok_or_else(|| GatewayError::configuration("provider registry is required"))?,
            router: self
                .router
                .ok_or_else(|| GatewayError::configuration("router is required"))?,
            breakers: self
                .breakers
                .ok_or_else(|| GatewayError::configuration("breaker registry is required"))?,
            budget: self
                .budget
                .ok_or_else(|| GatewayError::configuration("budget manager is required"))?,
            cache: self
                .cache
                .ok_or_else(|| GatewayError::configuration("response cache is required"))?,
            retry: self.retry.unwrap_or_else(RetryPolicy::with_defaults),
            metrics: self
                .metrics
                .ok_or_else(|| GatewayError::configuration("metrics registry is required"))?,
            config: self.config.unwrap_or_default(),
        })
    }
}

impl Gateway {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Execute a generation request end to end.
    ///
    /// # Errors
    /// Returns a terminal error per the gateway taxonomy; provider-local
    /// failures are absorbed and retried against the next candidate.
    #[instrument(skip(self, request), fields(request_id = %request.id, task = %request.task_type))]
    pub async fn execute(&self, request: GenerationRequest) -> GatewayResult<GenerationResponse> {
        if let Err(error) = request.validate() {
            self.finish_preflight(&request, &error).await;
            return Err(error);
        }

        let fingerprint = Fingerprint::of(&request);

        // Cache hits are free: no budget mutation, no provider attempt.
        if let Some(cached) = self.cache.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "cache hit");
            self.metrics.cache_hits_total.inc();
            self.metrics
                .requests_total
                .with_label_values(&[request.task_type.as_str(), "cache_hit"])
                .inc();
            self.record(UsageRecord::cache_hit(request.id.clone())).await;
            return Ok(cached.replayed_for(request.id));
        }
        self.metrics.cache_misses_total.inc();

        // Reserve the worst-case estimate across registered providers; the
        // actual provider's cost reconciles the difference at commit.
        let estimated = self.worst_case_estimate(&request);
        let reservation = match self
            .budget
            .reserve(&request.user_id, &request.tenant_id, estimated)
            .await
        {
            Ok(reservation) => reservation,
            Err(error) => {
                if let GatewayError::BudgetExceeded { scope, .. } = &error {
                    self.metrics
                        .budget_denials_total
                        .with_label_values(&[&scope.to_string()])
                        .inc();
                }
                self.finish_preflight(&request, &error).await;
                return Err(error);
            }
        };

        let candidates = self.router.select_candidates(
            request.task_type,
            request.max_cost_ceiling,
            estimated_units(&request),
            request.preferred_model.as_deref(),
        );

        if candidates.is_empty() {
            let error = GatewayError::NoEligibleProvider {
                task_type: request.task_type,
            };
            self.release_quietly(&reservation).await;
            self.finish_preflight(&request, &error).await;
            return Err(error);
        }

        let deadline = Instant::now()
            + request
                .deadline_ms
                .map_or(self.config.default_deadline, Duration::from_millis);

        let mut attempts: Vec<AttemptFailure> = Vec::new();

        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Between attempts the reservation is still ours to return.
                self.release_quietly(&reservation).await;
                let error = GatewayError::DeadlineExceeded { attempts };
                self.log_terminal(&request, &error);
                return Err(error);
            }

            let breaker = self.breakers.get_or_create(&candidate.provider_id);
            if breaker.check().is_err() {
                self.note_failure(&request, &candidate.provider_id, "circuit_open", &mut attempts)
                    .await;
                continue;
            }

            let Some(provider) = self.providers.get(&candidate.provider_id) else {
                // Registered with the router but missing from the registry;
                // free the half-open trial slot if we claimed one.
                breaker.record_failure();
                self.note_failure(&request, &candidate.provider_id, "unregistered", &mut attempts)
                    .await;
                continue;
            };

            let abandoned = Arc::new(AtomicBool::new(false));
            let handle = self.spawn_attempt(
                &request,
                &candidate,
                provider,
                breaker,
                &fingerprint,
                &reservation,
                Arc::clone(&abandoned),
            );

            let started = Instant::now();
            match timeout(remaining, handle).await {
                Err(_elapsed) => {
                    // The in-flight attempt now owns settlement: it commits
                    // if the provider completes, releases if it fails.
                    abandoned.store(true, Ordering::Release);
                    attempts.push(AttemptFailure::new(
                        candidate.provider_id.clone(),
                        "deadline_exceeded",
                    ));
                    let error = GatewayError::DeadlineExceeded { attempts };
                    self.log_terminal(&request, &error);
                    return Err(error);
                }
                Ok(Err(join_error)) => {
                    warn!(provider = %candidate.provider_id, error = %join_error, "attempt task failed");
                    self.note_failure(&request, &candidate.provider_id, "internal", &mut attempts)
                        .await;
                }
                Ok(Ok(Ok(response))) => {
                    self.metrics
                        .provider_latency_seconds
                        .with_label_values(&[candidate.provider_id.as_str()])
                        .observe(started.elapsed().as_secs_f64());
                    self.metrics
                        .provider_attempts_total
                        .with_label_values(&[candidate.provider_id.as_str(), "success"])
                        .inc();
                    self.metrics
                        .requests_total
                        .with_label_values(&[request.task_type.as_str(), "success"])
                        .inc();
                    info!(
                        request_id = %request.id,
                        provider = %response.provider_used,
                        cost_usd = response.cost_usd,
                        "request completed"
                    );
                    return Ok(response);
                }
                Ok(Ok(Err(error))) => {
                    self.metrics
                        .provider_attempts_total
                        .with_label_values(&[candidate.provider_id.as_str(), error.reason_code()])
                        .inc();
                    attempts.push(AttemptFailure::new(
                        candidate.provider_id.clone(),
                        error.reason_code(),
                    ));
                    debug!(
                        provider = %candidate.provider_id,
                        error = %error,
                        "candidate failed, falling back"
                    );
                }
            }
        }

        // Exhaustion: nothing was billed, so the hold is returned in full.
        self.release_quietly(&reservation).await;
        let error = GatewayError::AllProvidersUnavailable { attempts };
        self.log_terminal(&request, &error);
        Err(error)
    }

    /// Execute a streaming generation request.
    ///
    /// Shares validation, budget, and routing with [`execute`]; streamed
    /// responses bypass the cache. Budget settles when the stream finishes.
    ///
    /// # Errors
    /// Returns a terminal error if no candidate stream can be established.
    #[instrument(skip(self, request), fields(request_id = %request.id, task = %request.task_type))]
    pub async fn execute_stream(&self, request: GenerationRequest) -> GatewayResult<StreamHandle> {
        if let Err(error) = request.validate() {
            self.finish_preflight(&request, &error).await;
            return Err(error);
        }

        let estimated = self.worst_case_estimate(&request);
        let reservation = match self
            .budget
            .reserve(&request.user_id, &request.tenant_id, estimated)
            .await
        {
            Ok(reservation) => reservation,
            Err(error) => {
                if let GatewayError::BudgetExceeded { scope, .. } = &error {
                    self.metrics
                        .budget_denials_total
                        .with_label_values(&[&scope.to_string()])
                        .inc();
                }
                self.finish_preflight(&request, &error).await;
                return Err(error);
            }
        };

        let candidates = self.router.select_candidates(
            request.task_type,
            request.max_cost_ceiling,
            estimated_units(&request),
            request.preferred_model.as_deref(),
        );

        if candidates.is_empty() {
            let error = GatewayError::NoEligibleProvider {
                task_type: request.task_type,
            };
            self.release_quietly(&reservation).await;
            self.finish_preflight(&request, &error).await;
            return Err(error);
        }

        let deadline = Instant::now()
            + request
                .deadline_ms
                .map_or(self.config.default_deadline, Duration::from_millis);

        let mut attempts: Vec<AttemptFailure> = Vec::new();

        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.release_quietly(&reservation).await;
                let error = GatewayError::DeadlineExceeded { attempts };
                self.log_terminal(&request, &error);
                return Err(error);
            }

            let breaker = self.breakers.get_or_create(&candidate.provider_id);
            if breaker.check().is_err() {
                self.note_failure(&request, &candidate.provider_id, "circuit_open", &mut attempts)
                    .await;
                continue;
            }

            let Some(provider) = self.providers.get(&candidate.provider_id) else {
                breaker.record_failure();
                self.note_failure(&request, &candidate.provider_id, "unregistered", &mut attempts)
                    .await;
                continue;
            };

            match timeout(remaining, provider.stream_generate(&request)).await {
                Err(_elapsed) => {
                    breaker.record_failure();
                    self.note_failure(
                        &request,
                        &candidate.provider_id,
                        "deadline_exceeded",
                        &mut attempts,
                    )
                    .await;
                    self.release_quietly(&reservation).await;
                    let error = GatewayError::DeadlineExceeded { attempts };
                    self.log_terminal(&request, &error);
                    return Err(error);
                }
                Ok(Err(error)) => {
                    breaker.record_failure();
                    self.note_failure(
                        &request,
                        &candidate.provider_id,
                        error.reason_code(),
                        &mut attempts,
                    )
                    .await;
                }
                Ok(Ok(inner)) => {
                    let stream = self.settling_stream(
                        inner,
                        &request,
                        &candidate,
                        provider,
                        breaker,
                        reservation.clone(),
                    );
                    self.metrics
                        .requests_total
                        .with_label_values(&[request.task_type.as_str(), "stream"])
                        .inc();
                    return Ok(StreamHandle {
                        provider_id: candidate.provider_id.clone(),
                        model: candidate.model.clone(),
                        stream,
                    });
                }
            }
        }

        self.release_quietly(&reservation).await;
        let error = GatewayError::AllProvidersUnavailable { attempts };
        self.log_terminal(&request, &error);
        Err(error)
    }

    /// Wrap a provider stream so budget, breaker, and usage settle when the
    /// stream finishes (or fails mid-flight).
    fn settling_stream(
        &self,
        mut inner: ChunkStream,
        request: &GenerationRequest,
        candidate: &Candidate,
        provider: Arc<dyn ModelProvider>,
        breaker: Arc<CircuitBreaker>,
        reservation: orchestrator_core::ReservationId,
    ) -> ChunkStream {
        use futures::StreamExt;

        let budget = Arc::clone(&self.budget);
        let router = Arc::clone(&self.router);
        let request = request.clone();
        let request_id = request.id.clone();
        let provider_id = candidate.provider_id.clone();
        let started = Instant::now();

        let stream = async_stream::try_stream! {
            let mut settled = false;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        if chunk.done && !settled {
                            settled = true;
                            // Providers normally report usage on the final
                            // chunk; fall back to the pre-flight estimate.
                            let (units, estimated, cost) = match chunk.usage {
                                Some(units) => (units, false, provider.usage_cost(units)),
                                None => (
                                    UsageUnits::default(),
                                    true,
                                    provider.estimate_cost(&request).usd,
                                ),
                            };
                            breaker.record_success();
                            router.record_completion(
                                &provider_id,
                                started.elapsed().as_millis() as f64,
                                observed_rate(cost, units),
                            );
                            if let Err(error) = budget.commit(&reservation, cost).await {
                                warn!(error = %error, "failed to commit streamed cost");
                            }
                            let record = UsageRecord::success(
                                request_id.clone(),
                                provider_id.clone(),
                                units.total(),
                                cost,
                                estimated,
                            );
                            if let Err(error) = budget.record_usage(&record).await {
                                warn!(error = %error, "failed to append usage record");
                            }
                            yield chunk;
                            return;
                        }
                        yield chunk;
                    }
                    Err(error) => {
                        if !settled {
                            settled = true;
                            breaker.record_failure();
                            if let Err(release_error) = budget.release(&reservation).await {
                                warn!(error = %release_error, "failed to release reservation");
                            }
                            let record = UsageRecord::failure(
                                request_id.clone(),
                                provider_id.clone(),
                                error.reason_code(),
                            );
                            if let Err(log_error) = budget.record_usage(&record).await {
                                warn!(error = %log_error, "failed to append usage record");
                            }
                        }
                        Err(error)?;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    /// Spawn one provider attempt on its own task. The task records breaker
    /// and router outcomes itself; on success it also commits the budget,
    /// appends the usage record, and writes the cache. If the engine has
    /// abandoned the attempt (deadline/cancellation), the task settles the
    /// failure side too.
    #[allow(clippy::too_many_arguments)]
    fn spawn_attempt(
        &self,
        request: &GenerationRequest,
        candidate: &Candidate,
        provider: Arc<dyn ModelProvider>,
        breaker: Arc<CircuitBreaker>,
        fingerprint: &Fingerprint,
        reservation: &orchestrator_core::ReservationId,
        abandoned: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<GatewayResult<GenerationResponse>> {
        let request = request.clone();
        let candidate = candidate.clone();
        let fingerprint = fingerprint.clone();
        let reservation = reservation.clone();
        let retry = self.retry.clone();
        let router = Arc::clone(&self.router);
        let budget = Arc::clone(&self.budget);
        let cache = Arc::clone(&self.cache);

        tokio::spawn(async move {
            let started = Instant::now();
            let result = retry.execute(|| provider.generate(&request)).await;
            let latency_ms = started.elapsed().as_millis() as f64;

            match result {
                Ok(raw) => {
                    breaker.record_success();
                    router.record_completion(
                        &candidate.provider_id,
                        latency_ms,
                        observed_rate(raw.cost_usd, raw.units),
                    );

                    if let Err(error) = budget.commit(&reservation, raw.cost_usd).await {
                        warn!(error = %error, "failed to commit actual cost");
                    }
                    let record = UsageRecord::success(
                        request.id.clone(),
                        candidate.provider_id.clone(),
                        raw.units.total(),
                        raw.cost_usd,
                        raw.cost_estimated,
                    );
                    if let Err(error) = budget.record_usage(&record).await {
                        warn!(error = %error, "failed to append usage record");
                    }

                    let response = GenerationResponse::fresh(
                        request.id.clone(),
                        raw.text,
                        raw.model,
                        candidate.provider_id.clone(),
                        raw.units,
                        raw.cost_usd,
                        raw.cost_estimated,
                    );
                    cache.insert(&fingerprint, response.clone(), raw.cache_ttl);

                    if abandoned.load(Ordering::Acquire) {
                        debug!(
                            request_id = %request.id,
                            provider = %candidate.provider_id,
                            "abandoned attempt completed; cost committed"
                        );
                    }
                    Ok(response)
                }
                Err(error) => {
                    breaker.record_failure();
                    let record = UsageRecord::failure(
                        request.id.clone(),
                        candidate.provider_id.clone(),
                        error.reason_code(),
                    );
                    if let Err(log_error) = budget.record_usage(&record).await {
                        warn!(error = %log_error, "failed to append usage record");
                    }
                    if abandoned.load(Ordering::Acquire) {
                        // Nobody is iterating candidates anymore; return the
                        // unused hold ourselves.
                        if let Err(release_error) = budget.release(&reservation).await {
                            warn!(error = %release_error, "failed to release reservation");
                        }
                    }
                    Err(error)
                }
            }
        })
    }

    /// Worst-case pre-flight estimate across every registered provider.
    fn worst_case_estimate(&self, request: &GenerationRequest) -> f64 {
        self.providers
            .provider_ids()
            .iter()
            .filter_map(|id| self.providers.get(id))
            .map(|provider| provider.estimate_cost(request).usd)
            .fold(0.0_f64, f64::max)
    }

    /// Record a pre-flight terminal outcome: one rejected usage record plus
    /// metrics and the audit log line.
    async fn finish_preflight(&self, request: &GenerationRequest, error: &GatewayError) {
        self.record(UsageRecord::rejected(
            request.id.clone(),
            error.reason_code(),
        ))
        .await;
        self.log_terminal(request, error);
    }

    /// Append a failed attempt's usage record and remember it for the
    /// terminal error payload.
    async fn note_failure(
        &self,
        request: &GenerationRequest,
        provider_id: &ProviderId,
        reason: &'static str,
        attempts: &mut Vec<AttemptFailure>,
    ) {
        self.metrics
            .provider_attempts_total
            .with_label_values(&[provider_id.as_str(), reason])
            .inc();
        attempts.push(AttemptFailure::new(provider_id.clone(), reason));
        self.record(UsageRecord::failure(
            request.id.clone(),
            provider_id.clone(),
            reason,
        ))
        .await;
    }

    async fn record(&self, record: UsageRecord) {
        if let Err(error) = self.budget.record_usage(&record).await {
            warn!(error = %error, "failed to append usage record");
        }
    }

    async fn release_quietly(&self, reservation: &orchestrator_core::ReservationId) {
        if let Err(error) = self.budget.release(reservation).await {
            warn!(error = %error, "failed to release reservation");
        }
    }

    fn log_terminal(&self, request: &GenerationRequest, error: &GatewayError) {
        self.metrics
            .requests_total
            .with_label_values(&[request.task_type.as_str(), error.reason_code()])
            .inc();
        let attempted: Vec<String> = match error {
            GatewayError::AllProvidersUnavailable { attempts }
            | GatewayError::DeadlineExceeded { attempts } => attempts
                .iter()
                .map(|a| format!("{}:{}", a.provider_id, a.reason))
                .collect(),
            _ => Vec::new(),
        };
        warn!(
            request_id = %request.id,
            tenant = %request.tenant_id,
            user = %request.user_id,
            outcome = error.reason_code(),
            attempted = ?attempted,
            "request failed"
        );
    }
}

/// Observed blended cost per 1K tokens, fed back into the rolling average.
fn observed_rate(cost_usd: f64, units: UsageUnits) -> Option<f64> {
    let total = units.total();
    if total == 0 {
        None
    } else {
        Some(cost_usd / f64::from(total) * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_rate() {
        let rate = observed_rate(0.03, UsageUnits::new(500, 1000)).expect("rate");
        assert!((rate - 0.02).abs() < 1e-9);
        assert!(observed_rate(0.03, UsageUnits::new(0, 0)).is_none());
    }

    #[test]
    fn test_builder_requires_components() {
        let result = Gateway::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_engine_config_default_deadline() {
        let config = EngineConfig::default();
        assert_eq!(config.default_deadline, Duration::from_secs(30));
    }
}
