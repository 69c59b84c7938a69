//! Candidate selection.
//!
//! Eligible providers are filtered by task support, circuit health, and the
//! request's cost ceiling, then ordered by the configured traffic weight
//! (the declared percentage allocation) with cheaper-then-faster
//! tie-breaks. A caller's preferred model is promoted to the front when
//! eligible; the rest of the ordering is preserved as fallback.

use crate::profile::{ProfileSnapshot, ProviderProfile};
use dashmap::DashMap;
use orchestrator_core::{ProviderId, TaskType};
use orchestrator_resilience::CircuitBreakerRegistry;
use parking_lot::Mutex;
use rand::Rng;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Fraction of requests deliberately routed to the secondary candidate
    /// for comparison (0 disables the experiment).
    pub ab_split_fraction: f64,
}

/// One routed candidate, in attempt order.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Provider to attempt.
    pub provider_id: ProviderId,
    /// Model the attempt should use.
    pub model: String,
    /// Estimated cost for the request at this provider (USD).
    pub estimated_cost: f64,
}

/// Cost-aware routing engine.
pub struct Router {
    profiles: DashMap<ProviderId, Arc<Mutex<ProviderProfile>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: RouterConfig,
}

impl Router {
    /// Create a router reading circuit health from `breakers`.
    #[must_use]
    pub fn new(config: RouterConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            profiles: DashMap::new(),
            breakers,
            config,
        }
    }

    /// Register a provider profile.
    pub fn register(&self, profile: ProviderProfile) {
        debug!(provider = %profile.provider_id, weight = profile.weight, "provider registered");
        self.profiles.insert(
            profile.provider_id.clone(),
            Arc::new(Mutex::new(profile)),
        );
    }

    /// Select the ordered candidate list for a request.
    ///
    /// Returns an empty list when no provider is eligible, in which case the
    /// engine fails fast without attempting any network call.
    #[must_use]
    pub fn select_candidates(
        &self,
        task_type: TaskType,
        cost_ceiling: f64,
        estimated_units: u32,
        preferred_model: Option<&str>,
    ) -> Vec<Candidate> {
        let mut eligible: Vec<ProviderProfile> = self
            .profiles
            .iter()
            .filter_map(|entry| {
                let profile = entry.value().lock().clone();
                let open = self.breakers.is_open(&profile.provider_id);
                let estimate = profile.estimate_for_units(estimated_units);
                if profile.supports(task_type) && !open && estimate <= cost_ceiling {
                    Some(profile)
                } else {
                    None
                }
            })
            .collect();

        // Primary: declared traffic weight. Ties: cheaper, then faster.
        eligible.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then_with(|| {
                    a.cost_per_1k
                        .partial_cmp(&b.cost_per_1k)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| {
                    a.avg_latency_ms
                        .partial_cmp(&b.avg_latency_ms)
                        .unwrap_or(Ordering::Equal)
                })
        });

        let mut candidates: Vec<Candidate> = eligible
            .iter()
            .map(|profile| Candidate {
                provider_id: profile.provider_id.clone(),
                model: profile.default_model.clone(),
                estimated_cost: profile.estimate_for_units(estimated_units),
            })
            .collect();

        if let Some(preferred) = preferred_model {
            if let Some(position) = eligible
                .iter()
                .position(|profile| profile.default_model == preferred)
            {
                // Promote to the front, preserving the rest as fallback.
                let promoted = candidates.remove(position);
                candidates.insert(0, promoted);
            }
        } else if candidates.len() >= 2
            && self.config.ab_split_fraction > 0.0
            && rand::thread_rng().gen::<f64>() < self.config.ab_split_fraction
        {
            // Comparison traffic: secondary candidate takes the head slot.
            candidates.swap(0, 1);
            debug!(
                primary = %candidates[0].provider_id,
                "a/b split routed request to secondary candidate"
            );
        }

        candidates
    }

    /// Fold one completed call into a provider's rolling averages.
    pub fn record_completion(
        &self,
        provider_id: &ProviderId,
        latency_ms: f64,
        observed_cost_per_1k: Option<f64>,
    ) {
        if let Some(entry) = self.profiles.get(provider_id) {
            entry.lock().record_completion(latency_ms, observed_cost_per_1k);
        }
    }

    /// Snapshot every profile for the admin surface.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ProfileSnapshot> {
        let mut snapshots: Vec<ProfileSnapshot> = self
            .profiles
            .iter()
            .map(|entry| ProfileSnapshot::from(&*entry.value().lock()))
            .collect();
        snapshots.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        snapshots
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether any provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::ProfileSeed;
    use orchestrator_resilience::CircuitBreakerConfig;

    fn seed(id: &str, model: &str, cost_in: f64, cost_out: f64) -> ProfileSeed {
        ProfileSeed {
            provider_id: ProviderId::new(id),
            supported_tasks: vec![TaskType::Itinerary, TaskType::Chat],
            default_model: model.to_string(),
            input_cost_per_1k: cost_in,
            output_cost_per_1k: cost_out,
        }
    }

    fn breakers() -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: std::time::Duration::from_secs(60),
            max_cooldown: std::time::Duration::from_secs(600),
        }))
    }

    fn router_with_three() -> (Router, Arc<CircuitBreakerRegistry>) {
        let registry = breakers();
        let router = Router::new(RouterConfig::default(), Arc::clone(&registry));
        // Equal weights: cost decides the order.
        router.register(ProviderProfile::from_seed(&seed("a", "model-a", 0.03, 0.06), 34));
        router.register(ProviderProfile::from_seed(&seed("b", "model-b", 0.0001, 0.0004), 33));
        router.register(ProviderProfile::from_seed(&seed("c", "model-c", 0.01, 0.03), 33));
        (router, registry)
    }

    #[test]
    fn test_open_circuit_excluded() {
        let (router, registry) = router_with_three();
        registry
            .get_or_create(&ProviderId::new("a"))
            .record_failure();

        let candidates = router.select_candidates(TaskType::Itinerary, 1.0, 1000, None);
        let ids: Vec<&str> = candidates
            .iter()
            .map(|c| c.provider_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_weight_orders_before_cost() {
        let registry = breakers();
        let router = Router::new(RouterConfig::default(), Arc::clone(&registry));
        router.register(ProviderProfile::from_seed(&seed("pricey", "model-p", 0.03, 0.06), 60));
        router.register(ProviderProfile::from_seed(&seed("cheap", "model-c", 0.0001, 0.0004), 20));

        let candidates = router.select_candidates(TaskType::Chat, 1.0, 1000, None);
        assert_eq!(candidates[0].provider_id.as_str(), "pricey");
    }

    #[test]
    fn test_unsupported_task_excluded() {
        let registry = breakers();
        let router = Router::new(RouterConfig::default(), Arc::clone(&registry));
        let mut narrow = seed("narrow", "model-n", 0.01, 0.03);
        narrow.supported_tasks = vec![TaskType::Translation];
        router.register(ProviderProfile::from_seed(&narrow, 50));

        let candidates = router.select_candidates(TaskType::Itinerary, 1.0, 1000, None);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cost_ceiling_excludes_expensive() {
        let (router, _registry) = router_with_three();
        // 1000 units at provider a costs 0.045; ceiling 0.01 admits b and c only.
        let candidates = router.select_candidates(TaskType::Chat, 0.0201, 1000, None);
        let ids: Vec<&str> = candidates
            .iter()
            .map(|c| c.provider_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_preferred_model_promoted_with_fallback_preserved() {
        let (router, _registry) = router_with_three();
        let candidates =
            router.select_candidates(TaskType::Chat, 1.0, 1000, Some("model-c"));
        let ids: Vec<&str> = candidates
            .iter()
            .map(|c| c.provider_id.as_str())
            .collect();
        assert_eq!(ids[0], "c");
        // Remaining order is the original ranking minus the promoted entry.
        assert_eq!(ids[1..], ["a", "b"][..]);
    }

    #[test]
    fn test_unknown_preferred_model_keeps_order() {
        let (router, _registry) = router_with_three();
        let with_pref =
            router.select_candidates(TaskType::Chat, 1.0, 1000, Some("model-z"));
        let without: Vec<String> = router
            .select_candidates(TaskType::Chat, 1.0, 1000, None)
            .iter()
            .map(|c| c.provider_id.to_string())
            .collect();
        let with_pref: Vec<String> = with_pref
            .iter()
            .map(|c| c.provider_id.to_string())
            .collect();
        assert_eq!(with_pref, without);
    }

    #[test]
    fn test_ab_split_full_fraction_swaps_head() {
        let registry = breakers();
        let router = Router::new(
            RouterConfig {
                ab_split_fraction: 1.0,
            },
            Arc::clone(&registry),
        );
        router.register(ProviderProfile::from_seed(&seed("first", "model-1", 0.01, 0.02), 60));
        router.register(ProviderProfile::from_seed(&seed("second", "model-2", 0.01, 0.02), 20));

        let candidates = router.select_candidates(TaskType::Chat, 1.0, 1000, None);
        assert_eq!(candidates[0].provider_id.as_str(), "second");
        assert_eq!(candidates[1].provider_id.as_str(), "first");
    }

    #[test]
    fn test_empty_when_no_providers() {
        let router = Router::new(RouterConfig::default(), breakers());
        assert!(router
            .select_candidates(TaskType::Chat, 1.0, 1000, None)
            .is_empty());
    }
}
