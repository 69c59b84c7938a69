//! Provider registry.

use dashmap::DashMap;
use orchestrator_core::{GatewayError, GatewayResult, ModelProvider, ProviderId};
use std::sync::Arc;
use tracing::info;

/// Holds every registered provider adapter, keyed by provider ID.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<ProviderId, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider adapter.
    ///
    /// # Errors
    /// Returns a configuration error if the ID is already taken.
    pub fn register(&self, provider: Arc<dyn ModelProvider>) -> GatewayResult<()> {
        let id = provider.id().clone();
        if self.providers.contains_key(&id) {
            return Err(GatewayError::configuration(format!(
                "provider '{id}' is already registered"
            )));
        }
        info!(provider = %id, "provider registered");
        self.providers.insert(id, provider);
        Ok(())
    }

    /// Look up a provider by ID.
    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// IDs of every registered provider.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .providers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
