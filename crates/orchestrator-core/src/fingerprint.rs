//! Normalized request fingerprinting.
//!
//! The fingerprint is the cache key: a deterministic hash over task type,
//! prompt, and the generation parameters that affect output. Tenant and user
//! identity are deliberately excluded — two requests producing the same
//! output are cache-equivalent regardless of who submitted them.

use crate::request::GenerationRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic hash identifying cache-equivalent requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request.
    #[must_use]
    pub fn of(request: &GenerationRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.task_type.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(request.prompt.as_bytes());
        hasher.update([0]);

        // Float parameters hash by bit pattern so equal inputs always agree.
        match request.temperature {
            Some(temp) => hasher.update(temp.to_bits().to_be_bytes()),
            None => hasher.update([0xff; 4]),
        }
        match request.max_tokens {
            Some(max) => hasher.update(max.to_be_bytes()),
            None => hasher.update([0xff; 4]),
        }
        if let Some(model) = &request.preferred_model {
            hasher.update(model.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Hex-encoded key, suitable as a cache key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;

    fn request(tenant: &str, prompt: &str) -> GenerationRequest {
        GenerationRequest::builder()
            .tenant(tenant)
            .user("user-1")
            .task_type(TaskType::Summary)
            .prompt(prompt)
            .build()
            .expect("valid request")
    }

    #[test]
    fn test_fingerprint_ignores_tenant() {
        let a = Fingerprint::of(&request("family-1", "summarize the trip"));
        let b = Fingerprint::of(&request("family-2", "summarize the trip"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_prompt() {
        let a = Fingerprint::of(&request("family-1", "summarize the trip"));
        let b = Fingerprint::of(&request("family-1", "summarize the budget"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_parameters() {
        let mut base = request("family-1", "summarize the trip");
        let a = Fingerprint::of(&base);
        base.temperature = Some(0.2);
        let b = Fingerprint::of(&base);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = Fingerprint::of(&request("family-1", "summarize the trip"));
        let b = Fingerprint::of(&request("family-1", "summarize the trip"));
        assert_eq!(a, b);
    }
}
