//! # Orchestrator Core
//!
//! Core types, traits, and error handling for the LLM Orchestration Gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Generation request and response types
//! - The provider capability trait
//! - Error taxonomy shared by every component
//! - Validated domain types (newtypes)
//! - Request fingerprinting for the response cache

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fingerprint;
pub mod provider;
pub mod request;
pub mod response;
pub mod types;
pub mod usage;

// Re-export commonly used types
pub use error::{AttemptFailure, GatewayError, GatewayResult};
pub use fingerprint::Fingerprint;
pub use provider::{
    approximate_tokens, estimated_units, ChunkStream, CostEstimate, ModelProvider, ProfileSeed,
    ProviderResponse, StreamChunk, DEFAULT_OUTPUT_TOKENS,
};
pub use request::{GenerationRequest, GenerationRequestBuilder};
pub use response::{GenerationResponse, UsageUnits};
pub use types::{
    ProviderId, RequestId, ReservationId, ScopeKind, TaskType, TenantId, UserId,
};
pub use usage::{UsageOutcome, UsageRecord};
