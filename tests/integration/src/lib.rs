//! Integration tests for the LLM Orchestration Gateway.
//!
//! Covers the full engine pipeline against scripted in-process providers:
//! caching, budget enforcement, candidate fallback, circuit breaking, and
//! the HTTP surface, plus adapter tests against a wiremock upstream.

pub mod helpers;
pub mod mock_providers;

pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod provider_tests;
