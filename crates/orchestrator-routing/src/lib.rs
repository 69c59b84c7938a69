//! # Orchestrator Routing
//!
//! Cost-aware provider selection for the LLM Orchestration Gateway.
//!
//! The router owns long-lived provider profiles (traffic weight, rolling
//! cost and latency averages) and produces the ordered candidate list the
//! engine walks on each request. Circuit health is read from the breaker
//! registry; it is never mutated here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod profile;
pub mod router;

pub use profile::{ProfileSnapshot, ProviderProfile};
pub use router::{Candidate, Router, RouterConfig};
