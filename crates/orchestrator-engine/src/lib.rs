//! # Orchestrator Engine
//!
//! The request execution pipeline for the LLM Orchestration Gateway.
//!
//! [`Gateway::execute`] is the entry point the HTTP surface calls: it
//! validates the request, consults the response cache, reserves budget,
//! asks the routing engine for candidates, walks them through their circuit
//! breakers, and settles cost and usage records for every terminal outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gateway;

pub use gateway::{EngineConfig, Gateway, GatewayBuilder, StreamHandle};
