//! # Orchestrator Telemetry
//!
//! Observability for the LLM Orchestration Gateway: structured logging via
//! `tracing` and a Prometheus metrics registry.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use metrics::{Metrics, MetricsError};
