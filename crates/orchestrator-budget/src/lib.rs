//! # Orchestrator Budget
//!
//! Per-tenant budget enforcement for the LLM Orchestration Gateway.
//!
//! Spending is tracked per scope (user, tenant, global) and checked with a
//! reserve/commit/release protocol: a forecasted cost is held before
//! dispatch, reconciled against the actual cost on success, and returned in
//! full when no provider could be reached. Scope snapshots and the
//! append-only usage log are persisted through a pluggable store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ledger;
pub mod store;

pub use ledger::{BudgetManager, ScopeConsumption, ScopeKey, ScopeState};
pub use store::{BudgetStore, MemoryStore, SqliteStore};
