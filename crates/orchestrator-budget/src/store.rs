//! Durable storage for ledger snapshots and the usage log.
//!
//! The ledger itself lives in memory; the store is a write-through snapshot
//! so consumption survives process restarts, plus the append-only usage log
//! used for reconciliation and analytics.

use crate::ledger::{ScopeKey, ScopeState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_config::BudgetPeriod;
use orchestrator_core::{GatewayError, GatewayResult, ScopeKind, UsageRecord};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// Storage backend for budget state and usage records.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Load every persisted scope snapshot.
    async fn load_scopes(&self) -> GatewayResult<Vec<(ScopeKey, ScopeState)>>;

    /// Upsert one scope snapshot.
    async fn save_scope(&self, key: &ScopeKey, state: &ScopeState) -> GatewayResult<()>;

    /// Append one usage record. Records are never updated or deleted.
    async fn append_usage(&self, record: &UsageRecord) -> GatewayResult<()>;
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    scopes: Mutex<Vec<(ScopeKey, ScopeState)>>,
    usage: Mutex<Vec<UsageRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All usage records appended so far.
    #[must_use]
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.lock().clone()
    }
}

#[async_trait]
impl BudgetStore for MemoryStore {
    async fn load_scopes(&self) -> GatewayResult<Vec<(ScopeKey, ScopeState)>> {
        Ok(self.scopes.lock().clone())
    }

    async fn save_scope(&self, key: &ScopeKey, state: &ScopeState) -> GatewayResult<()> {
        let mut scopes = self.scopes.lock();
        if let Some(slot) = scopes.iter_mut().find(|(existing, _)| existing == key) {
            slot.1 = state.clone();
        } else {
            scopes.push((key.clone(), state.clone()));
        }
        Ok(())
    }

    async fn append_usage(&self, record: &UsageRecord) -> GatewayResult<()> {
        self.usage.lock().push(record.clone());
        Ok(())
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    ///
    /// # Errors
    /// Returns a storage error if the database cannot be opened.
    pub async fn open(path: &str) -> GatewayResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| GatewayError::storage(format!("invalid sqlite path '{path}': {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to open '{path}': {e}")))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(path, "budget store opened");
        Ok(store)
    }

    async fn ensure_schema(&self) -> GatewayResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS budget_scopes (
                scope_kind TEXT NOT NULL,
                scope_id   TEXT NOT NULL,
                limit_usd  REAL NOT NULL,
                period     TEXT NOT NULL,
                consumed   REAL NOT NULL,
                last_reset TEXT NOT NULL,
                PRIMARY KEY (scope_kind, scope_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage_records (
                id          TEXT PRIMARY KEY,
                request_id  TEXT NOT NULL,
                provider_id TEXT,
                units       INTEGER NOT NULL,
                cost_usd    REAL NOT NULL,
                estimated   INTEGER NOT NULL,
                outcome     TEXT NOT NULL,
                reason      TEXT,
                timestamp   TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

fn storage_error(error: sqlx::Error) -> GatewayError {
    GatewayError::storage(error.to_string())
}

fn scope_kind_from_str(value: &str) -> GatewayResult<ScopeKind> {
    match value {
        "user" => Ok(ScopeKind::User),
        "tenant" => Ok(ScopeKind::Tenant),
        "global" => Ok(ScopeKind::Global),
        other => Err(GatewayError::storage(format!(
            "unknown scope kind '{other}' in budget store"
        ))),
    }
}

fn period_from_str(value: &str) -> GatewayResult<BudgetPeriod> {
    match value {
        "daily" => Ok(BudgetPeriod::Daily),
        "monthly" => Ok(BudgetPeriod::Monthly),
        other => Err(GatewayError::storage(format!(
            "unknown budget period '{other}' in budget store"
        ))),
    }
}

fn period_to_str(period: BudgetPeriod) -> &'static str {
    match period {
        BudgetPeriod::Daily => "daily",
        BudgetPeriod::Monthly => "monthly",
    }
}

#[async_trait]
impl BudgetStore for SqliteStore {
    async fn load_scopes(&self) -> GatewayResult<Vec<(ScopeKey, ScopeState)>> {
        let rows = sqlx::query(
            "SELECT scope_kind, scope_id, limit_usd, period, consumed, last_reset
             FROM budget_scopes",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut scopes = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("scope_kind").map_err(storage_error)?;
            let id: String = row.try_get("scope_id").map_err(storage_error)?;
            let limit: f64 = row.try_get("limit_usd").map_err(storage_error)?;
            let period: String = row.try_get("period").map_err(storage_error)?;
            let consumed: f64 = row.try_get("consumed").map_err(storage_error)?;
            let last_reset: String = row.try_get("last_reset").map_err(storage_error)?;

            let last_reset = DateTime::parse_from_rfc3339(&last_reset)
                .map_err(|e| GatewayError::storage(format!("bad last_reset: {e}")))?
                .with_timezone(&Utc);

            scopes.push((
                ScopeKey {
                    kind: scope_kind_from_str(&kind)?,
                    id,
                },
                ScopeState {
                    limit,
                    period: period_from_str(&period)?,
                    consumed,
                    last_reset,
                },
            ));
        }
        Ok(scopes)
    }

    async fn save_scope(&self, key: &ScopeKey, state: &ScopeState) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO budget_scopes
                (scope_kind, scope_id, limit_usd, period, consumed, last_reset)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (scope_kind, scope_id) DO UPDATE SET
                limit_usd = excluded.limit_usd,
                period = excluded.period,
                consumed = excluded.consumed,
                last_reset = excluded.last_reset",
        )
        .bind(key.kind.to_string())
        .bind(&key.id)
        .bind(state.limit)
        .bind(period_to_str(state.period))
        .bind(state.consumed)
        .bind(state.last_reset.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn append_usage(&self, record: &UsageRecord) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO usage_records
                (id, request_id, provider_id, units, cost_usd, estimated, outcome, reason, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.request_id.as_str())
        .bind(record.provider_id.as_ref().map(|p| p.as_str().to_string()))
        .bind(i64::from(record.units))
        .bind(record.cost_usd)
        .bind(i64::from(record.estimated))
        .bind(record.outcome.as_str())
        .bind(record.reason.as_deref())
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}
