//! Scope ledgers and the reservation protocol.
//!
//! Budget checks walk the scope chain user → tenant → global. A reservation
//! is all-or-nothing: if any scope would exceed its limit, nothing is
//! deducted and the exhausted scope is reported. Per-scope locks are always
//! acquired in chain order, and period rollover happens under the same lock
//! as deductions, so a rollover can never lose a concurrent write.

use crate::store::BudgetStore;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use dashmap::DashMap;
use orchestrator_config::{BudgetPeriod, BudgetSettings, ScopeLimit};
use orchestrator_core::{
    GatewayError, GatewayResult, ReservationId, ScopeKind, TenantId, UsageRecord, UserId,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies one budget scope (level + id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    /// Scope level.
    pub kind: ScopeKind,
    /// Scope identifier ("*" for the global scope).
    pub id: String,
}

impl ScopeKey {
    /// The deployment-wide scope.
    #[must_use]
    pub fn global() -> Self {
        Self {
            kind: ScopeKind::Global,
            id: "*".to_string(),
        }
    }

    /// A tenant scope.
    #[must_use]
    pub fn tenant(tenant_id: &TenantId) -> Self {
        Self {
            kind: ScopeKind::Tenant,
            id: tenant_id.as_str().to_string(),
        }
    }

    /// A user scope.
    #[must_use]
    pub fn user(user_id: &UserId) -> Self {
        Self {
            kind: ScopeKind::User,
            id: user_id.as_str().to_string(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Mutable per-scope ledger state.
#[derive(Debug, Clone)]
pub struct ScopeState {
    /// Spending limit for the active period (USD).
    pub limit: f64,
    /// Period granularity.
    pub period: BudgetPeriod,
    /// Amount consumed in the active period (USD).
    pub consumed: f64,
    /// Start of the period the `consumed` figure belongs to.
    pub last_reset: DateTime<Utc>,
}

impl ScopeState {
    fn new(limit: &ScopeLimit, now: DateTime<Utc>) -> Self {
        Self {
            limit: limit.limit_usd,
            period: limit.period,
            consumed: 0.0,
            last_reset: period_start(now, limit.period),
        }
    }

    /// Reset `consumed` if a period boundary has passed. Runs under the
    /// scope lock, mutually exclusive with deductions.
    fn rollover_if_due(&mut self, now: DateTime<Utc>) {
        let current_start = period_start(now, self.period);
        if self.last_reset < current_start {
            debug!(
                previous_consumed = self.consumed,
                "budget period rolled over"
            );
            self.consumed = 0.0;
            self.last_reset = current_start;
        }
    }
}

/// Start of the active period for `now`.
fn period_start(now: DateTime<Utc>, period: BudgetPeriod) -> DateTime<Utc> {
    match period {
        BudgetPeriod::Daily => Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now),
        BudgetPeriod::Monthly => Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now),
    }
}

/// A provisional hold on the scope chain, later committed or released.
#[derive(Debug, Clone)]
struct Reservation {
    scopes: Vec<ScopeKey>,
    estimated: f64,
}

/// Point-in-time consumption snapshot for one scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeConsumption {
    /// Scope level.
    pub scope: ScopeKind,
    /// Scope identifier.
    pub id: String,
    /// Configured limit (USD).
    pub limit_usd: f64,
    /// Consumed in the active period (USD).
    pub consumed_usd: f64,
}

/// Tracks cumulative spend per scope and enforces limits before execution.
pub struct BudgetManager {
    scopes: DashMap<ScopeKey, Arc<Mutex<ScopeState>>>,
    reservations: DashMap<ReservationId, Reservation>,
    settings: BudgetSettings,
    store: Arc<dyn BudgetStore>,
}

impl BudgetManager {
    /// Create a manager over the given settings and store.
    #[must_use]
    pub fn new(settings: BudgetSettings, store: Arc<dyn BudgetStore>) -> Self {
        Self {
            scopes: DashMap::new(),
            reservations: DashMap::new(),
            settings,
            store,
        }
    }

    /// Restore persisted scope states. Call once at startup.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be read.
    pub async fn restore(&self) -> GatewayResult<()> {
        let restored = self.store.load_scopes().await?;
        let count = restored.len();
        for (key, state) in restored {
            self.scopes.insert(key, Arc::new(Mutex::new(state)));
        }
        if count > 0 {
            info!(scopes = count, "restored budget ledger from storage");
        }
        Ok(())
    }

    /// Reserve an estimated cost against the scope chain user → tenant →
    /// global. All-or-nothing: a denial leaves every scope untouched.
    ///
    /// # Errors
    /// Returns `BudgetExceeded` naming the exhausted scope.
    pub async fn reserve(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        estimated: f64,
    ) -> GatewayResult<ReservationId> {
        let chain = vec![
            ScopeKey::user(user_id),
            ScopeKey::tenant(tenant_id),
            ScopeKey::global(),
        ];
        let now = Utc::now();

        let handles: Vec<Arc<Mutex<ScopeState>>> = chain
            .iter()
            .map(|key| self.scope_handle(key, now))
            .collect();

        let snapshots = {
            // Guards acquired in chain order; dropped before any await.
            let mut guards: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();

            for (guard, key) in guards.iter_mut().zip(&chain) {
                guard.rollover_if_due(now);
                if guard.consumed + estimated > guard.limit {
                    warn!(
                        scope = %key,
                        consumed = guard.consumed,
                        limit = guard.limit,
                        requested = estimated,
                        "budget reservation denied"
                    );
                    return Err(GatewayError::BudgetExceeded {
                        scope: key.kind,
                        scope_id: key.id.clone(),
                        limit: guard.limit,
                        consumed: guard.consumed,
                        requested: estimated,
                    });
                }
            }

            for guard in &mut guards {
                guard.consumed += estimated;
            }

            guards
                .iter()
                .map(|guard| (**guard).clone())
                .collect::<Vec<_>>()
        };

        let reservation_id = ReservationId::generate();
        self.reservations.insert(
            reservation_id.clone(),
            Reservation {
                scopes: chain.clone(),
                estimated,
            },
        );

        self.persist(&chain, &snapshots).await;

        debug!(reservation = %reservation_id, estimated, "budget reserved");
        Ok(reservation_id)
    }

    /// Commit a reservation with the actual cost, adjusting each scope by
    /// the delta between actual and estimated. Never pushes a scope below
    /// zero.
    ///
    /// # Errors
    /// Returns an internal error for an unknown reservation.
    pub async fn commit(&self, reservation_id: &ReservationId, actual: f64) -> GatewayResult<()> {
        let (_, reservation) = self.reservations.remove(reservation_id).ok_or_else(|| {
            GatewayError::internal(format!("unknown reservation '{reservation_id}'"))
        })?;

        let delta = actual - reservation.estimated;
        self.adjust(&reservation.scopes, delta).await;

        debug!(
            reservation = %reservation_id,
            estimated = reservation.estimated,
            actual,
            "budget committed"
        );
        Ok(())
    }

    /// Release a reservation in full, restoring each scope to its
    /// pre-reservation consumption.
    ///
    /// # Errors
    /// Returns an internal error for an unknown reservation.
    pub async fn release(&self, reservation_id: &ReservationId) -> GatewayResult<()> {
        let (_, reservation) = self.reservations.remove(reservation_id).ok_or_else(|| {
            GatewayError::internal(format!("unknown reservation '{reservation_id}'"))
        })?;

        self.adjust(&reservation.scopes, -reservation.estimated)
            .await;

        debug!(reservation = %reservation_id, "budget reservation released");
        Ok(())
    }

    /// Append a usage record to the audit log.
    ///
    /// # Errors
    /// Returns a storage error if the append fails.
    pub async fn record_usage(&self, record: &UsageRecord) -> GatewayResult<()> {
        self.store.append_usage(record).await
    }

    /// Snapshot every known scope's consumption.
    #[must_use]
    pub fn consumption(&self) -> Vec<ScopeConsumption> {
        let mut snapshot: Vec<ScopeConsumption> = self
            .scopes
            .iter()
            .map(|entry| {
                let state = entry.value().lock();
                ScopeConsumption {
                    scope: entry.key().kind,
                    id: entry.key().id.clone(),
                    limit_usd: state.limit,
                    consumed_usd: state.consumed,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| (a.scope, &a.id).cmp(&(b.scope, &b.id)));
        snapshot
    }

    /// Current consumption for one scope, if it has been touched.
    #[must_use]
    pub fn consumed(&self, key: &ScopeKey) -> Option<f64> {
        self.scopes.get(key).map(|entry| entry.lock().consumed)
    }

    fn scope_handle(&self, key: &ScopeKey, now: DateTime<Utc>) -> Arc<Mutex<ScopeState>> {
        self.scopes
            .entry(key.clone())
            .or_insert_with(|| {
                let limit = self.limit_for(key);
                Arc::new(Mutex::new(ScopeState::new(&limit, now)))
            })
            .clone()
    }

    fn limit_for(&self, key: &ScopeKey) -> ScopeLimit {
        if let Some(over) = self
            .settings
            .overrides
            .iter()
            .find(|over| over.scope == key.kind && over.id == key.id)
        {
            return ScopeLimit {
                limit_usd: over.limit_usd,
                period: over.period,
            };
        }
        match key.kind {
            ScopeKind::User => self.settings.user_default.clone(),
            ScopeKind::Tenant => self.settings.tenant_default.clone(),
            ScopeKind::Global => self.settings.global.clone(),
        }
    }

    async fn adjust(&self, chain: &[ScopeKey], delta: f64) {
        let now = Utc::now();
        let handles: Vec<Arc<Mutex<ScopeState>>> = chain
            .iter()
            .map(|key| self.scope_handle(key, now))
            .collect();

        let snapshots = {
            let mut guards: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();
            for guard in &mut guards {
                guard.rollover_if_due(now);
                guard.consumed = (guard.consumed + delta).max(0.0);
            }
            guards
                .iter()
                .map(|guard| (**guard).clone())
                .collect::<Vec<_>>()
        };

        self.persist(chain, &snapshots).await;
    }

    async fn persist(&self, chain: &[ScopeKey], snapshots: &[ScopeState]) {
        for (key, state) in chain.iter().zip(snapshots) {
            if let Err(error) = self.store.save_scope(key, state).await {
                // The in-memory ledger stays authoritative; surface and move on.
                warn!(scope = %key, error = %error, "failed to persist scope snapshot");
            }
        }
    }
}
