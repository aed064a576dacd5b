use num_bigint::BigUint;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::address::BalanceKey;
use crate::errors::{FetchInFlight, ProviderError};

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

// ── Records ───────────────────────────────────────────────────────────────────

/// Lifecycle of a cached balance fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Cached balance for one `(owner, token)` pair.
///
/// `value()` is `Some` exactly when the state is `Success`. The last good
/// value is kept across a re-fetch so it is only replaced by the next
/// successful read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BalanceRecord {
    state: QueryState,
    last_value: Option<BigUint>,
    last_error: Option<ProviderError>,
}

impl BalanceRecord {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn loaded(value: BigUint) -> Self {
        Self {
            state: QueryState::Success,
            last_value: Some(value),
            last_error: None,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn value(&self) -> Option<&BigUint> {
        match self.state {
            QueryState::Success => self.last_value.as_ref(),
            _ => None,
        }
    }

    /// Last successfully read value, regardless of the current state.
    pub fn last_known_value(&self) -> Option<&BigUint> {
        self.last_value.as_ref()
    }

    pub fn last_error(&self) -> Option<&ProviderError> {
        match self.state {
            QueryState::Error => self.last_error.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn begin(&mut self) {
        self.state = QueryState::Running;
        self.last_error = None;
    }

    pub(crate) fn resolve(&mut self, outcome: Result<BigUint, ProviderError>) {
        match outcome {
            Ok(value) => {
                self.state = QueryState::Success;
                self.last_value = Some(value);
                self.last_error = None;
            }
            Err(err) => {
                self.state = QueryState::Error;
                self.last_error = Some(err);
            }
        }
    }
}

/// Published whenever a record changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEvent {
    pub key: BalanceKey,
    pub state: QueryState,
}

/// Identifies a cache session. `reset` starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
    records: HashMap<BalanceKey, BalanceRecord>,
    epoch: u64,
}

/// Process-wide balance cache shared by every observer.
///
/// Built once per session. Entries are never evicted; `reset` clears
/// everything on logout/disconnect. All writes go through the write lock, so
/// a reader never sees a half-written record.
pub struct BalanceCache {
    inner: RwLock<CacheState>,
    events: broadcast::Sender<BalanceEvent>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BalanceCache {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: RwLock::new(CacheState::default()),
            events,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub async fn get(&self, key: &BalanceKey) -> Option<BalanceRecord> {
        let value = self.inner.read().await.records.get(key).cloned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache.key = %key, "Cache HIT");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache.key = %key, "Cache MISS");
        }
        value
    }

    /// Store `record` for `key`. Refused while the current record is
    /// `Running`: only the in-flight fetch may settle it.
    pub async fn upsert(&self, key: BalanceKey, record: BalanceRecord) -> Result<(), FetchInFlight> {
        let mut guard = self.inner.write().await;
        let previous = guard.records.get(&key);
        if previous.map(BalanceRecord::state) == Some(QueryState::Running) {
            return Err(FetchInFlight {
                key: key.to_string(),
            });
        }
        let changed = previous != Some(&record);
        let state = record.state();
        guard.records.insert(key.clone(), record);
        drop(guard);

        // A new value in the same state still has to reach subscribers.
        if changed {
            self.publish(key, state);
        }
        Ok(())
    }

    /// Run `f` on the record for `key` under the write lock, creating an
    /// `Idle` record the first time the key is seen. Nothing else can touch
    /// the record between the read and the write inside `f`.
    pub async fn mutate<F, R>(&self, key: &BalanceKey, f: F) -> (R, Epoch)
    where
        F: FnOnce(&mut BalanceRecord) -> R,
    {
        let mut guard = self.inner.write().await;
        let epoch = Epoch(guard.epoch);
        let record = guard.records.entry(key.clone()).or_default();
        let before = record.state();
        let result = f(record);
        let after = record.state();
        drop(guard);

        if before != after {
            self.publish(key.clone(), after);
        }
        (result, epoch)
    }

    /// Like `mutate`, but only when `epoch` is still current. Returns `None`
    /// for writes belonging to a session that has since been reset.
    pub async fn mutate_in_epoch<F, R>(&self, epoch: Epoch, key: &BalanceKey, f: F) -> Option<R>
    where
        F: FnOnce(&mut BalanceRecord) -> R,
    {
        let mut guard = self.inner.write().await;
        if Epoch(guard.epoch) != epoch {
            return None;
        }
        let record = guard.records.entry(key.clone()).or_default();
        let before = record.state();
        let result = f(record);
        let after = record.state();
        drop(guard);

        if before != after {
            self.publish(key.clone(), after);
        }
        Some(result)
    }

    /// Drop every record and start a new epoch.
    pub async fn reset(&self) {
        let mut guard = self.inner.write().await;
        let cleared = guard.records.len();
        guard.records.clear();
        guard.epoch += 1;
        tracing::info!(cleared, epoch = guard.epoch, "Balance cache reset");
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceEvent> {
        self.events.subscribe()
    }

    fn publish(&self, key: BalanceKey, state: QueryState) {
        tracing::debug!(cache.key = %key, %state, "Balance record changed");
        // No receivers is fine; observers may poll instead.
        let _ = self.events.send(BalanceEvent { key, state });
    }

    pub fn log_stats(&self) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate_pct = if total > 0 { hits * 100 / total } else { 0 };
        tracing::info!(
            cache.hits = hits,
            cache.misses = misses,
            cache.total = total,
            cache.hit_rate_pct = hit_rate_pct,
            "Balance cache statistics"
        );
    }

    pub fn spawn_stats_logger(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.log_stats();
            }
        })
    }
}

#[cfg(test)]
impl BalanceCache {
    fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
    fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
