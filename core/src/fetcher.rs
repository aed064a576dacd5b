use async_trait::async_trait;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::address::{AddressId, BalanceKey};
use crate::balance_cache::{BalanceCache, BalanceRecord, QueryState};
use crate::errors::ProviderError;

/// Source of on-chain token balances.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn read_balance(
        &self,
        owner: &AddressId,
        token: &AddressId,
    ) -> Result<BigUint, ProviderError>;
}

/// Why a trigger did not start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ContractNotReady,
    InFlight,
    AlreadyLoaded,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractNotReady => "contract_not_ready",
            Self::InFlight => "in_flight",
            Self::AlreadyLoaded => "already_loaded",
        }
    }
}

/// Result of `ensure_fetched` / `refresh`.
#[derive(Debug)]
pub enum Trigger {
    /// A read was issued; the handle completes once the record is settled.
    Spawned(JoinHandle<()>),
    Skipped(SkipReason),
}

impl Trigger {
    pub fn is_spawned(&self) -> bool {
        matches!(self, Self::Spawned(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Spawned(_) => None,
            Self::Skipped(reason) => Some(*reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Spawned(_) => "started",
            Self::Skipped(reason) => reason.as_str(),
        }
    }

    /// Wait for the spawned fetch (if any) to write its result.
    pub async fn settled(self) {
        if let Self::Spawned(handle) = self {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Balance fetch task failed");
            }
        }
    }
}

/// Decides when a balance read is needed and issues at most one per key.
pub struct FetchOrchestrator {
    cache: Arc<BalanceCache>,
    reader: Arc<dyn BalanceReader>,
}

impl FetchOrchestrator {
    pub fn new(cache: Arc<BalanceCache>, reader: Arc<dyn BalanceReader>) -> Arc<Self> {
        Arc::new(Self { cache, reader })
    }

    pub fn cache(&self) -> &Arc<BalanceCache> {
        &self.cache
    }

    /// Read-through to the cache.
    pub async fn get(&self, owner: &AddressId, token: &AddressId) -> Option<BalanceRecord> {
        self.cache
            .get(&BalanceKey::new(owner.clone(), token.clone()))
            .await
    }

    /// Start a fetch if the contract is ready and the record is absent,
    /// `Idle` or `Error`. Safe to call on every observation cycle.
    pub async fn ensure_fetched(
        &self,
        owner: &AddressId,
        token: &AddressId,
        contract_ready: bool,
    ) -> Trigger {
        self.trigger(owner, token, contract_ready, false).await
    }

    /// Caller-initiated re-fetch. Also allowed from `Success`; the last good
    /// value stays in the record until the new read resolves.
    pub async fn refresh(
        &self,
        owner: &AddressId,
        token: &AddressId,
        contract_ready: bool,
    ) -> Trigger {
        self.trigger(owner, token, contract_ready, true).await
    }

    async fn trigger(
        &self,
        owner: &AddressId,
        token: &AddressId,
        contract_ready: bool,
        refetch_loaded: bool,
    ) -> Trigger {
        let key = BalanceKey::new(owner.clone(), token.clone());

        // Check and set RUNNING in one critical section, no await in between.
        let (decision, epoch) = self
            .cache
            .mutate(&key, |record| {
                if !contract_ready {
                    return Err(SkipReason::ContractNotReady);
                }
                match record.state() {
                    QueryState::Running => Err(SkipReason::InFlight),
                    QueryState::Success if !refetch_loaded => Err(SkipReason::AlreadyLoaded),
                    _ => {
                        record.begin();
                        Ok(())
                    }
                }
            })
            .await;

        if let Err(reason) = decision {
            tracing::trace!(key = %key, reason = reason.as_str(), "Balance fetch skipped");
            return Trigger::Skipped(reason);
        }

        tracing::info!(key = %key, "Fetching balance");
        let cache = Arc::clone(&self.cache);
        let reader = Arc::clone(&self.reader);
        let handle = tokio::spawn(async move {
            let read = {
                let key = key.clone();
                tokio::spawn(async move { reader.read_balance(&key.owner, &key.token).await })
            };
            let outcome = match read.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ProviderError::Aborted(e.to_string())),
            };

            match &outcome {
                Ok(value) => tracing::info!(key = %key, %value, "Balance fetched"),
                Err(e) => tracing::warn!(key = %key, error = %e, "Balance fetch failed"),
            }

            let applied = cache
                .mutate_in_epoch(epoch, &key, |record| {
                    if record.state() == QueryState::Running {
                        record.resolve(outcome);
                    }
                })
                .await;
            if applied.is_none() {
                tracing::debug!(key = %key, "Discarding balance from a reset session");
            }
        });

        Trigger::Spawned(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const OWNER: &str = "0x1111111111111111111111111111111111111111";
    const TOKEN: &str = "0x2222222222222222222222222222222222222222";

    /// Counts reads and holds each one until released.
    struct GatedReader {
        calls: AtomicUsize,
        gate: Notify,
        outcome: Result<BigUint, ProviderError>,
    }

    impl GatedReader {
        fn new(outcome: Result<BigUint, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceReader for GatedReader {
        async fn read_balance(
            &self,
            _owner: &AddressId,
            _token: &AddressId,
        ) -> Result<BigUint, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        }
    }

    struct InstantReader {
        calls: AtomicUsize,
        outcome: Result<BigUint, ProviderError>,
    }

    #[async_trait]
    impl BalanceReader for InstantReader {
        async fn read_balance(
            &self,
            _owner: &AddressId,
            _token: &AddressId,
        ) -> Result<BigUint, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct PanickingReader;

    #[async_trait]
    impl BalanceReader for PanickingReader {
        async fn read_balance(
            &self,
            _owner: &AddressId,
            _token: &AddressId,
        ) -> Result<BigUint, ProviderError> {
            panic!("provider blew up")
        }
    }

    fn ids() -> (AddressId, AddressId) {
        (AddressId::parse(OWNER).unwrap(), AddressId::parse(TOKEN).unwrap())
    }

    fn instant(outcome: Result<BigUint, ProviderError>) -> Arc<InstantReader> {
        Arc::new(InstantReader {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }

    #[tokio::test]
    async fn test_not_ready_is_noop() {
        let reader = instant(Ok(BigUint::from(1u32)));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        let trigger = orchestrator.ensure_fetched(&owner, &token, false).await;
        assert_eq!(trigger.skip_reason(), Some(SkipReason::ContractNotReady));
        let trigger = orchestrator.ensure_fetched(&owner, &token, false).await;
        assert_eq!(trigger.skip_reason(), Some(SkipReason::ContractNotReady));

        let record = orchestrator.get(&owner, &token).await.unwrap();
        assert_eq!(record.state(), QueryState::Idle);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_happy_path_idle_running_success() {
        let reader = GatedReader::new(Ok(BigUint::from(1_000u32)));
        let cache = BalanceCache::new();
        let mut events = cache.subscribe();
        let orchestrator = FetchOrchestrator::new(cache, reader.clone());
        let (owner, token) = ids();

        assert!(!orchestrator.ensure_fetched(&owner, &token, false).await.is_spawned());
        let trigger = orchestrator.ensure_fetched(&owner, &token, true).await;
        assert!(trigger.is_spawned());
        assert_eq!(
            orchestrator.get(&owner, &token).await.unwrap().state(),
            QueryState::Running
        );

        reader.gate.notify_one();
        trigger.settled().await;

        let record = orchestrator.get(&owner, &token).await.unwrap();
        assert_eq!(record.state(), QueryState::Success);
        assert_eq!(record.value(), Some(&BigUint::from(1_000u32)));
        assert_eq!(reader.calls(), 1);

        assert_eq!(events.recv().await.unwrap().state, QueryState::Running);
        assert_eq!(events.recv().await.unwrap().state, QueryState::Success);
    }

    #[tokio::test]
    async fn test_failure_path_records_error() {
        let reader = instant(Err(ProviderError::Http(503)));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        orchestrator.ensure_fetched(&owner, &token, true).await.settled().await;

        let record = orchestrator.get(&owner, &token).await.unwrap();
        assert_eq!(record.state(), QueryState::Error);
        assert_eq!(record.value(), None);
        assert_eq!(record.last_error(), Some(&ProviderError::Http(503)));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_issue_one_read() {
        let reader = GatedReader::new(Ok(BigUint::from(5u32)));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        let first = orchestrator.ensure_fetched(&owner, &token, true).await;
        let second = orchestrator.ensure_fetched(&owner, &token, true).await;
        let refresh = orchestrator.refresh(&owner, &token, true).await;
        assert!(first.is_spawned());
        assert_eq!(second.skip_reason(), Some(SkipReason::InFlight));
        assert_eq!(refresh.skip_reason(), Some(SkipReason::InFlight));

        reader.gate.notify_one();
        first.settled().await;
        assert_eq!(reader.calls(), 1);
    }

    #[tokio::test]
    async fn test_parallel_callers_dedup() {
        let reader = GatedReader::new(Ok(BigUint::from(5u32)));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let orchestrator = Arc::clone(&orchestrator);
            let (owner, token) = (owner.clone(), token.clone());
            tasks.push(tokio::spawn(async move {
                orchestrator.ensure_fetched(&owner, &token, true).await
            }));
        }
        let mut spawned = Vec::new();
        for task in tasks {
            let trigger = task.await.unwrap();
            if trigger.is_spawned() {
                spawned.push(trigger);
            }
        }
        assert_eq!(spawned.len(), 1);

        reader.gate.notify_one();
        for trigger in spawned {
            trigger.settled().await;
        }
        assert_eq!(reader.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_is_not_refetched() {
        let reader = instant(Ok(BigUint::from(8u32)));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        orchestrator.ensure_fetched(&owner, &token, true).await.settled().await;
        let before = orchestrator.get(&owner, &token).await.unwrap();

        let again = orchestrator.ensure_fetched(&owner, &token, true).await;
        assert_eq!(again.skip_reason(), Some(SkipReason::AlreadyLoaded));
        assert_eq!(orchestrator.get(&owner, &token).await.unwrap(), before);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_can_be_retriggered() {
        let reader = instant(Err(ProviderError::Timeout));
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), reader.clone());
        let (owner, token) = ids();

        orchestrator.ensure_fetched(&owner, &token, true).await.settled().await;
        let retry = orchestrator.ensure_fetched(&owner, &token, true).await;
        assert!(retry.is_spawned());
        retry.settled().await;
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_last_value_until_resolved() {
        let cache = BalanceCache::new();
        let (owner, token) = ids();
        let key = BalanceKey::new(owner.clone(), token.clone());
        cache.upsert(key.clone(), BalanceRecord::loaded(BigUint::from(3u32))).await.unwrap();

        let reader = GatedReader::new(Err(ProviderError::Timeout));
        let orchestrator = FetchOrchestrator::new(Arc::clone(&cache), reader.clone());

        let trigger = orchestrator.refresh(&owner, &token, true).await;
        assert!(trigger.is_spawned());
        let running = cache.get(&key).await.unwrap();
        assert_eq!(running.state(), QueryState::Running);
        assert_eq!(running.last_known_value(), Some(&BigUint::from(3u32)));

        reader.gate.notify_one();
        trigger.settled().await;
        let failed = cache.get(&key).await.unwrap();
        assert_eq!(failed.state(), QueryState::Error);
        assert_eq!(failed.value(), None);
        assert_eq!(failed.last_known_value(), Some(&BigUint::from(3u32)));
    }

    #[tokio::test]
    async fn test_seed_during_fetch_does_not_start_second_read() {
        let reader = GatedReader::new(Ok(BigUint::from(4u32)));
        let cache = BalanceCache::new();
        let orchestrator = FetchOrchestrator::new(Arc::clone(&cache), reader.clone());
        let (owner, token) = ids();
        let key = BalanceKey::new(owner.clone(), token.clone());

        let trigger = orchestrator.ensure_fetched(&owner, &token, true).await;
        assert!(trigger.is_spawned());

        let seeded = cache.upsert(key.clone(), BalanceRecord::loaded(BigUint::from(5u32))).await;
        assert!(seeded.is_err());
        assert_eq!(cache.get(&key).await.unwrap().state(), QueryState::Running);

        let again = orchestrator.refresh(&owner, &token, true).await;
        assert_eq!(again.skip_reason(), Some(SkipReason::InFlight));

        reader.gate.notify_one();
        trigger.settled().await;
        assert_eq!(reader.calls(), 1);
        assert_eq!(cache.get(&key).await.unwrap().value(), Some(&BigUint::from(4u32)));
    }

    #[tokio::test]
    async fn test_panicking_reader_resolves_to_error() {
        let orchestrator = FetchOrchestrator::new(BalanceCache::new(), Arc::new(PanickingReader));
        let (owner, token) = ids();

        orchestrator.ensure_fetched(&owner, &token, true).await.settled().await;
        let record = orchestrator.get(&owner, &token).await.unwrap();
        assert_eq!(record.state(), QueryState::Error);
        assert!(matches!(record.last_error(), Some(ProviderError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_reset_during_fetch_discards_result() {
        let reader = GatedReader::new(Ok(BigUint::from(4u32)));
        let cache = BalanceCache::new();
        let orchestrator = FetchOrchestrator::new(Arc::clone(&cache), reader.clone());
        let (owner, token) = ids();

        let trigger = orchestrator.ensure_fetched(&owner, &token, true).await;
        cache.reset().await;
        reader.gate.notify_one();
        trigger.settled().await;

        assert!(orchestrator.get(&owner, &token).await.is_none());
    }
}
