use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::address::AddressId;

/// Metadata reported by an ERC20 contract, plus whether a callable contract
/// instance is available yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenContractInfo {
    #[schema(example = "USD Coin")]
    pub name: String,
    #[schema(example = "USDC")]
    pub symbol: String,
    /// ERC20 `decimals()` is a `uint8`.
    #[schema(example = 6)]
    pub decimals: u8,
    #[serde(default)]
    pub contract_ready: bool,
}

/// Loaded token contracts, keyed by token address.
///
/// Unbounded and without expiry: contract metadata does not change and the
/// registry lives as long as the session.
pub struct TokenRegistry {
    inner: Cache<AddressId, TokenContractInfo>,
}

impl TokenRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Cache::builder().build(),
        })
    }

    pub async fn register(&self, token: AddressId, info: TokenContractInfo) {
        tracing::info!(
            token = %token,
            symbol = %info.symbol,
            decimals = info.decimals,
            ready = info.contract_ready,
            "Token contract registered"
        );
        self.inner.insert(token, info).await;
    }

    pub async fn get(&self, token: &AddressId) -> Option<TokenContractInfo> {
        self.inner.get(token).await
    }

    /// Flag the contract instance as available. Returns `false` when the
    /// token was never registered.
    pub async fn mark_ready(&self, token: &AddressId) -> bool {
        match self.inner.get(token).await {
            Some(mut info) => {
                info.contract_ready = true;
                self.inner.insert(token.clone(), info).await;
                true
            }
            None => false,
        }
    }

    pub async fn is_ready(&self, token: &AddressId) -> bool {
        self.get(token)
            .await
            .map(|info| info.contract_ready)
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}
