use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::address::AddressId;
use crate::errors::ProviderError;
use crate::fetcher::BalanceReader;
use crate::rpc_provider::{ProviderRegistry, RpcProvider};

/// `keccak256("balanceOf(address)")[..4]`
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Serialize)]
struct EthCallRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallObject, &'static str),
}

#[derive(Debug, Serialize)]
struct CallObject {
    to: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct EthCallResponse {
    #[serde(flatten)]
    result: ResponseResult,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseResult {
    Success { result: String },
    Error { error: RpcError },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Reads ERC20 balances with a single `eth_call` against the preferred
/// healthy provider. No failover within one read.
pub struct RpcBalanceReader {
    registry: Arc<ProviderRegistry>,
    request_timeout: Duration,
}

impl RpcBalanceReader {
    pub fn new(registry: Arc<ProviderRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    async fn call(
        &self,
        provider: &RpcProvider,
        request: &EthCallRequest,
    ) -> Result<BigUint, ProviderError> {
        let req = provider.authorize(self.registry.client().post(&provider.url).json(request));

        let response = tokio::time::timeout(self.request_timeout, req.send())
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(response.status().as_u16()));
        }

        let body: EthCallResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        match body.result {
            ResponseResult::Success { result } => decode_uint256(&result),
            ResponseResult::Error { error } => Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
            }),
        }
    }
}

#[async_trait]
impl BalanceReader for RpcBalanceReader {
    async fn read_balance(
        &self,
        owner: &AddressId,
        token: &AddressId,
    ) -> Result<BigUint, ProviderError> {
        let provider = self
            .registry
            .preferred()
            .await
            .ok_or(ProviderError::NoHealthyProvider)?;
        let request = balance_of_request(owner, token);

        tracing::debug!(
            provider = %provider.name,
            owner = %owner,
            token = %token,
            "Sending eth_call balanceOf"
        );

        let outcome = self.call(&provider, &request).await;
        match &outcome {
            Ok(_) => self.registry.report_success(&provider.url).await,
            Err(ProviderError::Rpc { .. }) | Err(ProviderError::MalformedResponse(_)) => {
                // The endpoint answered; the call itself was bad.
            }
            Err(ProviderError::Http(status)) if !ProviderRegistry::is_provider_fault(*status) => {}
            Err(e) => {
                tracing::warn!(provider = %provider.name, error = %e, "balanceOf call failed");
                self.registry.report_failure(&provider.url).await;
            }
        }
        outcome
    }
}

fn balance_of_request(owner: &AddressId, token: &AddressId) -> EthCallRequest {
    EthCallRequest {
        jsonrpc: "2.0",
        id: 1,
        method: "eth_call",
        params: (
            CallObject {
                to: token.to_string(),
                data: balance_of_calldata(owner),
            },
            "latest",
        ),
    }
}

fn balance_of_calldata(owner: &AddressId) -> String {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&owner.to_bytes());
    format!("0x{}{}", BALANCE_OF_SELECTOR, hex::encode(word))
}

/// Decode an ABI `uint256` return value.
fn decode_uint256(raw: &str) -> Result<BigUint, ProviderError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::MalformedResponse(format!("not hex: {raw:?}")))?;
    // "0x" comes back when the address has no code.
    if digits.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "empty return data, is the token a contract?".to_string(),
        ));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(ProviderError::MalformedResponse(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}
