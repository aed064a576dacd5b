//! Owner token balances for an ERC20 allowance listing.
//!
//! The interesting part is the cache: one record per `(owner, token)` pair,
//! a query-state machine, and an orchestrator that issues at most one
//! balance read per pair at a time.

pub mod address;
pub mod api;
pub mod balance_cache;
pub mod chain_reader;
pub mod errors;
pub mod fetcher;
pub mod formatter;
pub mod rpc_provider;
pub mod settings;
pub mod tokens;
pub mod view;

pub use address::{make_key, AddressId, AllowanceId, BalanceKey};
pub use balance_cache::{BalanceCache, BalanceEvent, BalanceRecord, QueryState};
pub use errors::{InvalidKeyError, ProviderError};
pub use fetcher::{BalanceReader, FetchOrchestrator, SkipReason, Trigger};
pub use formatter::{format_precise, format_units, parse_units};
pub use tokens::{TokenContractInfo, TokenRegistry};
