//! What the allowance list shows for one token: a headline with the owner's
//! balance and the allowance rows. Everything here is a pure function of the
//! cached state except `observe_token_allowances`, which also kicks the
//! fetch.

use serde::Serialize;

use crate::address::{AddressId, AllowanceId};
use crate::balance_cache::{BalanceRecord, QueryState};
use crate::fetcher::FetchOrchestrator;
use crate::formatter::format_units;
use crate::tokens::{TokenContractInfo, TokenRegistry};

pub const UNNAMED_TOKEN: &str = "Unnamed ERC20";
pub const LOADING: &str = "loading...";
pub const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceDisplay {
    Loading,
    Amount(String),
    Unavailable(String),
}

pub fn balance_display(
    record: Option<&BalanceRecord>,
    decimals: u8,
    round_to: u32,
) -> BalanceDisplay {
    let Some(record) = record else {
        return BalanceDisplay::Loading;
    };
    match (record.state(), record.value(), record.last_error()) {
        (QueryState::Success, Some(value), _) => {
            BalanceDisplay::Amount(format_units(value, decimals, round_to))
        }
        (QueryState::Error, _, Some(err)) => BalanceDisplay::Unavailable(err.to_string()),
        (QueryState::Error, _, None) => BalanceDisplay::Unavailable(String::new()),
        _ => BalanceDisplay::Loading,
    }
}

pub fn display_name(info: &TokenContractInfo) -> &str {
    if info.name.is_empty() {
        UNNAMED_TOKEN
    } else {
        &info.name
    }
}

/// `"<name> (current balance: <amount> <symbol>)"`, with `loading...` or
/// `unavailable` in place of the amount while no value is known.
pub fn token_headline(
    info: &TokenContractInfo,
    record: Option<&BalanceRecord>,
    round_to: u32,
) -> String {
    let name = display_name(info);
    match balance_display(record, info.decimals, round_to) {
        BalanceDisplay::Amount(amount) => {
            format!("{name} (current balance: {amount} {})", info.symbol)
        }
        BalanceDisplay::Loading => format!("{name} (current balance: {LOADING})"),
        BalanceDisplay::Unavailable(_) => format!("{name} (current balance: {UNAVAILABLE})"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenAllowancesView {
    /// Contract metadata not loaded yet.
    Placeholder,
    Loaded {
        headline: String,
        token: AddressId,
        allowance_ids: Vec<AllowanceId>,
    },
}

pub fn render_token_allowances(
    info: Option<&TokenContractInfo>,
    record: Option<&BalanceRecord>,
    token: &AddressId,
    allowance_ids: &[AllowanceId],
    round_to: u32,
) -> TokenAllowancesView {
    let Some(info) = info else {
        return TokenAllowancesView::Placeholder;
    };
    TokenAllowancesView::Loaded {
        headline: token_headline(info, record, round_to),
        token: token.clone(),
        allowance_ids: allowance_ids.to_vec(),
    }
}

/// One observation cycle: make sure the owner's balance is being fetched
/// once the contract is usable, then render from whatever is cached now.
pub async fn observe_token_allowances(
    orchestrator: &FetchOrchestrator,
    tokens: &TokenRegistry,
    owner: &AddressId,
    token: &AddressId,
    allowance_ids: &[AllowanceId],
    round_to: u32,
) -> TokenAllowancesView {
    let info = tokens.get(token).await;
    let ready = info.as_ref().map(|i| i.contract_ready).unwrap_or(false);
    // The fetch settles in the background; the next cycle picks it up.
    let _ = orchestrator.ensure_fetched(owner, token, ready).await;
    let record = orchestrator.get(owner, token).await;
    render_token_allowances(info.as_ref(), record.as_ref(), token, allowance_ids, round_to)
}
