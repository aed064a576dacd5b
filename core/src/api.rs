use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::address::{AddressId, AllowanceId, BalanceKey};
use crate::balance_cache::BalanceRecord;
use crate::errors::AppError;
use crate::fetcher::{FetchOrchestrator, Trigger};
use crate::formatter::{format_precise, parse_units};
use crate::tokens::{TokenContractInfo, TokenRegistry};
use crate::view::{
    balance_display, observe_token_allowances, BalanceDisplay, TokenAllowancesView,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FetchOrchestrator>,
    pub tokens: Arc<TokenRegistry>,
    pub round_to_decimals: u32,
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceView {
    #[schema(example = "0x1111111111111111111111111111111111111111")]
    pub owner: String,
    #[schema(example = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")]
    pub token: String,
    #[schema(example = "SUCCESS")]
    pub state: String,
    /// Raw integer balance, present only on success.
    #[schema(example = "1500000")]
    pub value: Option<String>,
    pub last_error: Option<String>,
    /// Rounded amount when token decimals are known.
    #[schema(example = "1.50")]
    pub display: Option<String>,
    /// Exact amount when token decimals are known.
    #[schema(example = "1.5")]
    pub precise: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    #[schema(example = "started")]
    pub trigger: String,
    pub balance: BalanceView,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SeedBalanceRequest {
    /// Decimal amount in token units, e.g. "12.5".
    #[schema(example = "12.5")]
    pub amount: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AllowancesViewRequest {
    pub owner: String,
    pub token: String,
    #[serde(default)]
    pub allowance_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AllowancesViewResponse {
    pub placeholder: bool,
    pub headline: Option<String>,
    pub token: String,
    pub allowance_ids: Vec<String>,
}

fn balance_view(
    key: &BalanceKey,
    record: &BalanceRecord,
    info: Option<&TokenContractInfo>,
    round_to: u32,
) -> BalanceView {
    let (display, precise) = match info {
        Some(info) => {
            let display = match balance_display(Some(record), info.decimals, round_to) {
                BalanceDisplay::Amount(amount) => Some(amount),
                _ => None,
            };
            let precise = record.value().map(|v| format_precise(v, info.decimals));
            (display, precise)
        }
        None => (None, None),
    };
    BalanceView {
        owner: key.owner.to_string(),
        token: key.token.to_string(),
        state: record.state().to_string(),
        value: record.value().map(|v| v.to_string()),
        last_error: record.last_error().map(|e| e.to_string()),
        display,
        precise,
    }
}

async fn current_view(state: &AppState, key: &BalanceKey) -> Result<BalanceView, AppError> {
    let record = state
        .orchestrator
        .get(&key.owner, &key.token)
        .await
        .ok_or_else(|| AppError::NotFound(format!("balance {key}")))?;
    let info = state.tokens.get(&key.token).await;
    Ok(balance_view(key, &record, info.as_ref(), state.round_to_decimals))
}

fn parse_key(owner: &str, token: &str) -> Result<BalanceKey, AppError> {
    Ok(BalanceKey::new(AddressId::parse(owner)?, AddressId::parse(token)?))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "OK"
}

#[utoipa::path(
    put,
    path = "/tokens/{token}",
    params(("token" = String, Path, description = "Token contract address")),
    request_body = TokenContractInfo,
    responses(
        (status = 200, description = "Token registered", body = TokenContractInfo),
        (status = 400, description = "Malformed address"),
        (status = 422, description = "Malformed metadata, e.g. decimals above 255")
    ),
    tag = "Tokens"
)]
async fn register_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(info): Json<TokenContractInfo>,
) -> Result<Json<TokenContractInfo>, AppError> {
    let token = AddressId::parse(&token)?;
    state.tokens.register(token, info.clone()).await;
    Ok(Json(info))
}

#[utoipa::path(
    get,
    path = "/tokens/{token}",
    params(("token" = String, Path, description = "Token contract address")),
    responses(
        (status = 200, description = "Registered token", body = TokenContractInfo),
        (status = 404, description = "Token not registered")
    ),
    tag = "Tokens"
)]
async fn get_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TokenContractInfo>, AppError> {
    let token = AddressId::parse(&token)?;
    state
        .tokens
        .get(&token)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("token {token}")))
}

#[utoipa::path(
    get,
    path = "/balances/{owner}/{token}",
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("token" = String, Path, description = "Token contract address")
    ),
    responses(
        (status = 200, description = "Cached balance record", body = BalanceView),
        (status = 404, description = "Balance never observed")
    ),
    tag = "Balances"
)]
async fn get_balance(
    State(state): State<AppState>,
    Path((owner, token)): Path<(String, String)>,
) -> Result<Json<BalanceView>, AppError> {
    let key = parse_key(&owner, &token)?;
    Ok(Json(current_view(&state, &key).await?))
}

#[utoipa::path(
    put,
    path = "/balances/{owner}/{token}",
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("token" = String, Path, description = "Token contract address")
    ),
    request_body = SeedBalanceRequest,
    responses(
        (status = 200, description = "Balance stored", body = BalanceView),
        (status = 400, description = "Malformed address or amount"),
        (status = 404, description = "Token not registered"),
        (status = 409, description = "A fetch for this balance is in flight")
    ),
    tag = "Balances"
)]
async fn seed_balance(
    State(state): State<AppState>,
    Path((owner, token)): Path<(String, String)>,
    Json(req): Json<SeedBalanceRequest>,
) -> Result<Json<BalanceView>, AppError> {
    let key = parse_key(&owner, &token)?;
    let info = state
        .tokens
        .get(&key.token)
        .await
        .ok_or_else(|| AppError::NotFound(format!("token {}", key.token)))?;
    let value = parse_units(&req.amount, info.decimals)?;
    state
        .orchestrator
        .cache()
        .upsert(key.clone(), BalanceRecord::loaded(value))
        .await?;
    Ok(Json(current_view(&state, &key).await?))
}

async fn run_trigger(
    state: &AppState,
    owner: &str,
    token: &str,
    refresh: bool,
) -> Result<TriggerResponse, AppError> {
    let key = parse_key(owner, token)?;
    let ready = state.tokens.is_ready(&key.token).await;
    let trigger: Trigger = if refresh {
        state.orchestrator.refresh(&key.owner, &key.token, ready).await
    } else {
        state.orchestrator.ensure_fetched(&key.owner, &key.token, ready).await
    };
    Ok(TriggerResponse {
        trigger: trigger.label().to_string(),
        balance: current_view(state, &key).await?,
    })
}

#[utoipa::path(
    post,
    path = "/balances/{owner}/{token}/fetch",
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("token" = String, Path, description = "Token contract address")
    ),
    responses(
        (status = 202, description = "Fetch triggered or skipped", body = TriggerResponse),
        (status = 400, description = "Malformed address")
    ),
    tag = "Balances"
)]
async fn ensure_fetched(
    State(state): State<AppState>,
    Path((owner, token)): Path<(String, String)>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let response = run_trigger(&state, &owner, &token, false).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/balances/{owner}/{token}/refresh",
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("token" = String, Path, description = "Token contract address")
    ),
    responses(
        (status = 202, description = "Re-fetch triggered or skipped", body = TriggerResponse),
        (status = 400, description = "Malformed address")
    ),
    tag = "Balances"
)]
async fn refresh_balance(
    State(state): State<AppState>,
    Path((owner, token)): Path<(String, String)>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let response = run_trigger(&state, &owner, &token, true).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/allowances/view",
    request_body = AllowancesViewRequest,
    responses(
        (status = 200, description = "Token allowance list header", body = AllowancesViewResponse),
        (status = 400, description = "Malformed address")
    ),
    tag = "Allowances"
)]
async fn allowances_view(
    State(state): State<AppState>,
    Json(req): Json<AllowancesViewRequest>,
) -> Result<Json<AllowancesViewResponse>, AppError> {
    let key = parse_key(&req.owner, &req.token)?;
    let allowance_ids: Vec<AllowanceId> = req.allowance_ids.into_iter().map(AllowanceId).collect();

    let view = observe_token_allowances(
        &state.orchestrator,
        &state.tokens,
        &key.owner,
        &key.token,
        &allowance_ids,
        state.round_to_decimals,
    )
    .await;

    let response = match view {
        TokenAllowancesView::Placeholder => AllowancesViewResponse {
            placeholder: true,
            headline: None,
            token: key.token.to_string(),
            allowance_ids: allowance_ids.into_iter().map(|id| id.0).collect(),
        },
        TokenAllowancesView::Loaded {
            headline,
            token,
            allowance_ids,
        } => AllowancesViewResponse {
            placeholder: false,
            headline: Some(headline),
            token: token.to_string(),
            allowance_ids: allowance_ids.into_iter().map(|id| id.0).collect(),
        },
    };
    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/session",
    responses((status = 204, description = "Cached balances and tokens cleared")),
    tag = "Session"
)]
async fn reset_session(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.cache().reset().await;
    state.tokens.clear();
    StatusCode::NO_CONTENT
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_token,
        get_token,
        get_balance,
        seed_balance,
        ensure_fetched,
        refresh_balance,
        allowances_view,
        reset_session
    ),
    components(schemas(
        TokenContractInfo,
        BalanceView,
        TriggerResponse,
        SeedBalanceRequest,
        AllowancesViewRequest,
        AllowancesViewResponse
    )),
    tags(
        (name = "Tokens", description = "Token contract metadata"),
        (name = "Balances", description = "Cached owner balances and fetch triggers"),
        (name = "Allowances", description = "Allowance list rendering"),
        (name = "Session", description = "Session lifecycle")
    ),
    info(
        title = "Allowances API",
        version = "0.1.0",
        description = "Owner token balances for ERC20 allowance listings"
    )
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/tokens/:token", get(get_token).put(register_token))
        .route("/balances/:owner/:token", get(get_balance).put(seed_balance))
        .route("/balances/:owner/:token/fetch", post(ensure_fetched))
        .route("/balances/:owner/:token/refresh", post(refresh_balance))
        .route("/allowances/view", post(allowances_view))
        .route("/session", delete(reset_session))
        .with_state(state)
}
