//! Read API route handlers.
//!
//! All endpoints return JSON. Wei amounts are rendered as decimal strings
//! so JavaScript clients do not lose precision.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::betting::SharedChain;
use crate::oracle::{LocalPriceFeed, PriceOracle};
use crate::types::{format_ether, Address, Bet, BetStatus, EscrowEvent, Price};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub name: String,
    pub chain: SharedChain<LocalPriceFeed>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(name: impl Into<String>, chain: SharedChain<LocalPriceFeed>) -> Self {
        Self {
            name: name.into(),
            chain,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<ApiState>;

type ApiError = (StatusCode, Json<Value>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub contract: Address,
    pub price_feed_id: String,
    pub bet_counter: u64,
    pub contract_balance_wei: String,
    pub contract_balance_eth: String,
    pub min_bet_wei: String,
    pub bet_duration_secs: u64,
    pub block_time: u64,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: u64,
    /// Human price, e.g. "2050.00".
    pub display: String,
    pub age_secs: u64,
    /// Whether a bet could be placed against this price right now.
    pub fresh: bool,
}

impl PriceResponse {
    fn new(price: Price, now: u64, max_age: u64) -> Self {
        let age_secs = price.age(now);
        Self {
            price: price.price,
            conf: price.conf,
            expo: price.expo,
            publish_time: price.publish_time,
            display: price
                .to_decimal()
                .map(|d| format!("{:.2}", d))
                .unwrap_or_else(|| price.price.to_string()),
            age_secs,
            fresh: age_secs <= max_age,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BetResponse {
    pub id: u64,
    pub bettor: Address,
    pub direction: &'static str,
    pub amount_wei: String,
    pub amount_eth: String,
    pub timestamp: u64,
    pub target_price: u64,
    pub resolvable_at: u64,
    pub status: BetStatus,
}

impl BetResponse {
    fn new(id: u64, bet: &Bet, bet_duration: u64) -> Self {
        Self {
            id,
            bettor: bet.bettor,
            direction: bet.direction_label(),
            amount_wei: bet.amount.to_string(),
            amount_eth: format_ether(bet.amount),
            timestamp: bet.timestamp,
            target_price: bet.target_price,
            resolvable_at: bet.resolvable_at(bet_duration),
            status: bet.status(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub bettor: Option<String>,
    pub bet_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let chain = state.chain.lock().await;
    let escrow = chain.escrow();
    let balance = chain.contract_balance();

    Json(StatusResponse {
        name: state.name.clone(),
        contract: escrow.address(),
        price_feed_id: escrow.price_feed_id().to_string(),
        bet_counter: chain.bet_counter(),
        contract_balance_wei: balance.to_string(),
        contract_balance_eth: format_ether(balance),
        min_bet_wei: escrow.params().min_bet.to_string(),
        bet_duration_secs: escrow.params().bet_duration,
        block_time: chain.block_time(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/price
pub async fn get_price(State(state): State<AppState>) -> Result<Json<PriceResponse>, ApiError> {
    let chain = state.chain.lock().await;
    let feed = chain.price_feed_id();
    let price = chain
        .oracle()
        .price_unsafe(&feed)
        .map_err(|e| error(StatusCode::NOT_FOUND, e.to_string()))?;

    let max_age = chain.escrow().params().placement_max_price_age;
    Ok(Json(PriceResponse::new(price, chain.block_time(), max_age)))
}

/// GET /api/bets/:id
pub async fn get_bet(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<BetResponse>, ApiError> {
    let chain = state.chain.lock().await;
    let bet = chain
        .get_bet(id)
        .map_err(|e| error(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(BetResponse::new(id, &bet, chain.escrow().params().bet_duration)))
}

/// GET /api/users/:address/bets
pub async fn get_user_bets(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<BetResponse>>, ApiError> {
    let user: Address = address
        .parse()
        .map_err(|_| error(StatusCode::BAD_REQUEST, format!("Invalid address: {address}")))?;

    let chain = state.chain.lock().await;
    let duration = chain.escrow().params().bet_duration;
    let bets = chain
        .get_user_bets(&user)
        .into_iter()
        .filter_map(|id| chain.get_bet(id).ok().map(|b| BetResponse::new(id, &b, duration)))
        .collect();
    Ok(Json(bets))
}

/// GET /api/events?bettor=&bet_id=
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<EscrowEvent>>, ApiError> {
    let bettor = match query.bettor.as_deref() {
        Some(raw) => Some(
            raw.parse::<Address>()
                .map_err(|_| error(StatusCode::BAD_REQUEST, format!("Invalid bettor: {raw}")))?,
        ),
        None => None,
    };

    let chain = state.chain.lock().await;
    let events = chain
        .escrow()
        .events()
        .iter()
        .filter(|e| bettor.map_or(true, |b| e.bettor() == b))
        .filter(|e| query.bet_id.map_or(true, |id| e.bet_id() == id))
        .cloned()
        .collect();
    Ok(Json(events))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
