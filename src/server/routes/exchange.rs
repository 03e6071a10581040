//! Pass-through endpoints to the exchange client

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_market, KeyFields};
use crate::config::Granularity;
use crate::error::TradingError;
use crate::exchange::{Exchange, ExchangeRequest};
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::types::Order;
use crate::upbit::Credentials;

const DEFAULT_CANDLE_COUNT: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
    pub market: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandlesRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
    pub market: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    /// Minute unit for `/candles/minutes`
    #[serde(default)]
    pub minutes: Option<u32>,
}

/// Order fields exactly as the exchange names them
#[derive(Debug, Deserialize)]
pub struct WireOrder {
    pub market: String,
    pub side: String,
    #[serde(alias = "ordType")]
    pub ord_type: String,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
    pub order: Option<WireOrder>,
}

/// POST /accounts
async fn accounts<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<KeysRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    Ok(Json(
        state
            .exchange
            .forward(&ExchangeRequest::Accounts, &credentials)
            .await?,
    ))
}

/// POST /ticker
async fn ticker<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<MarketRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let market = parse_market(request.market.as_deref())?;
    Ok(Json(
        state
            .exchange
            .forward(&ExchangeRequest::Ticker(market), &credentials)
            .await?,
    ))
}

/// GET /markets (no credentials)
async fn markets<E: Exchange>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(
        state
            .exchange
            .forward(&ExchangeRequest::Markets, &Credentials::anonymous())
            .await?,
    ))
}

/// POST /candles/:unit where unit is `minutes` or `days`
async fn candles<E: Exchange>(
    State(state): State<AppState<E>>,
    Path(unit): Path<String>,
    payload: Result<Json<CandlesRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let market = parse_market(request.market.as_deref())?;

    let granularity = match unit.as_str() {
        "minutes" => Granularity::minutes(request.minutes.unwrap_or(1))?,
        "days" => Granularity::Days,
        other => {
            return Err(TradingError::validation(format!(
                "unsupported candle unit '{other}' (expected minutes or days)"
            ))
            .into())
        }
    };
    let candles = ExchangeRequest::Candles {
        market,
        granularity,
        count: request.count.unwrap_or(DEFAULT_CANDLE_COUNT),
    };

    Ok(Json(state.exchange.forward(&candles, &credentials).await?))
}

/// POST /orders/chance
async fn order_chance<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<MarketRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let market = parse_market(request.market.as_deref())?;
    Ok(Json(
        state
            .exchange
            .forward(&ExchangeRequest::OrderChance(market), &credentials)
            .await?,
    ))
}

/// POST /orders
async fn create_order<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let wire = request
        .order
        .ok_or_else(|| TradingError::validation("order is required"))?;

    // validated here so malformed orders never reach the exchange
    let order = Order::from_wire(
        &wire.market,
        &wire.side,
        &wire.ord_type,
        wire.volume,
        wire.price,
    )?;
    Ok(Json(
        state
            .exchange
            .forward(&ExchangeRequest::CreateOrder(order), &credentials)
            .await?,
    ))
}

pub fn routes<E: Exchange>() -> Router<AppState<E>> {
    Router::new()
        .route("/accounts", post(accounts::<E>))
        .route("/ticker", post(ticker::<E>))
        .route("/markets", get(markets::<E>))
        .route("/candles/:unit", post(candles::<E>))
        .route("/orders", post(create_order::<E>))
        .route("/orders/chance", post(order_chance::<E>))
}
