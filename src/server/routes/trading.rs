use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_market, KeyFields};
use crate::config::{RiskConfig, StrategyConfig, TradingConfig};
use crate::error::TradingError;
use crate::exchange::Exchange;
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::session::SessionSnapshot;
use crate::types::Market;

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
    pub market: Option<String>,
    /// Full trading configuration (`strategy`, `riskManagement`, `testMode`, `interval`, ...)
    #[serde(default)]
    pub config: Option<TradingConfig>,
    /// Overrides `config.strategy`
    #[serde(default)]
    pub strategy_config: Option<StrategyConfig>,
    /// Overrides `config.riskManagement`
    #[serde(default)]
    pub risk_management: Option<RiskConfig>,
}

impl StartRequest {
    fn trading_config(&self) -> TradingConfig {
        let mut config = self.config.clone().unwrap_or_default();
        if let Some(strategy) = &self.strategy_config {
            config.strategy = strategy.clone();
        }
        if let Some(risk) = &self.risk_management {
            config.risk_management = risk.clone();
        }
        config
    }
}

/// Body of `stop`, and body or query of `status`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(flatten)]
    pub keys: KeyFields,
    #[serde(default)]
    pub market: Option<String>,
}

/// `{"status": snapshot}`, or `{"status": null}` when there is no session
#[derive(Debug, Serialize)]
pub struct StatusEnvelope {
    pub status: Option<SessionSnapshot>,
}

// =============================================================================
// ROUTE HANDLERS
// =============================================================================

/// POST /trading/start
async fn start_trading<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StatusEnvelope>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let market = parse_market(request.market.as_deref())?;
    let config = request.trading_config();

    let snapshot = state
        .controller
        .start(&credentials.user_id(), market, credentials, config)
        .await?;

    Ok(Json(StatusEnvelope {
        status: Some(snapshot),
    }))
}

/// POST /trading/stop
async fn stop_trading<E: Exchange>(
    State(state): State<AppState<E>>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<StatusEnvelope>, ApiError> {
    let Json(request) = payload?;
    let credentials = request.keys.credentials()?;
    let user_id = credentials.user_id();

    let market = match resolve_market(&state, &user_id, request.market.as_deref()).await? {
        Some(market) => market,
        None => {
            return Err(TradingError::NotFound {
                user_id,
                market: "*".to_string(),
            }
            .into())
        }
    };

    state.controller.verify_owner(&credentials, &market).await?;
    let snapshot = state.controller.stop(&user_id, &market).await?;
    info!(user_id = %user_id, market = %market, "Stop requested via API");
    Ok(Json(StatusEnvelope {
        status: Some(snapshot),
    }))
}

/// GET /trading/status
///
/// Keys and market may come in the query string or in a JSON body.
async fn trading_status<E: Exchange>(
    State(state): State<AppState<E>>,
    query: Result<Query<SessionRequest>, QueryRejection>,
    body: Bytes,
) -> Result<Json<StatusEnvelope>, ApiError> {
    let Query(mut request) = query?;
    if !body.is_empty() {
        let from_body: SessionRequest = serde_json::from_slice(&body)
            .map_err(|e| TradingError::validation(format!("invalid JSON body: {e}")))?;
        request.keys.access_key = from_body.keys.access_key.or(request.keys.access_key);
        request.keys.secret_key = from_body.keys.secret_key.or(request.keys.secret_key);
        request.market = from_body.market.or(request.market);
    }

    let credentials = request.keys.credentials()?;
    let user_id = credentials.user_id();
    let Some(market) = resolve_market(&state, &user_id, request.market.as_deref()).await? else {
        return Ok(Json(StatusEnvelope { status: None }));
    };
    state.controller.verify_owner(&credentials, &market).await?;

    match state.controller.status(&user_id, &market).await {
        Ok(snapshot) => Ok(Json(StatusEnvelope {
            status: Some(snapshot),
        })),
        Err(TradingError::NotFound { .. }) => Ok(Json(StatusEnvelope { status: None })),
        Err(e) => Err(e.into()),
    }
}

/// Explicit market, or the user's only session when none is given
async fn resolve_market<E: Exchange>(
    state: &AppState<E>,
    user_id: &str,
    market: Option<&str>,
) -> Result<Option<Market>, ApiError> {
    match market {
        Some(market) => Ok(Some(parse_market(Some(market))?)),
        None => Ok(state.controller.sole_market(user_id).await?),
    }
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes<E: Exchange>() -> Router<AppState<E>> {
    Router::new()
        .route("/trading/start", post(start_trading::<E>))
        .route("/trading/stop", post(stop_trading::<E>))
        .route("/trading/status", get(trading_status::<E>))
}
