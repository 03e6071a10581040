use axum::Router;
use serde::Deserialize;

use crate::error::TradingError;
use crate::exchange::Exchange;
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::types::Market;
use crate::upbit::Credentials;

pub mod exchange;
pub mod trading;

/// Every route is served at the root and again under `/api`
pub fn create_router<E: Exchange>(state: AppState<E>) -> Router {
    let api = Router::new()
        .merge(trading::routes::<E>())
        .merge(exchange::routes::<E>());

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// API keys carried in a request body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFields {
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl KeyFields {
    /// Both keys must be present and non-empty
    pub fn credentials(&self) -> Result<Credentials, ApiError> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Ok(Credentials::new(access, secret))
            }
            _ => Err(TradingError::Auth {
                status: 401,
                message: "accessKey and secretKey are required".to_string(),
            }
            .into()),
        }
    }
}

pub fn parse_market(market: Option<&str>) -> Result<Market, ApiError> {
    match market {
        Some(market) => Ok(Market::parse(market)?),
        None => Err(TradingError::validation("market is required").into()),
    }
}
