//! Error responses of the control surface
//!
//! Every failure is reported as `{"error": {"kind", "message"}}` with a status
//! code derived from the error kind.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::TradingError;

#[derive(Debug)]
pub struct ApiError(pub TradingError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            TradingError::Auth { .. } => StatusCode::UNAUTHORIZED,
            TradingError::Validation(_) => StatusCode::BAD_REQUEST,
            TradingError::NotFound { .. } => StatusCode::NOT_FOUND,
            TradingError::Conflict { .. } => StatusCode::CONFLICT,
            TradingError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            TradingError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            TradingError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<TradingError> for ApiError {
    fn from(err: TradingError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(TradingError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(TradingError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(kind = %self.0.kind(), "Request failed: {}", self.0);
        } else {
            debug!(kind = %self.0.kind(), "Request rejected: {}", self.0);
        }

        let body = Json(json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        if let TradingError::RateLimit {
            retry_after: Some(delay),
        } = &self.0
        {
            let secs = delay.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
