use common_http_errors::ApiError;
use thiserror::Error;

/// Error taxonomy for the settlement engine.
///
/// Validation and conflict are surfaced distinctly so callers can decide
/// whether a retry makes sense; gateway errors always mean the operation
/// aborted with no local mutation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("wallet is frozen: {reason}")]
    WalletFrozen { reason: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict { code, message: message.into() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Conflict { code, .. } => code,
            Self::Gateway(_) => "gateway_error",
            Self::WalletFrozen { .. } => "wallet_frozen",
            Self::NotFound(_) => "not_found",
            Self::Database(_) => "internal_error",
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation { code, message } => ApiError::unprocessable(code, message),
            EngineError::Conflict { code, message } => ApiError::conflict(code, message),
            EngineError::Gateway(message) => {
                ApiError::BadGateway { code: "gateway_error", trace_id: None, message: Some(message) }
            }
            EngineError::WalletFrozen { reason } => ApiError::Forbidden {
                code: "wallet_frozen",
                trace_id: None,
                message: Some(format!("Wallet is frozen: {reason}")),
            },
            EngineError::NotFound(resource) => match resource {
                "order" => ApiError::not_found("order_not_found", "Order not found"),
                "refund" => ApiError::not_found("refund_not_found", "Refund not found"),
                "cashback_request" => {
                    ApiError::not_found("cashback_not_found", "Cashback request not found")
                }
                "cashback_entry" => {
                    ApiError::not_found("cashback_entry_not_found", "Cashback entry not found")
                }
                other => ApiError::not_found("not_found", format!("{other} not found")),
            },
            EngineError::Database(e) => ApiError::internal(e, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn validation_maps_to_422_with_code() {
        let err = EngineError::validation("refund_exceeds_eligible", "eligible amount is 1000.00");
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "refund_exceeds_eligible");
    }

    #[test]
    fn conflict_is_distinct_from_validation() {
        let err = EngineError::conflict("already_refunded", "Order is already fully refunded");
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn frozen_wallet_names_the_reason() {
        let err = EngineError::WalletFrozen { reason: "chargeback review".into() };
        assert!(err.to_string().contains("chargeback review"));
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "wallet_frozen");
    }

    #[test]
    fn gateway_maps_to_bad_gateway() {
        let err = EngineError::Gateway("refund call timed out".into());
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
