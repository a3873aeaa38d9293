use common_http_errors::ApiError;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use uuid::Uuid;

#[test]
fn bad_request_variant() {
    let err = ApiError::bad_request("invalid_amount", "Refund amount must be greater than 0");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_amount");
}

#[test]
fn unprocessable_variant() {
    let err = ApiError::unprocessable("refund_exceeds_eligible", "eligible amount is 1000.00");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "refund_exceeds_eligible");
}

#[test]
fn conflict_variant() {
    let err = ApiError::conflict("already_refunded", "Order is already fully refunded");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "already_refunded");
}

#[test]
fn not_found_variant() {
    let err = ApiError::not_found("order_not_found", "Order not found");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "order_not_found");
}

#[test]
fn bad_gateway_variant() {
    let err = ApiError::BadGateway { code: "gateway_error", trace_id: None, message: Some("refund call timed out".into()) };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "gateway_error");
}

#[test]
fn internal_variant() {
    let trace = Some(Uuid::new_v4());
    let err = ApiError::Internal { trace_id: trace, message: Some("boom".into()) };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
}
