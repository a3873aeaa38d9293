use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::app::AppState;
use crate::order::TimelineEntry;
use crate::repo;

fn reject(status: StatusCode, code: &'static str, body: &'static str) -> Response {
    let mut resp = Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap_or_default();
    resp.headers_mut().insert("X-Error-Code", HeaderValue::from_static(code));
    resp
}

/// HMAC verification for gateway webhooks. The signature covers the raw
/// request body; the body is buffered, verified and reattached so the
/// handler sees it unchanged. Everything outside /webhooks/ passes through.
pub async fn verify_webhook(
    State(state): State<AppState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    if !req.uri().path().starts_with("/webhooks/") {
        return next.run(req).await;
    }

    let sig: String = req
        .headers()
        .get("X-Gateway-Signature")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();
    if sig.is_empty() {
        return reject(StatusCode::UNAUTHORIZED, "sig_missing", "missing signature");
    }

    let (mut parts, body) = req.into_parts();
    // 1MB cap
    let bytes = match axum::body::to_bytes(body, 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed", "malformed"),
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(state.webhook_secret.as_bytes()) else {
        return reject(StatusCode::UNAUTHORIZED, "sig_mismatch", "signature mismatch");
    };
    mac.update(&bytes);
    let expected = hex::encode(mac.finalize().into_bytes());

    let provided = sig.strip_prefix("sha256=").unwrap_or(sig.as_str());
    let eq = ConstantTimeEq::ct_eq(expected.as_bytes(), provided.as_bytes()).unwrap_u8();
    if eq != 1 {
        return reject(StatusCode::UNAUTHORIZED, "sig_mismatch", "signature mismatch");
    }

    if let Ok(cl) = HeaderValue::from_str(&bytes.len().to_string()) {
        parts.headers.insert(axum::http::header::CONTENT_LENGTH, cl);
    }
    let req = axum::http::Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

#[derive(Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Gateway event handler. Signature is already verified by the middleware.
/// Always answers 200 so the provider stops retrying; events we cannot
/// apply are logged for reconciliation instead of bounced.
pub async fn handle_gateway_event(
    State(state): State<AppState>,
    Json(event): Json<GatewayEvent>,
) -> Json<Value> {
    match event.event.as_str() {
        "payment.captured" => {
            if let Some(txn) = payload_str(&event.payload, "transaction_id") {
                let entry = TimelineEntry::now("confirmed", Some("Payment captured".into()));
                match repo::apply_payment_captured(&state.db, txn, &entry).await {
                    Ok(Some(order)) => {
                        info!(order_id = %order.id, transaction_id = txn, "payment captured")
                    }
                    Ok(None) => {
                        warn!(transaction_id = txn, "capture event matched no pending order")
                    }
                    Err(e) => warn!(transaction_id = txn, error = %e, "capture update failed"),
                }
            } else {
                warn!(event = %event.event, "event payload missing transaction_id");
            }
        }
        "payment.failed" => {
            if let Some(txn) = payload_str(&event.payload, "transaction_id") {
                let entry = TimelineEntry::now("payment_failed", Some("Payment failed".into()));
                match repo::apply_payment_failed(&state.db, txn, &entry).await {
                    Ok(Some(order)) => {
                        info!(order_id = %order.id, transaction_id = txn, "payment failed")
                    }
                    Ok(None) => {
                        warn!(transaction_id = txn, "failure event matched no pending order")
                    }
                    Err(e) => warn!(transaction_id = txn, error = %e, "failure update failed"),
                }
            } else {
                warn!(event = %event.event, "event payload missing transaction_id");
            }
        }
        "refund.created" | "refund.processed" => {
            let refund_id = payload_str(&event.payload, "refund_id");
            let status = payload_str(&event.payload, "status").unwrap_or("processed");
            if let Some(refund_id) = refund_id {
                match repo::apply_refund_settled(&state.db, refund_id, status).await {
                    Ok(Some(rec)) => {
                        info!(refund_id = %rec.id, gateway_status = status, "refund settled by gateway")
                    }
                    Ok(None) => warn!(
                        gateway_refund_id = refund_id,
                        "refund event matched no local refund"
                    ),
                    Err(e) => warn!(gateway_refund_id = refund_id, error = %e, "refund update failed"),
                }
            } else {
                warn!(event = %event.event, "event payload missing refund_id");
            }
        }
        other => {
            info!(event = other, "ignoring unhandled gateway event");
        }
    }
    Json(json!({ "received": true }))
}
