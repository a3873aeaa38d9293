use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::{middleware, routing::{get, post}, Router};
use common_audit::AuditProducer;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::cashback::CashbackEngine;
use crate::cashback_handlers::{
    approve_cashback, bulk_cashback_action, cashback_pending_count, cashback_stats,
    create_cashback, create_ledger_entry, credit_ledger_entry, get_cashback, list_cashback,
    mark_cashback_paid, redeem_ready_entries, reject_cashback,
};
use crate::gateway::GatewaySet;
use crate::notify::NotificationSink;
use crate::refund::RefundOrchestrator;
use crate::refund_handlers::{
    get_order, list_order_refunds, refund_order, settlement_queue_depth, update_order_status,
};
use crate::webhook::{handle_gateway_event, verify_webhook};

pub static SETTLEMENT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["service", "code", "status"],
    ).unwrap();
    SETTLEMENT_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub static REFUNDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("refunds_total", "Settled refunds by payment rail and type"),
        &["payment_method", "refund_type"],
    ).unwrap();
    SETTLEMENT_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub static CASHBACK_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("cashback_decisions_total", "Cashback request transitions by outcome"),
        &["outcome"],
    ).unwrap();
    SETTLEMENT_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub async fn http_error_metrics(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
        HTTP_ERRORS_TOTAL.with_label_values(&["settlement-service", code, status.as_str()]).inc();
    }
    resp
}

pub async fn health() -> &'static str { "ok" }

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub gateways: Arc<GatewaySet>,
    pub orchestrator: Arc<RefundOrchestrator>,
    pub cashback: Arc<CashbackEngine>,
    pub notifier: Arc<dyn NotificationSink>,
    pub audit: Arc<AuditProducer>,
    pub webhook_secret: Arc<String>,
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()).collect::<Vec<_>>(),
        ))
        .allow_methods([
            Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT, CONTENT_TYPE, HeaderName::from_static("authorization"), HeaderName::from_static("x-merchant-id"),
        ]);

    async fn audit_metrics(
        axum::extract::State(state): axum::extract::State<AppState>,
    ) -> axum::Json<serde_json::Value> {
        let snap = state.audit.snapshot();
        axum::Json(serde_json::json!({ "emitted": snap.emitted, "dropped": snap.dropped }))
    }
    async fn metrics() -> (StatusCode, String) {
        let encoder = TextEncoder::new();
        let families = SETTLEMENT_REGISTRY.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}"));
        }
        (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
    }

    Router::new()
        .route("/healthz", get(health))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/refund", post(refund_order))
        .route("/orders/:order_id/refunds", get(list_order_refunds))
        .route("/orders/:order_id/status", post(update_order_status))
        .route("/cashback", post(create_cashback).get(list_cashback))
        .route("/cashback/pending-count", get(cashback_pending_count))
        .route("/cashback/stats", get(cashback_stats))
        .route("/cashback/bulk-action", post(bulk_cashback_action))
        .route("/cashback/ledger", post(create_ledger_entry))
        .route("/cashback/ledger/redeem", post(redeem_ready_entries))
        .route("/cashback/ledger/:entry_id/credit", post(credit_ledger_entry))
        .route("/cashback/:request_id", get(get_cashback))
        .route("/cashback/:request_id/approve", post(approve_cashback))
        .route("/cashback/:request_id/reject", post(reject_cashback))
        .route("/cashback/:request_id/mark-paid", post(mark_cashback_paid))
        .route("/webhooks/gateway", post(handle_gateway_event))
        .route("/internal/settlement_queue", get(settlement_queue_depth))
        .route("/internal/audit_metrics", get(audit_metrics))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), verify_webhook))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(http_error_metrics))
}
