use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bigdecimal::BigDecimal;
use common_audit::AuditActor;
use common_http_errors::ApiError;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::{AppState, CASHBACK_DECISIONS_TOTAL};
use crate::cashback::{BulkCashbackAction, CreateCashbackRequest};

#[derive(Deserialize)]
pub struct CreateCashbackPayload {
    pub merchant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub account_age_days: i64,
    #[serde(default)]
    pub verified: bool,
}

pub async fn create_cashback(
    State(state): State<AppState>,
    Json(payload): Json<CreateCashbackPayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let rec = state
        .cashback
        .create(CreateCashbackRequest {
            merchant_id: payload.merchant_id,
            user_id: payload.user_id,
            order_id: payload.order_id,
            amount: payload.amount,
            account_age_days: payload.account_age_days,
            verified: payload.verified,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "cashback": rec }))))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub merchant_id: Uuid,
    pub status: Option<String>,
}

pub async fn list_cashback(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let recs = state.cashback.list(q.merchant_id, q.status.as_deref()).await?;
    Ok(Json(json!({ "cashbacks": recs })))
}

pub async fn get_cashback(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let rec = state.cashback.get(request_id).await?;
    Ok(Json(json!({ "cashback": rec })))
}

#[derive(Deserialize)]
pub struct DecisionPayload {
    pub actor_id: Uuid,
    #[serde(default)]
    pub actor_name: Option<String>,
    pub approved_amount: Option<BigDecimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

fn actor_of(payload: &DecisionPayload) -> AuditActor {
    AuditActor { id: Some(payload.actor_id), name: payload.actor_name.clone() }
}

pub async fn approve_cashback(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecisionPayload>,
) -> Result<Json<Value>, ApiError> {
    let actor = actor_of(&payload);
    let rec = state
        .cashback
        .approve(request_id, payload.approved_amount, payload.reason, actor)
        .await?;
    CASHBACK_DECISIONS_TOTAL.with_label_values(&["approved"]).inc();
    Ok(Json(json!({ "cashback": rec })))
}

pub async fn reject_cashback(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecisionPayload>,
) -> Result<Json<Value>, ApiError> {
    let actor = actor_of(&payload);
    let rec = state.cashback.reject(request_id, payload.reason, actor).await?;
    CASHBACK_DECISIONS_TOTAL.with_label_values(&["rejected"]).inc();
    Ok(Json(json!({ "cashback": rec })))
}

#[derive(Deserialize)]
pub struct MarkPaidPayload {
    pub actor_id: Uuid,
    #[serde(default)]
    pub actor_name: Option<String>,
    pub payout_method: String,
}

pub async fn mark_cashback_paid(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<MarkPaidPayload>,
) -> Result<Json<Value>, ApiError> {
    let actor = AuditActor { id: Some(payload.actor_id), name: payload.actor_name.clone() };
    let rec = state.cashback.mark_paid(request_id, &payload.payout_method, actor).await?;
    CASHBACK_DECISIONS_TOTAL.with_label_values(&["paid"]).inc();
    Ok(Json(json!({ "cashback": rec })))
}

#[derive(Deserialize)]
pub struct BulkPayload {
    pub actor_id: Uuid,
    #[serde(default)]
    pub actor_name: Option<String>,
    pub action: BulkCashbackAction,
    pub request_ids: Vec<Uuid>,
}

pub async fn bulk_cashback_action(
    State(state): State<AppState>,
    Json(payload): Json<BulkPayload>,
) -> Result<Json<Value>, ApiError> {
    if payload.request_ids.is_empty() {
        return Err(ApiError::unprocessable("empty_batch", "request_ids must not be empty"));
    }
    let actor = AuditActor { id: Some(payload.actor_id), name: payload.actor_name.clone() };
    let outcome = state.cashback.bulk(&payload.request_ids, payload.action, actor).await?;
    Ok(Json(json!({
        "success_count": outcome.success_count,
        "failed_count": outcome.failed_count,
        "results": outcome.results,
    })))
}

#[derive(Deserialize)]
pub struct MerchantQuery {
    pub merchant_id: Uuid,
}

pub async fn cashback_pending_count(
    State(state): State<AppState>,
    Query(q): Query<MerchantQuery>,
) -> Result<Json<Value>, ApiError> {
    let count = state.cashback.pending_count(q.merchant_id).await?;
    Ok(Json(json!({ "pending_count": count })))
}

pub async fn cashback_stats(
    State(state): State<AppState>,
    Query(q): Query<MerchantQuery>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.cashback.stats(q.merchant_id).await?;
    Ok(Json(json!({ "stats": stats })))
}

#[derive(Deserialize)]
pub struct LedgerEntryPayload {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String { "order".to_string() }

pub async fn create_ledger_entry(
    State(state): State<AppState>,
    Json(payload): Json<LedgerEntryPayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let entry = state
        .cashback
        .create_ledger_entry(payload.user_id, payload.order_id, &payload.amount, &payload.source)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "entry": entry }))))
}

pub async fn credit_ledger_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let entry = state.cashback.credit_ledger_entry(entry_id).await?;
    Ok(Json(json!({ "entry": entry })))
}

#[derive(Deserialize)]
pub struct RedeemPayload {
    #[serde(default = "default_redeem_limit")]
    pub limit: i64,
}

fn default_redeem_limit() -> i64 { 100 }

pub async fn redeem_ready_entries(
    State(state): State<AppState>,
    Json(payload): Json<RedeemPayload>,
) -> Result<Json<Value>, ApiError> {
    let credited = state.cashback.redeem_ready(payload.limit).await?;
    Ok(Json(json!({ "credited": credited })))
}
