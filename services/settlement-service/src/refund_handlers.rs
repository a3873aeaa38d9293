use axum::extract::{Path, State};
use axum::Json;
use bigdecimal::BigDecimal;
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::{AppState, REFUNDS_TOTAL};
use crate::error::EngineError;
use crate::order::{apply_transition, OrderAction, OrderRecord, TimelineEntry};
use crate::refund::{RefundItemRequest, RefundRequest};
use crate::repo;

#[derive(Deserialize)]
pub struct RefundPayload {
    /// Absent means "refund everything still eligible".
    pub amount: Option<BigDecimal>,
    pub reason: String,
    #[serde(default)]
    pub items: Vec<RefundItemPayload>,
    #[serde(default = "default_notify")]
    pub notify_customer: bool,
    pub actor_id: Uuid,
    #[serde(default)]
    pub actor_name: Option<String>,
}

fn default_notify() -> bool { true }

#[derive(Deserialize)]
pub struct RefundItemPayload {
    pub item_id: Uuid,
    pub quantity: i32,
}

pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RefundPayload>,
) -> Result<Json<Value>, ApiError> {
    if payload.reason.trim().is_empty() {
        return Err(ApiError::unprocessable("missing_reason", "Refund reason is required"));
    }
    let outcome = state
        .orchestrator
        .execute(RefundRequest {
            order_id,
            amount: payload.amount,
            reason: payload.reason,
            items: payload
                .items
                .into_iter()
                .map(|i| RefundItemRequest { item_id: i.item_id, quantity: i.quantity })
                .collect(),
            notify_customer: payload.notify_customer,
            actor_id: payload.actor_id,
            actor_name: payload.actor_name.unwrap_or_else(|| "merchant".to_string()),
        })
        .await?;

    REFUNDS_TOTAL
        .with_label_values(&[&outcome.refund.payment_method, &outcome.refund.refund_type])
        .inc();

    Ok(Json(json!({
        "refund": outcome.refund,
        "order_status": outcome.order_status,
        "payment_status": outcome.payment_status,
        "remaining_refundable": outcome.remaining_refundable,
        "estimated_arrival": outcome.estimated_arrival,
    })))
}

#[derive(Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub total: BigDecimal,
    pub paid_amount: BigDecimal,
    pub refund_amount: BigDecimal,
    pub items: Value,
    pub timeline: Value,
}

impl From<OrderRecord> for OrderView {
    fn from(o: OrderRecord) -> Self {
        Self {
            id: o.id,
            order_number: o.order_number,
            status: o.status,
            payment_method: o.payment_method,
            payment_status: o.payment_status,
            total: o.total,
            paid_amount: o.paid_amount,
            refund_amount: o.refund_amount,
            items: serde_json::to_value(&o.items.0).unwrap_or(Value::Null),
            timeline: serde_json::to_value(&o.timeline.0).unwrap_or(Value::Null),
        }
    }
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let order = repo::get_order(&state.db, order_id)
        .await?
        .ok_or(EngineError::NotFound("order"))?;
    Ok(Json(order.into()))
}

pub async fn list_order_refunds(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let refunds = repo::list_refunds_for_order(&state.db, order_id).await?;
    Ok(Json(json!({ "refunds": refunds })))
}

#[derive(Deserialize)]
pub struct StatusPayload {
    pub action: OrderAction,
    #[serde(default)]
    pub note: Option<String>,
}

/// Applies a merchant order action through the transition table. Cancel
/// restores reserved stock in the same transaction as the status flip.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<StatusPayload>,
) -> Result<Json<OrderView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(EngineError::Database)?;
    let order = repo::get_order_for_update(&mut tx, order_id)
        .await?
        .ok_or(EngineError::NotFound("order"))?;
    let current = order.order_status()?;
    let transition = apply_transition(current, payload.action)?;

    if transition.restores_inventory {
        for item in order.items.iter() {
            crate::inventory::restore(&mut tx, item, item.quantity).await?;
        }
    }

    let entry = TimelineEntry::now(transition.to.as_str(), payload.note);
    let updated = repo::update_order_status(&mut tx, order_id, transition.to.as_str(), &entry).await?;
    tx.commit().await.map_err(EngineError::Database)?;

    if let Err(e) = state
        .notifier
        .send_order_status_sms(updated.user_id, &updated.order_number, &updated.status)
        .await
    {
        tracing::warn!(order_id = %updated.id, error = %e, "status sms failed");
    }
    Ok(Json(updated.into()))
}

pub async fn settlement_queue_depth(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let depth = state.orchestrator.manual_settlement_queue_depth().await?;
    Ok(Json(json!({ "pending_manual_settlements": depth })))
}
