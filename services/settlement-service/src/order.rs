use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::EngineError;

/// Order lifecycle states. Stored as TEXT; `as_str`/`parse` keep the DB
/// representation in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Preparing,
    Ready,
    Dispatched,
    Delivered,
    Cancelled,
    PaymentFailed,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Dispatched => "dispatched",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::PaymentFailed => "payment_failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "placed" => Self::Placed,
            "confirmed" => Self::Confirmed,
            "preparing" => Self::Preparing,
            "ready" => Self::Ready,
            "dispatched" => Self::Dispatched,
            "delivered" => Self::Delivered,
            "cancelled" => Self::Cancelled,
            "payment_failed" => Self::PaymentFailed,
            "refunded" => Self::Refunded,
            "partially_refunded" => Self::PartiallyRefunded,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            "partially_refunded" => Self::PartiallyRefunded,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Upi,
    Card,
    Wallet,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upi => "upi",
            Self::Card => "card",
            Self::Wallet => "wallet",
            Self::Cod => "cod",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "upi" => Self::Upi,
            "card" => Self::Card,
            "wallet" => Self::Wallet,
            "cod" => Self::Cod,
            _ => return None,
        })
    }
}

/// Merchant-initiated order actions. Each has a fixed set of source states
/// and exactly one target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Confirm,
    Prepare,
    Ready,
    Dispatch,
    Deliver,
    Cancel,
    MarkRefunded,
    MarkPartiallyRefunded,
    MarkPaymentFailed,
}

#[derive(Debug)]
pub struct Transition {
    pub from: &'static [OrderStatus],
    pub to: OrderStatus,
    /// Cancel restores reserved stock; the caller must run the inventory
    /// adjustment inside the same transaction as the status change.
    pub restores_inventory: bool,
}

use OrderStatus as S;

pub fn transition_for(action: OrderAction) -> Transition {
    match action {
        OrderAction::Confirm => Transition {
            from: &[S::Placed],
            to: S::Confirmed,
            restores_inventory: false,
        },
        OrderAction::Prepare => Transition {
            from: &[S::Confirmed],
            to: S::Preparing,
            restores_inventory: false,
        },
        OrderAction::Ready => Transition {
            from: &[S::Preparing],
            to: S::Ready,
            restores_inventory: false,
        },
        OrderAction::Dispatch => Transition {
            from: &[S::Confirmed, S::Preparing, S::Ready],
            to: S::Dispatched,
            restores_inventory: false,
        },
        OrderAction::Deliver => Transition {
            from: &[S::Dispatched],
            to: S::Delivered,
            restores_inventory: false,
        },
        OrderAction::Cancel => Transition {
            from: &[S::Placed, S::Confirmed, S::Preparing],
            to: S::Cancelled,
            restores_inventory: true,
        },
        OrderAction::MarkRefunded => Transition {
            from: &[
                S::Confirmed,
                S::Preparing,
                S::Ready,
                S::Dispatched,
                S::Delivered,
                S::Cancelled,
                S::PartiallyRefunded,
            ],
            to: S::Refunded,
            restores_inventory: false,
        },
        OrderAction::MarkPartiallyRefunded => Transition {
            from: &[
                S::Confirmed,
                S::Preparing,
                S::Ready,
                S::Dispatched,
                S::Delivered,
                S::Cancelled,
                S::PartiallyRefunded,
            ],
            to: S::PartiallyRefunded,
            restores_inventory: false,
        },
        OrderAction::MarkPaymentFailed => Transition {
            from: &[S::Placed],
            to: S::PaymentFailed,
            restores_inventory: false,
        },
    }
}

/// Validates the transition table against a current status, returning the
/// target state or a conflict naming both states.
pub fn apply_transition(current: OrderStatus, action: OrderAction) -> Result<Transition, EngineError> {
    let t = transition_for(action);
    if t.from.contains(&current) {
        Ok(t)
    } else {
        Err(EngineError::conflict(
            "invalid_transition",
            format!(
                "Cannot move order from '{}' to '{}'",
                current.as_str(),
                t.to.as_str()
            ),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemVariant {
    pub variant_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<OrderItemVariant>,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: String,
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn now(status: impl Into<String>, note: Option<String>) -> Self {
        Self { status: status.into(), note, actor: None, at: Utc::now() }
    }

    pub fn by(status: impl Into<String>, note: Option<String>, actor: impl Into<String>) -> Self {
        Self { status: status.into(), note, actor: Some(actor.into()), at: Utc::now() }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub status: String,
    pub items: Json<Vec<OrderItem>>,
    pub timeline: Json<Vec<TimelineEntry>>,
    pub subtotal: BigDecimal,
    pub tax: BigDecimal,
    pub discount: BigDecimal,
    pub total: BigDecimal,
    pub paid_amount: BigDecimal,
    pub refund_amount: BigDecimal,
    pub payment_method: String,
    pub payment_status: String,
    pub transaction_id: Option<String>,
    pub refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn order_status(&self) -> Result<OrderStatus, EngineError> {
        OrderStatus::parse(&self.status)
            .ok_or_else(|| EngineError::conflict("invalid_transition", format!("Unknown order status '{}'", self.status)))
    }

    pub fn payment_status(&self) -> Result<PaymentStatus, EngineError> {
        PaymentStatus::parse(&self.payment_status).ok_or_else(|| {
            EngineError::conflict(
                "invalid_transition",
                format!("Unknown payment status '{}'", self.payment_status),
            )
        })
    }

    pub fn payment_method(&self) -> Result<PaymentMethod, EngineError> {
        PaymentMethod::parse(&self.payment_method).ok_or_else(|| {
            EngineError::validation(
                "unsupported_payment_method",
                format!("Unsupported payment method '{}'", self.payment_method),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            S::Placed,
            S::Confirmed,
            S::Preparing,
            S::Ready,
            S::Dispatched,
            S::Delivered,
            S::Cancelled,
            S::PaymentFailed,
            S::Refunded,
            S::PartiallyRefunded,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("unknown"), None);
    }

    #[test]
    fn cancel_is_blocked_after_dispatch() {
        let err = apply_transition(S::Dispatched, OrderAction::Cancel).unwrap_err();
        assert!(err.to_string().contains("dispatched"));
    }

    #[test]
    fn cancel_restores_inventory() {
        let t = apply_transition(S::Placed, OrderAction::Cancel).unwrap();
        assert!(t.restores_inventory);
        assert_eq!(t.to, S::Cancelled);
    }

    #[test]
    fn partial_refund_can_become_full() {
        let t = apply_transition(S::PartiallyRefunded, OrderAction::MarkRefunded).unwrap();
        assert_eq!(t.to, S::Refunded);
    }

    #[test]
    fn dispatch_skips_intermediate_states() {
        assert!(apply_transition(S::Confirmed, OrderAction::Dispatch).is_ok());
        assert!(apply_transition(S::Placed, OrderAction::Dispatch).is_err());
    }
}
