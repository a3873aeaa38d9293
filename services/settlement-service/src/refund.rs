use std::sync::Arc;
use std::time::Duration;

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use common_audit::AuditProducer;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::CountCache;
use crate::error::EngineError;
use crate::gateway::{GatewaySet, RefundContext, RefundDisposition};
use crate::inventory;
use crate::notify::{NotificationSink, RefundNotice};
use crate::order::{OrderRecord, PaymentMethod, PaymentStatus, TimelineEntry};
use crate::repo::{self, NewRefund, RefundRecord, RefundedItem};

/// Result of pure refund validation. `is_partial` classifies the refund
/// record (amount below the original paid total); `exhausts` says whether
/// this refund consumes everything still refundable, which is what drives
/// the order's final status.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundPlan {
    pub max_refundable: BigDecimal,
    pub is_partial: bool,
    pub exhausts: bool,
}

/// Validates a refund request against the order's payment state. Pure so it
/// can be tested without a database.
pub fn validate_refund(
    payment_status: PaymentStatus,
    paid_amount: &BigDecimal,
    refunded_so_far: &BigDecimal,
    requested: &BigDecimal,
) -> Result<RefundPlan, EngineError> {
    match payment_status {
        PaymentStatus::Paid | PaymentStatus::PartiallyRefunded => {}
        PaymentStatus::Refunded => {
            return Err(EngineError::conflict(
                "already_refunded",
                "Order is already fully refunded",
            ));
        }
        PaymentStatus::Pending | PaymentStatus::Failed => {
            return Err(EngineError::validation(
                "order_not_paid",
                "Cannot refund unpaid order",
            ));
        }
    }
    if requested <= &BigDecimal::zero() {
        return Err(EngineError::validation(
            "invalid_amount",
            "Refund amount must be greater than 0",
        ));
    }
    let max_refundable = paid_amount - refunded_so_far;
    if max_refundable <= BigDecimal::zero() {
        return Err(EngineError::conflict(
            "already_refunded",
            "Order is already fully refunded",
        ));
    }
    if requested > &max_refundable {
        return Err(EngineError::validation(
            "refund_exceeds_eligible",
            format!("Refund amount ({requested}) exceeds eligible amount ({max_refundable})"),
        ));
    }
    Ok(RefundPlan {
        is_partial: requested < paid_amount,
        exhausts: requested == &max_refundable,
        max_refundable,
    })
}

/// When the customer should expect the money: wallet credits are instant,
/// COD payouts take about three business days, card rails up to seven.
pub fn estimated_arrival(method: PaymentMethod, from: DateTime<Utc>) -> DateTime<Utc> {
    let days = match method {
        PaymentMethod::Wallet => 0,
        PaymentMethod::Cod => 3,
        PaymentMethod::Upi | PaymentMethod::Card => 7,
    };
    from + chrono::Duration::days(days)
}

/// Maps the rail's status vocabulary onto our refund record status.
pub fn refund_record_status(gateway_status: &str) -> &'static str {
    match gateway_status {
        "completed" | "processed" => "completed",
        "pending_manual_processing" => "pending",
        _ => "processing",
    }
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: Uuid,
    pub amount: Option<BigDecimal>,
    pub reason: String,
    /// Items to restock. Empty on a full refund means "restore everything
    /// still outstanding".
    pub items: Vec<RefundItemRequest>,
    pub notify_customer: bool,
    pub actor_id: Uuid,
    pub actor_name: String,
}

#[derive(Debug, Clone)]
pub struct RefundItemRequest {
    pub item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct RefundOutcome {
    pub refund: RefundRecord,
    pub order_status: String,
    pub payment_status: String,
    pub remaining_refundable: BigDecimal,
    pub estimated_arrival: DateTime<Utc>,
}

pub struct RefundOrchestrator {
    db: PgPool,
    gateways: Arc<GatewaySet>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<AuditProducer>,
    manual_queue: Arc<CountCache<()>>,
}

impl RefundOrchestrator {
    pub fn new(
        db: PgPool,
        gateways: Arc<GatewaySet>,
        notifier: Arc<dyn NotificationSink>,
        audit: Arc<AuditProducer>,
    ) -> Self {
        Self {
            db,
            gateways,
            notifier,
            audit,
            manual_queue: Arc::new(CountCache::new(Duration::from_secs(300))),
        }
    }

    pub fn manual_queue_cache(&self) -> Arc<CountCache<()>> {
        self.manual_queue.clone()
    }

    /// The full settlement saga: validate, call the rail, then one atomic
    /// transaction for totals, restock, the refund row and any wallet
    /// credit. Side effects run after commit and are never rolled back.
    pub async fn execute(&self, req: RefundRequest) -> Result<RefundOutcome, EngineError> {
        let order = repo::get_order(&self.db, req.order_id)
            .await?
            .ok_or(EngineError::NotFound("order"))?;
        let method = order.payment_method()?;
        let payment_status = order.payment_status()?;

        let requested = match &req.amount {
            Some(amount) => amount.clone(),
            None => &order.paid_amount - &order.refund_amount,
        };
        let plan = validate_refund(payment_status, &order.paid_amount, &order.refund_amount, &requested)?;

        // The rail is called before any local mutation. If it fails, nothing
        // here has changed.
        let adapter = self.gateways.adapter_for(method)?;
        let disposition = adapter
            .create_refund(RefundContext {
                order_id: order.id,
                order_number: &order.order_number,
                user_id: order.user_id,
                transaction_id: order.transaction_id.as_deref(),
                amount: &requested,
                reason: &req.reason,
            })
            .await?;

        let refund_type = if plan.is_partial { "partial" } else { "full" };
        let arrival = estimated_arrival(method, Utc::now());

        let outcome = self
            .settle(&order, &req, &requested, &disposition, &plan, refund_type, arrival)
            .await;

        let (refund, updated) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                // The provider already moved money; flag it for operator
                // reconciliation before surfacing the error.
                if let RefundDisposition::External { gateway_refund_id, .. } = &disposition {
                    error!(
                        order_id = %order.id,
                        gateway_refund_id = %gateway_refund_id,
                        reconciliation_required = true,
                        error = %e,
                        "refund committed at gateway but local settlement failed"
                    );
                }
                return Err(e);
            }
        };

        let actor = common_audit::AuditActor {
            id: Some(req.actor_id),
            name: Some(req.actor_name.clone()),
        };
        self.post_commit(&order, &refund, method, req.notify_customer, actor).await;

        let arrival = refund.estimated_arrival;
        Ok(RefundOutcome {
            refund,
            remaining_refundable: &updated.paid_amount - &updated.refund_amount,
            order_status: updated.status,
            payment_status: updated.payment_status,
            estimated_arrival: arrival,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        order: &OrderRecord,
        req: &RefundRequest,
        amount: &BigDecimal,
        disposition: &RefundDisposition,
        plan: &RefundPlan,
        refund_type: &str,
        arrival: DateTime<Utc>,
    ) -> Result<(RefundRecord, OrderRecord), EngineError> {
        let mut tx = self.db.begin().await.map_err(EngineError::Database)?;

        // The entry's status is rewritten inside the update, where the
        // post-refund balance is known; the value here only covers the
        // serialization shape.
        let entry = TimelineEntry::now(
            if plan.exhausts { "refunded" } else { "partially_refunded" },
            Some(format!("Refund of {amount} initiated: {}", req.reason)),
        );
        let updated = repo::apply_refund_totals(
            &mut tx,
            order.id,
            amount,
            disposition.reference(),
            &entry,
        )
        .await?;

        // Whether this refund drained the order is decided by the returned
        // row, not the pre-transaction read.
        let drained = matches!(updated.payment_status()?, PaymentStatus::Refunded);
        let restocked = self.restock(&mut tx, order, req, drained).await?;

        if let RefundDisposition::WalletCredit { user_id, .. } = disposition {
            repo::credit_wallet(&mut tx, *user_id, amount).await?;
        }

        let gateway_status = disposition.gateway_status();
        let refund = repo::insert_refund(
            &mut tx,
            NewRefund {
                order_id: order.id,
                user_id: order.user_id,
                amount,
                reason: &req.reason,
                refund_type,
                payment_method: &order.payment_method,
                gateway_refund_id: match disposition {
                    RefundDisposition::External { gateway_refund_id, .. } => Some(gateway_refund_id),
                    _ => None,
                },
                gateway_status,
                status: refund_record_status(gateway_status),
                refunded_items: &restocked,
                estimated_arrival: arrival,
            },
        )
        .await?;

        tx.commit().await.map_err(EngineError::Database)?;
        Ok((refund, updated))
    }

    /// Restores stock inside the settlement transaction. A refund that
    /// exhausts the order with no explicit items restores every unit not
    /// already restocked by an earlier refund; explicit items are clamped
    /// per item.
    async fn restock(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order: &OrderRecord,
        req: &RefundRequest,
        exhausts: bool,
    ) -> Result<Vec<RefundedItem>, EngineError> {
        let already = repo::refunded_quantities(tx, order.id).await?;
        let mut restocked = Vec::new();
        if req.items.is_empty() {
            if !exhausts {
                return Ok(restocked);
            }
            for item in order.items.iter() {
                let prior = already.get(&item.item_id).copied().unwrap_or(0);
                let qty = inventory::restorable_quantity(item.quantity, prior, item.quantity);
                if qty > 0 {
                    inventory::restore(tx, item, qty).await?;
                    restocked.push(RefundedItem {
                        item_id: item.item_id,
                        product_id: item.product_id,
                        quantity: qty,
                    });
                }
            }
        } else {
            for wanted in &req.items {
                let Some(item) = order.items.iter().find(|i| i.item_id == wanted.item_id) else {
                    return Err(EngineError::validation(
                        "unknown_order_item",
                        format!("Item {} is not part of this order", wanted.item_id),
                    ));
                };
                let prior = already.get(&item.item_id).copied().unwrap_or(0);
                let qty = inventory::restorable_quantity(item.quantity, prior, wanted.quantity);
                if qty > 0 {
                    inventory::restore(tx, item, qty).await?;
                    restocked.push(RefundedItem {
                        item_id: item.item_id,
                        product_id: item.product_id,
                        quantity: qty,
                    });
                }
            }
        }
        Ok(restocked)
    }

    /// Best-effort side effects. Failures are logged, reflected in the
    /// notified flags, and never fail the settled refund.
    async fn post_commit(
        &self,
        order: &OrderRecord,
        refund: &RefundRecord,
        method: PaymentMethod,
        notify_customer: bool,
        actor: common_audit::AuditActor,
    ) {
        let notice = RefundNotice {
            order_number: order.order_number.clone(),
            amount: refund.amount.clone(),
            refund_type: refund.refund_type.clone(),
            payment_method: refund.payment_method.clone(),
            estimated_arrival: refund.estimated_arrival,
            refund_reference: refund
                .gateway_refund_id
                .clone()
                .unwrap_or_else(|| refund.id.to_string()),
        };

        let mut customer_ok = false;
        if notify_customer {
            let sms = self.notifier.send_refund_confirmation_sms(order.user_id, &notice).await;
            let email = self.notifier.send_refund_confirmation_email(order.user_id, &notice).await;
            customer_ok = sms.is_ok() || email.is_ok();
            if let Err(e) = sms {
                warn!(order_id = %order.id, error = %e, "refund sms failed");
            }
            if let Err(e) = email {
                warn!(order_id = %order.id, error = %e, "refund email failed");
            }
        }

        let mut admin_ok = false;
        if method == PaymentMethod::Cod {
            match self.notifier.send_admin_refund_notice(&notice).await {
                Ok(()) => admin_ok = true,
                Err(e) => warn!(order_id = %order.id, error = %e, "admin settlement notice failed"),
            }
            self.manual_queue.invalidate(&());
        }

        if customer_ok || admin_ok {
            if let Err(e) =
                repo::mark_refund_notified(&self.db, refund.id, customer_ok, admin_ok).await
            {
                warn!(refund_id = %refund.id, error = %e, "failed to persist notification flags");
            }
        }

        self.audit
            .emit(
                actor,
                "refund",
                Some(refund.id),
                "refund.settled",
                common_audit::AuditSeverity::Info,
                serde_json::Value::Null,
                serde_json::to_value(refund).unwrap_or(serde_json::Value::Null),
            )
            .await;
    }

    pub async fn manual_settlement_queue_depth(&self) -> Result<i64, EngineError> {
        if let Some(count) = self.manual_queue.get(&()) {
            return Ok(count);
        }
        let count = repo::manual_settlement_count(&self.db).await?;
        self.manual_queue.put((), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn over_refund_is_rejected_with_eligible_amount() {
        let err = validate_refund(PaymentStatus::Paid, &dec("500.00"), &dec("100.00"), &dec("450.00"))
            .unwrap_err();
        assert!(err.to_string().contains("exceeds eligible amount (400.00)"));
    }

    #[test]
    fn untouched_order_names_the_full_paid_amount_as_eligible() {
        let err = validate_refund(PaymentStatus::Paid, &dec("1000"), &dec("0"), &dec("1200"))
            .unwrap_err();
        assert!(err.to_string().contains("Refund amount (1200)"));
        assert!(err.to_string().contains("eligible amount (1000)"));
    }

    #[test]
    fn unpaid_order_cannot_be_refunded() {
        let err = validate_refund(PaymentStatus::Pending, &dec("0"), &dec("0"), &dec("10.00"))
            .unwrap_err();
        assert_eq!(err.code(), "order_not_paid");
    }

    #[test]
    fn fully_refunded_order_conflicts() {
        let err = validate_refund(PaymentStatus::Refunded, &dec("100"), &dec("100"), &dec("1"))
            .unwrap_err();
        assert_eq!(err.code(), "already_refunded");
    }

    #[test]
    fn zero_amount_is_invalid() {
        let err =
            validate_refund(PaymentStatus::Paid, &dec("100"), &dec("0"), &dec("0")).unwrap_err();
        assert_eq!(err.code(), "invalid_amount");
    }

    #[test]
    fn exact_remainder_exhausts_the_order() {
        let plan =
            validate_refund(PaymentStatus::PartiallyRefunded, &dec("500"), &dec("200"), &dec("300"))
                .unwrap();
        // Still a partial-sized record, but it drains what is left.
        assert!(plan.is_partial);
        assert!(plan.exhausts);
        assert_eq!(plan.max_refundable, dec("300"));
    }

    #[test]
    fn full_amount_on_untouched_order_is_full() {
        let plan = validate_refund(PaymentStatus::Paid, &dec("500"), &dec("0"), &dec("500"))
            .unwrap();
        assert!(!plan.is_partial);
        assert!(plan.exhausts);
    }

    #[test]
    fn smaller_amount_is_partial() {
        let plan = validate_refund(PaymentStatus::Paid, &dec("500"), &dec("0"), &dec("120.50"))
            .unwrap();
        assert!(plan.is_partial);
        assert!(!plan.exhausts);
    }

    #[test]
    fn arrival_windows_per_rail() {
        let now = Utc::now();
        assert_eq!(estimated_arrival(PaymentMethod::Wallet, now), now);
        assert_eq!(estimated_arrival(PaymentMethod::Cod, now), now + chrono::Duration::days(3));
        assert_eq!(estimated_arrival(PaymentMethod::Card, now), now + chrono::Duration::days(7));
        assert_eq!(estimated_arrival(PaymentMethod::Upi, now), now + chrono::Duration::days(7));
    }

    #[test]
    fn record_status_follows_gateway_vocabulary() {
        assert_eq!(refund_record_status("processed"), "completed");
        assert_eq!(refund_record_status("completed"), "completed");
        assert_eq!(refund_record_status("pending_manual_processing"), "pending");
        assert_eq!(refund_record_status("created"), "processing");
    }
}
