use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration as ChronoDuration, Utc};
use common_audit::{AuditActor, AuditProducer, AuditSeverity};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::CountCache;
use crate::error::EngineError;
use crate::gateway::GatewaySet;
use crate::notify::NotificationSink;
use crate::order::TimelineEntry;
use crate::repo::{self, CashbackRequest, CashbackStats, NewCashbackRequest, UserCashback};

/// Days before a user-facing cashback entry becomes redeemable, and days
/// until an unredeemed entry lapses.
pub const CASHBACK_PENDING_DAYS: i64 = 7;
pub const CASHBACK_EXPIRY_DAYS: i64 = 90;

/// Default merchant cashback rate applied when no explicit amount is given.
pub const DEFAULT_CASHBACK_PERCENT: i64 = 5;

const PENDING_COUNT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RiskInput {
    pub requested_amount: BigDecimal,
    pub account_age_days: i64,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub score: i32,
    pub factors: Vec<String>,
    pub flagged_for_review: bool,
}

/// Scores a cashback request. Large amounts and young accounts are high
/// signals, an unverified account is a medium signal; weights are
/// low 10 / medium 25 / high 40, capped at 100. Anything scoring 70 or
/// carrying a high signal is flagged for manual review.
pub fn assess_risk(input: &RiskInput) -> RiskAssessment {
    let mut score = 0i32;
    let mut factors = Vec::new();
    let mut any_high = false;

    let threshold = BigDecimal::from(100);
    if input.requested_amount > threshold {
        score += 40;
        any_high = true;
        factors.push("high_amount".to_string());
    }
    if input.account_age_days < 7 {
        score += 40;
        any_high = true;
        factors.push("new_account".to_string());
    }
    if !input.verified {
        score += 25;
        factors.push("unverified_account".to_string());
    }

    let score = score.min(100);
    RiskAssessment { score, factors, flagged_for_review: score >= 70 || any_high }
}

#[derive(Debug, Clone)]
pub struct CreateCashbackRequest {
    pub merchant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    /// Explicit amount; defaults to a percentage of the order total.
    pub amount: Option<BigDecimal>,
    pub account_age_days: i64,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkCashbackAction {
    Approve,
    Reject,
}

#[derive(Debug, Serialize)]
pub struct BatchItemOutcome {
    pub request_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<BatchItemOutcome>,
}

pub struct CashbackEngine {
    db: PgPool,
    gateways: Arc<GatewaySet>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<AuditProducer>,
    pending_counts: Arc<CountCache<Uuid>>,
}

impl CashbackEngine {
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
            pending_counts: Arc::new(CountCache::new(PENDING_COUNT_TTL)),
        }
    }

    pub fn pending_count_cache(&self) -> Arc<CountCache<Uuid>> {
        self.pending_counts.clone()
    }

    pub async fn create(&self, req: CreateCashbackRequest) -> Result<CashbackRequest, EngineError> {
        let (amount, rate) = match req.amount {
            Some(amount) => {
                if amount <= BigDecimal::zero() {
                    return Err(EngineError::validation(
                        "invalid_amount",
                        "Cashback amount must be greater than 0",
                    ));
                }
                (amount, None)
            }
            None => {
                let order = repo::get_order(&self.db, req.order_id)
                    .await?
                    .ok_or(EngineError::NotFound("order"))?;
                let rate = BigDecimal::from(DEFAULT_CASHBACK_PERCENT);
                (&order.total * &rate / BigDecimal::from(100), Some(rate))
            }
        };

        let risk = assess_risk(&RiskInput {
            requested_amount: amount.clone(),
            account_age_days: req.account_age_days,
            verified: req.verified,
        });

        let rec = repo::insert_cashback_request(
            &self.db,
            NewCashbackRequest {
                merchant_id: req.merchant_id,
                user_id: req.user_id,
                order_id: req.order_id,
                requested_amount: &amount,
                cashback_rate: rate.as_ref(),
                risk_score: risk.score,
                risk_factors: &risk.factors,
                flagged_for_review: risk.flagged_for_review,
            },
        )
        .await?;

        self.pending_counts.invalidate(&req.merchant_id);
        if let Err(e) = self.notifier.send_cashback_update(rec.user_id, rec.id, &rec.status).await {
            warn!(request_id = %rec.id, error = %e, "cashback notification failed");
        }
        Ok(rec)
    }

    pub async fn get(&self, id: Uuid) -> Result<CashbackRequest, EngineError> {
        repo::get_cashback_request(&self.db, id)
            .await?
            .ok_or(EngineError::NotFound("cashback_request"))
    }

    pub async fn list(
        &self,
        merchant_id: Uuid,
        status: Option<&str>,
    ) -> Result<Vec<CashbackRequest>, EngineError> {
        repo::list_cashback_requests(&self.db, merchant_id, status).await
    }

    pub async fn approve(
        &self,
        id: Uuid,
        approved_amount: Option<BigDecimal>,
        notes: Option<String>,
        actor: AuditActor,
    ) -> Result<CashbackRequest, EngineError> {
        let current = self.get(id).await?;
        if let Some(approved) = &approved_amount {
            if approved > &current.requested_amount {
                return Err(EngineError::validation(
                    "approved_exceeds_requested",
                    format!(
                        "Approved amount ({approved}) exceeds requested amount ({})",
                        current.requested_amount
                    ),
                ));
            }
            if approved <= &BigDecimal::zero() {
                return Err(EngineError::validation(
                    "invalid_amount",
                    "Approved amount must be greater than 0",
                ));
            }
        }
        let amount = approved_amount.unwrap_or_else(|| current.requested_amount.clone());
        let mut entry = TimelineEntry::now("approved", Some(format!("Approved for {amount}")));
        entry.actor = actor.name.clone();
        let updated = repo::transition_cashback(
            &self.db,
            id,
            &["pending", "under_review"],
            repo::CashbackDecision {
                to_status: "approved",
                approved_amount: Some(&amount),
                approval_notes: notes.as_deref(),
                rejection_reason: None,
                reviewed_by: actor.id,
            },
            &entry,
        )
        .await?
        .ok_or_else(|| {
            EngineError::conflict("invalid_status", format!("Invalid status: {}", current.status))
        })?;

        self.finish_transition(&updated, actor, "cashback.approved").await;
        Ok(updated)
    }

    pub async fn reject(
        &self,
        id: Uuid,
        reason: Option<String>,
        actor: AuditActor,
    ) -> Result<CashbackRequest, EngineError> {
        let current = self.get(id).await?;
        let mut entry = TimelineEntry::now("rejected", reason.clone());
        entry.actor = actor.name.clone();
        let updated = repo::transition_cashback(
            &self.db,
            id,
            &["pending", "under_review"],
            repo::CashbackDecision {
                to_status: "rejected",
                approved_amount: None,
                approval_notes: None,
                rejection_reason: reason.as_deref(),
                reviewed_by: actor.id,
            },
            &entry,
        )
        .await?
        .ok_or_else(|| {
            EngineError::conflict("invalid_status", format!("Invalid status: {}", current.status))
        })?;

        self.finish_transition(&updated, actor, "cashback.rejected").await;
        Ok(updated)
    }

    /// Applies one action to many requests. Each item transitions on its own
    /// conditional update, so one bad id never blocks the rest; the outcome
    /// says exactly which items failed and why.
    pub async fn bulk(
        &self,
        ids: &[Uuid],
        action: BulkCashbackAction,
        actor: AuditActor,
    ) -> Result<BatchOutcome, EngineError> {
        let mut results = Vec::with_capacity(ids.len());
        let mut success_count = 0usize;
        for &id in ids {
            let outcome = match action {
                BulkCashbackAction::Approve => self.approve(id, None, None, actor.clone()).await,
                BulkCashbackAction::Reject => {
                    self.reject(id, Some("bulk rejection".into()), actor.clone()).await
                }
            };
            match outcome {
                Ok(rec) => {
                    success_count += 1;
                    results.push(BatchItemOutcome {
                        request_id: id,
                        success: true,
                        status: Some(rec.status),
                        reason: None,
                    });
                }
                Err(EngineError::NotFound(_)) => {
                    results.push(BatchItemOutcome {
                        request_id: id,
                        success: false,
                        status: None,
                        reason: Some("Cashback request not found".into()),
                    });
                }
                Err(EngineError::Conflict { message, .. }) => {
                    results.push(BatchItemOutcome {
                        request_id: id,
                        success: false,
                        status: None,
                        reason: Some(message),
                    });
                }
                Err(e) => {
                    warn!(request_id = %id, error = %e, "bulk cashback item failed");
                    results.push(BatchItemOutcome {
                        request_id: id,
                        success: false,
                        status: None,
                        reason: Some("Processing error".into()),
                    });
                }
            }
        }
        Ok(BatchOutcome {
            success_count,
            failed_count: results.len() - success_count,
            results,
        })
    }

    /// Marks an approved request paid. Wallet payouts credit the user's
    /// wallet; bank transfers go out through the payout rail first.
    pub async fn mark_paid(
        &self,
        id: Uuid,
        payout_method: &str,
        actor: AuditActor,
    ) -> Result<CashbackRequest, EngineError> {
        let current = self.get(id).await?;
        if current.status != "approved" {
            return Err(EngineError::conflict(
                "invalid_status",
                format!(
                    "Cannot mark as paid. Current status is '{}'. Must be 'approved'.",
                    current.status
                ),
            ));
        }
        let amount = current
            .approved_amount
            .clone()
            .unwrap_or_else(|| current.requested_amount.clone());

        let mut entry = TimelineEntry::now("paid", Some(format!("Paid {amount} via {payout_method}")));
        entry.actor = actor.name.clone();

        let updated = match payout_method {
            // The conditional status flip and the wallet credit share one
            // transaction, with the flip first: a concurrent payout that
            // already claimed the request yields zero rows and the credit
            // never happens.
            "wallet" => {
                let reference = format!("wallet_payout_{}", Uuid::new_v4());
                let mut tx = self.db.begin().await.map_err(EngineError::Database)?;
                let updated =
                    repo::mark_cashback_paid(&mut tx, id, payout_method, &reference, &entry)
                        .await?
                        .ok_or_else(|| {
                            EngineError::conflict(
                                "invalid_status",
                                "Cashback request left 'approved' before the payout was recorded",
                            )
                        })?;
                repo::credit_wallet(&mut tx, current.user_id, &amount).await?;
                tx.commit().await.map_err(EngineError::Database)?;
                updated
            }
            "bank_transfer" => {
                let reference =
                    self.gateways.payout_rail()?.create_payout(current.user_id, &amount).await?;
                let mut tx = self.db.begin().await.map_err(EngineError::Database)?;
                let updated =
                    repo::mark_cashback_paid(&mut tx, id, payout_method, &reference, &entry).await?;
                tx.commit().await.map_err(EngineError::Database)?;
                match updated {
                    Some(updated) => updated,
                    None => {
                        // The transfer already went out; surface it for
                        // operator reconciliation instead of hiding it
                        // behind the conflict.
                        error!(
                            request_id = %id,
                            payout_reference = %reference,
                            reconciliation_required = true,
                            "payout sent but cashback request left 'approved' before it was recorded"
                        );
                        return Err(EngineError::conflict(
                            "invalid_status",
                            "Cashback request left 'approved' before the payout was recorded",
                        ));
                    }
                }
            }
            other => {
                return Err(EngineError::validation(
                    "unsupported_payout_method",
                    format!("Unsupported payout method '{other}'"),
                ));
            }
        };

        self.finish_transition(&updated, actor, "cashback.paid").await;
        Ok(updated)
    }

    pub async fn pending_count(&self, merchant_id: Uuid) -> Result<i64, EngineError> {
        if let Some(count) = self.pending_counts.get(&merchant_id) {
            return Ok(count);
        }
        let count = repo::pending_cashback_count(&self.db, merchant_id).await?;
        self.pending_counts.put(merchant_id, count);
        Ok(count)
    }

    pub async fn stats(&self, merchant_id: Uuid) -> Result<CashbackStats, EngineError> {
        repo::cashback_stats(&self.db, merchant_id).await
    }

    /// Post-transition side effects: cache eviction, customer notification,
    /// audit. All best-effort.
    async fn finish_transition(&self, rec: &CashbackRequest, actor: AuditActor, action: &str) {
        self.pending_counts.invalidate(&rec.merchant_id);
        if let Err(e) = self.notifier.send_cashback_update(rec.user_id, rec.id, &rec.status).await {
            warn!(request_id = %rec.id, error = %e, "cashback notification failed");
        }
        self.audit
            .emit(
                actor,
                "cashback_request",
                Some(rec.id),
                action,
                AuditSeverity::Info,
                serde_json::Value::Null,
                serde_json::to_value(rec).unwrap_or(serde_json::Value::Null),
            )
            .await;
    }

    /// Creates the user-facing ledger entry for a settled cashback. It
    /// matures after [`CASHBACK_PENDING_DAYS`] and lapses after
    /// [`CASHBACK_EXPIRY_DAYS`].
    pub async fn create_ledger_entry(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        amount: &BigDecimal,
        source: &str,
    ) -> Result<UserCashback, EngineError> {
        if amount <= &BigDecimal::zero() {
            return Err(EngineError::validation(
                "invalid_amount",
                "Cashback amount must be greater than 0",
            ));
        }
        if !matches!(source, "order" | "referral" | "promotion" | "bonus" | "signup") {
            return Err(EngineError::validation(
                "invalid_source",
                format!("Unknown cashback source '{source}'"),
            ));
        }
        let now = Utc::now();
        repo::insert_user_cashback(
            &self.db,
            user_id,
            order_id,
            amount,
            source,
            now + ChronoDuration::days(CASHBACK_PENDING_DAYS),
            now + ChronoDuration::days(CASHBACK_EXPIRY_DAYS),
        )
        .await
    }

    /// Credits one matured ledger entry to the user's wallet. Guards are
    /// checked in order: the entry must exist, still be pending, be matured
    /// and not yet expired.
    pub async fn credit_ledger_entry(&self, id: Uuid) -> Result<UserCashback, EngineError> {
        let entry = repo::get_user_cashback(&self.db, id)
            .await?
            .ok_or(EngineError::NotFound("cashback_entry"))?;
        if entry.status != "pending" {
            return Err(EngineError::conflict(
                "invalid_status",
                format!("Cashback is '{}', only pending entries can be credited", entry.status),
            ));
        }
        let now = Utc::now();
        if entry.available_at > now {
            return Err(EngineError::conflict(
                "not_matured",
                format!("Cashback matures at {}", entry.available_at),
            ));
        }
        if entry.expires_at <= now {
            return Err(EngineError::conflict("expired", "Cashback has expired"));
        }

        let mut tx = self.db.begin().await.map_err(EngineError::Database)?;
        let updated = repo::mark_user_cashback_credited(&mut tx, id).await?.ok_or_else(|| {
            EngineError::conflict("invalid_status", "Cashback was credited concurrently")
        })?;
        repo::credit_wallet(&mut tx, updated.user_id, &updated.amount).await?;
        tx.commit().await.map_err(EngineError::Database)?;
        Ok(updated)
    }

    /// Sweeps matured entries into wallets and expires stale ones. Returns
    /// how many entries were credited.
    pub async fn redeem_ready(&self, limit: i64) -> Result<usize, EngineError> {
        let expired = repo::expire_stale_user_cashbacks(&self.db).await?;
        if expired > 0 {
            warn!(expired, "expired stale cashback entries");
        }
        let ready = repo::list_ready_user_cashbacks(&self.db, limit).await?;
        let mut credited = 0usize;
        for entry in ready {
            match self.credit_ledger_entry(entry.id).await {
                Ok(_) => credited += 1,
                Err(EngineError::WalletFrozen { reason }) => {
                    warn!(entry_id = %entry.id, reason, "skipping credit into frozen wallet");
                }
                Err(EngineError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(credited)
    }
}

/// Parses a decimal amount from an API payload, rejecting garbage early.
pub fn parse_amount(raw: &str) -> Result<BigDecimal, EngineError> {
    BigDecimal::from_str(raw)
        .map_err(|_| EngineError::validation("invalid_amount", format!("Not a valid amount: {raw}")))
}
