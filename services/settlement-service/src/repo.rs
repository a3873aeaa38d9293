use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::EngineError;
use crate::order::{OrderRecord, TimelineEntry};

/// Creates the schema when it does not exist yet. Lets the service come up
/// against a fresh database in dev and in the DB-gated tests.
pub async fn ensure_schema(db: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            user_id UUID NOT NULL,
            merchant_id UUID NOT NULL,
            status TEXT NOT NULL DEFAULT 'placed',
            items JSONB NOT NULL DEFAULT '[]'::jsonb,
            timeline JSONB NOT NULL DEFAULT '[]'::jsonb,
            subtotal NUMERIC NOT NULL DEFAULT 0,
            tax NUMERIC NOT NULL DEFAULT 0,
            discount NUMERIC NOT NULL DEFAULT 0,
            total NUMERIC NOT NULL DEFAULT 0,
            paid_amount NUMERIC NOT NULL DEFAULT 0,
            refund_amount NUMERIC NOT NULL DEFAULT 0,
            payment_method TEXT NOT NULL DEFAULT 'upi',
            payment_status TEXT NOT NULL DEFAULT 'pending',
            transaction_id TEXT,
            refund_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(db)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS refunds (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL REFERENCES orders(id),
            user_id UUID NOT NULL,
            amount NUMERIC NOT NULL,
            reason TEXT NOT NULL,
            refund_type TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            gateway_refund_id TEXT,
            gateway_status TEXT NOT NULL,
            status TEXT NOT NULL,
            refunded_items JSONB NOT NULL DEFAULT '[]'::jsonb,
            estimated_arrival TIMESTAMPTZ NOT NULL,
            customer_notified BOOLEAN NOT NULL DEFAULT FALSE,
            admin_notified BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(db)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS cashback_requests (
            id UUID PRIMARY KEY,
            request_number TEXT NOT NULL UNIQUE,
            merchant_id UUID NOT NULL,
            user_id UUID NOT NULL,
            order_id UUID NOT NULL,
            requested_amount NUMERIC NOT NULL,
            approved_amount NUMERIC,
            cashback_rate NUMERIC,
            approval_notes TEXT,
            rejection_reason TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            risk_score INTEGER NOT NULL DEFAULT 0,
            risk_factors JSONB NOT NULL DEFAULT '[]'::jsonb,
            flagged_for_review BOOLEAN NOT NULL DEFAULT FALSE,
            payout_method TEXT,
            payout_reference TEXT,
            reviewed_by UUID,
            reviewed_at TIMESTAMPTZ,
            paid_at TIMESTAMPTZ,
            timeline JSONB NOT NULL DEFAULT '[]'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(db)
    .await?;
    // Columns added after the table first shipped.
    for stmt in [
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS request_number TEXT",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS cashback_rate NUMERIC",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS approval_notes TEXT",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS rejection_reason TEXT",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS reviewed_by UUID",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS reviewed_at TIMESTAMPTZ",
        "ALTER TABLE cashback_requests ADD COLUMN IF NOT EXISTS paid_at TIMESTAMPTZ",
    ] {
        sqlx::query(stmt).execute(db).await?;
    }
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS user_cashbacks (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            order_id UUID NOT NULL,
            amount NUMERIC NOT NULL,
            source TEXT NOT NULL DEFAULT 'order',
            status TEXT NOT NULL DEFAULT 'pending',
            available_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            credited_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(db)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS wallets (
            user_id UUID PRIMARY KEY,
            balance NUMERIC NOT NULL DEFAULT 0,
            is_frozen BOOLEAN NOT NULL DEFAULT FALSE,
            freeze_reason TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(db)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS products (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0,
            is_available BOOLEAN NOT NULL DEFAULT TRUE
        )"#,
    )
    .execute(db)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS product_variants (
            product_id UUID NOT NULL REFERENCES products(id),
            variant_type TEXT NOT NULL,
            variant_value TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (product_id, variant_type, variant_value)
        )"#,
    )
    .execute(db)
    .await?;
    Ok(())
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, merchant_id, status, items, timeline, \
     subtotal, tax, discount, total, paid_amount, refund_amount, payment_method, payment_status, \
     transaction_id, refund_id, created_at, updated_at";

pub async fn get_order(db: &PgPool, id: Uuid) -> Result<Option<OrderRecord>, EngineError> {
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

pub async fn get_order_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<OrderRecord>, EngineError> {
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(rec)
}

/// Applies refund totals with a guard in the WHERE clause: the update only
/// lands if the eligible amount still covers this refund, so two concurrent
/// refunds cannot both drain the same balance. A zero-row result is a
/// conflict, not a missing order. The resulting order and payment status
/// are computed from the post-update balance inside the statement, so a
/// refund that drains the order under concurrency still lands on
/// `refunded` even when the pre-read saw an untouched balance.
pub async fn apply_refund_totals(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    amount: &BigDecimal,
    refund_reference: &str,
    timeline_entry: &TimelineEntry,
) -> Result<OrderRecord, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        r#"UPDATE orders
           SET refund_amount = refund_amount + $2,
               status = CASE WHEN paid_amount - refund_amount - $2 <= 0
                             THEN 'refunded' ELSE 'partially_refunded' END,
               payment_status = CASE WHEN paid_amount - refund_amount - $2 <= 0
                                     THEN 'refunded' ELSE 'partially_refunded' END,
               refund_id = $3,
               timeline = timeline || jsonb_set(
                   $4::jsonb, '{{0,status}}',
                   CASE WHEN paid_amount - refund_amount - $2 <= 0
                        THEN '"refunded"'::jsonb ELSE '"partially_refunded"'::jsonb END),
               updated_at = now()
           WHERE id = $1 AND paid_amount - refund_amount >= $2
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(order_id)
    .bind(amount)
    .bind(refund_reference)
    .bind(serde_json::json!([entry]))
    .fetch_optional(&mut **tx)
    .await?;
    rec.ok_or_else(|| {
        EngineError::conflict(
            "refund_exceeds_eligible",
            "Concurrent refund reduced the eligible amount; nothing was changed",
        )
    })
}

pub async fn update_order_status(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    new_status: &str,
    timeline_entry: &TimelineEntry,
) -> Result<OrderRecord, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        r#"UPDATE orders
           SET status = $2, timeline = timeline || $3::jsonb, updated_at = now()
           WHERE id = $1
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(order_id)
    .bind(new_status)
    .bind(serde_json::json!([entry]))
    .fetch_optional(&mut **tx)
    .await?;
    rec.ok_or(EngineError::NotFound("order"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundedItem {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RefundRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub reason: String,
    pub refund_type: String,
    pub payment_method: String,
    pub gateway_refund_id: Option<String>,
    pub gateway_status: String,
    pub status: String,
    pub refunded_items: Json<Vec<RefundedItem>>,
    pub estimated_arrival: DateTime<Utc>,
    pub customer_notified: bool,
    pub admin_notified: bool,
    pub created_at: DateTime<Utc>,
}

const REFUND_COLUMNS: &str = "id, order_id, user_id, amount, reason, refund_type, payment_method, \
     gateway_refund_id, gateway_status, status, refunded_items, estimated_arrival, \
     customer_notified, admin_notified, created_at";

pub struct NewRefund<'a> {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: &'a BigDecimal,
    pub reason: &'a str,
    pub refund_type: &'a str,
    pub payment_method: &'a str,
    pub gateway_refund_id: Option<&'a str>,
    pub gateway_status: &'a str,
    pub status: &'a str,
    pub refunded_items: &'a [RefundedItem],
    pub estimated_arrival: DateTime<Utc>,
}

pub async fn insert_refund(
    tx: &mut Transaction<'_, Postgres>,
    refund: NewRefund<'_>,
) -> Result<RefundRecord, EngineError> {
    let items = serde_json::to_value(refund.refunded_items)
        .map_err(|e| EngineError::Gateway(format!("refunded items serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, RefundRecord>(&format!(
        r#"INSERT INTO refunds (id, order_id, user_id, amount, reason, refund_type, payment_method,
                gateway_refund_id, gateway_status, status, refunded_items, estimated_arrival)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
           RETURNING {REFUND_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(refund.order_id)
    .bind(refund.user_id)
    .bind(refund.amount)
    .bind(refund.reason)
    .bind(refund.refund_type)
    .bind(refund.payment_method)
    .bind(refund.gateway_refund_id)
    .bind(refund.gateway_status)
    .bind(refund.status)
    .bind(items)
    .bind(refund.estimated_arrival)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec)
}

pub async fn list_refunds_for_order(
    db: &PgPool,
    order_id: Uuid,
) -> Result<Vec<RefundRecord>, EngineError> {
    let recs = sqlx::query_as::<_, RefundRecord>(&format!(
        "SELECT {REFUND_COLUMNS} FROM refunds WHERE order_id = $1 ORDER BY created_at"
    ))
    .bind(order_id)
    .fetch_all(db)
    .await?;
    Ok(recs)
}

/// Units already restocked per item across this order's earlier refunds.
/// Failed or cancelled refunds never restocked anything, so they are
/// excluded from the sum.
pub async fn refunded_quantities(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<std::collections::HashMap<Uuid, i32>, EngineError> {
    let rows: Vec<(Json<Vec<RefundedItem>>,)> = sqlx::query_as(
        "SELECT refunded_items FROM refunds
         WHERE order_id = $1 AND status NOT IN ('failed', 'cancelled')",
    )
    .bind(order_id)
    .fetch_all(&mut **tx)
    .await?;
    let mut totals = std::collections::HashMap::new();
    for (Json(items),) in rows {
        for item in items {
            *totals.entry(item.item_id).or_insert(0) += item.quantity;
        }
    }
    Ok(totals)
}

pub async fn mark_refund_notified(
    db: &PgPool,
    refund_id: Uuid,
    customer: bool,
    admin: bool,
) -> Result<(), EngineError> {
    sqlx::query(
        "UPDATE refunds SET customer_notified = customer_notified OR $2,
                            admin_notified = admin_notified OR $3
         WHERE id = $1",
    )
    .bind(refund_id)
    .bind(customer)
    .bind(admin)
    .execute(db)
    .await?;
    Ok(())
}

/// Credits a user's wallet inside the settlement transaction. Locks the row,
/// creates the wallet lazily, refuses frozen wallets so the whole settlement
/// rolls back.
pub async fn credit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), EngineError> {
    let row: Option<(bool, Option<String>)> =
        sqlx::query_as("SELECT is_frozen, freeze_reason FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
    match row {
        Some((true, reason)) => {
            return Err(EngineError::WalletFrozen {
                reason: reason.unwrap_or_else(|| "no reason recorded".into()),
            });
        }
        Some((false, _)) => {
            sqlx::query(
                "UPDATE wallets SET balance = balance + $2, updated_at = now() WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query("INSERT INTO wallets (user_id, balance) VALUES ($1, $2)")
                .bind(user_id)
                .bind(amount)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CashbackRequest {
    pub id: Uuid,
    pub request_number: String,
    pub merchant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub requested_amount: BigDecimal,
    pub approved_amount: Option<BigDecimal>,
    pub cashback_rate: Option<BigDecimal>,
    pub approval_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub status: String,
    pub risk_score: i32,
    pub risk_factors: Json<Vec<String>>,
    pub flagged_for_review: bool,
    pub payout_method: Option<String>,
    pub payout_reference: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub timeline: Json<Vec<TimelineEntry>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CASHBACK_COLUMNS: &str = "id, request_number, merchant_id, user_id, order_id, \
     requested_amount, approved_amount, cashback_rate, approval_notes, rejection_reason, \
     status, risk_score, risk_factors, flagged_for_review, payout_method, payout_reference, \
     reviewed_by, reviewed_at, paid_at, timeline, created_at, updated_at";

pub struct NewCashbackRequest<'a> {
    pub merchant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub requested_amount: &'a BigDecimal,
    /// The merchant rate the amount was derived from; absent for explicit
    /// amounts.
    pub cashback_rate: Option<&'a BigDecimal>,
    pub risk_score: i32,
    pub risk_factors: &'a [String],
    pub flagged_for_review: bool,
}

fn next_request_number() -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("CB-{}", tail[..10].to_uppercase())
}

pub async fn insert_cashback_request(
    db: &PgPool,
    req: NewCashbackRequest<'_>,
) -> Result<CashbackRequest, EngineError> {
    let status = if req.flagged_for_review { "under_review" } else { "pending" };
    let entry = serde_json::to_value([TimelineEntry::now(status, None)])
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let factors = serde_json::to_value(req.risk_factors)
        .map_err(|e| EngineError::Gateway(format!("risk factors serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, CashbackRequest>(&format!(
        r#"INSERT INTO cashback_requests
               (id, request_number, merchant_id, user_id, order_id, requested_amount,
                cashback_rate, status, risk_score, risk_factors, flagged_for_review, timeline)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
           RETURNING {CASHBACK_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(next_request_number())
    .bind(req.merchant_id)
    .bind(req.user_id)
    .bind(req.order_id)
    .bind(req.requested_amount)
    .bind(req.cashback_rate)
    .bind(status)
    .bind(req.risk_score)
    .bind(factors)
    .bind(req.flagged_for_review)
    .bind(entry)
    .fetch_one(db)
    .await?;
    Ok(rec)
}

pub async fn get_cashback_request(
    db: &PgPool,
    id: Uuid,
) -> Result<Option<CashbackRequest>, EngineError> {
    let rec = sqlx::query_as::<_, CashbackRequest>(&format!(
        "SELECT {CASHBACK_COLUMNS} FROM cashback_requests WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

pub async fn list_cashback_requests(
    db: &PgPool,
    merchant_id: Uuid,
    status: Option<&str>,
) -> Result<Vec<CashbackRequest>, EngineError> {
    let recs = match status {
        Some(status) => {
            sqlx::query_as::<_, CashbackRequest>(&format!(
                "SELECT {CASHBACK_COLUMNS} FROM cashback_requests
                 WHERE merchant_id = $1 AND status = $2 ORDER BY created_at DESC"
            ))
            .bind(merchant_id)
            .bind(status)
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query_as::<_, CashbackRequest>(&format!(
                "SELECT {CASHBACK_COLUMNS} FROM cashback_requests
                 WHERE merchant_id = $1 ORDER BY created_at DESC"
            ))
            .bind(merchant_id)
            .fetch_all(db)
            .await?
        }
    };
    Ok(recs)
}

/// Carries everything a review decision writes in one conditional update.
pub struct CashbackDecision<'a> {
    pub to_status: &'a str,
    pub approved_amount: Option<&'a BigDecimal>,
    pub approval_notes: Option<&'a str>,
    pub rejection_reason: Option<&'a str>,
    pub reviewed_by: Option<Uuid>,
}

/// Check-then-transition: the status list in the WHERE clause is the check,
/// so a request already resolved by a concurrent reviewer simply yields zero
/// rows.
pub async fn transition_cashback(
    db: &PgPool,
    id: Uuid,
    from_statuses: &[&str],
    decision: CashbackDecision<'_>,
    timeline_entry: &TimelineEntry,
) -> Result<Option<CashbackRequest>, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let from: Vec<String> = from_statuses.iter().map(|s| s.to_string()).collect();
    let rec = sqlx::query_as::<_, CashbackRequest>(&format!(
        r#"UPDATE cashback_requests
           SET status = $2,
               approved_amount = COALESCE($3, approved_amount),
               approval_notes = COALESCE($4, approval_notes),
               rejection_reason = COALESCE($5, rejection_reason),
               reviewed_by = $6,
               reviewed_at = now(),
               timeline = timeline || $7::jsonb,
               updated_at = now()
           WHERE id = $1 AND status = ANY($8)
           RETURNING {CASHBACK_COLUMNS}"#
    ))
    .bind(id)
    .bind(decision.to_status)
    .bind(decision.approved_amount)
    .bind(decision.approval_notes)
    .bind(decision.rejection_reason)
    .bind(decision.reviewed_by)
    .bind(serde_json::json!([entry]))
    .bind(&from)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

/// Runs inside the caller's transaction so the `approved -> paid` flip and
/// the money movement commit or roll back together. Zero rows means a
/// concurrent payout already claimed the request.
pub async fn mark_cashback_paid(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    payout_method: &str,
    payout_reference: &str,
    timeline_entry: &TimelineEntry,
) -> Result<Option<CashbackRequest>, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, CashbackRequest>(&format!(
        r#"UPDATE cashback_requests
           SET status = 'paid',
               approved_amount = COALESCE(approved_amount, requested_amount),
               payout_method = $2,
               payout_reference = $3,
               paid_at = now(),
               timeline = timeline || $4::jsonb,
               updated_at = now()
           WHERE id = $1 AND status = 'approved'
           RETURNING {CASHBACK_COLUMNS}"#
    ))
    .bind(id)
    .bind(payout_method)
    .bind(payout_reference)
    .bind(serde_json::json!([entry]))
    .fetch_optional(&mut **tx)
    .await?;
    Ok(rec)
}

pub async fn pending_cashback_count(db: &PgPool, merchant_id: Uuid) -> Result<i64, EngineError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM cashback_requests
         WHERE merchant_id = $1 AND status IN ('pending', 'under_review')",
    )
    .bind(merchant_id)
    .fetch_one(db)
    .await?;
    Ok(count)
}

pub async fn manual_settlement_count(db: &PgPool) -> Result<i64, EngineError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM refunds WHERE gateway_status = 'pending_manual_processing'",
    )
    .fetch_one(db)
    .await?;
    Ok(count)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CashbackStats {
    pub total_requests: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub paid: i64,
    pub total_paid_amount: BigDecimal,
}

pub async fn cashback_stats(db: &PgPool, merchant_id: Uuid) -> Result<CashbackStats, EngineError> {
    let rec = sqlx::query_as::<_, CashbackStats>(
        r#"SELECT COUNT(*) AS total_requests,
                  COUNT(*) FILTER (WHERE status IN ('pending', 'under_review')) AS pending,
                  COUNT(*) FILTER (WHERE status = 'approved') AS approved,
                  COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
                  COUNT(*) FILTER (WHERE status = 'paid') AS paid,
                  COALESCE(SUM(approved_amount) FILTER (WHERE status = 'paid'), 0) AS total_paid_amount
           FROM cashback_requests WHERE merchant_id = $1"#,
    )
    .bind(merchant_id)
    .fetch_one(db)
    .await?;
    Ok(rec)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserCashback {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub source: String,
    pub status: String,
    pub available_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub credited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const USER_CASHBACK_COLUMNS: &str =
    "id, user_id, order_id, amount, source, status, available_at, expires_at, credited_at, created_at";

#[allow(clippy::too_many_arguments)]
pub async fn insert_user_cashback(
    db: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    amount: &BigDecimal,
    source: &str,
    available_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<UserCashback, EngineError> {
    let rec = sqlx::query_as::<_, UserCashback>(&format!(
        r#"INSERT INTO user_cashbacks (id, user_id, order_id, amount, source, available_at, expires_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING {USER_CASHBACK_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(order_id)
    .bind(amount)
    .bind(source)
    .bind(available_at)
    .bind(expires_at)
    .fetch_one(db)
    .await?;
    Ok(rec)
}

pub async fn get_user_cashback(db: &PgPool, id: Uuid) -> Result<Option<UserCashback>, EngineError> {
    let rec = sqlx::query_as::<_, UserCashback>(&format!(
        "SELECT {USER_CASHBACK_COLUMNS} FROM user_cashbacks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

/// Flips a pending entry to credited. The status guard makes the credit
/// idempotent under concurrent calls.
pub async fn mark_user_cashback_credited(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<UserCashback>, EngineError> {
    let rec = sqlx::query_as::<_, UserCashback>(&format!(
        r#"UPDATE user_cashbacks
           SET status = 'credited', credited_at = now()
           WHERE id = $1 AND status = 'pending'
           RETURNING {USER_CASHBACK_COLUMNS}"#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(rec)
}

pub async fn list_ready_user_cashbacks(
    db: &PgPool,
    limit: i64,
) -> Result<Vec<UserCashback>, EngineError> {
    let recs = sqlx::query_as::<_, UserCashback>(&format!(
        r#"SELECT {USER_CASHBACK_COLUMNS} FROM user_cashbacks
           WHERE status = 'pending' AND available_at <= now() AND expires_at > now()
           ORDER BY available_at
           LIMIT $1"#
    ))
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(recs)
}

pub async fn expire_stale_user_cashbacks(db: &PgPool) -> Result<u64, EngineError> {
    let rows = sqlx::query(
        "UPDATE user_cashbacks SET status = 'expired'
         WHERE status = 'pending' AND expires_at <= now()",
    )
    .execute(db)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Webhook-driven payment updates keyed by the gateway transaction id.
pub async fn apply_payment_captured(
    db: &PgPool,
    transaction_id: &str,
    timeline_entry: &TimelineEntry,
) -> Result<Option<OrderRecord>, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        r#"UPDATE orders
           SET payment_status = 'paid', paid_amount = total,
               status = CASE WHEN status = 'placed' THEN 'confirmed' ELSE status END,
               timeline = timeline || $2::jsonb, updated_at = now()
           WHERE transaction_id = $1 AND payment_status = 'pending'
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(transaction_id)
    .bind(serde_json::json!([entry]))
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

pub async fn apply_payment_failed(
    db: &PgPool,
    transaction_id: &str,
    timeline_entry: &TimelineEntry,
) -> Result<Option<OrderRecord>, EngineError> {
    let entry = serde_json::to_value(timeline_entry)
        .map_err(|e| EngineError::Gateway(format!("timeline serialization failed: {e}")))?;
    let rec = sqlx::query_as::<_, OrderRecord>(&format!(
        r#"UPDATE orders
           SET payment_status = 'failed', status = 'payment_failed',
               timeline = timeline || $2::jsonb, updated_at = now()
           WHERE transaction_id = $1 AND payment_status = 'pending'
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(transaction_id)
    .bind(serde_json::json!([entry]))
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

/// Gateway-confirmed refund: reconciles our refund row with the provider's
/// final status.
pub async fn apply_refund_settled(
    db: &PgPool,
    gateway_refund_id: &str,
    gateway_status: &str,
) -> Result<Option<RefundRecord>, EngineError> {
    let status = match gateway_status {
        "completed" | "processed" => "completed",
        "failed" => "failed",
        _ => "processing",
    };
    let rec = sqlx::query_as::<_, RefundRecord>(&format!(
        r#"UPDATE refunds SET gateway_status = $2, status = $3
           WHERE gateway_refund_id = $1
           RETURNING {REFUND_COLUMNS}"#
    ))
    .bind(gateway_refund_id)
    .bind(gateway_status)
    .bind(status)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}
