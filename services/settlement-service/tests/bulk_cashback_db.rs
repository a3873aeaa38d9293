use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use common_audit::{AuditActor, AuditProducer, NoopAuditSink};
use sqlx::PgPool;
use uuid::Uuid;

use settlement_service::cashback::{BulkCashbackAction, CashbackEngine, CreateCashbackRequest};
use settlement_service::gateway::{GatewaySet, StubGateway};
use settlement_service::notify::LogNotifier;
use settlement_service::repo;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn connect() -> PgPool {
    let dsn = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this ignored test");
    let pool = PgPool::connect(&dsn).await.unwrap();
    repo::ensure_schema(&pool).await.unwrap();
    pool
}

fn engine(db: PgPool) -> CashbackEngine {
    let gateways = Arc::new(GatewaySet::stubbed(Arc::new(StubGateway::new())));
    let audit = Arc::new(AuditProducer::new(Arc::new(NoopAuditSink), "settlement-service"));
    CashbackEngine::new(db, gateways, Arc::new(LogNotifier), audit)
}

fn actor() -> AuditActor {
    AuditActor { id: Some(Uuid::new_v4()), name: Some("reviewer".into()) }
}

async fn seed_request(engine: &CashbackEngine, merchant_id: Uuid, amount: &str) -> Uuid {
    engine
        .create(CreateCashbackRequest {
            merchant_id,
            user_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: Some(dec(amount)),
            account_age_days: 365,
            verified: true,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
#[ignore]
async fn bulk_approval_reports_per_item_outcomes() {
    let db = connect().await;
    let engine = engine(db.clone());
    let merchant_id = Uuid::new_v4();

    let ok_a = seed_request(&engine, merchant_id, "30.00").await;
    let ok_b = seed_request(&engine, merchant_id, "45.00").await;
    let done_a = seed_request(&engine, merchant_id, "10.00").await;
    let done_b = seed_request(&engine, merchant_id, "12.00").await;
    engine.approve(done_a, None, None, actor()).await.unwrap();
    engine.approve(done_b, None, None, actor()).await.unwrap();
    let missing = Uuid::new_v4();

    let outcome = engine
        .bulk(&[ok_a, done_a, missing, ok_b, done_b], BulkCashbackAction::Approve, actor())
        .await
        .unwrap();

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failed_count, 3);
    let by_id = |id: Uuid| outcome.results.iter().find(|r| r.request_id == id).unwrap();
    assert!(by_id(ok_a).success);
    assert!(by_id(ok_b).success);
    assert_eq!(by_id(missing).reason.as_deref(), Some("Cashback request not found"));
    assert!(by_id(done_a).reason.as_deref().unwrap().contains("Invalid status"));
    assert!(by_id(done_b).reason.as_deref().unwrap().contains("Invalid status"));
}

#[tokio::test]
#[ignore]
async fn flagged_request_lands_in_review_and_counts_as_pending() {
    let db = connect().await;
    let engine = engine(db.clone());
    let merchant_id = Uuid::new_v4();

    let flagged = engine
        .create(CreateCashbackRequest {
            merchant_id,
            user_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: Some(dec("250.00")),
            account_age_days: 2,
            verified: false,
        })
        .await
        .unwrap();
    assert_eq!(flagged.status, "under_review");
    assert!(flagged.flagged_for_review);
    assert_eq!(flagged.risk_score, 100);

    let count = engine.pending_count(merchant_id).await.unwrap();
    assert_eq!(count, 1);

    // Approving straight out of review is allowed; the count cache is
    // evicted by the transition.
    let approved = engine.approve(flagged.id, None, None, actor()).await.unwrap();
    assert!(approved.reviewed_by.is_some());
    assert!(approved.reviewed_at.is_some());
    let count = engine.pending_count(merchant_id).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore]
async fn mark_paid_requires_approved_status() {
    let db = connect().await;
    let engine = engine(db.clone());
    let merchant_id = Uuid::new_v4();

    let id = seed_request(&engine, merchant_id, "20.00").await;
    let err = engine.mark_paid(id, "wallet", actor()).await.unwrap_err();
    assert!(err.to_string().contains("Must be 'approved'"));

    engine.approve(id, Some(dec("15.00")), None, actor()).await.unwrap();
    let paid = engine.mark_paid(id, "wallet", actor()).await.unwrap();
    assert_eq!(paid.status, "paid");
    assert_eq!(paid.payout_method.as_deref(), Some("wallet"));
    assert!(paid.payout_reference.is_some());

    // Second attempt hits the status guard.
    let err = engine.mark_paid(id, "wallet", actor()).await.unwrap_err();
    assert!(err.to_string().contains("paid"));
}

#[tokio::test]
#[ignore]
async fn concurrent_wallet_payouts_credit_once() {
    let db = connect().await;
    let engine = engine(db.clone());
    let id = seed_request(&engine, Uuid::new_v4(), "10.00").await;
    engine.approve(id, None, None, actor()).await.unwrap();

    // The payout that loses the conditional status flip must not credit the
    // wallet.
    let (a, b) = tokio::join!(
        engine.mark_paid(id, "wallet", actor()),
        engine.mark_paid(id, "wallet", actor())
    );
    assert!(a.is_ok() != b.is_ok(), "exactly one payout should win");

    let rec = engine.get(id).await.unwrap();
    assert_eq!(rec.status, "paid");
    let (balance,): (BigDecimal,) =
        sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(rec.user_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(balance, dec("10.00"));
}

#[tokio::test]
#[ignore]
async fn decisions_record_reviewer_notes() {
    let db = connect().await;
    let engine = engine(db.clone());
    let merchant_id = Uuid::new_v4();

    let approved = seed_request(&engine, merchant_id, "20.00").await;
    let rec = engine
        .approve(approved, None, Some("loyal customer".into()), actor())
        .await
        .unwrap();
    assert!(rec.request_number.starts_with("CB-"));
    assert_eq!(rec.approval_notes.as_deref(), Some("loyal customer"));
    // Explicit amounts carry no derived rate.
    assert!(rec.cashback_rate.is_none());

    let rejected = seed_request(&engine, merchant_id, "20.00").await;
    let rec = engine.reject(rejected, Some("duplicate order".into()), actor()).await.unwrap();
    assert_eq!(rec.rejection_reason.as_deref(), Some("duplicate order"));
}

#[tokio::test]
#[ignore]
async fn approval_cannot_exceed_requested_amount() {
    let db = connect().await;
    let engine = engine(db.clone());
    let id = seed_request(&engine, Uuid::new_v4(), "20.00").await;

    let err = engine.approve(id, Some(dec("25.00")), None, actor()).await.unwrap_err();
    assert!(err.to_string().contains("exceeds requested amount"));
}

#[tokio::test]
#[ignore]
async fn ledger_entry_matures_before_credit() {
    let db = connect().await;
    let engine = engine(db.clone());
    let user_id = Uuid::new_v4();

    let entry = engine
        .create_ledger_entry(user_id, Uuid::new_v4(), &dec("12.00"), "order")
        .await
        .unwrap();
    assert_eq!(entry.status, "pending");
    assert_eq!(entry.source, "order");

    let err = engine.credit_ledger_entry(entry.id).await.unwrap_err();
    assert_eq!(err.code(), "not_matured");

    // Force maturity and credit.
    sqlx::query("UPDATE user_cashbacks SET available_at = now() - interval '1 day' WHERE id = $1")
        .bind(entry.id)
        .execute(&db)
        .await
        .unwrap();
    let credited = engine.credit_ledger_entry(entry.id).await.unwrap();
    assert_eq!(credited.status, "credited");

    let (balance,): (BigDecimal,) =
        sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(balance, dec("12.00"));

    let err = engine.credit_ledger_entry(entry.id).await.unwrap_err();
    assert_eq!(err.code(), "invalid_status");
}
