use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use common_audit::{AuditProducer, NoopAuditSink};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use settlement_service::error::EngineError;
use settlement_service::gateway::{CodRail, GatewaySet, StubGateway, WalletRail};
use settlement_service::notify::LogNotifier;
use settlement_service::refund::{RefundItemRequest, RefundOrchestrator, RefundRequest};
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

fn orchestrator(db: PgPool) -> RefundOrchestrator {
    let gateways = Arc::new(GatewaySet {
        upi: Arc::new(StubGateway::new()),
        card: Some(Arc::new(StubGateway::new())),
        wallet: Arc::new(WalletRail),
        cod: Arc::new(CodRail),
    });
    let audit = Arc::new(AuditProducer::new(Arc::new(NoopAuditSink), "settlement-service"));
    RefundOrchestrator::new(db, gateways, Arc::new(LogNotifier), audit)
}

struct SeededOrder {
    order_id: Uuid,
    user_id: Uuid,
    item_id: Uuid,
    product_id: Uuid,
}

async fn seed_paid_order(db: &PgPool, payment_method: &str, paid: &str, stock: i32) -> SeededOrder {
    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();

    sqlx::query("INSERT INTO products (id, name, stock) VALUES ($1, 'Widget', $2)")
        .bind(product_id)
        .bind(stock)
        .execute(db)
        .await
        .unwrap();

    let items = json!([{
        "item_id": item_id,
        "product_id": product_id,
        "name": "Widget",
        "quantity": 3,
        "price": "100.00",
    }]);
    sqlx::query(
        r#"INSERT INTO orders (id, order_number, user_id, merchant_id, status, items,
               subtotal, total, paid_amount, payment_method, payment_status, transaction_id)
           VALUES ($1, $2, $3, $4, 'delivered', $5, $6, $6, $6, $7, 'paid', 'txn_seed')"#,
    )
    .bind(order_id)
    .bind(format!("ORD-{}", &order_id.to_string()[..8]))
    .bind(user_id)
    .bind(Uuid::new_v4())
    .bind(items)
    .bind(dec(paid))
    .bind(payment_method)
    .execute(db)
    .await
    .unwrap();

    SeededOrder { order_id, user_id, item_id, product_id }
}

fn refund_req(order_id: Uuid, amount: Option<&str>) -> RefundRequest {
    RefundRequest {
        order_id,
        amount: amount.map(dec),
        reason: "damaged on arrival".into(),
        items: vec![],
        notify_customer: true,
        actor_id: Uuid::new_v4(),
        actor_name: "ops".into(),
    }
}

#[tokio::test]
#[ignore]
async fn partial_refunds_preserve_paid_total() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "upi", "300.00", 0).await;
    let orch = orchestrator(db.clone());

    let first = orch.execute(refund_req(seeded.order_id, Some("120.00"))).await.unwrap();
    assert_eq!(first.order_status, "partially_refunded");
    assert_eq!(first.refund.refund_type, "partial");

    let second = orch.execute(refund_req(seeded.order_id, Some("180.00"))).await.unwrap();
    assert_eq!(second.order_status, "refunded");
    assert_eq!(second.payment_status, "refunded");
    assert_eq!(second.refund.refund_type, "partial");
    assert_eq!(second.remaining_refundable, dec("0"));

    let order = repo::get_order(&db, seeded.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount, dec("300.00"));
    assert_eq!(order.paid_amount - order.refund_amount, dec("0.00"));

    let err = orch.execute(refund_req(seeded.order_id, Some("1.00"))).await.unwrap_err();
    assert_eq!(err.code(), "already_refunded");
}

#[tokio::test]
#[ignore]
async fn racing_partials_that_drain_the_order_mark_it_refunded() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "upi", "300.00", 0).await;
    let orch = orchestrator(db.clone());

    let (a, b) = tokio::join!(
        orch.execute(refund_req(seeded.order_id, Some("150.00"))),
        orch.execute(refund_req(seeded.order_id, Some("150.00")))
    );
    let a = a.unwrap();
    let b = b.unwrap();
    // Whichever refund lands second drains the order; its status comes from
    // the post-update balance, not the earlier read.
    assert!(a.order_status == "refunded" || b.order_status == "refunded");

    let order = repo::get_order(&db, seeded.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount, dec("300.00"));
    assert_eq!(order.payment_status, "refunded");
    assert_eq!(order.status, "refunded");
}

#[tokio::test]
#[ignore]
async fn over_refund_is_rejected_and_nothing_changes() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "upi", "200.00", 0).await;
    let orch = orchestrator(db.clone());

    let err = orch.execute(refund_req(seeded.order_id, Some("250.00"))).await.unwrap_err();
    assert_eq!(err.code(), "refund_exceeds_eligible");

    let order = repo::get_order(&db, seeded.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount, dec("0"));
    assert_eq!(order.payment_status, "paid");
    assert!(repo::list_refunds_for_order(&db, seeded.order_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn wallet_refund_credits_wallet_atomically() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "wallet", "90.00", 0).await;
    let orch = orchestrator(db.clone());

    let outcome = orch.execute(refund_req(seeded.order_id, None)).await.unwrap();
    assert_eq!(outcome.refund.gateway_status, "completed");
    assert_eq!(outcome.refund.status, "completed");
    // Wallet refunds land instantly; the stored arrival is the settlement
    // time itself.
    let now = Utc::now();
    assert!(outcome.estimated_arrival <= now);
    assert!(now - outcome.estimated_arrival < chrono::Duration::minutes(5));

    let (balance,): (BigDecimal,) =
        sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(seeded.user_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(balance, dec("90.00"));
}

#[tokio::test]
#[ignore]
async fn frozen_wallet_rolls_back_the_whole_settlement() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "wallet", "90.00", 0).await;
    sqlx::query(
        "INSERT INTO wallets (user_id, balance, is_frozen, freeze_reason)
         VALUES ($1, 0, TRUE, 'chargeback review')",
    )
    .bind(seeded.user_id)
    .execute(&db)
    .await
    .unwrap();
    let orch = orchestrator(db.clone());

    let err = orch.execute(refund_req(seeded.order_id, None)).await.unwrap_err();
    assert!(matches!(err, EngineError::WalletFrozen { .. }));

    let order = repo::get_order(&db, seeded.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount, dec("0"));
    assert_eq!(order.payment_status, "paid");
    assert!(repo::list_refunds_for_order(&db, seeded.order_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn repeated_item_refunds_never_overshoot_stock() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "upi", "300.00", 10).await;
    let orch = orchestrator(db.clone());

    let mut req = refund_req(seeded.order_id, Some("100.00"));
    req.items = vec![RefundItemRequest { item_id: seeded.item_id, quantity: 2 }];
    orch.execute(req).await.unwrap();

    // Second refund asks for 3 units but only 1 of the ordered 3 remains.
    let mut req = refund_req(seeded.order_id, Some("200.00"));
    req.items = vec![RefundItemRequest { item_id: seeded.item_id, quantity: 3 }];
    orch.execute(req).await.unwrap();

    let (stock,): (i32,) = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(seeded.product_id)
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(stock, 13);
}

#[tokio::test]
#[ignore]
async fn cod_refund_lands_in_manual_queue() {
    let db = connect().await;
    let seeded = seed_paid_order(&db, "cod", "60.00", 0).await;
    let orch = orchestrator(db.clone());

    let outcome = orch.execute(refund_req(seeded.order_id, None)).await.unwrap();
    assert_eq!(outcome.refund.gateway_status, "pending_manual_processing");
    assert_eq!(outcome.refund.status, "pending");
    assert!(outcome.refund.gateway_refund_id.is_none());

    let depth = orch.manual_settlement_queue_depth().await.unwrap();
    assert!(depth >= 1);
}
