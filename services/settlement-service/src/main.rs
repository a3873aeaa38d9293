use std::env;
use std::sync::Arc;

use anyhow::Context;
use common_audit::{AuditProducer, TracingAuditSink};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use settlement_service::cashback::CashbackEngine;
use settlement_service::gateway::{
    CardNetworkGateway, CodRail, GatewayAdapter, GatewaySet, UpiGateway, WalletRail,
};
use settlement_service::notify::LogNotifier;
use settlement_service::refund::RefundOrchestrator;
use settlement_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPoolOptions::new()
        .max_connections(
            env::var("DB_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
        )
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;
    settlement_service::repo::ensure_schema(&db).await.context("failed to ensure schema")?;

    let upi_base = env::var("UPI_GATEWAY_URL").unwrap_or_else(|_| "https://api.razorpay.com/v1".into());
    let upi_key = env::var("UPI_KEY_ID").unwrap_or_default();
    let upi_secret = env::var("UPI_KEY_SECRET").unwrap_or_default();
    let card = match (env::var("CARD_GATEWAY_URL"), env::var("CARD_API_KEY")) {
        (Ok(url), Ok(key)) => {
            Some(Arc::new(CardNetworkGateway::new(url, key)) as Arc<dyn GatewayAdapter>)
        }
        _ => {
            warn!("card gateway not configured; card refunds will be rejected");
            None
        }
    };
    let gateways = Arc::new(GatewaySet {
        upi: Arc::new(UpiGateway::new(upi_base, upi_key, upi_secret)),
        card,
        wallet: Arc::new(WalletRail),
        cod: Arc::new(CodRail),
    });

    let webhook_secret = env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET must be set")?;
    let audit = Arc::new(AuditProducer::new(Arc::new(TracingAuditSink), "settlement-service"));
    let notifier = Arc::new(LogNotifier);

    let orchestrator = Arc::new(RefundOrchestrator::new(
        db.clone(),
        gateways.clone(),
        notifier.clone(),
        audit.clone(),
    ));
    let cashback = Arc::new(CashbackEngine::new(
        db.clone(),
        gateways.clone(),
        notifier.clone(),
        audit.clone(),
    ));

    let state = AppState {
        db,
        gateways,
        orchestrator,
        cashback,
        notifier,
        audit,
        webhook_secret: Arc::new(webhook_secret),
    };
    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = env::var("PORT").unwrap_or_else(|_| "8090".into());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "settlement-service listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
