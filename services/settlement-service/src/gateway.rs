use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use common_money::to_minor_units;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;

/// Everything a rail needs to issue a refund. Borrowed so the orchestrator
/// keeps ownership of the order it loaded.
pub struct RefundContext<'a> {
    pub order_id: Uuid,
    pub order_number: &'a str,
    pub user_id: Uuid,
    pub transaction_id: Option<&'a str>,
    pub amount: &'a BigDecimal,
    pub reason: &'a str,
}

/// What a rail decided to do with the money. External rails return the
/// provider's refund id and status; wallet credits are applied inside the
/// settlement transaction; COD refunds go to a manual payout queue.
#[derive(Debug, Clone)]
pub enum RefundDisposition {
    External { gateway_refund_id: String, gateway_status: String },
    WalletCredit { user_id: Uuid, reference: String },
    ManualSettlement { reference: String },
}

impl RefundDisposition {
    pub fn gateway_status(&self) -> &str {
        match self {
            Self::External { gateway_status, .. } => gateway_status,
            Self::WalletCredit { .. } => "completed",
            Self::ManualSettlement { .. } => "pending_manual_processing",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            Self::External { gateway_refund_id, .. } => gateway_refund_id,
            Self::WalletCredit { reference, .. } => reference,
            Self::ManualSettlement { reference } => reference,
        }
    }
}

#[async_trait::async_trait]
pub trait GatewayAdapter: Send + Sync {
    async fn create_refund(&self, ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError>;

    /// Outbound payout for approved cashbacks. Only rails that can push
    /// money implement this.
    async fn create_payout(&self, _user_id: Uuid, _amount: &BigDecimal) -> Result<String, EngineError> {
        Err(EngineError::Gateway("payouts are not supported on this rail".into()))
    }
}

fn minor_units(amount: &BigDecimal) -> Result<i64, EngineError> {
    to_minor_units(amount)
        .map_err(|e| EngineError::validation("invalid_amount", format!("amount not representable: {e}")))
}

#[derive(Deserialize)]
struct UpiRefundResponse {
    id: String,
    status: String,
}

/// UPI PSP client. Refunds reference the original capture, so a missing
/// transaction id fails before any network call.
pub struct UpiGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl UpiGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url, key_id, key_secret }
    }
}

#[async_trait::async_trait]
impl GatewayAdapter for UpiGateway {
    async fn create_refund(&self, ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError> {
        let txn = ctx.transaction_id.ok_or_else(|| {
            EngineError::validation(
                "missing_transaction_id",
                "Order has no gateway transaction to refund against",
            )
        })?;
        let paise = minor_units(ctx.amount)?;
        let url = format!("{}/payments/{}/refund", self.base_url, txn);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": paise,
                "notes": { "order_number": ctx.order_number, "reason": ctx.reason },
            }))
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("upi refund request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Gateway(format!("upi refund rejected ({status}): {body}")));
        }
        let parsed: UpiRefundResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("upi refund response malformed: {e}")))?;
        info!(order_id = %ctx.order_id, refund_id = %parsed.id, status = %parsed.status, "upi refund created");
        Ok(RefundDisposition::External { gateway_refund_id: parsed.id, gateway_status: parsed.status })
    }
}

#[derive(Deserialize)]
struct CardRefundResponse {
    id: String,
    status: String,
}

/// Card network gateway. Optional at boot; the dispatcher fails fast when a
/// card refund arrives and no gateway was configured.
pub struct CardNetworkGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CardNetworkGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url, api_key }
    }
}

#[async_trait::async_trait]
impl GatewayAdapter for CardNetworkGateway {
    async fn create_refund(&self, ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError> {
        let txn = ctx.transaction_id.ok_or_else(|| {
            EngineError::validation(
                "missing_transaction_id",
                "Order has no gateway transaction to refund against",
            )
        })?;
        let cents = minor_units(ctx.amount)?;
        let url = format!("{}/v1/refunds", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&[("payment_intent", txn), ("amount", &cents.to_string())])
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("card refund request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Gateway(format!("card refund rejected ({status}): {body}")));
        }
        let parsed: CardRefundResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("card refund response malformed: {e}")))?;
        // Card network reports "succeeded"; normalize to the common vocabulary.
        let status = if parsed.status == "succeeded" { "processed".to_string() } else { parsed.status };
        Ok(RefundDisposition::External { gateway_refund_id: parsed.id, gateway_status: status })
    }

    async fn create_payout(&self, user_id: Uuid, amount: &BigDecimal) -> Result<String, EngineError> {
        let cents = minor_units(amount)?;
        let url = format!("{}/v1/payouts", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&[("destination", user_id.to_string()), ("amount", cents.to_string())])
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("payout request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Gateway(format!("payout rejected ({status}): {body}")));
        }
        let parsed: CardRefundResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("payout response malformed: {e}")))?;
        Ok(parsed.id)
    }
}

/// Wallet "rail": no external call, the credit happens inside the
/// settlement transaction.
pub struct WalletRail;

#[async_trait::async_trait]
impl GatewayAdapter for WalletRail {
    async fn create_refund(&self, ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError> {
        Ok(RefundDisposition::WalletCredit {
            user_id: ctx.user_id,
            reference: format!("wallet_refund_{}", Uuid::new_v4()),
        })
    }
}

/// Cash-on-delivery rail: nothing to call, the refund goes to the manual
/// settlement queue for an operator payout.
pub struct CodRail;

#[async_trait::async_trait]
impl GatewayAdapter for CodRail {
    async fn create_refund(&self, _ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError> {
        Ok(RefundDisposition::ManualSettlement { reference: format!("cod_refund_{}", Uuid::new_v4()) })
    }
}

/// Deterministic stand-in for tests.
pub struct StubGateway {
    pub fail: bool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait::async_trait]
impl GatewayAdapter for StubGateway {
    async fn create_refund(&self, ctx: RefundContext<'_>) -> Result<RefundDisposition, EngineError> {
        if self.fail {
            return Err(EngineError::Gateway("stub gateway forced failure".into()));
        }
        Ok(RefundDisposition::External {
            gateway_refund_id: format!("{}-refund", ctx.order_number),
            gateway_status: "processed".into(),
        })
    }

    async fn create_payout(&self, user_id: Uuid, _amount: &BigDecimal) -> Result<String, EngineError> {
        if self.fail {
            return Err(EngineError::Gateway("stub gateway forced failure".into()));
        }
        Ok(format!("payout-{user_id}"))
    }
}

use crate::order::PaymentMethod;

/// One adapter per payment rail; dispatch happens in exactly one place.
pub struct GatewaySet {
    pub upi: Arc<dyn GatewayAdapter>,
    pub card: Option<Arc<dyn GatewayAdapter>>,
    pub wallet: Arc<dyn GatewayAdapter>,
    pub cod: Arc<dyn GatewayAdapter>,
}

impl GatewaySet {
    pub fn adapter_for(&self, method: PaymentMethod) -> Result<&dyn GatewayAdapter, EngineError> {
        match method {
            PaymentMethod::Upi => Ok(self.upi.as_ref()),
            PaymentMethod::Card => self
                .card
                .as_deref()
                .ok_or_else(|| EngineError::Gateway("card network gateway is not configured".into())),
            PaymentMethod::Wallet => Ok(self.wallet.as_ref()),
            PaymentMethod::Cod => Ok(self.cod.as_ref()),
        }
    }

    /// Payouts for bank-transfer cashbacks ride the card network rail.
    pub fn payout_rail(&self) -> Result<&dyn GatewayAdapter, EngineError> {
        self.card
            .as_deref()
            .ok_or_else(|| EngineError::Gateway("card network gateway is not configured".into()))
    }

    pub fn stubbed(adapter: Arc<dyn GatewayAdapter>) -> Self {
        Self { upi: adapter.clone(), card: Some(adapter.clone()), wallet: adapter.clone(), cod: adapter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ctx<'a>(amount: &'a BigDecimal) -> RefundContext<'a> {
        RefundContext {
            order_id: Uuid::new_v4(),
            order_number: "ORD-1001",
            user_id: Uuid::new_v4(),
            transaction_id: Some("txn_abc"),
            amount,
            reason: "damaged item",
        }
    }

    #[tokio::test]
    async fn wallet_rail_needs_no_network() {
        let amount = BigDecimal::from_str("150.00").unwrap();
        let disp = WalletRail.create_refund(ctx(&amount)).await.unwrap();
        assert_eq!(disp.gateway_status(), "completed");
        assert!(disp.reference().starts_with("wallet_refund_"));
    }

    #[tokio::test]
    async fn cod_rail_queues_manual_settlement() {
        let amount = BigDecimal::from_str("80.00").unwrap();
        let disp = CodRail.create_refund(ctx(&amount)).await.unwrap();
        assert_eq!(disp.gateway_status(), "pending_manual_processing");
    }

    #[tokio::test]
    async fn missing_card_gateway_fails_fast() {
        let set = GatewaySet {
            upi: Arc::new(StubGateway::new()),
            card: None,
            wallet: Arc::new(WalletRail),
            cod: Arc::new(CodRail),
        };
        let err = match set.adapter_for(PaymentMethod::Card) {
            Ok(_) => panic!("card dispatch should fail without a configured gateway"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn default_payout_is_unsupported() {
        let amount = BigDecimal::from_str("10.00").unwrap();
        let err = WalletRail.create_payout(Uuid::new_v4(), &amount).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(_)));
    }
}
