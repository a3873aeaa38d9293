use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Payload for a customer-facing refund confirmation.
#[derive(Debug, Clone)]
pub struct RefundNotice {
    pub order_number: String,
    pub amount: BigDecimal,
    pub refund_type: String,
    pub payment_method: String,
    pub estimated_arrival: DateTime<Utc>,
    pub refund_reference: String,
}

/// Outbound notifications. All calls are best-effort: the settlement flow
/// records delivery flags but never rolls back on a send failure.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_order_status_sms(&self, user_id: Uuid, order_number: &str, status: &str)
        -> Result<(), NotifyError>;
    async fn send_refund_confirmation_sms(&self, user_id: Uuid, notice: &RefundNotice)
        -> Result<(), NotifyError>;
    async fn send_refund_confirmation_email(&self, user_id: Uuid, notice: &RefundNotice)
        -> Result<(), NotifyError>;
    async fn send_admin_refund_notice(&self, notice: &RefundNotice) -> Result<(), NotifyError>;
    async fn send_cashback_update(&self, user_id: Uuid, request_id: Uuid, status: &str)
        -> Result<(), NotifyError>;
}

/// Default sink: structured log lines in place of a real SMS/email provider.
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationSink for LogNotifier {
    async fn send_order_status_sms(
        &self,
        user_id: Uuid,
        order_number: &str,
        status: &str,
    ) -> Result<(), NotifyError> {
        info!(%user_id, order_number, status, "order status sms");
        Ok(())
    }

    async fn send_refund_confirmation_sms(
        &self,
        user_id: Uuid,
        notice: &RefundNotice,
    ) -> Result<(), NotifyError> {
        info!(%user_id, order_number = %notice.order_number, amount = %notice.amount, "refund confirmation sms");
        Ok(())
    }

    async fn send_refund_confirmation_email(
        &self,
        user_id: Uuid,
        notice: &RefundNotice,
    ) -> Result<(), NotifyError> {
        info!(%user_id, order_number = %notice.order_number, reference = %notice.refund_reference, "refund confirmation email");
        Ok(())
    }

    async fn send_admin_refund_notice(&self, notice: &RefundNotice) -> Result<(), NotifyError> {
        info!(order_number = %notice.order_number, amount = %notice.amount, "manual settlement required");
        Ok(())
    }

    async fn send_cashback_update(
        &self,
        user_id: Uuid,
        request_id: Uuid,
        status: &str,
    ) -> Result<(), NotifyError> {
        info!(%user_id, %request_id, status, "cashback status update");
        Ok(())
    }
}
