use async_trait::async_trait;
use serde_json::{json, Value};
use shared::utils::http_client::{HttpClientError, ServiceClient};
use std::time::Duration;

use crate::domain::money;
use crate::domain::payout::{Payout, PayoutStatus};

// Seller-facing payout notifications. Delivery is best effort: the engine
// logs a failed send and moves on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutNotifier: Send + Sync {
    async fn payout_updated(&self, payout: &Payout) -> Result<(), HttpClientError>;
}

// Posts to the notification service
pub struct HttpPayoutNotifier {
    client: ServiceClient,
}

impl HttpPayoutNotifier {
    pub fn new(timeout: Duration) -> Result<Self, HttpClientError> {
        Ok(Self {
            client: ServiceClient::new("notification", timeout)?,
        })
    }
}

pub(crate) fn notification_for(payout: &Payout) -> Value {
    let amount = money::format_rupees(&payout.amount);
    let (title, message) = match payout.status {
        PayoutStatus::Completed => (
            "Payout sent",
            format!("{} has been sent to your {} account", amount, payout.payment_method),
        ),
        PayoutStatus::Failed => (
            "Payout failed",
            format!(
                "Your payout of {} could not be sent: {}",
                amount,
                payout.failure_reason.as_deref().unwrap_or("unknown reason")
            ),
        ),
        PayoutStatus::Cancelled => (
            "Payout cancelled",
            format!("Your payout of {} was cancelled", amount),
        ),
        PayoutStatus::Pending | PayoutStatus::Processing => (
            "Payout in progress",
            format!("Your payout of {} is being processed", amount),
        ),
    };

    json!({
        "user_id": payout.user_id,
        "type": "payout",
        "title": title,
        "message": message,
        "related_id": payout.id,
        "related_type": "payout",
        "metadata": {
            "status": payout.status,
            "internal_ref": payout.internal_ref,
        },
    })
}

#[async_trait]
impl PayoutNotifier for HttpPayoutNotifier {
    async fn payout_updated(&self, payout: &Payout) -> Result<(), HttpClientError> {
        let _: Value = self
            .client
            .post("/api/internal/notifications", &notification_for(payout), None)
            .await?;
        Ok(())
    }
}
