use std::sync::Arc;

use crate::domain::payment::{ContentFormat, ItemType, Payment, PaymentStatus};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::error::{AppError, AppResult};
use crate::repositories::PurchaseRepository;

// Access grants, one completed purchase per reader, item and format
#[derive(Clone)]
pub struct PurchaseRecorder {
    repo: Arc<dyn PurchaseRepository>,
}

impl PurchaseRecorder {
    pub fn new(repo: Arc<dyn PurchaseRepository>) -> Self {
        Self { repo }
    }

    pub async fn record_on_success(&self, payment: &Payment) -> AppResult<Purchase> {
        if payment.status != PaymentStatus::Success {
            return Err(AppError::conflict(format!(
                "payment {} is {}, no access can be granted",
                payment.transaction_ref, payment.status
            )));
        }

        let purchase = self.repo.insert_completed(&NewPurchase::from(payment)).await?;

        if purchase.payment_id != payment.id {
            tracing::warn!(
                target: "ledger_anomaly",
                "Buyer {} paid again for {}:{} ({}); existing grant {} kept",
                payment.buyer_id,
                payment.item_type,
                payment.item_id,
                payment.transaction_ref,
                purchase.id
            );
        }

        Ok(purchase)
    }

    pub async fn find_access(
        &self,
        user_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Purchase>> {
        self.repo.find_completed(user_id, item_type, item_id, format).await
    }

    pub async fn find_for_payment(&self, payment_id: i32) -> AppResult<Option<Purchase>> {
        self.repo.find_by_payment(payment_id).await
    }

    pub async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<Purchase>> {
        self.repo.list_for_user(user_id).await
    }

    // Keep the grant in step with a post-success payment change (refund)
    pub async fn mirror(&self, payment: &Payment) -> AppResult<()> {
        self.repo
            .mirror_status(payment.id, PurchaseStatus::from(payment.status))
            .await
    }
}
