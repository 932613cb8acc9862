use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::commission::CommissionCalculator;
use crate::domain::money;
use crate::domain::payment::{
    ContentFormat, EarningsStatus, GatewayKind, ItemType, NewPayment, Payment, PaymentStatus, SellerType,
};
use crate::error::{AppError, AppResult};
use crate::repositories::PaymentRepository;

// What the checkout knows once the gateway session exists
#[derive(Debug, Clone)]
pub struct NewPendingPayment {
    pub buyer_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,
    pub amount: BigDecimal,
    pub currency: String,
    pub seller_id: i32,
    pub seller_type: SellerType,
    pub gateway: GatewayKind,
    pub transaction_ref: String,
}

/// Owner of the payment record and of the one-shot earnings distribution.
#[derive(Clone)]
pub struct PaymentLedger {
    repo: Arc<dyn PaymentRepository>,
    calculator: CommissionCalculator,
    platform_account_id: i32,
}

impl PaymentLedger {
    pub fn new(repo: Arc<dyn PaymentRepository>, calculator: CommissionCalculator, platform_account_id: i32) -> Self {
        Self {
            repo,
            calculator,
            platform_account_id,
        }
    }

    pub async fn create_pending(&self, request: NewPendingPayment) -> AppResult<Payment> {
        let amount = money::normalize(&request.amount);
        if money::to_minor_units(&amount).unwrap_or(0) <= 0 {
            return Err(AppError::validation("amount must be positive"));
        }
        let split = self.calculator.split(&amount, request.seller_type)?;

        let payment = self
            .repo
            .insert(&NewPayment {
                buyer_id: request.buyer_id,
                item_id: request.item_id,
                item_type: request.item_type,
                format: request.format,
                amount,
                currency: request.currency,
                seller_id: request.seller_id,
                seller_type: request.seller_type,
                split,
                gateway: request.gateway,
                transaction_ref: request.transaction_ref,
            })
            .await?;

        tracing::info!(
            "Payment {} created: ref={} buyer={} item={}:{} amount={}",
            payment.id,
            payment.transaction_ref,
            payment.buyer_id,
            payment.item_type,
            payment.item_id,
            payment.amount
        );

        Ok(payment)
    }

    pub async fn find(&self, id: i32) -> AppResult<Option<Payment>> {
        self.repo.find_by_id(id).await
    }

    pub async fn find_by_ref(&self, transaction_ref: &str) -> AppResult<Option<Payment>> {
        self.repo.find_by_ref(transaction_ref).await
    }

    pub async fn open_checkout(
        &self,
        buyer_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Payment>> {
        self.repo.find_open_checkout(buyer_id, item_type, item_id, format).await
    }

    pub async fn stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<Payment>> {
        self.repo.stale_pending(older_than, limit).await
    }

    /// Record a gateway result.
    ///
    /// Repeating the current result is a no-op that returns the stored
    /// record. A result that contradicts a terminal state is refused with
    /// `ConflictingState` and never written.
    pub async fn mark_result(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        gateway_response: Option<Value>,
    ) -> AppResult<Payment> {
        let payment = self
            .repo
            .find_by_ref(transaction_ref)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {} not found", transaction_ref)))?;

        if status == PaymentStatus::Pending || payment.status == status {
            tracing::debug!("Payment {} already {}, result ignored", payment.transaction_ref, payment.status);
            return Ok(payment);
        }

        if !payment.status.can_transition_to(status) {
            return Err(self.anomaly(&payment, status));
        }

        let updated = self
            .repo
            .transition_status(payment.id, payment.status, status, gateway_response)
            .await?;

        match updated {
            Some(updated) => {
                tracing::info!(
                    "Payment {} moved {} -> {}",
                    updated.transaction_ref,
                    payment.status,
                    updated.status
                );
                Ok(updated)
            }
            // Another delivery settled it between our read and write
            None => {
                let current = self
                    .repo
                    .find_by_id(payment.id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("Payment {} not found", transaction_ref)))?;

                if current.status == status {
                    Ok(current)
                } else {
                    Err(self.anomaly(&current, status))
                }
            }
        }
    }

    fn anomaly(&self, payment: &Payment, rejected: PaymentStatus) -> AppError {
        tracing::warn!(
            target: "ledger_anomaly",
            "Conflicting result for payment {} (ref {}): stored {}, received {}",
            payment.id,
            payment.transaction_ref,
            payment.status,
            rejected
        );
        AppError::conflict(format!(
            "payment {} is already {}, refusing {}",
            payment.transaction_ref, payment.status, rejected
        ))
    }

    /// Credit seller and platform for a successful payment, at most once.
    ///
    /// Returns `false` without side effects unless the payment is SUCCESS
    /// with earnings still PENDING.
    pub async fn distribute_earnings(&self, payment: &Payment) -> AppResult<bool> {
        if payment.status != PaymentStatus::Success || !payment.earnings_status.can_advance_to(EarningsStatus::Processed) {
            return Ok(false);
        }

        let applied = self.repo.apply_earnings(payment, self.platform_account_id).await?;

        if applied {
            tracing::info!(
                "Earnings distributed for payment {}: seller {} +{}, platform +{}",
                payment.id,
                payment.seller_id,
                payment.seller_amount,
                payment.platform_amount
            );
        } else {
            tracing::debug!("Earnings for payment {} were already distributed", payment.id);
        }

        Ok(applied)
    }
}

#[cfg(test)]
pub(crate) fn test_ledger(store: &crate::repositories::memory::MemoryStore) -> PaymentLedger {
    PaymentLedger::new(
        Arc::new(store.clone()),
        CommissionCalculator::new(BigDecimal::from(10)).unwrap(),
        1,
    )
}

#[cfg(test)]
pub(crate) fn pending_request(transaction_ref: &str, amount: &str, seller_type: SellerType) -> NewPendingPayment {
    use std::str::FromStr;

    NewPendingPayment {
        buyer_id: 17,
        item_id: 42,
        item_type: ItemType::Book,
        format: ContentFormat::Pdf,
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: "PKR".to_string(),
        seller_id: 5,
        seller_type,
        gateway: GatewayKind::JazzCash,
        transaction_ref: transaction_ref.to_string(),
    }
}
