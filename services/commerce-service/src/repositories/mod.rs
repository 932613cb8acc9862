// Persistence seams. Every state change that must not race is expressed as a
// conditional update here, so callers never read-then-write.
pub mod payment_repo;
pub mod payout_repo;
pub mod purchase_repo;
pub mod wallet_repo;

#[cfg(test)]
pub mod memory;

pub use payment_repo::PgPaymentRepository;
pub use payout_repo::PgPayoutRepository;
pub use purchase_repo::PgPurchaseRepository;
pub use wallet_repo::PgWalletRepository;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::commission::Commission;
use crate::domain::payment::{ContentFormat, ItemType, NewPayment, Payment, PaymentStatus, SellerType};
use crate::domain::payout::{NewPayout, Payout, PayoutCompletion, PayoutCreation, PayoutFilter, PayoutMethod, PayoutStatus};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::domain::wallet::{PayoutSettings, Wallet};
use crate::error::AppResult;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment>;

    async fn find_by_id(&self, id: i32) -> AppResult<Option<Payment>>;

    async fn find_by_ref(&self, transaction_ref: &str) -> AppResult<Option<Payment>>;

    // The buyer's pending payment for this item and format, if any
    async fn find_open_checkout(
        &self,
        buyer_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Payment>>;

    /// Move `from -> to` only if the row is still in `from`.
    /// `None` means another writer got there first.
    async fn transition_status(
        &self,
        id: i32,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_response: Option<Value>,
    ) -> AppResult<Option<Payment>>;

    /// Earnings pending -> processed, commission row and both wallet credits
    /// in one transaction. `false` when the earnings were already applied.
    async fn apply_earnings(&self, payment: &Payment, platform_account_id: i32) -> AppResult<bool>;

    async fn stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<Payment>>;
}

#[async_trait]
pub trait PurchaseRepository: Send + Sync {
    /// Insert the grant or return the one that already exists
    async fn insert_completed(&self, purchase: &NewPurchase) -> AppResult<Purchase>;

    async fn find_completed(
        &self,
        user_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Purchase>>;

    async fn find_by_payment(&self, payment_id: i32) -> AppResult<Option<Purchase>>;

    async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<Purchase>>;

    async fn mirror_status(&self, payment_id: i32, status: PurchaseStatus) -> AppResult<()>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Insert the payout and claim up to `batch_limit` processed commissions
    /// of the user in one transaction; amount is their sum.
    async fn create_with_commissions(&self, payout: &NewPayout, batch_limit: i64) -> AppResult<PayoutCreation>;

    async fn find(&self, id: i32) -> AppResult<Option<Payout>>;

    async fn list(&self, filter: &PayoutFilter) -> AppResult<Vec<Payout>>;

    async fn commissions_for(&self, payout_id: i32) -> AppResult<Vec<Commission>>;

    async fn mark_processing(
        &self,
        id: i32,
        from: PayoutStatus,
        processed_by: Option<i32>,
        bump_retry: bool,
    ) -> AppResult<Option<Payout>>;

    async fn mark_failed(&self, id: i32, reason: &str) -> AppResult<Option<Payout>>;

    // Outcome unknown: stays processing with the reason recorded
    async fn note_unavailable(&self, id: i32, reason: &str) -> AppResult<()>;

    /// Completed + wallet debit + linked payments paid out, atomically.
    /// `None` when the payout is no longer pending/processing.
    async fn complete(&self, id: i32, completion: &PayoutCompletion) -> AppResult<Option<Payout>>;

    /// Cancel and release the linked commissions back to processed
    async fn cancel(&self, id: i32, reason: &str, processed_by: i32) -> AppResult<Option<Payout>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find(&self, user_id: i32) -> AppResult<Option<Wallet>>;

    // Active, auto-enabled sellers with at least `minimum` available
    async fn auto_payout_candidates(&self, minimum: &BigDecimal) -> AppResult<Vec<i32>>;

    // Never touches balance columns; resets verification of changed details
    async fn upsert_settings(&self, user_id: i32, role: SellerType, settings: &PayoutSettings) -> AppResult<Wallet>;

    async fn set_verified(&self, user_id: i32, method: PayoutMethod, verified: bool) -> AppResult<Option<Wallet>>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
