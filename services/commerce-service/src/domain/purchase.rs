use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::commission::CommissionSplit;
use super::payment::{varchar_enum, ContentFormat, ItemType, Payment, PaymentStatus};

// Permanent access grant to one item in one format
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Purchase {
    pub id: i32,
    pub user_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub payment_id: i32,
    pub payment_status: PurchaseStatus,
    pub transaction_id: String,
    #[schema(value_type = String)]
    pub seller_amount: BigDecimal,
    #[schema(value_type = String)]
    pub platform_amount: BigDecimal,
    #[schema(value_type = String)]
    pub commission_percentage: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl Purchase {
    pub fn grants_access(&self) -> bool {
        self.payment_status == PurchaseStatus::Completed
    }
}

varchar_enum! {
    PurchaseStatus, "purchase status" {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

impl From<PaymentStatus> for PurchaseStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Pending => PurchaseStatus::Pending,
            PaymentStatus::Success => PurchaseStatus::Completed,
            PaymentStatus::Failed => PurchaseStatus::Failed,
            PaymentStatus::Refunded => PurchaseStatus::Refunded,
        }
    }
}

// Insert model built from a successful payment
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub user_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,
    pub amount: BigDecimal,
    pub payment_id: i32,
    pub payment_status: PurchaseStatus,
    pub transaction_id: String,
    pub split: CommissionSplit,
}

impl From<&Payment> for NewPurchase {
    fn from(payment: &Payment) -> Self {
        Self {
            user_id: payment.buyer_id,
            item_id: payment.item_id,
            item_type: payment.item_type,
            format: payment.format,
            amount: payment.amount.clone(),
            payment_id: payment.id,
            payment_status: payment.status.into(),
            transaction_id: payment.transaction_ref.clone(),
            split: payment.split(),
        }
    }
}
