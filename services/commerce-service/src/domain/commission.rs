use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::payment::{EarningsStatus, ItemType, SellerType};

// Seller / platform split of one payment amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommissionSplit {
    #[schema(value_type = String, example = "450.00")]
    pub seller_amount: BigDecimal,
    #[schema(value_type = String, example = "50.00")]
    pub platform_amount: BigDecimal,
    #[schema(value_type = String, example = "10")]
    pub percentage: BigDecimal,
}

#[cfg(test)]
impl CommissionSplit {
    pub fn total(&self) -> BigDecimal {
        &self.seller_amount + &self.platform_amount
    }
}

// Ledger line: one seller's cut from one successful payment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Commission {
    pub id: i32,
    pub payment_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub buyer_id: i32,
    pub seller_id: i32,
    pub seller_type: SellerType,
    #[schema(value_type = String)]
    pub total_amount: BigDecimal,
    #[schema(value_type = String)]
    pub seller_amount: BigDecimal,
    #[schema(value_type = String)]
    pub platform_amount: BigDecimal,
    #[schema(value_type = String)]
    pub percentage: BigDecimal,
    pub status: EarningsStatus,
    pub payout_id: Option<i32>,
    pub processed_at: Option<DateTime<Utc>>,
    pub paid_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
