use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

use super::commission::CommissionSplit;
use super::purchase::Purchase;

// One purchase attempt against one catalog item by one buyer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payment {
    pub id: i32,
    pub buyer_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,

    #[schema(value_type = String, example = "500.00")]
    pub amount: BigDecimal,
    pub currency: String,

    // Seller & commission snapshot taken at initiation
    pub seller_id: i32,
    pub seller_type: SellerType,
    #[schema(value_type = String)]
    pub seller_amount: BigDecimal,
    #[schema(value_type = String)]
    pub platform_amount: BigDecimal,
    #[schema(value_type = String)]
    pub commission_percentage: BigDecimal,

    // Gateway correlation
    pub gateway: GatewayKind,
    pub transaction_ref: String,
    pub status: PaymentStatus,
    pub gateway_response: Option<serde_json::Value>,

    // Ledger side
    pub earnings_status: EarningsStatus,
    pub payout_id: Option<i32>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn split(&self) -> CommissionSplit {
        CommissionSplit {
            seller_amount: self.seller_amount.clone(),
            platform_amount: self.platform_amount.clone(),
            percentage: self.commission_percentage.clone(),
        }
    }

    pub fn belongs_to(&self, user_id: i32) -> bool {
        self.buyer_id == user_id
    }
}

// Insert model for a freshly initiated payment
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub buyer_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,
    pub amount: BigDecimal,
    pub currency: String,
    pub seller_id: i32,
    pub seller_type: SellerType,
    pub split: CommissionSplit,
    pub gateway: GatewayKind,
    pub transaction_ref: String,
}

macro_rules! varchar_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize, sqlx::Type, utoipa::ToSchema,
        )]
        #[sqlx(type_name = "varchar")]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                #[sqlx(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($value => Ok($name::$variant),)+
                    _ => Err($crate::domain::UnknownVariant::new($kind, s)),
                }
            }
        }
    };
}

pub(crate) use varchar_enum;

varchar_enum! {
    // Kind of catalog item being sold
    ItemType, "item type" {
        Book => "book",
        Judgment => "judgment",
    }
}

varchar_enum! {
    // Delivery format of a purchased item
    ContentFormat, "format" {
        Pdf => "pdf",
        Text => "text",
    }
}

varchar_enum! {
    // Seller tier; superadmin is the platform itself
    SellerType, "seller type" {
        Admin => "admin",
        Superadmin => "superadmin",
    }
}

varchar_enum! {
    GatewayKind, "gateway" {
        JazzCash => "jazzcash",
        Safepay => "safepay",
    }
}

varchar_enum! {
    PaymentStatus, "payment status" {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
        Refunded => "refunded",
    }
}

varchar_enum! {
    // Ledger lifecycle, advances pending -> processed -> paid_out only
    EarningsStatus, "earnings status" {
        Pending => "pending",
        Processed => "processed",
        PaidOut => "paid_out",
    }
}

impl EarningsStatus {
    pub fn can_advance_to(&self, next: EarningsStatus) -> bool {
        matches!(
            (self, next),
            (EarningsStatus::Pending, EarningsStatus::Processed)
                | (EarningsStatus::Processed, EarningsStatus::PaidOut)
        )
    }
}

impl PaymentStatus {
    // Allowed status moves; everything else is a conflicting result
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Success, PaymentStatus::Refunded)
        )
    }
}

// Request body for POST /api/purchase
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PurchaseRequest {
    pub item_type: ItemType,
    #[validate(range(min = 1, message = "item_id must be positive"))]
    pub item_id: i32,
    pub format: ContentFormat,
    pub gateway: GatewayKind,
}

// Hosted-checkout instructions returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutInstructions {
    pub payment_id: i32,
    pub transaction_ref: String,
    pub payment_url: String,
    // Form posted to payment_url when non-empty (JazzCash page redirection)
    pub form_fields: BTreeMap<String, String>,
}

// Response body for POST /api/purchase
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseResponse {
    AlreadyOwned { purchase: Purchase },
    Checkout { checkout: CheckoutInstructions },
}

// Response for GET /api/payments/verify/{id}
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentStatusView {
    pub payment: Payment,
    pub purchase: Option<Purchase>,
    pub access_granted: bool,
}

// Outcome of one reconciliation sweep
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub errors: usize,
}
