use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::money;
use super::payment::varchar_enum;

// One disbursement to one seller, covering a batch of commissions
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payout {
    pub id: i32,
    pub user_id: i32,
    #[schema(value_type = String, example = "4500.00")]
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PayoutMethod,
    #[sqlx(json)]
    pub recipient_details: RecipientDetails,
    pub status: PayoutStatus,

    // Generated once at creation, reused as the disbursement idempotency key
    pub internal_ref: String,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub trigger: PayoutTrigger,

    // Manual approval trail
    pub processed_by: Option<i32>,
    pub proof: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub commission_ids: Vec<i32>,
}

impl Payout {
    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, PayoutStatus::Pending | PayoutStatus::Processing)
    }

    pub fn amount_minor(&self) -> Option<i64> {
        money::to_minor_units(&self.amount)
    }
}

varchar_enum! {
    PayoutMethod, "payout method" {
        JazzCash => "jazzcash",
        EasyPaisa => "easypaisa",
        Bank => "bank",
        Manual => "manual",
    }
}

varchar_enum! {
    PayoutStatus, "payout status" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

varchar_enum! {
    // What started the payout
    PayoutTrigger, "payout trigger" {
        Auto => "auto",
        Requested => "requested",
    }
}

// Method specific recipient snapshot stored with the payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientDetails {
    MobileWallet {
        number: String,
    },
    Bank {
        bank_name: String,
        account_number: String,
        account_title: String,
    },
    Manual {
        note: Option<String>,
    },
}

// Insert model for a payout; amount comes from the claimed commissions
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub user_id: i32,
    pub currency: String,
    pub payment_method: PayoutMethod,
    pub recipient_details: RecipientDetails,
    pub status: PayoutStatus,
    pub internal_ref: String,
    pub trigger: PayoutTrigger,
}

impl NewPayout {
    pub fn generate_internal_ref() -> String {
        let stamp = Utc::now().format("%Y%m%d");
        let suffix = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        format!("PO-{}-{}", stamp, &suffix[..12])
    }
}

// Result of the atomic create-and-claim step
#[derive(Debug, Clone)]
pub enum PayoutCreation {
    Created(Payout),
    NoCommissions,
    InFlight,
}

// Fields written when a payout is completed
#[derive(Debug, Clone, Default)]
pub struct PayoutCompletion {
    pub external_ref: Option<String>,
    pub proof: Option<String>,
    pub processed_by: Option<i32>,
}

// Business reasons a payout attempt did not succeed. Not errors: they are
// returned inside PayoutResult.
#[derive(Debug, Clone, PartialEq, Error, Serialize, ToSchema)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum PayoutFailure {
    #[error("Insufficient balance. Minimum payout is {minimum}")]
    InsufficientBalance { minimum: String, available: String },

    #[error("Payout details not verified: {0}")]
    WalletNotVerified(String),

    #[error("Seller account is inactive")]
    UserInactive,

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("No eligible commissions to pay out")]
    NoEligibleCommissions,

    #[error("Another payout is already in progress")]
    PayoutInFlight,

    #[error("Disbursement failed: {0}")]
    DisbursementFailed(String),

    #[error("Disbursement provider unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payout could not be processed: {0}")]
    Internal(String),
}

impl PayoutFailure {
    pub fn insufficient_balance(minimum: &BigDecimal, available: &BigDecimal) -> Self {
        PayoutFailure::InsufficientBalance {
            minimum: money::format_rupees(minimum),
            available: money::format_rupees(available),
        }
    }
}

// Structured outcome of one payout attempt
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayoutResult {
    pub user_id: i32,
    pub success: bool,
    pub message: String,
    pub payout: Option<Payout>,
    pub failure: Option<PayoutFailure>,
}

impl PayoutResult {
    pub fn succeeded(payout: Payout, message: impl Into<String>) -> Self {
        Self {
            user_id: payout.user_id,
            success: true,
            message: message.into(),
            payout: Some(payout),
            failure: None,
        }
    }

    pub fn failed(user_id: i32, failure: PayoutFailure, payout: Option<Payout>) -> Self {
        Self {
            user_id,
            success: false,
            message: failure.to_string(),
            payout,
            failure: Some(failure),
        }
    }
}

// Admin reject body
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RejectPayoutRequest {
    #[validate(length(min = 3, max = 500, message = "reason must be 3-500 characters"))]
    pub reason: String,
}

// Admin completion body for manual transfers
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CompletePayoutRequest {
    #[validate(length(min = 3, max = 1000, message = "proof must be 3-1000 characters"))]
    pub proof: String,
    #[validate(length(max = 100))]
    pub external_ref: Option<String>,
}

// Deepest page a listing will serve
const MAX_PAGE: i64 = 10_000;

// Listing filter with pagination
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PayoutFilter {
    pub status: Option<PayoutStatus>,
    pub user_id: Option<i32>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PayoutFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

// Per-run summary for the batch endpoint and scheduler logs
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayoutRunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PayoutResult>,
}

impl From<Vec<PayoutResult>> for PayoutRunSummary {
    fn from(results: Vec<PayoutResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            attempted: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_internal_ref_format() {
        let reference = NewPayout::generate_internal_ref();
        assert!(reference.starts_with("PO-"));
        assert_eq!(reference.len(), "PO-20260101-".len() + 12);
        assert_ne!(reference, NewPayout::generate_internal_ref());
    }

    #[test]
    fn test_insufficient_balance_message() {
        let failure = PayoutFailure::insufficient_balance(
            &BigDecimal::from(1000),
            &BigDecimal::from(999),
        );
        assert_eq!(
            failure.to_string(),
            "Insufficient balance. Minimum payout is Rs 1000.00"
        );
    }

    #[test]
    fn test_filter_pagination_bounds() {
        let filter = PayoutFilter {
            page: Some(3),
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(filter.limit(), 100);
        assert_eq!(filter.offset(), 200);
        assert_eq!(PayoutFilter::default().offset(), 0);
    }

    #[test]
    fn test_huge_page_is_clamped() {
        let filter = PayoutFilter {
            page: Some(i64::MAX),
            limit: Some(100),
            ..Default::default()
        };
        assert_eq!(filter.page(), 10_000);
        assert_eq!(filter.offset(), 999_900);

        let negative = PayoutFilter {
            page: Some(i64::MIN),
            ..Default::default()
        };
        assert_eq!(negative.offset(), 0);
    }

    #[test]
    fn test_recipient_details_json_shape() {
        let details = RecipientDetails::MobileWallet {
            number: "03001234567".to_string(),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "mobile_wallet");
        assert_eq!(PayoutMethod::from_str("EasyPaisa").unwrap(), PayoutMethod::EasyPaisa);
    }
}
