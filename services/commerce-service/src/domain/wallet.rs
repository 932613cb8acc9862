use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::payment::SellerType;
use super::payout::{PayoutFailure, PayoutMethod, RecipientDetails};

// Per-user running balance and payout settings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Wallet {
    pub user_id: i32,
    #[schema(value_type = String, example = "1250.00")]
    pub available_balance: BigDecimal,
    #[schema(value_type = String, example = "0.00")]
    pub total_withdrawn: BigDecimal,
    pub role: SellerType,
    pub is_active: bool,
    pub auto_payout_enabled: bool,
    pub payout_method: Option<PayoutMethod>,

    pub jazzcash_number: Option<String>,
    pub jazzcash_verified: bool,
    pub easypaisa_number: Option<String>,
    pub easypaisa_verified: bool,

    pub bank_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_account_title: Option<String>,
    pub bank_verified: bool,

    pub last_payout_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    // Verified recipient for the given method, or the reason it is missing
    pub fn recipient_for(&self, method: PayoutMethod) -> Result<RecipientDetails, PayoutFailure> {
        let unverified = |what: &str| PayoutFailure::WalletNotVerified(what.to_string());

        match method {
            PayoutMethod::JazzCash => match (&self.jazzcash_number, self.jazzcash_verified) {
                (Some(number), true) => Ok(RecipientDetails::MobileWallet { number: number.clone() }),
                (None, _) => Err(unverified("JazzCash number missing")),
                (Some(_), false) => Err(unverified("JazzCash number not verified")),
            },
            PayoutMethod::EasyPaisa => match (&self.easypaisa_number, self.easypaisa_verified) {
                (Some(number), true) => Ok(RecipientDetails::MobileWallet { number: number.clone() }),
                (None, _) => Err(unverified("Easypaisa number missing")),
                (Some(_), false) => Err(unverified("Easypaisa number not verified")),
            },
            PayoutMethod::Bank => {
                let details = (
                    &self.bank_name,
                    &self.bank_account_number,
                    &self.bank_account_title,
                );
                match details {
                    (Some(bank_name), Some(account_number), Some(account_title)) => {
                        if !self.bank_verified {
                            return Err(unverified("Bank account not verified"));
                        }
                        Ok(RecipientDetails::Bank {
                            bank_name: bank_name.clone(),
                            account_number: account_number.clone(),
                            account_title: account_title.clone(),
                        })
                    }
                    _ => Err(unverified("Bank account details incomplete")),
                }
            }
            PayoutMethod::Manual => Ok(RecipientDetails::Manual { note: None }),
        }
    }

    pub fn payout_method_verified(&self) -> bool {
        self.payout_method
            .map(|method| self.recipient_for(method).is_ok())
            .unwrap_or(false)
    }
}

// Balance view for GET /api/wallet
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletView {
    pub wallet: Wallet,
    #[schema(value_type = String)]
    pub minimum_payout: BigDecimal,
    pub eligible_for_payout: bool,
}

// Body for PUT /api/wallet/payout-settings
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_settings_for_method"))]
pub struct PayoutSettingsRequest {
    pub payout_method: PayoutMethod,
    pub auto_payout_enabled: bool,
    pub jazzcash_number: Option<String>,
    pub easypaisa_number: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub bank_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_account_title: Option<String>,
}

fn validate_settings_for_method(req: &PayoutSettingsRequest) -> Result<(), ValidationError> {
    use shared::utils::validation::{is_valid_account_title, is_valid_iban, is_valid_mobile_wallet};

    let fail = |code: &'static str| Err(ValidationError::new(code));

    if let Some(number) = &req.jazzcash_number {
        if !is_valid_mobile_wallet(number) {
            return fail("invalid_jazzcash_number");
        }
    }
    if let Some(number) = &req.easypaisa_number {
        if !is_valid_mobile_wallet(number) {
            return fail("invalid_easypaisa_number");
        }
    }
    if let Some(account) = &req.bank_account_number {
        if !is_valid_iban(account) {
            return fail("invalid_iban");
        }
    }
    if let Some(title) = &req.bank_account_title {
        if !is_valid_account_title(title) {
            return fail("invalid_account_title");
        }
    }

    match req.payout_method {
        PayoutMethod::JazzCash if req.jazzcash_number.is_none() => fail("jazzcash_number_required"),
        PayoutMethod::EasyPaisa if req.easypaisa_number.is_none() => fail("easypaisa_number_required"),
        PayoutMethod::Bank
            if req.bank_name.is_none()
                || req.bank_account_number.is_none()
                || req.bank_account_title.is_none() =>
        {
            fail("bank_details_required")
        }
        _ => Ok(()),
    }
}

// Normalised settings written by the wallet repository
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutSettings {
    pub payout_method: PayoutMethod,
    pub auto_payout_enabled: bool,
    pub jazzcash_number: Option<String>,
    pub easypaisa_number: Option<String>,
    pub bank_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_account_title: Option<String>,
}

impl From<PayoutSettingsRequest> for PayoutSettings {
    fn from(req: PayoutSettingsRequest) -> Self {
        use shared::utils::validation::normalize_mobile_wallet;

        Self {
            payout_method: req.payout_method,
            auto_payout_enabled: req.auto_payout_enabled,
            jazzcash_number: req.jazzcash_number.as_deref().and_then(normalize_mobile_wallet),
            easypaisa_number: req.easypaisa_number.as_deref().and_then(normalize_mobile_wallet),
            bank_name: req.bank_name.map(|s| s.trim().to_string()),
            bank_account_number: req
                .bank_account_number
                .map(|s| s.split_whitespace().collect::<String>().to_uppercase()),
            bank_account_title: req.bank_account_title.map(|s| s.trim().to_string()),
        }
    }
}

// Admin verification body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPayoutMethodRequest {
    pub method: PayoutMethod,
    pub verified: bool,
}

#[cfg(test)]
pub(crate) fn test_wallet(user_id: i32, balance: &str) -> Wallet {
    use std::str::FromStr;

    let now = Utc::now();
    Wallet {
        user_id,
        available_balance: BigDecimal::from_str(balance).unwrap(),
        total_withdrawn: BigDecimal::from(0),
        role: SellerType::Admin,
        is_active: true,
        auto_payout_enabled: true,
        payout_method: Some(PayoutMethod::JazzCash),
        jazzcash_number: Some("03001234567".to_string()),
        jazzcash_verified: true,
        easypaisa_number: None,
        easypaisa_verified: false,
        bank_name: None,
        bank_account_number: None,
        bank_account_title: None,
        bank_verified: false,
        last_payout_date: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(method: PayoutMethod) -> PayoutSettingsRequest {
        PayoutSettingsRequest {
            payout_method: method,
            auto_payout_enabled: true,
            jazzcash_number: None,
            easypaisa_number: None,
            bank_name: None,
            bank_account_number: None,
            bank_account_title: None,
        }
    }

    #[test]
    fn test_recipient_requires_verification() {
        let mut wallet = test_wallet(7, "1500.00");
        assert!(wallet.recipient_for(PayoutMethod::JazzCash).is_ok());

        wallet.jazzcash_verified = false;
        assert!(matches!(
            wallet.recipient_for(PayoutMethod::JazzCash),
            Err(PayoutFailure::WalletNotVerified(_))
        ));
        assert!(matches!(
            wallet.recipient_for(PayoutMethod::Bank),
            Err(PayoutFailure::WalletNotVerified(_))
        ));
        assert!(!wallet.payout_method_verified());

        wallet.payout_method = None;
        assert!(!wallet.payout_method_verified());
    }

    #[test]
    fn test_bank_recipient_snapshot() {
        let mut wallet = test_wallet(7, "1500.00");
        wallet.bank_name = Some("Meezan Bank".to_string());
        wallet.bank_account_number = Some("PK36SCBL0000001123456702".to_string());
        wallet.bank_account_title = Some("Ayesha Khan".to_string());
        wallet.bank_verified = true;

        let details = wallet.recipient_for(PayoutMethod::Bank).unwrap();
        assert!(matches!(details, RecipientDetails::Bank { ref bank_name, .. } if bank_name == "Meezan Bank"));
    }

    #[test]
    fn test_settings_validation_per_method() {
        assert!(settings(PayoutMethod::JazzCash).validate().is_err());
        assert!(settings(PayoutMethod::Manual).validate().is_ok());

        let mut req = settings(PayoutMethod::EasyPaisa);
        req.easypaisa_number = Some("+92 345 1234567".replace(' ', ""));
        assert!(req.validate().is_ok());

        req.bank_account_number = Some("PK00".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_settings_are_normalised() {
        let mut req = settings(PayoutMethod::Bank);
        req.bank_name = Some(" HBL ".to_string());
        req.bank_account_number = Some("pk36 scbl 0000 0011 2345 6702".to_string());
        req.bank_account_title = Some("Ayesha Khan".to_string());
        req.jazzcash_number = Some("923001234567".to_string());

        let normalised = PayoutSettings::from(req);
        assert_eq!(normalised.bank_name.as_deref(), Some("HBL"));
        assert_eq!(normalised.bank_account_number.as_deref(), Some("PK36SCBL0000001123456702"));
        assert_eq!(normalised.jazzcash_number.as_deref(), Some("03001234567"));
    }
}
