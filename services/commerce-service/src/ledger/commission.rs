use bigdecimal::{BigDecimal, RoundingMode, Zero};

use crate::domain::commission::CommissionSplit;
use crate::domain::money::{self, MINOR_UNIT_SCALE};
use crate::domain::payment::SellerType;
use crate::error::{AppError, AppResult};

/// Seller / platform split of a sale amount.
///
/// The platform cut is truncated to whole paisa and the seller receives the
/// remainder, so the two parts always add up to the amount exactly. Sales by
/// the platform itself (`superadmin`) go entirely to the platform.
pub fn split(amount: &BigDecimal, seller_type: SellerType, platform_percentage: &BigDecimal) -> CommissionSplit {
    let amount = money::normalize(amount);

    if seller_type == SellerType::Superadmin {
        return CommissionSplit {
            seller_amount: money::normalize(&BigDecimal::zero()),
            platform_amount: amount,
            percentage: BigDecimal::from(100),
        };
    }

    let platform_amount = (&amount * platform_percentage / BigDecimal::from(100))
        .with_scale_round(MINOR_UNIT_SCALE, RoundingMode::Down);
    let seller_amount = &amount - &platform_amount;

    CommissionSplit {
        seller_amount,
        platform_amount,
        percentage: platform_percentage.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    platform_percentage: BigDecimal,
}

impl CommissionCalculator {
    pub fn new(platform_percentage: BigDecimal) -> AppResult<Self> {
        if platform_percentage < BigDecimal::zero() || platform_percentage > BigDecimal::from(100) {
            return Err(AppError::validation(format!(
                "platform commission must be between 0 and 100, got {}",
                platform_percentage
            )));
        }

        Ok(Self { platform_percentage })
    }

    pub fn platform_percentage(&self) -> &BigDecimal {
        &self.platform_percentage
    }

    pub fn split(&self, amount: &BigDecimal, seller_type: SellerType) -> AppResult<CommissionSplit> {
        if money::is_negative(amount) {
            return Err(AppError::validation("amount cannot be negative"));
        }

        Ok(split(amount, seller_type, &self.platform_percentage))
    }
}
