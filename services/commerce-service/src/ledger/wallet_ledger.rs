use bigdecimal::BigDecimal;
use std::sync::Arc;
use validator::Validate;

use crate::domain::payment::SellerType;
use crate::domain::wallet::{PayoutSettings, PayoutSettingsRequest, VerifyPayoutMethodRequest, Wallet, WalletView};
use crate::error::{AppError, AppResult};
use crate::repositories::WalletRepository;

/// Read side of wallets plus payout settings. Balances are never written
/// here: credits belong to the payment ledger, debits to payout completion.
#[derive(Clone)]
pub struct WalletLedger {
    repo: Arc<dyn WalletRepository>,
    minimum_payout: BigDecimal,
}

impl WalletLedger {
    pub fn new(repo: Arc<dyn WalletRepository>, minimum_payout: BigDecimal) -> Self {
        Self { repo, minimum_payout }
    }

    pub fn minimum_payout(&self) -> &BigDecimal {
        &self.minimum_payout
    }

    pub async fn find(&self, user_id: i32) -> AppResult<Option<Wallet>> {
        self.repo.find(user_id).await
    }

    pub async fn view(&self, user_id: i32) -> AppResult<WalletView> {
        let wallet = self
            .repo
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Wallet not found"))?;

        let eligible_for_payout = wallet.is_active
            && wallet.available_balance >= self.minimum_payout
            && wallet
                .payout_method
                .map(|method| wallet.recipient_for(method).is_ok())
                .unwrap_or(false);

        Ok(WalletView {
            wallet,
            minimum_payout: self.minimum_payout.clone(),
            eligible_for_payout,
        })
    }

    pub async fn auto_payout_candidates(&self) -> AppResult<Vec<i32>> {
        self.repo.auto_payout_candidates(&self.minimum_payout).await
    }

    pub async fn update_settings(
        &self,
        user_id: i32,
        role: SellerType,
        request: PayoutSettingsRequest,
    ) -> AppResult<Wallet> {
        request.validate()?;
        let settings = PayoutSettings::from(request);

        let wallet = self.repo.upsert_settings(user_id, role, &settings).await?;
        tracing::info!(
            "Payout settings updated for user {}: method={}",
            user_id,
            settings.payout_method
        );
        Ok(wallet)
    }

    pub async fn verify_method(&self, user_id: i32, request: VerifyPayoutMethodRequest) -> AppResult<Wallet> {
        let wallet = self
            .repo
            .set_verified(user_id, request.method, request.verified)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No {} details on file for user {}", request.method, user_id)))?;

        tracing::info!(
            target: "security",
            "Payout method {} for user {} marked verified={}",
            request.method,
            user_id,
            request.verified
        );
        Ok(wallet)
    }
}
