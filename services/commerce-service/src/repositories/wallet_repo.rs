use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use super::WalletRepository;
use crate::domain::payment::SellerType;
use crate::domain::payout::PayoutMethod;
use crate::domain::wallet::{PayoutSettings, Wallet};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn find(&self, user_id: i32) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }

    async fn auto_payout_candidates(&self, minimum: &BigDecimal) -> AppResult<Vec<i32>> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            "SELECT user_id FROM wallets
             WHERE is_active
               AND auto_payout_enabled
               AND role <> 'superadmin'
               AND payout_method IS NOT NULL
               AND available_balance >= $1
             ORDER BY user_id",
        )
        .bind(minimum)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn upsert_settings(&self, user_id: i32, role: SellerType, settings: &PayoutSettings) -> AppResult<Wallet> {
        // Verification survives only while the verified details stay the same
        let wallet = sqlx::query_as(
            "INSERT INTO wallets (
                user_id, role, payout_method, auto_payout_enabled,
                jazzcash_number, easypaisa_number, bank_name, bank_account_number, bank_account_title
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE SET
                payout_method = EXCLUDED.payout_method,
                auto_payout_enabled = EXCLUDED.auto_payout_enabled,
                jazzcash_verified = wallets.jazzcash_verified
                    AND wallets.jazzcash_number IS NOT DISTINCT FROM EXCLUDED.jazzcash_number,
                jazzcash_number = EXCLUDED.jazzcash_number,
                easypaisa_verified = wallets.easypaisa_verified
                    AND wallets.easypaisa_number IS NOT DISTINCT FROM EXCLUDED.easypaisa_number,
                easypaisa_number = EXCLUDED.easypaisa_number,
                bank_verified = wallets.bank_verified
                    AND wallets.bank_name IS NOT DISTINCT FROM EXCLUDED.bank_name
                    AND wallets.bank_account_number IS NOT DISTINCT FROM EXCLUDED.bank_account_number
                    AND wallets.bank_account_title IS NOT DISTINCT FROM EXCLUDED.bank_account_title,
                bank_name = EXCLUDED.bank_name,
                bank_account_number = EXCLUDED.bank_account_number,
                bank_account_title = EXCLUDED.bank_account_title,
                updated_at = NOW()
            RETURNING *",
        )
        .bind(user_id)
        .bind(role)
        .bind(settings.payout_method)
        .bind(settings.auto_payout_enabled)
        .bind(&settings.jazzcash_number)
        .bind(&settings.easypaisa_number)
        .bind(&settings.bank_name)
        .bind(&settings.bank_account_number)
        .bind(&settings.bank_account_title)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn set_verified(&self, user_id: i32, method: PayoutMethod, verified: bool) -> AppResult<Option<Wallet>> {
        let sql = match method {
            PayoutMethod::JazzCash => {
                "UPDATE wallets SET jazzcash_verified = $2, updated_at = NOW()
                 WHERE user_id = $1 AND jazzcash_number IS NOT NULL RETURNING *"
            }
            PayoutMethod::EasyPaisa => {
                "UPDATE wallets SET easypaisa_verified = $2, updated_at = NOW()
                 WHERE user_id = $1 AND easypaisa_number IS NOT NULL RETURNING *"
            }
            PayoutMethod::Bank => {
                "UPDATE wallets SET bank_verified = $2, updated_at = NOW()
                 WHERE user_id = $1 AND bank_account_number IS NOT NULL RETURNING *"
            }
            PayoutMethod::Manual => {
                return Err(AppError::validation("manual payouts need no verification"));
            }
        };

        let wallet = sqlx::query_as(sql)
            .bind(user_id)
            .bind(verified)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }
}
