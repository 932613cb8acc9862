use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use super::{is_unique_violation, PaymentRepository};
use crate::domain::payment::{
    ContentFormat, EarningsStatus, ItemType, NewPayment, Payment, PaymentStatus, SellerType,
};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Earnings CAS; the rest of the distribution only runs if this row moved
async fn compare_and_swap_earnings_status(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: i32,
    from: EarningsStatus,
    to: EarningsStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payments
         SET earnings_status = $3, updated_at = NOW()
         WHERE id = $1 AND earnings_status = $2 AND status = 'success'",
    )
    .bind(payment_id)
    .bind(from)
    .bind(to)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

// Single SQL increment; creates the wallet row on first earning
async fn credit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    role: SellerType,
    amount: &BigDecimal,
) -> Result<(), sqlx::Error> {
    if amount.is_zero() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO wallets (user_id, available_balance, role)
         VALUES ($1, $2, $3)
         ON CONFLICT (user_id) DO UPDATE
         SET available_balance = wallets.available_balance + EXCLUDED.available_balance,
             updated_at = NOW()",
    )
    .bind(user_id)
    .bind(amount)
    .bind(role)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment> {
        let created = sqlx::query_as(
            "INSERT INTO payments (
                buyer_id, item_id, item_type, format, amount, currency,
                seller_id, seller_type, seller_amount, platform_amount, commission_percentage,
                gateway, transaction_ref, status, earnings_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'pending', 'pending')
            RETURNING *",
        )
        .bind(payment.buyer_id)
        .bind(payment.item_id)
        .bind(payment.item_type)
        .bind(payment.format)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(payment.seller_id)
        .bind(payment.seller_type)
        .bind(&payment.split.seller_amount)
        .bind(&payment.split.platform_amount)
        .bind(&payment.split.percentage)
        .bind(payment.gateway)
        .bind(&payment.transaction_ref)
        .fetch_one(&self.pool)
        .await;

        match created {
            Ok(payment) => Ok(payment),
            // A concurrent checkout for the same item won the open-checkout index
            Err(e) if is_unique_violation(&e) => Err(AppError::conflict(
                "a checkout for this item is already in progress",
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: i32) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn find_by_ref(&self, transaction_ref: &str) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as("SELECT * FROM payments WHERE transaction_ref = $1")
            .bind(transaction_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn find_open_checkout(
        &self,
        buyer_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as(
            "SELECT * FROM payments
             WHERE buyer_id = $1 AND item_type = $2 AND item_id = $3 AND format = $4
               AND status = 'pending'",
        )
        .bind(buyer_id)
        .bind(item_type)
        .bind(item_id)
        .bind(format)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn transition_status(
        &self,
        id: i32,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_response: Option<Value>,
    ) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as(
            "UPDATE payments
             SET status = $3,
                 gateway_response = COALESCE($4, gateway_response),
                 paid_at = CASE WHEN $3 = 'success' THEN NOW() ELSE paid_at END,
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING *",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(gateway_response)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn apply_earnings(&self, payment: &Payment, platform_account_id: i32) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        if !compare_and_swap_earnings_status(
            &mut tx,
            payment.id,
            EarningsStatus::Pending,
            EarningsStatus::Processed,
        )
        .await?
        {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO commissions (
                payment_id, item_id, item_type, buyer_id, seller_id, seller_type,
                total_amount, seller_amount, platform_amount, percentage,
                status, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'processed', NOW())
            ON CONFLICT (payment_id) DO UPDATE
            SET status = 'processed', processed_at = COALESCE(commissions.processed_at, NOW())",
        )
        .bind(payment.id)
        .bind(payment.item_id)
        .bind(payment.item_type)
        .bind(payment.buyer_id)
        .bind(payment.seller_id)
        .bind(payment.seller_type)
        .bind(&payment.amount)
        .bind(&payment.seller_amount)
        .bind(&payment.platform_amount)
        .bind(&payment.commission_percentage)
        .execute(&mut *tx)
        .await?;

        credit_wallet(&mut tx, payment.seller_id, payment.seller_type, &payment.seller_amount).await?;
        credit_wallet(&mut tx, platform_account_id, SellerType::Superadmin, &payment.platform_amount).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as(
            "SELECT * FROM payments
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at
             LIMIT $2",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }
}
