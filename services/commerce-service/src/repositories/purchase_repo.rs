use async_trait::async_trait;
use sqlx::PgPool;

use super::PurchaseRepository;
use crate::domain::payment::{ContentFormat, ItemType};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgPurchaseRepository {
    pool: PgPool,
}

impl PgPurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PurchaseRepository for PgPurchaseRepository {
    async fn insert_completed(&self, purchase: &NewPurchase) -> AppResult<Purchase> {
        // Conflicts on payment_id or on the one-completed-grant index both land here
        let inserted: Option<Purchase> = sqlx::query_as(
            "INSERT INTO purchases (
                user_id, item_id, item_type, format, amount, payment_id, payment_status,
                transaction_id, seller_amount, platform_amount, commission_percentage
            ) VALUES ($1, $2, $3, $4, $5, $6, 'completed', $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            RETURNING *",
        )
        .bind(purchase.user_id)
        .bind(purchase.item_id)
        .bind(purchase.item_type)
        .bind(purchase.format)
        .bind(&purchase.amount)
        .bind(purchase.payment_id)
        .bind(&purchase.transaction_id)
        .bind(&purchase.split.seller_amount)
        .bind(&purchase.split.platform_amount)
        .bind(&purchase.split.percentage)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = inserted {
            return Ok(created);
        }

        if let Some(existing) = self.find_by_payment(purchase.payment_id).await? {
            return Ok(existing);
        }

        self.find_completed(purchase.user_id, purchase.item_type, purchase.item_id, purchase.format)
            .await?
            .ok_or_else(|| AppError::internal("purchase conflict without an existing grant"))
    }

    async fn find_completed(
        &self,
        user_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Purchase>> {
        let purchase = sqlx::query_as(
            "SELECT * FROM purchases
             WHERE user_id = $1 AND item_type = $2 AND item_id = $3 AND format = $4
               AND payment_status = 'completed'",
        )
        .bind(user_id)
        .bind(item_type)
        .bind(item_id)
        .bind(format)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }

    async fn find_by_payment(&self, payment_id: i32) -> AppResult<Option<Purchase>> {
        let purchase = sqlx::query_as("SELECT * FROM purchases WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(purchase)
    }

    async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<Purchase>> {
        let purchases = sqlx::query_as(
            "SELECT * FROM purchases WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(purchases)
    }

    async fn mirror_status(&self, payment_id: i32, status: PurchaseStatus) -> AppResult<()> {
        sqlx::query("UPDATE purchases SET payment_status = $2 WHERE payment_id = $1")
            .bind(payment_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
