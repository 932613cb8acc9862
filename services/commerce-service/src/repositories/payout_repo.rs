use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;

use super::{is_unique_violation, PayoutRepository};
use crate::domain::commission::Commission;
use crate::domain::payout::{NewPayout, Payout, PayoutCompletion, PayoutCreation, PayoutFilter, PayoutStatus};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgPayoutRepository {
    pool: PgPool,
}

impl PgPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn commission_ids(&self, payout_id: i32) -> Result<Vec<i32>, sqlx::Error> {
        let rows: Vec<(i32,)> = sqlx::query_as("SELECT id FROM commissions WHERE payout_id = $1 ORDER BY id")
            .bind(payout_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn with_commission_ids(&self, payout: Option<Payout>) -> AppResult<Option<Payout>> {
        match payout {
            Some(mut payout) => {
                payout.commission_ids = self.commission_ids(payout.id).await?;
                Ok(Some(payout))
            }
            None => Ok(None),
        }
    }
}

// Lock and link claimable commissions; returns (id, seller_amount) per claim
async fn claim_commissions(
    tx: &mut Transaction<'_, Postgres>,
    payout_id: i32,
    user_id: i32,
    batch_limit: i64,
) -> Result<Vec<(i32, BigDecimal)>, sqlx::Error> {
    sqlx::query_as(
        "UPDATE commissions
         SET payout_id = $1, status = 'paid_out', paid_out_at = NOW()
         WHERE id IN (
             SELECT id FROM commissions
             WHERE seller_id = $2 AND status = 'processed' AND payout_id IS NULL AND seller_amount > 0
             ORDER BY created_at, id
             LIMIT $3
             FOR UPDATE SKIP LOCKED
         )
         RETURNING id, seller_amount",
    )
    .bind(payout_id)
    .bind(user_id)
    .bind(batch_limit)
    .fetch_all(&mut **tx)
    .await
}

#[async_trait]
impl PayoutRepository for PgPayoutRepository {
    async fn create_with_commissions(&self, payout: &NewPayout, batch_limit: i64) -> AppResult<PayoutCreation> {
        let mut tx = self.pool.begin().await?;

        let inserted: Result<Payout, sqlx::Error> = sqlx::query_as(
            "INSERT INTO payouts (
                user_id, amount, currency, payment_method, recipient_details,
                status, internal_ref, trigger, processed_at
            ) VALUES ($1, 0, $2, $3, $4, $5, $6, $7, CASE WHEN $5 = 'processing' THEN NOW() END)
            RETURNING *",
        )
        .bind(payout.user_id)
        .bind(&payout.currency)
        .bind(payout.payment_method)
        .bind(Json(&payout.recipient_details))
        .bind(payout.status)
        .bind(&payout.internal_ref)
        .bind(payout.trigger)
        .fetch_one(&mut *tx)
        .await;

        let created = match inserted {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Ok(PayoutCreation::InFlight);
            }
            Err(e) => return Err(e.into()),
        };

        let claimed = claim_commissions(&mut tx, created.id, payout.user_id, batch_limit).await?;
        if claimed.is_empty() {
            tx.rollback().await?;
            return Ok(PayoutCreation::NoCommissions);
        }

        let amount: BigDecimal = claimed.iter().map(|(_, seller_amount)| seller_amount).sum();

        let mut finalized: Payout = sqlx::query_as(
            "UPDATE payouts SET amount = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(created.id)
        .bind(&amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        finalized.commission_ids = claimed.into_iter().map(|(id, _)| id).collect();
        finalized.commission_ids.sort_unstable();
        Ok(PayoutCreation::Created(finalized))
    }

    async fn find(&self, id: i32) -> AppResult<Option<Payout>> {
        let payout = sqlx::query_as("SELECT * FROM payouts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.with_commission_ids(payout).await
    }

    async fn list(&self, filter: &PayoutFilter) -> AppResult<Vec<Payout>> {
        let mut payouts: Vec<Payout> = sqlx::query_as(
            "SELECT * FROM payouts
             WHERE ($1::varchar IS NULL OR status = $1)
               AND ($2::int IS NULL OR user_id = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(filter.status)
        .bind(filter.user_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        if payouts.is_empty() {
            return Ok(payouts);
        }

        let ids: Vec<i32> = payouts.iter().map(|p| p.id).collect();
        let links: Vec<(i32, i32)> = sqlx::query_as(
            "SELECT payout_id, id FROM commissions WHERE payout_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_payout: HashMap<i32, Vec<i32>> = HashMap::new();
        for (payout_id, commission_id) in links {
            by_payout.entry(payout_id).or_default().push(commission_id);
        }
        for payout in payouts.iter_mut() {
            payout.commission_ids = by_payout.remove(&payout.id).unwrap_or_default();
        }

        Ok(payouts)
    }

    async fn commissions_for(&self, payout_id: i32) -> AppResult<Vec<Commission>> {
        let commissions = sqlx::query_as("SELECT * FROM commissions WHERE payout_id = $1 ORDER BY id")
            .bind(payout_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(commissions)
    }

    async fn mark_processing(
        &self,
        id: i32,
        from: PayoutStatus,
        processed_by: Option<i32>,
        bump_retry: bool,
    ) -> AppResult<Option<Payout>> {
        let updated: Result<Option<Payout>, sqlx::Error> = sqlx::query_as(
            "UPDATE payouts
             SET status = 'processing',
                 processed_by = COALESCE($3, processed_by),
                 processed_at = NOW(),
                 retry_count = retry_count + CASE WHEN $4 THEN 1 ELSE 0 END,
                 failure_reason = CASE WHEN $4 THEN NULL ELSE failure_reason END,
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING *",
        )
        .bind(id)
        .bind(from)
        .bind(processed_by)
        .bind(bump_retry)
        .fetch_optional(&self.pool)
        .await;

        match updated {
            Ok(payout) => self.with_commission_ids(payout).await,
            // A failed payout cannot be revived while a newer one is in flight
            Err(e) if is_unique_violation(&e) => Err(AppError::conflict(
                "another payout for this seller is already in progress",
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_failed(&self, id: i32, reason: &str) -> AppResult<Option<Payout>> {
        let payout = sqlx::query_as(
            "UPDATE payouts
             SET status = 'failed', failure_reason = $2, updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING *",
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        self.with_commission_ids(payout).await
    }

    async fn note_unavailable(&self, id: i32, reason: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE payouts SET failure_reason = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete(&self, id: i32, completion: &PayoutCompletion) -> AppResult<Option<Payout>> {
        let mut tx = self.pool.begin().await?;

        let completed: Option<Payout> = sqlx::query_as(
            "UPDATE payouts
             SET status = 'completed',
                 external_ref = COALESCE($2, external_ref),
                 proof = COALESCE($3, proof),
                 processed_by = COALESCE($4, processed_by),
                 failure_reason = NULL,
                 processed_at = COALESCE(processed_at, NOW()),
                 completed_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING *",
        )
        .bind(id)
        .bind(&completion.external_ref)
        .bind(&completion.proof)
        .bind(completion.processed_by)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payout) = completed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let debited = sqlx::query(
            "UPDATE wallets
             SET available_balance = available_balance - $2,
                 total_withdrawn = total_withdrawn + $2,
                 last_payout_date = NOW(),
                 updated_at = NOW()
             WHERE user_id = $1 AND available_balance >= $2",
        )
        .bind(payout.user_id)
        .bind(&payout.amount)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() != 1 {
            tx.rollback().await?;
            tracing::warn!(
                target: "ledger_anomaly",
                "Wallet of user {} cannot cover payout {} ({})",
                payout.user_id,
                payout.internal_ref,
                payout.amount
            );
            return Err(AppError::conflict("wallet balance is below the payout amount"));
        }

        sqlx::query(
            "UPDATE payments
             SET earnings_status = 'paid_out', payout_id = $1, updated_at = NOW()
             WHERE id IN (SELECT payment_id FROM commissions WHERE payout_id = $1)
               AND earnings_status = 'processed'",
        )
        .bind(payout.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE commissions SET paid_out_at = COALESCE(paid_out_at, NOW()) WHERE payout_id = $1")
            .bind(payout.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.with_commission_ids(Some(payout)).await
    }

    async fn cancel(&self, id: i32, reason: &str, processed_by: i32) -> AppResult<Option<Payout>> {
        let mut tx = self.pool.begin().await?;

        let cancelled: Option<Payout> = sqlx::query_as(
            "UPDATE payouts
             SET status = 'cancelled', failure_reason = $2, processed_by = $3, updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'failed')
             RETURNING *",
        )
        .bind(id)
        .bind(reason)
        .bind(processed_by)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut payout) = cancelled else {
            tx.rollback().await?;
            return Ok(None);
        };

        let released: Vec<(i32,)> = sqlx::query_as(
            "UPDATE commissions
             SET payout_id = NULL, status = 'processed', paid_out_at = NULL
             WHERE payout_id = $1
             RETURNING id",
        )
        .bind(payout.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        payout.commission_ids = released.into_iter().map(|(id,)| id).collect();
        payout.commission_ids.sort_unstable();
        Ok(Some(payout))
    }
}
