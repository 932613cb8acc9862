use futures_util::{stream, StreamExt};
use serde::Serialize;
use shared::utils::validation::sanitize_html;
use std::sync::Arc;
use utoipa::ToSchema;

use super::notifier::PayoutNotifier;
use super::strategy::{Disbursement, PayoutStrategy, StrategyRegistry};
use crate::domain::commission::Commission;
use crate::domain::payment::SellerType;
use crate::domain::payout::{
    CompletePayoutRequest, NewPayout, Payout, PayoutCompletion, PayoutCreation, PayoutFailure, PayoutFilter,
    PayoutMethod, PayoutResult, PayoutRunSummary, PayoutStatus, PayoutTrigger,
};
use crate::error::{AppError, AppResult};
use crate::gateways::GatewayError;
use crate::ledger::WalletLedger;
use crate::repositories::PayoutRepository;

#[derive(Debug, Clone)]
pub struct PayoutSettingsConfig {
    pub batch_limit: i64,
    pub concurrency: usize,
    pub currency: String,
}

// Admin detail view: the payout with the commissions it settles
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayoutDetail {
    pub payout: Payout,
    pub commissions: Vec<Commission>,
}

/// Payout state machine.
///
/// Automatic methods go PROCESSING -> COMPLETED | FAILED inside one call.
/// Payouts needing approval wait in PENDING until `approve` disburses them
/// or `reject` cancels them. A manual transfer is closed with `complete`. Business refusals come back as a failed
/// `PayoutResult`; only infrastructure problems are `Err`.
pub struct PayoutEngine {
    repo: Arc<dyn PayoutRepository>,
    wallets: WalletLedger,
    strategies: StrategyRegistry,
    notifier: Arc<dyn PayoutNotifier>,
    settings: PayoutSettingsConfig,
}

impl PayoutEngine {
    pub fn new(
        repo: Arc<dyn PayoutRepository>,
        wallets: WalletLedger,
        strategies: StrategyRegistry,
        notifier: Arc<dyn PayoutNotifier>,
        settings: PayoutSettingsConfig,
    ) -> Self {
        Self {
            repo,
            wallets,
            strategies,
            notifier,
            settings,
        }
    }

    pub async fn process_auto_payout(&self, user_id: i32) -> AppResult<PayoutResult> {
        self.start_payout(user_id, PayoutTrigger::Auto).await
    }

    // Seller asked for their balance now; same rules as the scheduled run
    pub async fn request_payout(&self, user_id: i32) -> AppResult<PayoutResult> {
        self.start_payout(user_id, PayoutTrigger::Requested).await
    }

    /// Run every eligible seller. One seller failing never stops the batch.
    pub async fn process_all_auto_payouts(&self) -> AppResult<PayoutRunSummary> {
        let candidates = self.wallets.auto_payout_candidates().await?;
        tracing::info!("💸 Auto payout run: {} candidate(s)", candidates.len());

        let results: Vec<PayoutResult> = stream::iter(candidates)
            .map(|user_id| async move {
                match self.process_auto_payout(user_id).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Auto payout for user {} errored: {}", user_id, e);
                        PayoutResult::failed(user_id, PayoutFailure::Internal(e.to_string()), None)
                    }
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let summary = PayoutRunSummary::from(results);
        tracing::info!(
            "✅ Auto payout run finished: attempted={} succeeded={} failed={}",
            summary.attempted,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    async fn start_payout(&self, user_id: i32, trigger: PayoutTrigger) -> AppResult<PayoutResult> {
        let refuse = |failure: PayoutFailure| -> AppResult<PayoutResult> {
            tracing::info!("Payout for user {} refused: {}", user_id, failure);
            Ok(PayoutResult::failed(user_id, failure, None))
        };

        let Some(wallet) = self.wallets.find(user_id).await? else {
            return refuse(PayoutFailure::WalletNotFound);
        };

        // The platform keeps its share; only sellers are paid out
        if wallet.role == SellerType::Superadmin {
            return refuse(PayoutFailure::NoEligibleCommissions);
        }
        if !wallet.is_active {
            return refuse(PayoutFailure::UserInactive);
        }

        let minimum = self.wallets.minimum_payout();
        if &wallet.available_balance < minimum {
            return refuse(PayoutFailure::insufficient_balance(minimum, &wallet.available_balance));
        }

        let Some(method) = wallet.payout_method else {
            return refuse(PayoutFailure::WalletNotVerified("no payout method configured".to_string()));
        };

        let strategy = self.strategy_for(method)?;
        let recipient_details = match strategy.recipient(&wallet) {
            Ok(details) => details,
            Err(failure) => return refuse(failure),
        };

        let new_payout = NewPayout {
            user_id,
            currency: self.settings.currency.clone(),
            payment_method: method,
            recipient_details,
            status: if strategy.requires_approval() {
                PayoutStatus::Pending
            } else {
                PayoutStatus::Processing
            },
            internal_ref: NewPayout::generate_internal_ref(),
            trigger,
        };

        let payout = match self
            .repo
            .create_with_commissions(&new_payout, self.settings.batch_limit)
            .await?
        {
            PayoutCreation::Created(payout) => payout,
            PayoutCreation::NoCommissions => return refuse(PayoutFailure::NoEligibleCommissions),
            PayoutCreation::InFlight => return refuse(PayoutFailure::PayoutInFlight),
        };

        tracing::info!(
            "Payout {} created for user {}: {} {} via {} ({} commission(s), trigger={})",
            payout.internal_ref,
            user_id,
            payout.amount,
            payout.currency,
            payout.payment_method,
            payout.commission_ids.len(),
            trigger
        );

        if payout.status == PayoutStatus::Pending {
            self.notify(&payout).await;
            return Ok(PayoutResult::succeeded(payout, "Payout created, awaiting admin approval"));
        }

        self.dispatch(strategy.as_ref(), payout).await
    }

    fn strategy_for(&self, method: PayoutMethod) -> AppResult<Arc<dyn PayoutStrategy>> {
        self.strategies
            .get(method)
            .ok_or_else(|| AppError::internal(format!("No payout strategy registered for {}", method)))
    }

    // Disburse a PROCESSING payout and record the outcome
    async fn dispatch(&self, strategy: &dyn PayoutStrategy, payout: Payout) -> AppResult<PayoutResult> {
        let user_id = payout.user_id;

        match strategy.disburse(&payout).await {
            Ok(Disbursement::Transferred { external_ref }) => {
                let completion = PayoutCompletion {
                    external_ref: Some(external_ref),
                    proof: None,
                    processed_by: payout.processed_by,
                };
                let completed = self
                    .repo
                    .complete(payout.id, &completion)
                    .await?
                    .ok_or_else(|| AppError::conflict(format!("payout {} changed state during disbursement", payout.id)))?;

                tracing::info!(
                    "✅ Payout {} completed: {} to user {} (external ref {:?})",
                    completed.internal_ref,
                    completed.amount,
                    user_id,
                    completed.external_ref
                );
                self.notify(&completed).await;
                Ok(PayoutResult::succeeded(completed, "Payout completed"))
            }
            Ok(Disbursement::AwaitingProof) => Ok(PayoutResult::succeeded(payout, "Payout awaiting manual transfer")),
            Err(GatewayError::Unavailable(reason)) => {
                tracing::warn!(
                    "Payout {} outcome unknown, left processing: {}",
                    payout.internal_ref,
                    reason
                );
                self.repo.note_unavailable(payout.id, &reason).await?;
                let current = self.repo.find(payout.id).await?;
                Ok(PayoutResult::failed(user_id, PayoutFailure::GatewayUnavailable(reason), current))
            }
            Err(GatewayError::Rejected(reason)) | Err(GatewayError::InvalidPayload(reason)) => {
                tracing::warn!("❌ Payout {} failed: {}", payout.internal_ref, reason);
                let failed = self.repo.mark_failed(payout.id, &reason).await?;
                if let Some(failed) = &failed {
                    self.notify(failed).await;
                }
                Ok(PayoutResult::failed(user_id, PayoutFailure::DisbursementFailed(reason), failed))
            }
        }
    }

    async fn notify(&self, payout: &Payout) {
        if let Err(e) = self.notifier.payout_updated(payout).await {
            tracing::warn!("Payout {} notification not delivered: {}", payout.id, e);
        }
    }

    pub async fn get(&self, payout_id: i32) -> AppResult<Payout> {
        self.repo
            .find(payout_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payout not found"))
    }

    pub async fn detail(&self, payout_id: i32) -> AppResult<PayoutDetail> {
        let payout = self.get(payout_id).await?;
        let commissions = self.repo.commissions_for(payout_id).await?;
        Ok(PayoutDetail { payout, commissions })
    }

    pub async fn list(&self, filter: &PayoutFilter) -> AppResult<Vec<Payout>> {
        self.repo.list(filter).await
    }

    /// Approve a PENDING payout and run its disbursement now. A transfer the
    /// strategy makes completes the payout here; the manual strategy leaves
    /// it PROCESSING until the proof is recorded with `complete`.
    pub async fn approve(&self, payout_id: i32, admin_id: i32) -> AppResult<PayoutResult> {
        let payout = self.get(payout_id).await?;
        if payout.status != PayoutStatus::Pending {
            return Err(AppError::conflict(format!("payout is {}, only pending payouts can be approved", payout.status)));
        }
        let strategy = self.strategy_for(payout.payment_method)?;

        let approved = self
            .repo
            .mark_processing(payout_id, PayoutStatus::Pending, Some(admin_id), false)
            .await?
            .ok_or_else(|| AppError::conflict("payout changed state, reload and try again"))?;

        tracing::info!(
            target: "security",
            "Payout {} approved by admin {}",
            approved.internal_ref,
            admin_id
        );
        self.notify(&approved).await;
        self.dispatch(strategy.as_ref(), approved).await
    }

    /// Cancel a PENDING or FAILED payout and release its commissions.
    pub async fn reject(&self, payout_id: i32, reason: &str, admin_id: i32) -> AppResult<Payout> {
        let reason = sanitize_html(reason.trim());
        if reason.is_empty() {
            return Err(AppError::validation("A rejection reason is required"));
        }

        let cancelled = self
            .repo
            .cancel(payout_id, &reason, admin_id)
            .await?
            .ok_or_else(|| AppError::conflict("only pending or failed payouts can be rejected"))?;

        tracing::info!(
            target: "security",
            "Payout {} rejected by admin {}: {} ({} commission(s) released)",
            cancelled.internal_ref,
            admin_id,
            reason,
            cancelled.commission_ids.len()
        );
        self.notify(&cancelled).await;
        Ok(cancelled)
    }

    // Record an out-of-band manual transfer
    pub async fn complete(&self, payout_id: i32, request: CompletePayoutRequest, admin_id: i32) -> AppResult<Payout> {
        let payout = self.get(payout_id).await?;
        let strategy = self.strategy_for(payout.payment_method)?;
        if !strategy.requires_approval() {
            return Err(AppError::validation(format!(
                "{} payouts are completed by the provider, not by hand",
                payout.payment_method
            )));
        }

        let completion = PayoutCompletion {
            external_ref: request.external_ref.map(|r| sanitize_html(r.trim())),
            proof: Some(sanitize_html(request.proof.trim())),
            processed_by: Some(admin_id),
        };

        let completed = self
            .repo
            .complete(payout_id, &completion)
            .await?
            .ok_or_else(|| AppError::conflict(format!("payout is {}, it cannot be completed", payout.status)))?;

        tracing::info!(
            target: "security",
            "Manual payout {} completed by admin {}: {} to user {}",
            completed.internal_ref,
            admin_id,
            completed.amount,
            completed.user_id
        );
        self.notify(&completed).await;
        Ok(completed)
    }

    /// Operator retry of a FAILED or stalled PROCESSING payout. The same
    /// internal_ref goes out again as the idempotency key.
    pub async fn retry(&self, payout_id: i32, admin_id: i32) -> AppResult<PayoutResult> {
        let payout = self.get(payout_id).await?;
        let strategy = self.strategy_for(payout.payment_method)?;

        if strategy.requires_approval() {
            return Err(AppError::validation("manual payouts are approved and completed, not retried"));
        }
        if !matches!(payout.status, PayoutStatus::Failed | PayoutStatus::Processing) {
            return Err(AppError::conflict(format!("payout is {}, nothing to retry", payout.status)));
        }

        let retried = self
            .repo
            .mark_processing(payout_id, payout.status, Some(admin_id), true)
            .await?
            .ok_or_else(|| AppError::conflict("payout changed state, reload and try again"))?;

        tracing::info!(
            "Retrying payout {} (attempt {}) for admin {}",
            retried.internal_ref,
            retried.retry_count,
            admin_id
        );
        self.dispatch(strategy.as_ref(), retried).await
    }
}
