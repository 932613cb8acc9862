// Background jobs: scheduled auto payouts and pending-payment reconciliation
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::config::PayoutConfig;
use crate::ledger::CheckoutService;
use crate::payouts::PayoutEngine;

// Pending payments inspected per reconciliation sweep
const RECONCILE_BATCH: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutCadence {
    Daily,
    Weekly,
    Monthly,
}

impl PayoutCadence {
    // Six-field cron (sec min hour day month weekday), 02:00 server time
    pub fn cron_expression(&self) -> &'static str {
        match self {
            PayoutCadence::Daily => "0 0 2 * * *",
            PayoutCadence::Weekly => "0 0 2 * * Mon",
            PayoutCadence::Monthly => "0 0 2 1 * *",
        }
    }
}

impl fmt::Display for PayoutCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            PayoutCadence::Daily => "daily",
            PayoutCadence::Weekly => "weekly",
            PayoutCadence::Monthly => "monthly",
        };
        f.write_str(value)
    }
}

impl FromStr for PayoutCadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(PayoutCadence::Daily),
            "weekly" => Ok(PayoutCadence::Weekly),
            "monthly" => Ok(PayoutCadence::Monthly),
            other => Err(format!("unknown cadence '{}', expected daily, weekly or monthly", other)),
        }
    }
}

pub struct PayoutScheduler {
    payouts: Arc<PayoutEngine>,
    checkout: Arc<CheckoutService>,
    config: PayoutConfig,
}

impl PayoutScheduler {
    pub fn new(payouts: Arc<PayoutEngine>, checkout: Arc<CheckoutService>, config: PayoutConfig) -> Self {
        Self {
            payouts,
            checkout,
            config,
        }
    }

    pub fn schedule(&self) -> &str {
        self.config
            .cron_override
            .as_deref()
            .unwrap_or_else(|| self.config.cadence.cron_expression())
    }

    /// Start both jobs. The returned scheduler must be kept alive for the
    /// lifetime of the process; `None` when background jobs are disabled.
    pub async fn start(self) -> Result<Option<JobScheduler>, JobSchedulerError> {
        if self.config.scheduler_disabled {
            tracing::warn!("⏸️ Background payout and reconciliation jobs are disabled");
            return Ok(None);
        }

        let scheduler = JobScheduler::new().await?;
        let schedule = self.schedule().to_string();

        let payouts = self.payouts.clone();
        let job = Job::new_async(schedule.as_str(), move |_id, _lock| {
            let payouts = payouts.clone();
            Box::pin(async move {
                match payouts.process_all_auto_payouts().await {
                    Ok(summary) => tracing::info!(
                        "⏰ Scheduled payout run: attempted={} succeeded={} failed={}",
                        summary.attempted,
                        summary.succeeded,
                        summary.failed
                    ),
                    Err(e) => tracing::error!("Scheduled payout run failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        tracing::info!("⏰ Auto payouts scheduled ({}): {}", self.config.cadence, schedule);

        spawn_reconciler(
            self.checkout,
            self.config.reconcile_interval,
            self.config.reconcile_after_minutes,
        );

        Ok(Some(scheduler))
    }
}

// Inquire pending payments whose callbacks never arrived
fn spawn_reconciler(checkout: Arc<CheckoutService>, every: Duration, after_minutes: i64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match checkout
                .reconcile_pending(chrono::Duration::minutes(after_minutes), RECONCILE_BATCH)
                .await
            {
                Ok(summary) if summary.checked > 0 => tracing::info!(
                    "🔁 Reconciled pending payments: checked={} settled={} still_pending={} errors={}",
                    summary.checked,
                    summary.settled,
                    summary.still_pending,
                    summary.errors
                ),
                Ok(_) => tracing::debug!("No stale pending payments"),
                Err(e) => tracing::error!("Pending payment reconciliation failed: {}", e),
            }
        }
    });
}
