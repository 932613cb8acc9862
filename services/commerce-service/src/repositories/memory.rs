// In-memory repositories for unit tests. One mutex over the whole store keeps
// every operation atomic, mirroring the single-transaction SQL versions.
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{PaymentRepository, PayoutRepository, PurchaseRepository, WalletRepository};
use crate::domain::commission::Commission;
use crate::domain::payment::{ContentFormat, EarningsStatus, ItemType, NewPayment, Payment, PaymentStatus, SellerType};
use crate::domain::payout::{
    NewPayout, Payout, PayoutCompletion, PayoutCreation, PayoutFilter, PayoutMethod, PayoutStatus,
};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::domain::wallet::{PayoutSettings, Wallet};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct State {
    next_id: i32,
    payments: Vec<Payment>,
    purchases: Vec<Purchase>,
    commissions: Vec<Commission>,
    payouts: Vec<Payout>,
    wallets: HashMap<i32, Wallet>,
    outage: bool,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn credit(&mut self, user_id: i32, role: SellerType, amount: &BigDecimal) {
        if amount.is_zero() {
            return;
        }
        let wallet = self
            .wallets
            .entry(user_id)
            .or_insert_with(|| empty_wallet(user_id, role));
        wallet.available_balance = &wallet.available_balance + amount;
        wallet.updated_at = Utc::now();
    }

    fn linked_ids(&self, payout_id: i32) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .commissions
            .iter()
            .filter(|c| c.payout_id == Some(payout_id))
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn payout_view(&self, index: usize) -> Payout {
        let mut payout = self.payouts[index].clone();
        payout.commission_ids = self.linked_ids(payout.id);
        payout
    }
}

fn empty_wallet(user_id: i32, role: SellerType) -> Wallet {
    let now = Utc::now();
    Wallet {
        user_id,
        available_balance: BigDecimal::zero(),
        total_withdrawn: BigDecimal::zero(),
        role,
        is_active: true,
        auto_payout_enabled: false,
        payout_method: None,
        jazzcash_number: None,
        jazzcash_verified: false,
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

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // Every repository call fails with a database error while set
    fn guard(&self) -> AppResult<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.outage {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }

    pub fn set_outage(&self, outage: bool) {
        self.lock().outage = outage;
    }

    pub fn put_wallet(&self, wallet: Wallet) {
        self.lock().wallets.insert(wallet.user_id, wallet);
    }

    pub fn wallet(&self, user_id: i32) -> Option<Wallet> {
        self.lock().wallets.get(&user_id).cloned()
    }

    pub fn payment(&self, id: i32) -> Option<Payment> {
        self.lock().payments.iter().find(|p| p.id == id).cloned()
    }

    pub fn commissions(&self) -> Vec<Commission> {
        self.lock().commissions.clone()
    }

    pub fn purchases(&self) -> Vec<Purchase> {
        self.lock().purchases.clone()
    }

    /// Seed a settled payment and its processed commission for `seller_id`
    pub fn seed_commission(&self, seller_id: i32, seller_amount: &str) -> Commission {
        use std::str::FromStr;

        let mut state = self.lock();
        let seller_amount = BigDecimal::from_str(seller_amount).unwrap();
        let now = Utc::now();
        let payment_id = state.next_id();
        let payment = Payment {
            id: payment_id,
            buyer_id: 900 + payment_id,
            item_id: payment_id,
            item_type: ItemType::Book,
            format: ContentFormat::Pdf,
            amount: seller_amount.clone(),
            currency: "PKR".to_string(),
            seller_id,
            seller_type: SellerType::Admin,
            seller_amount: seller_amount.clone(),
            platform_amount: BigDecimal::zero(),
            commission_percentage: BigDecimal::zero(),
            gateway: crate::domain::payment::GatewayKind::JazzCash,
            transaction_ref: format!("SEED{}", payment_id),
            status: PaymentStatus::Success,
            gateway_response: None,
            earnings_status: EarningsStatus::Processed,
            payout_id: None,
            created_at: now,
            updated_at: now,
            paid_at: Some(now),
        };
        let commission = Commission {
            id: state.next_id(),
            payment_id,
            item_id: payment.item_id,
            item_type: payment.item_type,
            buyer_id: payment.buyer_id,
            seller_id,
            seller_type: SellerType::Admin,
            total_amount: seller_amount.clone(),
            seller_amount,
            platform_amount: BigDecimal::zero(),
            percentage: BigDecimal::zero(),
            status: EarningsStatus::Processed,
            payout_id: None,
            processed_at: Some(now),
            paid_out_at: None,
            created_at: now,
        };
        state.payments.push(payment);
        state.commissions.push(commission.clone());
        commission
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment> {
        let mut state = self.guard()?;
        if state.payments.iter().any(|p| p.transaction_ref == payment.transaction_ref) {
            return Err(AppError::conflict("duplicate transaction_ref"));
        }
        if state.payments.iter().any(|p| {
            p.status == PaymentStatus::Pending
                && p.buyer_id == payment.buyer_id
                && p.item_type == payment.item_type
                && p.item_id == payment.item_id
                && p.format == payment.format
        }) {
            return Err(AppError::conflict("a checkout for this item is already in progress"));
        }

        let now = Utc::now();
        let created = Payment {
            id: state.next_id(),
            buyer_id: payment.buyer_id,
            item_id: payment.item_id,
            item_type: payment.item_type,
            format: payment.format,
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            seller_id: payment.seller_id,
            seller_type: payment.seller_type,
            seller_amount: payment.split.seller_amount.clone(),
            platform_amount: payment.split.platform_amount.clone(),
            commission_percentage: payment.split.percentage.clone(),
            gateway: payment.gateway,
            transaction_ref: payment.transaction_ref.clone(),
            status: PaymentStatus::Pending,
            gateway_response: None,
            earnings_status: EarningsStatus::Pending,
            payout_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        state.payments.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i32) -> AppResult<Option<Payment>> {
        let state = self.guard()?;
        Ok(state.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_ref(&self, transaction_ref: &str) -> AppResult<Option<Payment>> {
        let state = self.guard()?;
        Ok(state
            .payments
            .iter()
            .find(|p| p.transaction_ref == transaction_ref)
            .cloned())
    }

    async fn find_open_checkout(
        &self,
        buyer_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Payment>> {
        let state = self.guard()?;
        Ok(state
            .payments
            .iter()
            .find(|p| {
                p.status == PaymentStatus::Pending
                    && p.buyer_id == buyer_id
                    && p.item_type == item_type
                    && p.item_id == item_id
                    && p.format == format
            })
            .cloned())
    }

    async fn transition_status(
        &self,
        id: i32,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_response: Option<Value>,
    ) -> AppResult<Option<Payment>> {
        let mut state = self.guard()?;
        let Some(payment) = state.payments.iter_mut().find(|p| p.id == id && p.status == from) else {
            return Ok(None);
        };

        payment.status = to;
        if gateway_response.is_some() {
            payment.gateway_response = gateway_response;
        }
        if to == PaymentStatus::Success {
            payment.paid_at = Some(Utc::now());
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn apply_earnings(&self, payment: &Payment, platform_account_id: i32) -> AppResult<bool> {
        let mut state = self.guard()?;
        let Some(stored) = state.payments.iter_mut().find(|p| {
            p.id == payment.id && p.status == PaymentStatus::Success && p.earnings_status == EarningsStatus::Pending
        }) else {
            return Ok(false);
        };
        stored.earnings_status = EarningsStatus::Processed;
        let stored = stored.clone();

        let now = Utc::now();
        if !state.commissions.iter().any(|c| c.payment_id == stored.id) {
            let id = state.next_id();
            state.commissions.push(Commission {
                id,
                payment_id: stored.id,
                item_id: stored.item_id,
                item_type: stored.item_type,
                buyer_id: stored.buyer_id,
                seller_id: stored.seller_id,
                seller_type: stored.seller_type,
                total_amount: stored.amount.clone(),
                seller_amount: stored.seller_amount.clone(),
                platform_amount: stored.platform_amount.clone(),
                percentage: stored.commission_percentage.clone(),
                status: EarningsStatus::Processed,
                payout_id: None,
                processed_at: Some(now),
                paid_out_at: None,
                created_at: now,
            });
        }

        state.credit(stored.seller_id, stored.seller_type, &stored.seller_amount);
        state.credit(platform_account_id, SellerType::Superadmin, &stored.platform_amount);
        Ok(true)
    }

    async fn stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<Payment>> {
        let state = self.guard()?;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < older_than)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PurchaseRepository for MemoryStore {
    async fn insert_completed(&self, purchase: &NewPurchase) -> AppResult<Purchase> {
        let mut state = self.guard()?;

        let existing = state.purchases.iter().find(|p| {
            p.payment_id == purchase.payment_id
                || (p.user_id == purchase.user_id
                    && p.item_type == purchase.item_type
                    && p.item_id == purchase.item_id
                    && p.format == purchase.format
                    && p.payment_status == PurchaseStatus::Completed)
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }

        let created = Purchase {
            id: state.next_id(),
            user_id: purchase.user_id,
            item_id: purchase.item_id,
            item_type: purchase.item_type,
            format: purchase.format,
            amount: purchase.amount.clone(),
            payment_id: purchase.payment_id,
            payment_status: PurchaseStatus::Completed,
            transaction_id: purchase.transaction_id.clone(),
            seller_amount: purchase.split.seller_amount.clone(),
            platform_amount: purchase.split.platform_amount.clone(),
            commission_percentage: purchase.split.percentage.clone(),
            created_at: Utc::now(),
        };
        state.purchases.push(created.clone());
        Ok(created)
    }

    async fn find_completed(
        &self,
        user_id: i32,
        item_type: ItemType,
        item_id: i32,
        format: ContentFormat,
    ) -> AppResult<Option<Purchase>> {
        let state = self.guard()?;
        Ok(state
            .purchases
            .iter()
            .find(|p| {
                p.user_id == user_id
                    && p.item_type == item_type
                    && p.item_id == item_id
                    && p.format == format
                    && p.payment_status == PurchaseStatus::Completed
            })
            .cloned())
    }

    async fn find_by_payment(&self, payment_id: i32) -> AppResult<Option<Purchase>> {
        let state = self.guard()?;
        Ok(state.purchases.iter().find(|p| p.payment_id == payment_id).cloned())
    }

    async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<Purchase>> {
        let state = self.guard()?;
        Ok(state
            .purchases
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mirror_status(&self, payment_id: i32, status: PurchaseStatus) -> AppResult<()> {
        let mut state = self.guard()?;
        for purchase in state.purchases.iter_mut().filter(|p| p.payment_id == payment_id) {
            purchase.payment_status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl PayoutRepository for MemoryStore {
    async fn create_with_commissions(&self, payout: &NewPayout, batch_limit: i64) -> AppResult<PayoutCreation> {
        let mut state = self.guard()?;

        if state
            .payouts
            .iter()
            .any(|p| p.user_id == payout.user_id && p.is_in_flight())
        {
            return Ok(PayoutCreation::InFlight);
        }

        let claimable: Vec<usize> = state
            .commissions
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.seller_id == payout.user_id
                    && c.status == EarningsStatus::Processed
                    && c.payout_id.is_none()
                    && c.seller_amount > BigDecimal::zero()
            })
            .map(|(index, _)| index)
            .take(batch_limit.max(0) as usize)
            .collect();

        if claimable.is_empty() {
            return Ok(PayoutCreation::NoCommissions);
        }

        let id = state.next_id();
        let now = Utc::now();
        let mut amount = BigDecimal::zero();
        for index in &claimable {
            let commission = &mut state.commissions[*index];
            commission.payout_id = Some(id);
            commission.status = EarningsStatus::PaidOut;
            commission.paid_out_at = Some(now);
            amount += &commission.seller_amount;
        }

        state.payouts.push(Payout {
            id,
            user_id: payout.user_id,
            amount,
            currency: payout.currency.clone(),
            payment_method: payout.payment_method,
            recipient_details: payout.recipient_details.clone(),
            status: payout.status,
            internal_ref: payout.internal_ref.clone(),
            external_ref: None,
            failure_reason: None,
            retry_count: 0,
            trigger: payout.trigger,
            processed_by: None,
            proof: None,
            processed_at: (payout.status == PayoutStatus::Processing).then_some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
            commission_ids: Vec::new(),
        });

        let index = state.payouts.len() - 1;
        Ok(PayoutCreation::Created(state.payout_view(index)))
    }

    async fn find(&self, id: i32) -> AppResult<Option<Payout>> {
        let state = self.guard()?;
        Ok(state
            .payouts
            .iter()
            .position(|p| p.id == id)
            .map(|index| state.payout_view(index)))
    }

    async fn list(&self, filter: &PayoutFilter) -> AppResult<Vec<Payout>> {
        let state = self.guard()?;
        Ok((0..state.payouts.len())
            .rev()
            .filter(|index| {
                let payout = &state.payouts[*index];
                filter.status.map_or(true, |s| payout.status == s)
                    && filter.user_id.map_or(true, |u| payout.user_id == u)
            })
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .map(|index| state.payout_view(index))
            .collect())
    }

    async fn commissions_for(&self, payout_id: i32) -> AppResult<Vec<Commission>> {
        let state = self.guard()?;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.payout_id == Some(payout_id))
            .cloned()
            .collect())
    }

    async fn mark_processing(
        &self,
        id: i32,
        from: PayoutStatus,
        processed_by: Option<i32>,
        bump_retry: bool,
    ) -> AppResult<Option<Payout>> {
        let mut state = self.guard()?;
        let Some(index) = state.payouts.iter().position(|p| p.id == id && p.status == from) else {
            return Ok(None);
        };

        let user_id = state.payouts[index].user_id;
        if !state.payouts[index].is_in_flight()
            && state.payouts.iter().any(|p| p.user_id == user_id && p.is_in_flight())
        {
            return Err(AppError::conflict("another payout for this seller is already in progress"));
        }

        let payout = &mut state.payouts[index];
        payout.status = PayoutStatus::Processing;
        payout.processed_by = processed_by.or(payout.processed_by);
        payout.processed_at = Some(Utc::now());
        if bump_retry {
            payout.retry_count += 1;
            payout.failure_reason = None;
        }
        payout.updated_at = Utc::now();
        Ok(Some(state.payout_view(index)))
    }

    async fn mark_failed(&self, id: i32, reason: &str) -> AppResult<Option<Payout>> {
        let mut state = self.guard()?;
        let Some(index) = state.payouts.iter().position(|p| p.id == id && p.is_in_flight()) else {
            return Ok(None);
        };

        let payout = &mut state.payouts[index];
        payout.status = PayoutStatus::Failed;
        payout.failure_reason = Some(reason.to_string());
        payout.updated_at = Utc::now();
        Ok(Some(state.payout_view(index)))
    }

    async fn note_unavailable(&self, id: i32, reason: &str) -> AppResult<()> {
        let mut state = self.guard()?;
        if let Some(payout) = state
            .payouts
            .iter_mut()
            .find(|p| p.id == id && p.status == PayoutStatus::Processing)
        {
            payout.failure_reason = Some(reason.to_string());
            payout.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, id: i32, completion: &PayoutCompletion) -> AppResult<Option<Payout>> {
        let mut state = self.guard()?;
        let Some(index) = state.payouts.iter().position(|p| p.id == id && p.is_in_flight()) else {
            return Ok(None);
        };

        let user_id = state.payouts[index].user_id;
        let amount = state.payouts[index].amount.clone();
        match state.wallets.get_mut(&user_id) {
            Some(wallet) if wallet.available_balance >= amount => {
                wallet.available_balance = &wallet.available_balance - &amount;
                wallet.total_withdrawn = &wallet.total_withdrawn + &amount;
                wallet.last_payout_date = Some(Utc::now());
            }
            _ => return Err(AppError::conflict("wallet balance is below the payout amount")),
        }

        let now = Utc::now();
        let payout = &mut state.payouts[index];
        payout.status = PayoutStatus::Completed;
        if completion.external_ref.is_some() {
            payout.external_ref = completion.external_ref.clone();
        }
        if completion.proof.is_some() {
            payout.proof = completion.proof.clone();
        }
        payout.processed_by = completion.processed_by.or(payout.processed_by);
        payout.failure_reason = None;
        payout.processed_at = payout.processed_at.or(Some(now));
        payout.completed_at = Some(now);
        payout.updated_at = now;

        let payment_ids: Vec<i32> = state
            .commissions
            .iter()
            .filter(|c| c.payout_id == Some(id))
            .map(|c| c.payment_id)
            .collect();
        for payment in state.payments.iter_mut().filter(|p| {
            payment_ids.contains(&p.id) && p.earnings_status == EarningsStatus::Processed
        }) {
            payment.earnings_status = EarningsStatus::PaidOut;
            payment.payout_id = Some(id);
        }

        Ok(Some(state.payout_view(index)))
    }

    async fn cancel(&self, id: i32, reason: &str, processed_by: i32) -> AppResult<Option<Payout>> {
        let mut state = self.guard()?;
        let Some(index) = state
            .payouts
            .iter()
            .position(|p| p.id == id && matches!(p.status, PayoutStatus::Pending | PayoutStatus::Failed))
        else {
            return Ok(None);
        };

        let released = state.linked_ids(id);
        for commission in state.commissions.iter_mut().filter(|c| c.payout_id == Some(id)) {
            commission.payout_id = None;
            commission.status = EarningsStatus::Processed;
            commission.paid_out_at = None;
        }

        let payout = &mut state.payouts[index];
        payout.status = PayoutStatus::Cancelled;
        payout.failure_reason = Some(reason.to_string());
        payout.processed_by = Some(processed_by);
        payout.updated_at = Utc::now();

        let mut cancelled = payout.clone();
        cancelled.commission_ids = released;
        Ok(Some(cancelled))
    }
}

#[async_trait]
impl WalletRepository for MemoryStore {
    async fn find(&self, user_id: i32) -> AppResult<Option<Wallet>> {
        let state = self.guard()?;
        Ok(state.wallets.get(&user_id).cloned())
    }

    async fn auto_payout_candidates(&self, minimum: &BigDecimal) -> AppResult<Vec<i32>> {
        let state = self.guard()?;
        let mut users: Vec<i32> = state
            .wallets
            .values()
            .filter(|w| {
                w.is_active
                    && w.auto_payout_enabled
                    && w.role != SellerType::Superadmin
                    && w.payout_method.is_some()
                    && &w.available_balance >= minimum
            })
            .map(|w| w.user_id)
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    async fn upsert_settings(&self, user_id: i32, role: SellerType, settings: &PayoutSettings) -> AppResult<Wallet> {
        let mut state = self.guard()?;
        let wallet = state
            .wallets
            .entry(user_id)
            .or_insert_with(|| empty_wallet(user_id, role));

        let same_jazzcash = wallet.jazzcash_number == settings.jazzcash_number;
        let same_easypaisa = wallet.easypaisa_number == settings.easypaisa_number;
        let same_bank = wallet.bank_name == settings.bank_name
            && wallet.bank_account_number == settings.bank_account_number
            && wallet.bank_account_title == settings.bank_account_title;
        wallet.jazzcash_verified = wallet.jazzcash_verified && same_jazzcash;
        wallet.easypaisa_verified = wallet.easypaisa_verified && same_easypaisa;
        wallet.bank_verified = wallet.bank_verified && same_bank;

        wallet.payout_method = Some(settings.payout_method);
        wallet.auto_payout_enabled = settings.auto_payout_enabled;
        wallet.jazzcash_number = settings.jazzcash_number.clone();
        wallet.easypaisa_number = settings.easypaisa_number.clone();
        wallet.bank_name = settings.bank_name.clone();
        wallet.bank_account_number = settings.bank_account_number.clone();
        wallet.bank_account_title = settings.bank_account_title.clone();
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn set_verified(&self, user_id: i32, method: PayoutMethod, verified: bool) -> AppResult<Option<Wallet>> {
        let mut state = self.guard()?;
        let Some(wallet) = state.wallets.get_mut(&user_id) else {
            return Ok(None);
        };

        match method {
            PayoutMethod::JazzCash if wallet.jazzcash_number.is_some() => wallet.jazzcash_verified = verified,
            PayoutMethod::EasyPaisa if wallet.easypaisa_number.is_some() => wallet.easypaisa_verified = verified,
            PayoutMethod::Bank if wallet.bank_account_number.is_some() => wallet.bank_verified = verified,
            PayoutMethod::Manual => return Err(AppError::validation("manual payouts need no verification")),
            _ => return Ok(None),
        }
        Ok(Some(wallet.clone()))
    }
}
