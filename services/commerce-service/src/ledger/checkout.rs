use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use super::payment_ledger::{NewPendingPayment, PaymentLedger};
use super::purchase_recorder::PurchaseRecorder;
use super::webhook_verifier::{WebhookAck, WebhookVerdict, WebhookVerifier};
use crate::catalog::CatalogLookup;
use crate::domain::money;
use crate::domain::payment::{
    CheckoutInstructions, GatewayKind, Payment, PaymentStatus, PaymentStatusView, PurchaseRequest, PurchaseResponse,
    ReconcileSummary,
};
use crate::domain::purchase::Purchase;
use crate::error::{AppError, AppResult};
use crate::gateways::{GatewayAdapter, GatewayOutcome, GatewayRegistry, GatewayStatus, SessionRequest};

// Ledger state after a gateway outcome was applied
#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment: Payment,
    pub purchase: Option<Purchase>,
}

/// Purchase flow from initiation to settlement: gateway sessions, return
/// callbacks, webhooks, status polling and reconciliation all meet here.
pub struct CheckoutService {
    gateways: GatewayRegistry,
    catalog: Arc<dyn CatalogLookup>,
    ledger: PaymentLedger,
    purchases: PurchaseRecorder,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        gateways: GatewayRegistry,
        catalog: Arc<dyn CatalogLookup>,
        ledger: PaymentLedger,
        purchases: PurchaseRecorder,
        currency: String,
    ) -> Self {
        Self {
            gateways,
            catalog,
            ledger,
            purchases,
            currency,
        }
    }

    fn adapter(&self, kind: GatewayKind) -> AppResult<Arc<dyn GatewayAdapter>> {
        self.gateways
            .get(kind)
            .ok_or_else(|| AppError::validation(format!("Gateway {} is not enabled", kind)))
    }

    // Header carrying the webhook signature, None when it travels in the body
    pub fn signature_header(&self, gateway: GatewayKind) -> AppResult<Option<&'static str>> {
        Ok(self.adapter(gateway)?.signature_header())
    }

    pub async fn initiate_purchase(&self, buyer_id: i32, request: PurchaseRequest) -> AppResult<PurchaseResponse> {
        request.validate()?;
        let adapter = self.adapter(request.gateway)?;

        if let Some(purchase) = self
            .purchases
            .find_access(buyer_id, request.item_type, request.item_id, request.format)
            .await?
        {
            tracing::info!(
                "Buyer {} already owns {}:{} ({}), returning grant {}",
                buyer_id,
                request.item_type,
                request.item_id,
                request.format,
                purchase.id
            );
            return Ok(PurchaseResponse::AlreadyOwned { purchase });
        }

        if let Some(open) = self
            .ledger
            .open_checkout(buyer_id, request.item_type, request.item_id, request.format)
            .await?
        {
            if let Some(purchase) = self.resolve_open_checkout(&open).await? {
                return Ok(PurchaseResponse::AlreadyOwned { purchase });
            }
        }

        let item = self
            .catalog
            .find_item(request.item_type, request.item_id)
            .await?
            .filter(|item| item.approved)
            .ok_or_else(|| AppError::not_found("Item not found or not available for sale"))?;

        let amount = item
            .price_for(request.format)
            .map(money::normalize)
            .filter(|price| !money::is_negative(price) && money::to_minor_units(price).unwrap_or(0) > 0)
            .ok_or_else(|| AppError::validation(format!("Item is not sold in {} format", request.format)))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("buyer_id".to_string(), buyer_id.to_string());
        metadata.insert("item_type".to_string(), request.item_type.to_string());
        metadata.insert("item_id".to_string(), request.item_id.to_string());
        metadata.insert("format".to_string(), request.format.to_string());

        let session = adapter
            .create_session(&SessionRequest {
                amount: amount.clone(),
                buyer_id,
                item_id: request.item_id,
                item_type: request.item_type,
                format: request.format,
                seller_id: item.seller_id,
                description: format!("{} ({})", item.title, request.format),
                metadata,
            })
            .await?;

        let payment = self
            .ledger
            .create_pending(NewPendingPayment {
                buyer_id,
                item_id: request.item_id,
                item_type: request.item_type,
                format: request.format,
                amount,
                currency: self.currency.clone(),
                seller_id: item.seller_id,
                seller_type: item.seller_type,
                gateway: request.gateway,
                transaction_ref: session.transaction_ref.clone(),
            })
            .await?;

        Ok(PurchaseResponse::Checkout {
            checkout: CheckoutInstructions {
                payment_id: payment.id,
                transaction_ref: payment.transaction_ref,
                payment_url: session.payment_url,
                form_fields: session.form_fields,
            },
        })
    }

    /// Ask the gateway how an earlier open checkout ended before starting a
    /// new one. Returns the grant when it was paid, `None` when it failed and
    /// a fresh checkout may proceed. A checkout the gateway still holds open
    /// is refused.
    async fn resolve_open_checkout(&self, open: &Payment) -> AppResult<Option<Purchase>> {
        match self.inquire_and_settle(open).await? {
            Some(settlement) => Ok(settlement.purchase.filter(Purchase::grants_access)),
            None => {
                tracing::info!(
                    "Buyer {} already has checkout {} open for {}:{}",
                    open.buyer_id,
                    open.transaction_ref,
                    open.item_type,
                    open.item_id
                );
                Err(AppError::conflict(format!(
                    "Payment {} for this item is still pending. Complete it or try again once it expires",
                    open.id
                )))
            }
        }
    }

    /// Apply a verified gateway outcome to the ledger.
    ///
    /// Safe to repeat: the status change, the earnings distribution and the
    /// access grant are each idempotent, so a redelivery finishes whatever a
    /// previous attempt left undone.
    pub async fn settle(&self, gateway: GatewayKind, outcome: GatewayOutcome) -> AppResult<Settlement> {
        let payment = self
            .ledger
            .find_by_ref(&outcome.transaction_ref)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {} not found", outcome.transaction_ref)))?;

        if payment.gateway != gateway {
            tracing::warn!(
                target: "security",
                "Payment {} belongs to {}, outcome came from {}",
                payment.transaction_ref,
                payment.gateway,
                gateway
            );
            return Err(AppError::IntegrityMismatch("gateway does not match payment".to_string()));
        }

        if let Some(reported) = outcome.amount_minor {
            let expected = money::to_minor_units(&payment.amount);
            if expected != Some(reported) {
                tracing::warn!(
                    target: "security",
                    "Amount mismatch for payment {}: expected {:?} paisa, gateway reported {}",
                    payment.transaction_ref,
                    expected,
                    reported
                );
                return Err(AppError::IntegrityMismatch(format!(
                    "amount {} does not match payment {}",
                    reported, payment.transaction_ref
                )));
            }
        }

        let Some(status) = outcome.status.payment_status() else {
            tracing::debug!("Payment {} still pending at gateway", payment.transaction_ref);
            let purchase = self.purchases.find_for_payment(payment.id).await?;
            return Ok(Settlement { payment, purchase });
        };

        let updated = self
            .ledger
            .mark_result(&outcome.transaction_ref, status, Some(outcome.raw))
            .await?;

        match updated.status {
            PaymentStatus::Success => {
                self.ledger.distribute_earnings(&updated).await?;
                let current = self.ledger.find(updated.id).await?.unwrap_or(updated);
                let purchase = self.purchases.record_on_success(&current).await?;
                Ok(Settlement {
                    payment: current,
                    purchase: Some(purchase),
                })
            }
            PaymentStatus::Refunded => {
                // Earnings already distributed stay put; refunds are settled by operators
                self.purchases.mirror(&updated).await?;
                let purchase = self.purchases.find_for_payment(updated.id).await?;
                Ok(Settlement {
                    payment: updated,
                    purchase,
                })
            }
            PaymentStatus::Failed | PaymentStatus::Pending => Ok(Settlement {
                payment: updated,
                purchase: None,
            }),
        }
    }

    pub async fn handle_return(&self, gateway: GatewayKind, fields: &BTreeMap<String, String>) -> AppResult<Settlement> {
        let adapter = self.adapter(gateway)?;

        let outcome = WebhookVerifier::verify_return(adapter.as_ref(), fields)
            .ok_or_else(|| AppError::IntegrityMismatch(format!("{} return callback failed verification", gateway)))?;

        self.settle(gateway, outcome).await
    }

    /// Webhook entry point. Transient failures come back as `Err` so the
    /// gateway redelivers; everything else is acknowledged.
    pub async fn handle_webhook(
        &self,
        gateway: GatewayKind,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> AppResult<WebhookAck> {
        let adapter = self.adapter(gateway)?;
        let body = adapter.webhook_ack();

        let event = match WebhookVerifier::verify_webhook(adapter.as_ref(), signature, raw_body) {
            WebhookVerdict::Accepted(event) => event,
            WebhookVerdict::Rejected { .. } => return Ok(WebhookAck { body, applied: false }),
        };

        let tracker = event.tracker.clone();
        match self.settle(gateway, event.into_outcome()).await {
            Ok(settlement) => {
                tracing::info!(
                    "{} webhook applied: ref={} status={}",
                    gateway,
                    tracker,
                    settlement.payment.status
                );
                Ok(WebhookAck { body, applied: true })
            }
            Err(e) if e.is_transient() => {
                tracing::error!("{} webhook for {} failed, asking for redelivery: {}", gateway, tracker, e);
                Err(e)
            }
            Err(e) => {
                tracing::warn!("{} webhook for {} not applied: {}", gateway, tracker, e);
                Ok(WebhookAck { body, applied: false })
            }
        }
    }

    /// Status poll for the buyer. A pending payment is checked with the
    /// gateway first; inquiry failures leave it pending.
    pub async fn verify_status(&self, payment_id: i32, user_id: i32) -> AppResult<PaymentStatusView> {
        let mut payment = self
            .ledger
            .find(payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment not found"))?;

        if !payment.belongs_to(user_id) {
            return Err(AppError::forbidden("Payment belongs to another user"));
        }

        if payment.status == PaymentStatus::Pending {
            match self.inquire_and_settle(&payment).await {
                Ok(Some(settlement)) => payment = settlement.payment,
                Ok(None) => {}
                Err(e) => tracing::warn!("Status inquiry for payment {} failed: {}", payment.id, e),
            }
        }

        let purchase = self.purchases.find_for_payment(payment.id).await?;
        let access_granted = purchase.as_ref().map(Purchase::grants_access).unwrap_or(false);

        Ok(PaymentStatusView {
            payment,
            purchase,
            access_granted,
        })
    }

    // None while the gateway still reports the payment as pending
    async fn inquire_and_settle(&self, payment: &Payment) -> AppResult<Option<Settlement>> {
        let adapter = self.adapter(payment.gateway)?;
        let outcome = adapter.inquire(&payment.transaction_ref).await?;

        if outcome.status == GatewayStatus::Pending {
            return Ok(None);
        }

        self.settle(payment.gateway, outcome).await.map(Some)
    }

    /// Settle pending payments older than `older_than` through gateway inquiry.
    pub async fn reconcile_pending(&self, older_than: Duration, limit: i64) -> AppResult<ReconcileSummary> {
        let stale = self.ledger.stale_pending(Utc::now() - older_than, limit).await?;
        let mut summary = ReconcileSummary {
            checked: stale.len(),
            ..Default::default()
        };

        for payment in stale {
            match self.inquire_and_settle(&payment).await {
                Ok(Some(_)) => summary.settled += 1,
                Ok(None) => summary.still_pending += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!("Reconciliation of payment {} failed: {}", payment.transaction_ref, e);
                }
            }
        }

        if summary.checked > 0 {
            tracing::info!(
                "Reconciliation: checked={} settled={} pending={} errors={}",
                summary.checked,
                summary.settled,
                summary.still_pending,
                summary.errors
            );
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, MockCatalogLookup};
    use crate::domain::payment::{ContentFormat, EarningsStatus, ItemType, SellerType};
    use crate::gateways::{jazzcash, GatewayError, MockGatewayAdapter};
    use crate::ledger::payment_ledger::test_ledger;
    use crate::repositories::memory::MemoryStore;
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use std::str::FromStr;

    fn book(seller_type: SellerType) -> CatalogItem {
        CatalogItem {
            item_id: 42,
            item_type: ItemType::Book,
            title: "Book 42".to_string(),
            seller_id: 5,
            seller_type,
            pdf_price: Some(BigDecimal::from_str("500.00").unwrap()),
            text_price: None,
            approved: true,
        }
    }

    fn catalog_with(item: CatalogItem) -> MockCatalogLookup {
        let mut catalog = MockCatalogLookup::new();
        catalog
            .expect_find_item()
            .returning(move |_, _| Ok(Some(item.clone())));
        catalog
    }

    fn service(store: &MemoryStore, registry: GatewayRegistry, catalog: MockCatalogLookup) -> CheckoutService {
        CheckoutService::new(
            registry,
            Arc::new(catalog),
            test_ledger(store),
            PurchaseRecorder::new(Arc::new(store.clone())),
            "PKR".to_string(),
        )
    }

    fn jazzcash_service(store: &MemoryStore, seller_type: SellerType) -> CheckoutService {
        let registry = GatewayRegistry::new().register(Arc::new(jazzcash::test_gateway()));
        service(store, registry, catalog_with(book(seller_type)))
    }

    fn request() -> PurchaseRequest {
        PurchaseRequest {
            item_type: ItemType::Book,
            item_id: 42,
            format: ContentFormat::Pdf,
            gateway: GatewayKind::JazzCash,
        }
    }

    async fn start_checkout(checkout: &CheckoutService) -> CheckoutInstructions {
        match checkout.initiate_purchase(17, request()).await.unwrap() {
            PurchaseResponse::Checkout { checkout } => checkout,
            other => panic!("expected checkout, got {:?}", other),
        }
    }

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_purchase_then_ipn_settles_everything() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);

        let instructions = start_checkout(&checkout).await;
        assert_eq!(instructions.form_fields["pp_Amount"], "50000");

        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        let body = serde_urlencoded::to_string(&fields).unwrap();
        let ack = checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();
        assert!(ack.applied);
        assert_eq!(ack.body["pp_ResponseCode"], "000");

        let payment = store.payment(instructions.payment_id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.earnings_status, EarningsStatus::Processed);
        assert_eq!(store.wallet(5).unwrap().available_balance, dec("450.00"));
        assert_eq!(store.wallet(1).unwrap().available_balance, dec("50.00"));
        assert_eq!(store.purchases().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_and_return_together_settle_once() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;

        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        let body = serde_urlencoded::to_string(&fields).unwrap();

        checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();
        let settlement = checkout.handle_return(GatewayKind::JazzCash, &fields).await.unwrap();
        checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();

        assert!(settlement.purchase.unwrap().grants_access());
        assert_eq!(store.wallet(5).unwrap().available_balance, dec("450.00"));
        assert_eq!(store.commissions().len(), 1);
        assert_eq!(store.purchases().len(), 1);
    }

    #[tokio::test]
    async fn test_second_purchase_returns_existing_grant() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;
        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        checkout.handle_return(GatewayKind::JazzCash, &fields).await.unwrap();

        let again = checkout.initiate_purchase(17, request()).await.unwrap();
        match again {
            PurchaseResponse::AlreadyOwned { purchase } => assert_eq!(purchase.payment_id, instructions.payment_id),
            other => panic!("expected existing grant, got {:?}", other),
        }
        assert!(store.payment(instructions.payment_id + 1).is_none());
        assert_eq!(store.wallet(5).unwrap().available_balance, dec("450.00"));
    }

    #[tokio::test]
    async fn test_tampered_hash_changes_nothing() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;

        let mut fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        let hash = fields["pp_SecureHash"].clone();
        let flipped = if hash.starts_with('A') { "B" } else { "A" };
        fields.insert("pp_SecureHash".to_string(), format!("{}{}", flipped, &hash[1..]));
        let body = serde_urlencoded::to_string(&fields).unwrap();

        let ack = checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();
        assert!(!ack.applied);
        assert_eq!(ack.body["pp_ResponseCode"], "000");

        let returned = checkout.handle_return(GatewayKind::JazzCash, &fields).await;
        assert!(matches!(returned, Err(AppError::IntegrityMismatch(_))));

        let payment = store.payment(instructions.payment_id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(store.purchases().is_empty());
        assert!(store.wallet(5).is_none());
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_refused() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;

        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 100, "000");
        let result = checkout.handle_return(GatewayKind::JazzCash, &fields).await;
        assert!(matches!(result, Err(AppError::IntegrityMismatch(_))));
        assert_eq!(
            store.payment(instructions.payment_id).unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_declined_payment_grants_nothing() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;

        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "349");
        let settlement = checkout.handle_return(GatewayKind::JazzCash, &fields).await.unwrap();
        assert_eq!(settlement.payment.status, PaymentStatus::Failed);
        assert!(settlement.purchase.is_none());

        // a late success for a failed payment is an anomaly, acknowledged but not applied
        let success = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        let body = serde_urlencoded::to_string(&success).unwrap();
        let ack = checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();
        assert!(!ack.applied);
        assert_eq!(
            store.payment(instructions.payment_id).unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_transient_failure_asks_for_redelivery() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let instructions = start_checkout(&checkout).await;

        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        let body = serde_urlencoded::to_string(&fields).unwrap();

        store.set_outage(true);
        let result = checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));

        store.set_outage(false);
        let ack = checkout
            .handle_webhook(GatewayKind::JazzCash, None, body.as_bytes())
            .await
            .unwrap();
        assert!(ack.applied);
    }

    #[tokio::test]
    async fn test_superadmin_item_credits_platform() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Superadmin);
        let instructions = start_checkout(&checkout).await;
        let fields = jazzcash::signed_callback(&instructions.transaction_ref, 50_000, "000");
        checkout.handle_return(GatewayKind::JazzCash, &fields).await.unwrap();

        let payment = store.payment(instructions.payment_id).unwrap();
        assert_eq!(payment.seller_amount, dec("0"));
        assert_eq!(payment.platform_amount, dec("500.00"));
        assert_eq!(store.wallet(1).unwrap().available_balance, dec("500.00"));
    }

    #[tokio::test]
    async fn test_unavailable_gateway_creates_no_payment() {
        let store = MemoryStore::new();
        let mut adapter = MockGatewayAdapter::new();
        adapter.expect_kind().return_const(GatewayKind::Safepay);
        adapter
            .expect_create_session()
            .returning(|_| Err(GatewayError::Unavailable("timeout".to_string())));
        let registry = GatewayRegistry::new().register(Arc::new(adapter));
        let checkout = service(&store, registry, catalog_with(book(SellerType::Admin)));

        let mut req = request();
        req.gateway = GatewayKind::Safepay;
        let result = checkout.initiate_purchase(17, req).await;
        assert!(matches!(result, Err(AppError::GatewayUnavailable(_))));
        assert!(store.payment(1).is_none());
    }

    #[tokio::test]
    async fn test_missing_format_price_is_validation_error() {
        let store = MemoryStore::new();
        let checkout = jazzcash_service(&store, SellerType::Admin);
        let mut req = request();
        req.format = ContentFormat::Text;

        let result = checkout.initiate_purchase(17, req).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    fn safepay_outcome(tracker: &str, status: GatewayStatus) -> GatewayOutcome {
        GatewayOutcome {
            transaction_ref: tracker.to_string(),
            status,
            amount_minor: Some(50_000),
            gateway_txn_id: None,
            message: None,
            raw: json!({ "state": "TRACKER_ENDED" }),
        }
    }

    fn safepay_service(store: &MemoryStore, inquiry: GatewayStatus) -> CheckoutService {
        let mut adapter = MockGatewayAdapter::new();
        adapter.expect_kind().return_const(GatewayKind::Safepay);
        adapter.expect_create_session().returning(|_| {
            Ok(crate::gateways::CheckoutSession {
                payment_url: "https://sandbox.example/checkout".to_string(),
                session_token: "track_1".to_string(),
                transaction_ref: "track_1".to_string(),
                form_fields: BTreeMap::new(),
            })
        });
        adapter
            .expect_inquire()
            .returning(move |tracker| Ok(safepay_outcome(tracker, inquiry)));
        let registry = GatewayRegistry::new().register(Arc::new(adapter));
        service(store, registry, catalog_with(book(SellerType::Admin)))
    }

    #[tokio::test]
    async fn test_status_poll_settles_through_inquiry() {
        let store = MemoryStore::new();
        let checkout = safepay_service(&store, GatewayStatus::Success);
        let mut req = request();
        req.gateway = GatewayKind::Safepay;
        let PurchaseResponse::Checkout { checkout: instructions } = checkout.initiate_purchase(17, req).await.unwrap()
        else {
            panic!("expected checkout");
        };

        assert!(matches!(
            checkout.verify_status(instructions.payment_id, 99).await,
            Err(AppError::Forbidden(_))
        ));

        let view = checkout.verify_status(instructions.payment_id, 17).await.unwrap();
        assert_eq!(view.payment.status, PaymentStatus::Success);
        assert!(view.access_granted);
    }

    async fn start_safepay_checkout(checkout: &CheckoutService) -> AppResult<PurchaseResponse> {
        let mut req = request();
        req.gateway = GatewayKind::Safepay;
        checkout.initiate_purchase(17, req).await
    }

    #[tokio::test]
    async fn test_open_checkout_refuses_second_payment() {
        let store = MemoryStore::new();
        let checkout = safepay_service(&store, GatewayStatus::Pending);
        let PurchaseResponse::Checkout { checkout: instructions } = start_safepay_checkout(&checkout).await.unwrap()
        else {
            panic!("expected checkout");
        };

        let second = start_safepay_checkout(&checkout).await;
        assert!(matches!(second, Err(AppError::ConflictingState(_))));

        // both deliveries of the success land on the single open payment
        for _ in 0..2 {
            checkout
                .settle(GatewayKind::Safepay, safepay_outcome(&instructions.transaction_ref, GatewayStatus::Success))
                .await
                .unwrap();
        }
        assert_eq!(store.wallet(5).unwrap().available_balance, dec("450.00"));
        assert_eq!(store.commissions().len(), 1);
        assert_eq!(store.purchases().len(), 1);

        match start_safepay_checkout(&checkout).await.unwrap() {
            PurchaseResponse::AlreadyOwned { purchase } => assert_eq!(purchase.payment_id, instructions.payment_id),
            other => panic!("expected existing grant, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_paid_open_checkout_returns_grant() {
        let store = MemoryStore::new();
        let checkout = safepay_service(&store, GatewayStatus::Success);
        let PurchaseResponse::Checkout { checkout: instructions } = start_safepay_checkout(&checkout).await.unwrap()
        else {
            panic!("expected checkout");
        };

        // callback never arrived; the second attempt finds the payment settled
        match start_safepay_checkout(&checkout).await.unwrap() {
            PurchaseResponse::AlreadyOwned { purchase } => assert_eq!(purchase.payment_id, instructions.payment_id),
            other => panic!("expected existing grant, got {:?}", other),
        }
        assert_eq!(store.wallet(5).unwrap().available_balance, dec("450.00"));
        assert_eq!(store.purchases().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_counts_outcomes() {
        let store = MemoryStore::new();
        let checkout = safepay_service(&store, GatewayStatus::Pending);
        let mut req = request();
        req.gateway = GatewayKind::Safepay;
        checkout.initiate_purchase(17, req).await.unwrap();

        let summary = checkout.reconcile_pending(Duration::zero(), 50).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.still_pending, 1);
        assert_eq!(summary.settled, 0);
    }
}
