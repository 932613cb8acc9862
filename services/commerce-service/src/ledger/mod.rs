pub mod checkout;
pub mod commission;
pub mod payment_ledger;
pub mod purchase_recorder;
pub mod wallet_ledger;
pub mod webhook_verifier;

pub use checkout::{CheckoutService, Settlement};
pub use commission::CommissionCalculator;
pub use payment_ledger::PaymentLedger;
pub use purchase_recorder::PurchaseRecorder;
pub use wallet_ledger::WalletLedger;
pub use webhook_verifier::{WebhookAck, WebhookVerifier};
