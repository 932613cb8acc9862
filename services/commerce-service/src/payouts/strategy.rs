use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DisbursementConfig;
use crate::domain::payout::{Payout, PayoutFailure, PayoutMethod, RecipientDetails};
use crate::domain::wallet::Wallet;
use crate::gateways::{body, read_json_response, transport_error, GatewayError};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// What a disbursement call achieved
#[derive(Debug, Clone, PartialEq)]
pub enum Disbursement {
    Transferred { external_ref: String },
    // Operator transfers the money and records proof later
    AwaitingProof,
}

/// One implementation per payout method.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutStrategy: Send + Sync {
    fn method(&self) -> PayoutMethod;

    // Manual methods stop at PENDING until an admin acts
    fn requires_approval(&self) -> bool;

    // Verified recipient snapshot taken when the payout is created
    fn recipient(&self, wallet: &Wallet) -> Result<RecipientDetails, PayoutFailure>;

    /// Move the money. `payout.internal_ref` is sent as the idempotency key so
    /// a retried payout is never paid twice by the provider.
    async fn disburse(&self, payout: &Payout) -> Result<Disbursement, GatewayError>;
}

// Shared HTTP plumbing for provider-backed transfers
#[derive(Clone)]
struct DisbursementClient {
    client: Client,
    url: String,
    api_key: String,
    currency: String,
}

impl DisbursementClient {
    fn new(url: String, api_key: String, currency: String, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            api_key,
            currency,
        })
    }

    async fn transfer(&self, payout: &Payout) -> Result<Disbursement, GatewayError> {
        let amount_minor = payout
            .amount_minor()
            .filter(|v| *v > 0)
            .ok_or_else(|| GatewayError::InvalidPayload(format!("invalid payout amount {}", payout.amount)))?;

        let payload = json!({
            "reference": payout.internal_ref,
            "amount": amount_minor,
            "currency": self.currency,
            "method": payout.payment_method,
            "recipient": payout.recipient_details,
        });

        tracing::debug!(
            "Disbursing payout {} ({}) via {}: amount_minor={}",
            payout.id,
            payout.internal_ref,
            payout.payment_method,
            amount_minor
        );

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_HEADER, &payout.internal_ref)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let document = read_json_response(response).await?;

        let status = body::lookup_string(&document, &["status", "data.status"])
            .unwrap_or_default()
            .to_ascii_lowercase();
        if matches!(status.as_str(), "failed" | "rejected" | "declined") {
            let reason = body::lookup_string(&document, &["message", "error", "data.message"])
                .unwrap_or_else(|| format!("transfer {}", status));
            return Err(GatewayError::Rejected(reason));
        }

        let external_ref = body::lookup_string(&document, &["transaction_id", "data.transaction_id", "reference"])
            .ok_or_else(|| GatewayError::InvalidPayload("disbursement response has no transaction id".to_string()))?;

        Ok(Disbursement::Transferred { external_ref })
    }
}

// JazzCash / Easypaisa mobile-wallet transfer
pub struct WalletTransferStrategy {
    method: PayoutMethod,
    client: DisbursementClient,
}

#[async_trait]
impl PayoutStrategy for WalletTransferStrategy {
    fn method(&self) -> PayoutMethod {
        self.method
    }

    fn requires_approval(&self) -> bool {
        false
    }

    fn recipient(&self, wallet: &Wallet) -> Result<RecipientDetails, PayoutFailure> {
        wallet.recipient_for(self.method)
    }

    async fn disburse(&self, payout: &Payout) -> Result<Disbursement, GatewayError> {
        self.client.transfer(payout).await
    }
}

// IBFT bank transfer
pub struct BankTransferStrategy {
    client: DisbursementClient,
}

#[async_trait]
impl PayoutStrategy for BankTransferStrategy {
    fn method(&self) -> PayoutMethod {
        PayoutMethod::Bank
    }

    fn requires_approval(&self) -> bool {
        false
    }

    fn recipient(&self, wallet: &Wallet) -> Result<RecipientDetails, PayoutFailure> {
        wallet.recipient_for(PayoutMethod::Bank)
    }

    async fn disburse(&self, payout: &Payout) -> Result<Disbursement, GatewayError> {
        self.client.transfer(payout).await
    }
}

pub struct ManualStrategy;

#[async_trait]
impl PayoutStrategy for ManualStrategy {
    fn method(&self) -> PayoutMethod {
        PayoutMethod::Manual
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn recipient(&self, wallet: &Wallet) -> Result<RecipientDetails, PayoutFailure> {
        wallet.recipient_for(PayoutMethod::Manual)
    }

    async fn disburse(&self, _payout: &Payout) -> Result<Disbursement, GatewayError> {
        Ok(Disbursement::AwaitingProof)
    }
}

// Payout method -> strategy lookup
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<PayoutMethod, Arc<dyn PayoutStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, strategy: Arc<dyn PayoutStrategy>) -> Self {
        self.strategies.insert(strategy.method(), strategy);
        self
    }

    pub fn get(&self, method: PayoutMethod) -> Option<Arc<dyn PayoutStrategy>> {
        self.strategies.get(&method).cloned()
    }

    pub fn from_config(config: &DisbursementConfig, currency: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = |url: &str| {
            DisbursementClient::new(url.to_string(), config.api_key.clone(), currency.to_string(), timeout)
        };

        Ok(Self::new()
            .register(Arc::new(WalletTransferStrategy {
                method: PayoutMethod::JazzCash,
                client: client(&config.jazzcash_url)?,
            }))
            .register(Arc::new(WalletTransferStrategy {
                method: PayoutMethod::EasyPaisa,
                client: client(&config.easypaisa_url)?,
            }))
            .register(Arc::new(BankTransferStrategy {
                client: client(&config.bank_url)?,
            }))
            .register(Arc::new(ManualStrategy)))
    }
}
