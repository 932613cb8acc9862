// Commerce Service Configuration
use bigdecimal::BigDecimal;
use sqlx::{postgres::PgConnectOptions, postgres::PgPoolOptions, PgPool};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::HttpCatalog;
use crate::gateways::{jazzcash::JazzCashGateway, safepay::SafepayGateway, GatewayRegistry};
use crate::ledger::{CheckoutService, CommissionCalculator, PaymentLedger, PurchaseRecorder, WalletLedger};
use crate::middleware::rate_limit::RateLimiter;
use crate::payouts::{HttpPayoutNotifier, PayoutEngine, PayoutSettingsConfig, StrategyRegistry};
use crate::repositories::{
    PgPaymentRepository, PgPayoutRepository, PgPurchaseRepository, PgWalletRepository,
};
use crate::scheduler::PayoutCadence;

// JazzCash merchant credentials (page redirection + inquiry API)
#[derive(Clone)]
pub struct JazzCashConfig {
    pub merchant_id: String,
    pub password: String,
    pub integrity_salt: String,
    pub checkout_url: String,
    pub api_url: String,
    pub return_url: String,
    pub txn_type: String,
    pub expiry_hours: i64,
}

impl fmt::Debug for JazzCashConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JazzCashConfig")
            .field("merchant_id", &self.merchant_id)
            .field("password", &"[REDACTED]")
            .field("integrity_salt", &"[REDACTED]")
            .field("checkout_url", &self.checkout_url)
            .field("api_url", &self.api_url)
            .field("return_url", &self.return_url)
            .finish()
    }
}

// Safepay credentials (order init, tracker inquiry, webhooks)
#[derive(Clone)]
pub struct SafepayConfig {
    pub api_key: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_url: String,
    pub checkout_url: String,
    pub environment: String,
    pub return_url: String,
    pub cancel_url: String,
}

impl fmt::Debug for SafepayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafepayConfig")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("environment", &self.environment)
            .finish()
    }
}

// Outbound transfer endpoints used by payout strategies
#[derive(Clone)]
pub struct DisbursementConfig {
    pub jazzcash_url: String,
    pub easypaisa_url: String,
    pub bank_url: String,
    pub api_key: String,
}

impl fmt::Debug for DisbursementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisbursementConfig")
            .field("jazzcash_url", &self.jazzcash_url)
            .field("easypaisa_url", &self.easypaisa_url)
            .field("bank_url", &self.bank_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// Payout policy and background job settings
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub minimum_payout: BigDecimal,
    pub batch_limit: i64,
    pub concurrency: usize,
    pub cadence: PayoutCadence,
    pub cron_override: Option<String>,
    pub scheduler_disabled: bool,
    pub reconcile_interval: Duration,
    pub reconcile_after_minutes: i64,
}

// Application configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub redis_url: String,
    pub frontend_url: String,
    pub gateway_timeout: Duration,
    pub currency: String,
    pub platform_commission_percent: BigDecimal,
    pub platform_account_id: i32,
    pub jazzcash: JazzCashConfig,
    pub safepay: SafepayConfig,
    pub disbursement: DisbursementConfig,
    pub payout: PayoutConfig,
    pub app_version: String,
}

fn required(key: &str) -> Result<String, String> {
    env::var(key)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{} must be set", key))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(key: &str, default: &str) -> Result<T, String> {
    optional(key, default)
        .trim()
        .parse::<T>()
        .map_err(|_| format!("{} has an invalid value", key))
}

impl AppConfig {
    // Load configuration from the environment with validation
    pub fn from_env() -> Result<Self, String> {
        let database_url = required("DATABASE_URL")?;

        let jwt_secret = required("JWT_SECRET")?;
        if !cfg!(debug_assertions) && jwt_secret.contains("change-this") {
            return Err("JWT_SECRET still has the default value, change it for production".to_string());
        }

        let platform_commission_percent: BigDecimal = parsed("PLATFORM_COMMISSION_PERCENT", "10")?;
        if platform_commission_percent < BigDecimal::from(0) || platform_commission_percent > BigDecimal::from(100) {
            return Err("PLATFORM_COMMISSION_PERCENT must be between 0 and 100".to_string());
        }

        let minimum_payout: BigDecimal = parsed("MINIMUM_PAYOUT", "1000")?;
        if minimum_payout <= BigDecimal::from(0) {
            return Err("MINIMUM_PAYOUT must be positive".to_string());
        }

        let jazzcash = JazzCashConfig {
            merchant_id: required("JAZZCASH_MERCHANT_ID")?,
            password: required("JAZZCASH_PASSWORD")?,
            integrity_salt: required("JAZZCASH_INTEGRITY_SALT")?,
            checkout_url: optional(
                "JAZZCASH_CHECKOUT_URL",
                "https://sandbox.jazzcash.com.pk/CustomerPortal/transactionmanagement/merchantform/",
            ),
            api_url: optional(
                "JAZZCASH_API_URL",
                "https://sandbox.jazzcash.com.pk/ApplicationAPI/API",
            ),
            return_url: required("JAZZCASH_RETURN_URL")?,
            txn_type: optional("JAZZCASH_TXN_TYPE", ""),
            expiry_hours: parsed("JAZZCASH_EXPIRY_HOURS", "24")?,
        };

        let safepay = SafepayConfig {
            api_key: required("SAFEPAY_API_KEY")?,
            secret_key: required("SAFEPAY_SECRET_KEY")?,
            webhook_secret: required("SAFEPAY_WEBHOOK_SECRET")?,
            api_url: optional("SAFEPAY_API_URL", "https://sandbox.api.getsafepay.com"),
            checkout_url: optional("SAFEPAY_CHECKOUT_URL", "https://sandbox.api.getsafepay.com/components"),
            environment: optional("SAFEPAY_ENVIRONMENT", "sandbox"),
            return_url: required("SAFEPAY_RETURN_URL")?,
            cancel_url: required("SAFEPAY_CANCEL_URL")?,
        };

        let disbursement = DisbursementConfig {
            jazzcash_url: required("JAZZCASH_DISBURSE_URL")?,
            easypaisa_url: required("EASYPAISA_DISBURSE_URL")?,
            bank_url: required("BANK_DISBURSE_URL")?,
            api_key: required("DISBURSEMENT_API_KEY")?,
        };

        let cadence: PayoutCadence = optional("PAYOUT_CADENCE", "weekly")
            .parse()
            .map_err(|e| format!("PAYOUT_CADENCE: {}", e))?;

        let payout = PayoutConfig {
            minimum_payout,
            batch_limit: parsed("PAYOUT_BATCH_LIMIT", "100")?,
            concurrency: parsed("PAYOUT_CONCURRENCY", "4")?,
            cadence,
            cron_override: env::var("PAYOUT_CRON").ok().filter(|v| !v.trim().is_empty()),
            scheduler_disabled: optional("DISABLE_SCHEDULER", "false") == "true",
            reconcile_interval: Duration::from_secs(parsed("RECONCILE_INTERVAL_SECS", "900")?),
            reconcile_after_minutes: parsed("RECONCILE_AFTER_MINUTES", "30")?,
        };

        Ok(AppConfig {
            database_url,
            server_host: optional("COMMERCE_SERVICE_HOST", "0.0.0.0"),
            server_port: parsed("COMMERCE_SERVICE_PORT", "3005")?,
            environment: optional("RUST_ENV", "development"),
            jwt_secret,
            redis_url: required("REDIS_URL")?,
            frontend_url: optional("FRONTEND_URL", "http://localhost:5173"),
            gateway_timeout: Duration::from_secs(parsed("GATEWAY_TIMEOUT_SECS", "30")?),
            currency: optional("CURRENCY", "PKR"),
            platform_commission_percent,
            platform_account_id: parsed("PLATFORM_ACCOUNT_ID", "1")?,
            jazzcash,
            safepay,
            disbursement,
            payout,
            app_version: optional("APP_VERSION", "1.0.0"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

// Initialise the database connection pool
pub async fn init_db_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    tracing::info!("🔌 Initializing Commerce Service database connection...");

    let options = PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(3)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    tracing::info!("✅ Commerce Service database pool initialized");
    Ok(pool)
}

// Health check database connection
pub async fn check_db_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").fetch_optional(pool).await.is_ok()
}

// Application state shared by handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: AppConfig,
    pub checkout: Arc<CheckoutService>,
    pub payouts: Arc<PayoutEngine>,
    pub wallets: WalletLedger,
    pub purchases: PurchaseRecorder,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    // Wire repositories, gateways and services from configuration
    pub async fn new(config: AppConfig) -> Result<Self, String> {
        let db = init_db_pool(&config.database_url)
            .await
            .map_err(|e| format!("Failed to init database: {}", e))?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(|e| format!("Failed to run migrations: {}", e))?;

        let payment_repo = Arc::new(PgPaymentRepository::new(db.clone()));
        let purchase_repo = Arc::new(PgPurchaseRepository::new(db.clone()));
        let payout_repo = Arc::new(PgPayoutRepository::new(db.clone()));
        let wallet_repo = Arc::new(PgWalletRepository::new(db.clone()));

        let jazzcash = JazzCashGateway::new(config.jazzcash.clone(), config.currency.clone(), config.gateway_timeout)
            .map_err(|e| format!("Failed to init JazzCash gateway: {}", e))?;
        let safepay = SafepayGateway::new(config.safepay.clone(), config.currency.clone(), config.gateway_timeout)
            .map_err(|e| format!("Failed to init Safepay gateway: {}", e))?;
        let gateways = GatewayRegistry::new()
            .register(Arc::new(jazzcash))
            .register(Arc::new(safepay));

        let catalog = HttpCatalog::new(config.gateway_timeout)
            .map_err(|e| format!("Failed to init catalog client: {}", e))?;

        let calculator = CommissionCalculator::new(config.platform_commission_percent.clone())
            .map_err(|e| e.to_string())?;
        let ledger = PaymentLedger::new(payment_repo, calculator, config.platform_account_id);
        let purchases = PurchaseRecorder::new(purchase_repo);
        let wallets = WalletLedger::new(wallet_repo, config.payout.minimum_payout.clone());

        let checkout = Arc::new(CheckoutService::new(
            gateways,
            Arc::new(catalog),
            ledger,
            purchases.clone(),
            config.currency.clone(),
        ));

        let strategies = StrategyRegistry::from_config(&config.disbursement, &config.currency, config.gateway_timeout)
            .map_err(|e| format!("Failed to init payout strategies: {}", e))?;
        let notifier = HttpPayoutNotifier::new(config.gateway_timeout)
            .map_err(|e| format!("Failed to init notifier: {}", e))?;

        let payouts = Arc::new(PayoutEngine::new(
            payout_repo,
            wallets.clone(),
            strategies,
            Arc::new(notifier),
            PayoutSettingsConfig {
                batch_limit: config.payout.batch_limit,
                concurrency: config.payout.concurrency.max(1),
                currency: config.currency.clone(),
            },
        ));

        tracing::info!("🔄 Initializing Redis rate limiter...");
        let rate_limiter = RateLimiter::new(&config.redis_url)
            .map_err(|e| format!("Failed to initialize Redis rate limiter: {}", e))?;
        tracing::info!("✅ Redis rate limiter initialized");

        Ok(AppState {
            db,
            config,
            checkout,
            payouts,
            wallets,
            purchases,
            rate_limiter,
        })
    }

    pub async fn from_env() -> Result<Self, String> {
        let config = AppConfig::from_env()?;
        Self::new(config).await
    }

    // Health check of all dependencies
    pub async fn health_check(&self) -> HealthStatus {
        let db_healthy = check_db_health(&self.db).await;

        HealthStatus {
            database: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
            overall: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        }
    }
}

// Response body for the health endpoint
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct HealthStatus {
    pub database: String,
    pub overall: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_redacted_in_debug_output() {
        let config = JazzCashConfig {
            merchant_id: "MC12345".to_string(),
            password: "super-secret-password".to_string(),
            integrity_salt: "salt-value".to_string(),
            checkout_url: "https://sandbox.jazzcash.com.pk/form".to_string(),
            api_url: "https://sandbox.jazzcash.com.pk/api".to_string(),
            return_url: "https://shop.example/return".to_string(),
            txn_type: String::new(),
            expiry_hours: 24,
        };

        let debug = format!("{:?}", config);
        assert!(debug.contains("MC12345"));
        assert!(!debug.contains("super-secret-password"));
        assert!(!debug.contains("salt-value"));
    }
}
