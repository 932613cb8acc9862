pub mod engine;
pub mod notifier;
pub mod strategy;

pub use engine::{PayoutDetail, PayoutEngine, PayoutSettingsConfig};
pub use notifier::{HttpPayoutNotifier, PayoutNotifier};
pub use strategy::{PayoutStrategy, StrategyRegistry};
