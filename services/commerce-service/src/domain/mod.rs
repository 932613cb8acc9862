pub mod commission;
pub mod money;
pub mod payment;
pub mod payout;
pub mod purchase;
pub mod wallet;

use thiserror::Error;

// Returned when a stored or requested enum value is not recognised
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
