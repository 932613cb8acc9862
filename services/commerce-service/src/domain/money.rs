// Exact money helpers. Amounts are BigDecimal rupees with two decimals;
// gateways and disbursement APIs take integer paisa.
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};

pub const MINOR_UNIT_SCALE: i64 = 2;

/// Normalise an amount to two decimals (half-up)
pub fn normalize(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(MINOR_UNIT_SCALE, RoundingMode::HalfUp)
}

/// Convert rupees to paisa: `round(amount * 100)`, half-up.
///
/// This is the only place an amount is rounded on its way to a gateway.
/// Returns `None` when the value does not fit an `i64`.
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
}

pub fn is_negative(amount: &BigDecimal) -> bool {
    amount < &BigDecimal::zero()
}

/// Display helper used in user and operator messages
pub fn format_rupees(amount: &BigDecimal) -> String {
    format!("Rs {}", normalize(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[test]
    fn test_minor_units_whole_amount() {
        assert_eq!(to_minor_units(&dec("500.00")), Some(50_000));
        assert_eq!(to_minor_units(&dec("0")), Some(0));
    }

    #[test]
    fn test_minor_units_rounding_boundary() {
        assert_eq!(to_minor_units(&dec("0.005")), Some(1));
        assert_eq!(to_minor_units(&dec("0.004")), Some(0));
        assert_eq!(to_minor_units(&dec("0.0049999")), Some(0));
        // binary floats turn this into 100.49999...; decimals do not
        assert_eq!(to_minor_units(&dec("1.005")), Some(101));
        assert_eq!(to_minor_units(&dec("1499.995")), Some(150_000));
    }

    #[test]
    fn test_format_rupees() {
        assert_eq!(format_rupees(&dec("1000")), "Rs 1000.00");
    }
}
