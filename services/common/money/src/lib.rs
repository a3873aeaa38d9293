use bigdecimal::BigDecimal;
use bigdecimal::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("amount out of range for minor-unit conversion: {0}")]
    OutOfRange(BigDecimal),
}

/// Normalize a monetary value to 2 decimal places (banker's rounding not applied; BigDecimal uses plain rounding when reducing scale)
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    // Set scale to 2 using with_scale, which truncates/extends with zeros.
    value.with_scale(2)
}

/// Compare two monetary values allowing a tolerance (in cents) after normalization.
pub fn nearly_equal(a: &BigDecimal, b: &BigDecimal, cents_tolerance: i64) -> bool {
    let na = normalize_scale(a);
    let nb = normalize_scale(b);
    // Convert difference to cents integer to avoid floating comparison.
    let diff = (na - nb).with_scale(2);
    let cents = diff.to_f64().unwrap_or(0.0) * 100.0;
    cents.abs() <= cents_tolerance as f64
}

/// Convert a major-unit amount to minor units (paise/cents) for gateway
/// boundaries. The value is normalized to scale 2 first, so 123.456 becomes
/// 12345, never 12346.
pub fn to_minor_units(value: &BigDecimal) -> Result<i64, MoneyError> {
    let scaled = normalize_scale(value) * BigDecimal::from(100);
    scaled
        .with_scale(0)
        .to_i64()
        .ok_or_else(|| MoneyError::OutOfRange(value.clone()))
}

/// Convert minor units back to a scale-2 major-unit amount.
pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::from(minor) / BigDecimal::from(100)
}

pub fn is_positive(value: &BigDecimal) -> bool {
    use bigdecimal::Zero;
    value > &BigDecimal::zero()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedMoney(BigDecimal);

impl NormalizedMoney {
    pub fn new(raw: BigDecimal) -> Self {
        Self(normalize_scale(&raw))
    }

    pub fn inner(&self) -> &BigDecimal {
        &self.0
    }
}

impl From<BigDecimal> for NormalizedMoney {
    fn from(value: BigDecimal) -> Self {
        Self::new(value)
    }
}

impl From<NormalizedMoney> for BigDecimal {
    fn from(value: NormalizedMoney) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_normalize() {
        let v = BigDecimal::parse_bytes(b"12.3456", 10).unwrap();
        assert_eq!(normalize_scale(&v).to_string(), "12.34");
    }

    #[test]
    fn test_nearly_equal() {
        let a = BigDecimal::parse_bytes(b"10.001", 10).unwrap();
        let b = BigDecimal::parse_bytes(b"10.009", 10).unwrap();
        assert!(nearly_equal(&a, &b, 1)); // 1 cent tolerance
    }

    #[test]
    fn test_minor_units_boundary() {
        let v = BigDecimal::parse_bytes(b"499.99", 10).unwrap();
        assert_eq!(to_minor_units(&v).unwrap(), 49_999);
        assert_eq!(from_minor_units(49_999).with_scale(2).to_string(), "499.99");
    }

    #[test]
    fn test_minor_units_truncates_sub_cent() {
        let v = BigDecimal::parse_bytes(b"10.009", 10).unwrap();
        assert_eq!(to_minor_units(&v).unwrap(), 1_000);
    }
}
