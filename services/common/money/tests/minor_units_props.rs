use bigdecimal::BigDecimal;
use common_money::{from_minor_units, normalize_scale, to_minor_units};
use proptest::prelude::*;
use std::str::FromStr;

proptest! {
    // Any scale-2 amount survives a trip through minor units unchanged.
    #[test]
    fn minor_unit_round_trip(cents in -100_000_000i64..100_000_000) {
        let amount = from_minor_units(cents);
        prop_assert_eq!(to_minor_units(&amount).unwrap(), cents);
    }

    // Normalization never invents sub-cent precision.
    #[test]
    fn normalize_is_idempotent(units in -1_000_000i64..1_000_000, thousandths in 0u32..1000) {
        let raw = BigDecimal::from_str(&format!("{units}.{thousandths:03}")).unwrap();
        let once = normalize_scale(&raw);
        prop_assert_eq!(normalize_scale(&once), once.clone());
    }
}
