use sqlx::{Postgres, Transaction};
use tracing::warn;

use crate::error::EngineError;
use crate::order::OrderItem;

/// How many units may still be put back on the shelf for an item.
/// Restocks are clamped so repeated partial refunds never exceed the
/// ordered quantity in total.
pub fn restorable_quantity(ordered: i32, already_restored: i32, requested: i32) -> i32 {
    let remaining = (ordered - already_restored).max(0);
    requested.min(remaining).max(0)
}

/// Puts `quantity` units of an order item back into stock. Variant items
/// adjust the variant row; plain items adjust the product and flip it back
/// to available. A missing row is logged and skipped, not an error: the
/// product may have been delisted since the order was placed.
pub async fn restore(
    tx: &mut Transaction<'_, Postgres>,
    item: &OrderItem,
    quantity: i32,
) -> Result<(), EngineError> {
    if quantity <= 0 {
        return Ok(());
    }
    let rows = if let Some(variant) = &item.variant {
        sqlx::query(
            "UPDATE product_variants SET stock = stock + $1
             WHERE product_id = $2 AND variant_type = $3 AND variant_value = $4",
        )
        .bind(quantity)
        .bind(item.product_id)
        .bind(&variant.variant_type)
        .bind(&variant.value)
        .execute(&mut **tx)
        .await?
        .rows_affected()
    } else {
        sqlx::query(
            "UPDATE products SET stock = stock + $1, is_available = TRUE WHERE id = $2",
        )
        .bind(quantity)
        .bind(item.product_id)
        .execute(&mut **tx)
        .await?
        .rows_affected()
    };
    if rows == 0 {
        warn!(product_id = %item.product_id, quantity, "product row missing, skipping stock adjustment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restock_is_clamped_to_ordered_quantity() {
        assert_eq!(restorable_quantity(3, 0, 3), 3);
        assert_eq!(restorable_quantity(3, 2, 3), 1);
        assert_eq!(restorable_quantity(3, 3, 1), 0);
    }

    #[test]
    fn negative_inputs_never_go_below_zero() {
        assert_eq!(restorable_quantity(3, 5, 2), 0);
        assert_eq!(restorable_quantity(3, 0, -1), 0);
    }
}
