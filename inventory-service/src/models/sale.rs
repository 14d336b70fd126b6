use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::product::non_negative;

/// Sale header. total_amount is derived from the item lines.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sale {
    pub sale_id: Uuid,
    pub user_id: Uuid,
    pub client_name: Option<String>,
    pub total_amount: Decimal,
    pub sale_date: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

/// Sale line. price_at_sale is the historical sale price, decoupled from
/// the variant's current price.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SaleItem {
    pub item_id: Uuid,
    pub sale_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub price_at_sale: Decimal,
}

/// Sale with its item lines nested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleWithItems {
    #[serde(flatten)]
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaleItemInput {
    pub variant_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,

    #[validate(custom(function = non_negative))]
    pub price_at_sale: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSaleRequest {
    pub client_name: Option<String>,

    #[validate(length(min = 1, message = "A sale must have at least one item"))]
    #[validate(nested)]
    pub items: Vec<SaleItemInput>,
}

impl CreateSaleRequest {
    /// Derived total: sum of quantity x historical price over the item lines.
    pub fn total_amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| Decimal::from(item.quantity) * item.price_at_sale)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_amount_sums_item_lines() {
        let request = CreateSaleRequest {
            client_name: None,
            items: vec![
                SaleItemInput {
                    variant_id: Uuid::new_v4(),
                    quantity: 5,
                    price_at_sale: dec!(5.00),
                },
                SaleItemInput {
                    variant_id: Uuid::new_v4(),
                    quantity: 2,
                    price_at_sale: dec!(1.25),
                },
            ],
        };

        assert_eq!(request.total_amount(), dec!(27.50));
    }

    #[test]
    fn zero_quantity_fails_validation() {
        let request = CreateSaleRequest {
            client_name: None,
            items: vec![SaleItemInput {
                variant_id: Uuid::new_v4(),
                quantity: 0,
                price_at_sale: dec!(1.00),
            }],
        };

        assert!(request.validate().is_err());
    }
}
