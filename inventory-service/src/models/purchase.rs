use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::product::non_negative;

/// Purchase intake header. total_cost is derived from the item lines plus
/// shipping and recomputed on every full-replace edit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: Uuid,
    pub user_id: Uuid,
    pub supplier: Option<String>,
    pub shipping_cost: Decimal,
    pub total_cost: Decimal,
    pub purchase_date: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

/// Purchase line. cost_at_purchase is the historical unit cost, decoupled
/// from the variant's current sale price.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub item_id: Uuid,
    pub purchase_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub cost_at_purchase: Decimal,
}

/// Purchase with its item lines nested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseWithItems {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub items: Vec<PurchaseItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseItemInput {
    pub variant_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,

    #[validate(custom(function = non_negative))]
    pub cost_at_purchase: Decimal,
}

/// Body for purchase create and full-replace edit.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePurchaseRequest {
    pub supplier: Option<String>,

    #[validate(custom(function = non_negative))]
    pub shipping_cost: Decimal,

    #[validate(length(min = 1, message = "A purchase must have at least one item"))]
    #[validate(nested)]
    pub items: Vec<PurchaseItemInput>,
}

impl CreatePurchaseRequest {
    /// Derived total: sum of quantity x historical cost over the item
    /// lines, plus shipping.
    pub fn total_cost(&self) -> Decimal {
        let items_total: Decimal = self
            .items
            .iter()
            .map(|item| Decimal::from(item.quantity) * item.cost_at_purchase)
            .sum();
        items_total + self.shipping_cost
    }
}
