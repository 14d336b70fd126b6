use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Product row. Owns a collection of variants.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

/// Sellable variation of a product: per-SKU price and on-hand quantity.
/// The quantity column is mutated exclusively through the stock adjustment
/// primitive in the database service.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProductVariant {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub sale_price: Decimal,
    pub quantity: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl ProductVariant {
    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }
}

/// Product with its live variants nested (list/create responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: Product,
    pub variants: Vec<ProductVariant>,
}

/// Validate that a money amount is not negative.
pub(crate) fn non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Amount must not be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewVariantInput {
    #[validate(length(min = 1, message = "Variant name is required"))]
    pub name: String,

    #[validate(custom(function = non_negative))]
    pub sale_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,

    pub description: Option<String>,

    /// Optional initial variants, created together with the product.
    #[validate(nested)]
    pub variants: Option<Vec<NewVariantInput>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, message = "Product name must not be empty"))]
    pub name: Option<String>,

    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateVariantRequest {
    #[validate(length(min = 1, message = "Variant name must not be empty"))]
    pub name: Option<String>,

    #[validate(custom(function = non_negative))]
    pub sale_price: Option<Decimal>,
}
