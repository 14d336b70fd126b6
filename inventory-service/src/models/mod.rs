//! Domain models for inventory-service.

mod product;
mod purchase;
mod sale;
mod user;

pub use product::{
    CreateProductRequest, NewVariantInput, Product, ProductVariant, ProductWithVariants,
    UpdateProductRequest, UpdateVariantRequest,
};
pub use purchase::{
    CreatePurchaseRequest, Purchase, PurchaseItem, PurchaseItemInput, PurchaseWithItems,
};
pub use sale::{CreateSaleRequest, Sale, SaleItem, SaleItemInput, SaleWithItems};
pub use user::{LoginRequest, RegisterRequest, User, UserProfile};
