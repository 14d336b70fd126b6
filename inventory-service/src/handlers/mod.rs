pub mod auth;
pub mod dashboard;
pub mod products;
pub mod purchases;
pub mod sales;
