pub mod database;
pub mod jwt;
pub mod metrics;

pub use database::Database;
pub use jwt::{AccessTokenClaims, JwtService, TokenResponse};
pub use metrics::{get_metrics, init_metrics};
