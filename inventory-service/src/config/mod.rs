use serde::Deserialize;
use service_core::config as core_config;
use service_core::config::DatabaseConfig;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_hours: i64,
}

impl InventoryConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(InventoryConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("inventory-service"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None)?,
                access_token_expiry_hours: get_env("JWT_ACCESS_TOKEN_EXPIRY_HOURS", Some("24"))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
            },
        })
    }
}

/// Read an environment variable, falling back to `default` when provided.
/// Variables with no default are required.
fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match default {
            Some(value) => Ok(value.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "Missing required environment variable: {}",
                key
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_prefers_set_variable() {
        env::set_var("INVENTORY_TEST_VAR", "from-env");
        assert_eq!(
            get_env("INVENTORY_TEST_VAR", Some("fallback")).unwrap(),
            "from-env"
        );
        env::remove_var("INVENTORY_TEST_VAR");
    }

    #[test]
    fn get_env_falls_back_to_default() {
        assert_eq!(
            get_env("INVENTORY_TEST_UNSET", Some("fallback")).unwrap(),
            "fallback"
        );
    }

    #[test]
    fn get_env_requires_value_without_default() {
        assert!(get_env("INVENTORY_TEST_REQUIRED", None).is_err());
    }
}
