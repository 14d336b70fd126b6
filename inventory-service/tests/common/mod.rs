//! Common test utilities for inventory-service integration tests.

use inventory_service::config::{InventoryConfig, JwtConfig};
use inventory_service::startup::Application;
use reqwest::StatusCode;
use serde_json::{json, Value};
use service_core::config::{Config as CommonConfig, DatabaseConfig};
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,inventory_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

/// Spawn a test application on a random port.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run integration tests");

    let config = InventoryConfig {
        common: CommonConfig { port: 0 },
        service_name: "inventory-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: "test-secret-not-for-production".to_string(),
            access_token_expiry_hours: 1,
        },
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let port = app.port();
    let address = format!("http://127.0.0.1:{}", port);

    // Start the application in the background
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = reqwest::Client::new();

    // Wait for server to be ready with retry
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(_) => break,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Failed to reach test server after 20 attempts: {}", e),
        }
    }

    TestApp { address, client }
}

/// A registered user with a valid access token.
pub struct TestUser {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

/// Register a fresh user and log in; every test gets its own user so tests
/// can run in parallel without seeing each other's data.
pub async fn register_and_login(app: &TestApp) -> TestUser {
    let email = format!("user-{}@example.com", Uuid::new_v4());

    let response = app
        .client
        .post(format!("{}/api/auth/register", app.address))
        .json(&json!({
            "name": "Test User",
            "email": email,
            "password": "Password123!"
        }))
        .send()
        .await
        .expect("Failed to register");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.expect("Invalid register response");
    let user_id = body["user_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("Register response missing user_id");

    let response = app
        .client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "email": email, "password": "Password123!" }))
        .send()
        .await
        .expect("Failed to login");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("Invalid login response");
    let token = body["access_token"]
        .as_str()
        .expect("Login response missing access_token")
        .to_string();

    TestUser {
        user_id,
        email,
        token,
    }
}

/// Create a product with the given variants; returns the response body
/// with nested variants.
pub async fn create_test_product(
    app: &TestApp,
    user: &TestUser,
    name: &str,
    variants: &[(&str, &str)],
) -> Value {
    let variants: Vec<Value> = variants
        .iter()
        .map(|(name, price)| json!({ "name": name, "sale_price": price }))
        .collect();

    let response = app
        .client
        .post(format!("{}/api/products", app.address))
        .bearer_auth(&user.token)
        .json(&json!({
            "name": name,
            "description": "integration test product",
            "variants": variants
        }))
        .send()
        .await
        .expect("Failed to create product");
    assert_eq!(response.status(), StatusCode::CREATED);

    response.json().await.expect("Invalid product response")
}

/// Extract the variant id at `index` from a create-product response.
pub fn variant_id(product: &Value, index: usize) -> Uuid {
    product["variants"][index]["variant_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("Product response missing variant id")
}

/// Post a purchase; returns the raw response so tests can assert failures.
pub async fn post_purchase(
    app: &TestApp,
    user: &TestUser,
    shipping_cost: &str,
    items: &[(Uuid, i32, &str)],
) -> reqwest::Response {
    let items: Vec<Value> = items
        .iter()
        .map(|(variant_id, quantity, cost)| {
            json!({
                "variant_id": variant_id,
                "quantity": quantity,
                "cost_at_purchase": cost
            })
        })
        .collect();

    app.client
        .post(format!("{}/api/purchases", app.address))
        .bearer_auth(&user.token)
        .json(&json!({
            "supplier": "Test Supplier",
            "shipping_cost": shipping_cost,
            "items": items
        }))
        .send()
        .await
        .expect("Failed to post purchase")
}

/// Post a sale; returns the raw response so tests can assert failures.
pub async fn post_sale(
    app: &TestApp,
    user: &TestUser,
    items: &[(Uuid, i32, &str)],
) -> reqwest::Response {
    let items: Vec<Value> = items
        .iter()
        .map(|(variant_id, quantity, price)| {
            json!({
                "variant_id": variant_id,
                "quantity": quantity,
                "price_at_sale": price
            })
        })
        .collect();

    app.client
        .post(format!("{}/api/sales", app.address))
        .bearer_auth(&user.token)
        .json(&json!({ "client_name": "Test Client", "items": items }))
        .send()
        .await
        .expect("Failed to post sale")
}

/// Read a variant's current on-hand quantity through the products listing.
pub async fn variant_quantity(app: &TestApp, user: &TestUser, id: Uuid) -> i64 {
    let response = app
        .client
        .get(format!("{}/api/products", app.address))
        .bearer_auth(&user.token)
        .send()
        .await
        .expect("Failed to list products");
    assert_eq!(response.status(), StatusCode::OK);

    let products: Value = response.json().await.expect("Invalid products response");
    let empty = Vec::new();
    for product in products.as_array().expect("Expected product array") {
        for variant in product["variants"].as_array().unwrap_or(&empty) {
            if variant["variant_id"].as_str() == Some(id.to_string().as_str()) {
                return variant["quantity"].as_i64().expect("Missing quantity");
            }
        }
    }
    panic!("Variant {} not found in product listing", id);
}
