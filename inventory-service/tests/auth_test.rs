//! Authentication and isolation integration tests.
//!
//! Run with: TEST_DATABASE_URL=<postgres url> cargo test -- --ignored

mod common;

use common::{register_and_login, spawn_app};
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn register_and_login_round_trip() {
    let app = spawn_app().await;

    let user = register_and_login(&app).await;
    assert!(!user.token.is_empty());

    // The token opens protected routes.
    let response = app
        .client
        .get(format!("{}/api/products", app.address))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore]
async fn register_rejects_duplicate_email() {
    let app = spawn_app().await;
    let email = format!("dup-{}@example.com", Uuid::new_v4());

    let body = json!({ "email": email, "password": "Password123!" });

    let first = app
        .client
        .post(format!("{}/api/auth/register", app.address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .client
        .post(format!("{}/api/auth/register", app.address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
async fn login_rejects_wrong_password() {
    let app = spawn_app().await;
    let user = register_and_login(&app).await;

    let response = app
        .client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "email": user.email, "password": "not-the-password" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn protected_routes_require_token() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/api/products", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .client
        .get(format!("{}/api/purchases", app.address))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
