//! End-to-end stock consistency: the full purchase/sale lifecycle returns
//! every quantity to its baseline, and totals are derived correctly at
//! each step.
//!
//! Run with: TEST_DATABASE_URL=<postgres url> cargo test -- --ignored

mod common;

use common::{
    create_test_product, post_purchase, post_sale, register_and_login, spawn_app, variant_id,
    variant_quantity,
};
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
#[ignore]
async fn purchase_then_sale_lifecycle_returns_to_baseline() {
    let app = spawn_app().await;
    let user = register_and_login(&app).await;

    // Product "Juice" with variant "Orange", price 5.00, quantity 0.
    let product = create_test_product(&app, &user, "Juice", &[("Orange", "5.00")]).await;
    let orange = variant_id(&product, 0);
    assert_eq!(variant_quantity(&app, &user, orange).await, 0);

    // Purchase 20 @ 2.00 with 10 shipping: total 50.00, stock 20.
    let response = post_purchase(&app, &user, "10", &[(orange, 20, "2.00")]).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let purchase: Value = response.json().await.unwrap();
    assert_eq!(purchase["total_cost"], "50.00");
    assert_eq!(variant_quantity(&app, &user, orange).await, 20);

    // Sell 5 @ 5.00: total 25.00, stock 15.
    let response = post_sale(&app, &user, &[(orange, 5, "5.00")]).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let sale: Value = response.json().await.unwrap();
    assert_eq!(sale["total_amount"], "25.00");
    assert_eq!(variant_quantity(&app, &user, orange).await, 15);

    // Delete the sale: stock back to 20.
    let sale_id = sale["sale_id"].as_str().unwrap();
    let response = app
        .client
        .delete(format!("{}/api/sales/{}", app.address, sale_id))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(variant_quantity(&app, &user, orange).await, 20);

    // Delete the purchase: stock back to the original 0.
    let purchase_id = purchase["purchase_id"].as_str().unwrap();
    let response = app
        .client
        .delete(format!("{}/api/purchases/{}", app.address, purchase_id))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(variant_quantity(&app, &user, orange).await, 0);
}

#[tokio::test]
#[ignore]
async fn multi_variant_purchase_and_sale_are_symmetric() {
    let app = spawn_app().await;
    let user = register_and_login(&app).await;

    let product = create_test_product(
        &app,
        &user,
        "Juice",
        &[("Orange", "5.00"), ("Apple", "4.50"), ("Grape", "6.00")],
    )
    .await;
    let orange = variant_id(&product, 0);
    let apple = variant_id(&product, 1);
    let grape = variant_id(&product, 2);

    let response = post_purchase(
        &app,
        &user,
        "5",
        &[(orange, 12, "2.00"), (apple, 7, "1.80"), (grape, 4, "3.10")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let purchase: Value = response.json().await.unwrap();
    let purchase_id = purchase["purchase_id"].as_str().unwrap();

    assert_eq!(variant_quantity(&app, &user, orange).await, 12);
    assert_eq!(variant_quantity(&app, &user, apple).await, 7);
    assert_eq!(variant_quantity(&app, &user, grape).await, 4);

    let response = app
        .client
        .delete(format!("{}/api/purchases/{}", app.address, purchase_id))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(variant_quantity(&app, &user, orange).await, 0);
    assert_eq!(variant_quantity(&app, &user, apple).await, 0);
    assert_eq!(variant_quantity(&app, &user, grape).await, 0);
}

#[tokio::test]
#[ignore]
async fn dashboard_reports_totals_for_live_records_only() {
    let app = spawn_app().await;
    let user = register_and_login(&app).await;

    let product = create_test_product(&app, &user, "Juice", &[("Orange", "5.00")]).await;
    let orange = variant_id(&product, 0);

    post_purchase(&app, &user, "10", &[(orange, 20, "2.00")]).await;
    let response = post_sale(&app, &user, &[(orange, 5, "5.00")]).await;
    let sale: Value = response.json().await.unwrap();

    let report = |start: &str, end: &str| {
        app.client
            .get(format!(
                "{}/api/dashboard?start_date={}&end_date={}",
                app.address, start, end
            ))
            .bearer_auth(&user.token)
            .send()
    };

    let response = report("2000-01-01T00:00:00Z", "2100-01-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_sales"], "25.00");
    assert_eq!(body["total_purchases"], "50.00");

    // A deleted sale drops out of the report.
    let sale_id = sale["sale_id"].as_str().unwrap();
    app.client
        .delete(format!("{}/api/sales/{}", app.address, sale_id))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();

    let response = report("2000-01-01T00:00:00Z", "2100-01-01T00:00:00Z")
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_sales"], "0");

    // Reversed ranges are rejected up front.
    let response = report("2100-01-01T00:00:00Z", "2000-01-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
