//! Database service for inventory-service.
//!
//! Every stock-affecting operation runs as a single PostgreSQL transaction:
//! the ledger record (purchase/sale) and the variant quantity adjustments
//! commit together or not at all.

use crate::models::{
    CreateProductRequest, CreatePurchaseRequest, CreateSaleRequest, NewVariantInput, Product,
    ProductVariant, ProductWithVariants, Purchase, PurchaseItem, PurchaseWithItems, Sale, SaleItem,
    SaleWithItems, UpdateProductRequest, UpdateVariantRequest, User,
};
use crate::services::metrics::{DB_QUERY_DURATION, ERRORS_TOTAL, STOCK_TRANSACTIONS_TOTAL};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "inventory-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // User Operations
    // -------------------------------------------------------------------------

    /// Create a new user.
    #[instrument(skip(self, password_hash), fields(email = %email))]
    pub async fn create_user(
        &self,
        name: Option<&str>,
        email: &str,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING user_id, name, email, password_hash, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A user with email '{}' already exists",
                    email
                ))
            }
            _ => db_error("Failed to create user", e),
        })?;

        timer.observe_duration();

        info!(user_id = %user.user_id, "User created");

        Ok(user)
    }

    /// Look up a user by email.
    #[instrument(skip(self))]
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, name, email, password_hash, created_utc
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get user", e))?;

        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Product Operations
    // -------------------------------------------------------------------------

    /// Create a product, optionally with its initial variants, in one
    /// transaction. New variants start with zero stock.
    #[instrument(skip(self, input), fields(user_id = %user_id, name = %input.name))]
    pub async fn create_product(
        &self,
        user_id: Uuid,
        input: &CreateProductRequest,
    ) -> Result<ProductWithVariants, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (product_id, user_id, name, description)
            VALUES ($1, $2, $3, $4)
            RETURNING product_id, user_id, name, description, created_utc, updated_utc, deleted_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&input.name)
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to create product", e))?;

        let mut variants = Vec::new();
        if let Some(inputs) = &input.variants {
            for variant in inputs {
                variants.push(insert_variant(&mut tx, product.product_id, variant).await?);
            }
        }

        commit(tx).await?;
        timer.observe_duration();

        info!(
            product_id = %product.product_id,
            variant_count = variants.len(),
            "Product created"
        );

        Ok(ProductWithVariants { product, variants })
    }

    /// List the user's live products with their live variants, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_products(&self, user_id: Uuid) -> Result<Vec<ProductWithVariants>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_products"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, user_id, name, description, created_utc, updated_utc, deleted_utc
            FROM products
            WHERE user_id = $1 AND deleted_utc IS NULL
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list products", e))?;

        let mut result = Vec::with_capacity(products.len());
        for product in products {
            let variants = sqlx::query_as::<_, ProductVariant>(
                r#"
                SELECT variant_id, product_id, name, sale_price, quantity, created_utc, updated_utc, deleted_utc
                FROM product_variants
                WHERE product_id = $1 AND deleted_utc IS NULL
                ORDER BY created_utc
                "#,
            )
            .bind(product.product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list variants", e))?;

            result.push(ProductWithVariants { product, variants });
        }

        timer.observe_duration();

        Ok(result)
    }

    /// Update a product's name/description, scoped to the owning user.
    #[instrument(skip(self, input), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn update_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: &UpdateProductRequest,
    ) -> Result<Product, AppError> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                updated_utc = now()
            WHERE product_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            RETURNING product_id, user_id, name, description, created_utc, updated_utc, deleted_utc
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .bind(&input.name)
        .bind(&input.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update product", e))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product {} not found", product_id)))?;

        Ok(product)
    }

    /// Soft-delete a product and all of its variants in one transaction.
    ///
    /// Stock is left untouched: a deleted product's inventory becomes
    /// unreachable rather than written off.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_product"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        let found = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT product_id FROM products
            WHERE product_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load product", e))?;

        if found.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Product {} not found",
                product_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE product_variants SET deleted_utc = now()
            WHERE product_id = $1 AND deleted_utc IS NULL
            "#,
        )
        .bind(product_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to delete variants", e))?;

        sqlx::query("UPDATE products SET deleted_utc = now() WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete product", e))?;

        commit(tx).await?;
        timer.observe_duration();

        info!(product_id = %product_id, "Product soft-deleted with variants");

        Ok(())
    }

    /// Add a variant to an owned product.
    #[instrument(skip(self, input), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn add_variant(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: &NewVariantInput,
    ) -> Result<ProductVariant, AppError> {
        let owned = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT product_id FROM products
            WHERE product_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to check product ownership", e))?;

        if owned.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Product {} not found",
                product_id
            )));
        }

        let mut tx = begin(&self.pool).await?;
        let variant = insert_variant(&mut tx, product_id, input).await?;
        commit(tx).await?;

        info!(variant_id = %variant.variant_id, "Variant added");

        Ok(variant)
    }

    /// Update a variant's name/price, scoped through its parent product to
    /// the owning user. Quantity is never touched here.
    #[instrument(skip(self, input), fields(user_id = %user_id, variant_id = %variant_id))]
    pub async fn update_variant(
        &self,
        user_id: Uuid,
        variant_id: Uuid,
        input: &UpdateVariantRequest,
    ) -> Result<ProductVariant, AppError> {
        let variant = sqlx::query_as::<_, ProductVariant>(
            r#"
            UPDATE product_variants v
            SET name = COALESCE($3, v.name),
                sale_price = COALESCE($4, v.sale_price),
                updated_utc = now()
            FROM products p
            WHERE v.product_id = p.product_id
              AND v.variant_id = $1
              AND p.user_id = $2
              AND v.deleted_utc IS NULL
            RETURNING v.variant_id, v.product_id, v.name, v.sale_price, v.quantity,
                      v.created_utc, v.updated_utc, v.deleted_utc
            "#,
        )
        .bind(variant_id)
        .bind(user_id)
        .bind(&input.name)
        .bind(input.sale_price)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update variant", e))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Variant {} not found", variant_id)))?;

        Ok(variant)
    }

    /// Soft-delete a single variant. Historical purchase/sale items keep
    /// referencing the row; stock operations refuse deleted variants.
    #[instrument(skip(self), fields(user_id = %user_id, variant_id = %variant_id))]
    pub async fn delete_variant(&self, user_id: Uuid, variant_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE product_variants v
            SET deleted_utc = now()
            FROM products p
            WHERE v.product_id = p.product_id
              AND v.variant_id = $1
              AND p.user_id = $2
              AND v.deleted_utc IS NULL
            "#,
        )
        .bind(variant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete variant", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Variant {} not found",
                variant_id
            )));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Purchase Operations
    // -------------------------------------------------------------------------

    /// Record a purchase intake: insert the purchase with its items and
    /// increment stock for every line, all in one transaction.
    ///
    /// With an idempotency key, a replayed request returns the previously
    /// created purchase instead of restocking twice.
    #[instrument(skip(self, input), fields(user_id = %user_id, item_count = input.items.len()))]
    pub async fn create_purchase(
        &self,
        user_id: Uuid,
        input: &CreatePurchaseRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PurchaseWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_purchase"])
            .start_timer();

        let total_cost = input.total_cost();

        let mut tx = begin(&self.pool).await?;

        if let Some(key) = idempotency_key {
            let existing = sqlx::query_scalar::<_, Uuid>(
                "SELECT purchase_id FROM purchases WHERE idempotency_key = $1 AND user_id = $2",
            )
            .bind(key)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to check idempotency", e))?;

            if let Some(purchase_id) = existing {
                tx.rollback().await.ok();
                timer.observe_duration();
                return self
                    .get_purchase(user_id, purchase_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict(anyhow::anyhow!("Duplicate idempotency key"))
                    });
            }
        }

        let insert_result = sqlx::query_as::<_, Purchase>(
            r#"
            INSERT INTO purchases (purchase_id, user_id, supplier, shipping_cost, total_cost, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING purchase_id, user_id, supplier, shipping_cost, total_cost, purchase_date,
                      created_utc, updated_utc, deleted_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&input.supplier)
        .bind(input.shipping_cost)
        .bind(total_cost)
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let purchase = match insert_result {
            Ok(purchase) => purchase,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Idempotency key race: another request won. Return its result.
                tx.rollback().await.ok();
                if let Some(key) = idempotency_key {
                    let existing = sqlx::query_scalar::<_, Uuid>(
                        "SELECT purchase_id FROM purchases WHERE idempotency_key = $1 AND user_id = $2",
                    )
                    .bind(key)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("Failed to fetch existing purchase", e))?;

                    if let Some(purchase_id) = existing {
                        if let Some(found) = self.get_purchase(user_id, purchase_id).await? {
                            timer.observe_duration();
                            return Ok(found);
                        }
                    }
                }
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Duplicate idempotency key"
                )));
            }
            Err(e) => return Err(db_error("Failed to insert purchase", e)),
        };

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let inserted = sqlx::query_as::<_, PurchaseItem>(
                r#"
                INSERT INTO purchase_items (item_id, purchase_id, variant_id, quantity, cost_at_purchase)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING item_id, purchase_id, variant_id, quantity, cost_at_purchase
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(purchase.purchase_id)
            .bind(item.variant_id)
            .bind(item.quantity)
            .bind(item.cost_at_purchase)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert purchase item", e))?;

            adjust_stock(&mut tx, user_id, item.variant_id, item.quantity).await?;
            items.push(inserted);
        }

        commit(tx).await?;
        timer.observe_duration();
        STOCK_TRANSACTIONS_TOTAL
            .with_label_values(&["purchase_create", "ok"])
            .inc();

        info!(
            purchase_id = %purchase.purchase_id,
            total_cost = %purchase.total_cost,
            item_count = items.len(),
            "Purchase created"
        );

        Ok(PurchaseWithItems { purchase, items })
    }

    /// List the user's live purchases with items, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_purchases(&self, user_id: Uuid) -> Result<Vec<PurchaseWithItems>, AppError> {
        let purchases = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT purchase_id, user_id, supplier, shipping_cost, total_cost, purchase_date,
                   created_utc, updated_utc, deleted_utc
            FROM purchases
            WHERE user_id = $1 AND deleted_utc IS NULL
            ORDER BY purchase_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list purchases", e))?;

        let mut result = Vec::with_capacity(purchases.len());
        for purchase in purchases {
            let items = self.purchase_items(purchase.purchase_id).await?;
            result.push(PurchaseWithItems { purchase, items });
        }

        Ok(result)
    }

    /// Get a single purchase with items, scoped to the owning user.
    #[instrument(skip(self), fields(user_id = %user_id, purchase_id = %purchase_id))]
    pub async fn get_purchase(
        &self,
        user_id: Uuid,
        purchase_id: Uuid,
    ) -> Result<Option<PurchaseWithItems>, AppError> {
        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT purchase_id, user_id, supplier, shipping_cost, total_cost, purchase_date,
                   created_utc, updated_utc, deleted_utc
            FROM purchases
            WHERE purchase_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(purchase_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get purchase", e))?;

        let purchase = match purchase {
            Some(p) => p,
            None => return Ok(None),
        };

        let items = self.purchase_items(purchase_id).await?;

        Ok(Some(PurchaseWithItems { purchase, items }))
    }

    /// Full-replace edit of a purchase: reverse the stock effect of every
    /// old item, replace the item set, reapply stock for the new items and
    /// recompute the total, all in one transaction.
    ///
    /// A variant referenced by both the old and new item sets passes
    /// through an intermediate reversed state; that state is never visible
    /// outside the transaction. Quantities are re-checked before commit.
    #[instrument(skip(self, input), fields(user_id = %user_id, purchase_id = %purchase_id))]
    pub async fn update_purchase(
        &self,
        user_id: Uuid,
        purchase_id: Uuid,
        input: &CreatePurchaseRequest,
    ) -> Result<PurchaseWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_purchase"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        let found = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT purchase_id FROM purchases
            WHERE purchase_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            FOR UPDATE
            "#,
        )
        .bind(purchase_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load purchase", e))?;

        if found.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Purchase {} not found",
                purchase_id
            )));
        }

        let old_items = sqlx::query_as::<_, PurchaseItem>(
            r#"
            SELECT item_id, purchase_id, variant_id, quantity, cost_at_purchase
            FROM purchase_items
            WHERE purchase_id = $1
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load purchase items", e))?;

        // Reverse the original restock before the new items are applied.
        for old_item in &old_items {
            adjust_stock(&mut tx, user_id, old_item.variant_id, -old_item.quantity).await?;
        }

        sqlx::query("DELETE FROM purchase_items WHERE purchase_id = $1")
            .bind(purchase_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete old purchase items", e))?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let inserted = sqlx::query_as::<_, PurchaseItem>(
                r#"
                INSERT INTO purchase_items (item_id, purchase_id, variant_id, quantity, cost_at_purchase)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING item_id, purchase_id, variant_id, quantity, cost_at_purchase
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(purchase_id)
            .bind(item.variant_id)
            .bind(item.quantity)
            .bind(item.cost_at_purchase)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert purchase item", e))?;

            adjust_stock(&mut tx, user_id, item.variant_id, item.quantity).await?;
            items.push(inserted);
        }

        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
            UPDATE purchases
            SET supplier = $3, shipping_cost = $4, total_cost = $5, updated_utc = now()
            WHERE purchase_id = $1 AND user_id = $2
            RETURNING purchase_id, user_id, supplier, shipping_cost, total_cost, purchase_date,
                      created_utc, updated_utc, deleted_utc
            "#,
        )
        .bind(purchase_id)
        .bind(user_id)
        .bind(&input.supplier)
        .bind(input.shipping_cost)
        .bind(input.total_cost())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update purchase", e))?;

        // Stock sold since the original intake may make a reduced
        // re-statement impossible; quantity >= 0 must hold at commit.
        let mut touched: Vec<Uuid> = old_items.iter().map(|i| i.variant_id).collect();
        touched.extend(input.items.iter().map(|i| i.variant_id));
        touched.sort_unstable();
        touched.dedup();
        assert_stock_non_negative(&mut tx, &touched).await?;

        commit(tx).await?;
        timer.observe_duration();
        STOCK_TRANSACTIONS_TOTAL
            .with_label_values(&["purchase_update", "ok"])
            .inc();

        info!(
            purchase_id = %purchase.purchase_id,
            total_cost = %purchase.total_cost,
            "Purchase updated"
        );

        Ok(PurchaseWithItems { purchase, items })
    }

    /// Soft-delete a purchase and reverse its stock effect in one
    /// transaction. The item rows are retained as history.
    ///
    /// Loads are scoped to live rows, so a second delete of the same
    /// purchase finds nothing and stock is never reversed twice.
    #[instrument(skip(self), fields(user_id = %user_id, purchase_id = %purchase_id))]
    pub async fn delete_purchase(&self, user_id: Uuid, purchase_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_purchase"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        let found = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT purchase_id FROM purchases
            WHERE purchase_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            FOR UPDATE
            "#,
        )
        .bind(purchase_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load purchase", e))?;

        if found.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Purchase {} not found",
                purchase_id
            )));
        }

        let items = sqlx::query_as::<_, PurchaseItem>(
            r#"
            SELECT item_id, purchase_id, variant_id, quantity, cost_at_purchase
            FROM purchase_items
            WHERE purchase_id = $1
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load purchase items", e))?;

        for item in &items {
            adjust_stock(&mut tx, user_id, item.variant_id, -item.quantity).await?;
        }

        let touched: Vec<Uuid> = items.iter().map(|i| i.variant_id).collect();
        assert_stock_non_negative(&mut tx, &touched).await?;

        sqlx::query("UPDATE purchases SET deleted_utc = now() WHERE purchase_id = $1")
            .bind(purchase_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete purchase", e))?;

        commit(tx).await?;
        timer.observe_duration();
        STOCK_TRANSACTIONS_TOTAL
            .with_label_values(&["purchase_delete", "ok"])
            .inc();

        info!(purchase_id = %purchase_id, "Purchase soft-deleted, stock reversed");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sale Operations
    // -------------------------------------------------------------------------

    /// Record a sale: check stock sufficiency under row locks, insert the
    /// sale with its items and decrement stock, all in one transaction.
    ///
    /// The whole transaction fails with `InsufficientStock` if any line
    /// requests more than the variant has on hand.
    #[instrument(skip(self, input), fields(user_id = %user_id, item_count = input.items.len()))]
    pub async fn create_sale(
        &self,
        user_id: Uuid,
        input: &CreateSaleRequest,
        idempotency_key: Option<&str>,
    ) -> Result<SaleWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_sale"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        if let Some(key) = idempotency_key {
            let existing = sqlx::query_scalar::<_, Uuid>(
                "SELECT sale_id FROM sales WHERE idempotency_key = $1 AND user_id = $2",
            )
            .bind(key)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to check idempotency", e))?;

            if let Some(sale_id) = existing {
                tx.rollback().await.ok();
                timer.observe_duration();
                return self.get_sale(user_id, sale_id).await?.ok_or_else(|| {
                    AppError::Conflict(anyhow::anyhow!("Duplicate idempotency key"))
                });
            }
        }

        // Check-then-act under FOR UPDATE row locks: two concurrent sales
        // of the same variant serialize here, so the quantity read below
        // cannot go stale before the decrement commits.
        for item in &input.items {
            let row = sqlx::query_as::<_, (String, i32)>(
                r#"
                SELECT v.name, v.quantity
                FROM product_variants v
                JOIN products p ON p.product_id = v.product_id
                WHERE v.variant_id = $1 AND p.user_id = $2 AND v.deleted_utc IS NULL
                FOR UPDATE OF v
                "#,
            )
            .bind(item.variant_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to load variant", e))?;

            let (name, available) = row.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Variant {} not found", item.variant_id))
            })?;

            if available < item.quantity {
                ERRORS_TOTAL
                    .with_label_values(&["insufficient_stock"])
                    .inc();
                return Err(AppError::InsufficientStock(anyhow::anyhow!(
                    "Insufficient stock for variant '{}' ({}): requested {}, available {}",
                    name,
                    item.variant_id,
                    item.quantity,
                    available
                )));
            }
        }

        let insert_result = sqlx::query_as::<_, Sale>(
            r#"
            INSERT INTO sales (sale_id, user_id, client_name, total_amount, idempotency_key)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sale_id, user_id, client_name, total_amount, sale_date, created_utc, deleted_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&input.client_name)
        .bind(input.total_amount())
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let sale = match insert_result {
            Ok(sale) => sale,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Idempotency key race: another request won. Return its result.
                tx.rollback().await.ok();
                if let Some(key) = idempotency_key {
                    let existing = sqlx::query_scalar::<_, Uuid>(
                        "SELECT sale_id FROM sales WHERE idempotency_key = $1 AND user_id = $2",
                    )
                    .bind(key)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("Failed to fetch existing sale", e))?;

                    if let Some(sale_id) = existing {
                        if let Some(found) = self.get_sale(user_id, sale_id).await? {
                            timer.observe_duration();
                            return Ok(found);
                        }
                    }
                }
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Duplicate idempotency key"
                )));
            }
            Err(e) => return Err(db_error("Failed to insert sale", e)),
        };

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let inserted = sqlx::query_as::<_, SaleItem>(
                r#"
                INSERT INTO sale_items (item_id, sale_id, variant_id, quantity, price_at_sale)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING item_id, sale_id, variant_id, quantity, price_at_sale
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(sale.sale_id)
            .bind(item.variant_id)
            .bind(item.quantity)
            .bind(item.price_at_sale)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert sale item", e))?;

            adjust_stock(&mut tx, user_id, item.variant_id, -item.quantity).await?;
            items.push(inserted);
        }

        commit(tx).await?;
        timer.observe_duration();
        STOCK_TRANSACTIONS_TOTAL
            .with_label_values(&["sale_create", "ok"])
            .inc();

        info!(
            sale_id = %sale.sale_id,
            total_amount = %sale.total_amount,
            item_count = items.len(),
            "Sale created"
        );

        Ok(SaleWithItems { sale, items })
    }

    /// List the user's live sales with items, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_sales(&self, user_id: Uuid) -> Result<Vec<SaleWithItems>, AppError> {
        let sales = sqlx::query_as::<_, Sale>(
            r#"
            SELECT sale_id, user_id, client_name, total_amount, sale_date, created_utc, deleted_utc
            FROM sales
            WHERE user_id = $1 AND deleted_utc IS NULL
            ORDER BY sale_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list sales", e))?;

        let mut result = Vec::with_capacity(sales.len());
        for sale in sales {
            let items = self.sale_items(sale.sale_id).await?;
            result.push(SaleWithItems { sale, items });
        }

        Ok(result)
    }

    /// Get a single sale with items, scoped to the owning user.
    #[instrument(skip(self), fields(user_id = %user_id, sale_id = %sale_id))]
    pub async fn get_sale(
        &self,
        user_id: Uuid,
        sale_id: Uuid,
    ) -> Result<Option<SaleWithItems>, AppError> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT sale_id, user_id, client_name, total_amount, sale_date, created_utc, deleted_utc
            FROM sales
            WHERE sale_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(sale_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get sale", e))?;

        let sale = match sale {
            Some(s) => s,
            None => return Ok(None),
        };

        let items = self.sale_items(sale_id).await?;

        Ok(Some(SaleWithItems { sale, items }))
    }

    /// Soft-delete a sale and restore its stock in one transaction; the
    /// symmetric inverse of `create_sale`. Same double-delete guard as
    /// purchases: only live rows are loaded.
    #[instrument(skip(self), fields(user_id = %user_id, sale_id = %sale_id))]
    pub async fn delete_sale(&self, user_id: Uuid, sale_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_sale"])
            .start_timer();

        let mut tx = begin(&self.pool).await?;

        let found = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT sale_id FROM sales
            WHERE sale_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            FOR UPDATE
            "#,
        )
        .bind(sale_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load sale", e))?;

        if found.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Sale {} not found",
                sale_id
            )));
        }

        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT item_id, sale_id, variant_id, quantity, price_at_sale
            FROM sale_items
            WHERE sale_id = $1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load sale items", e))?;

        for item in &items {
            adjust_stock(&mut tx, user_id, item.variant_id, item.quantity).await?;
        }

        sqlx::query("UPDATE sales SET deleted_utc = now() WHERE sale_id = $1")
            .bind(sale_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete sale", e))?;

        commit(tx).await?;
        timer.observe_duration();
        STOCK_TRANSACTIONS_TOTAL
            .with_label_values(&["sale_delete", "ok"])
            .inc();

        info!(sale_id = %sale_id, "Sale soft-deleted, stock restored");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dashboard Operations
    // -------------------------------------------------------------------------

    /// Total sales and purchases over a date range (live records only).
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn dashboard_report(
        &self,
        user_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<(Decimal, Decimal), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["dashboard_report"])
            .start_timer();

        let total_sales: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_amount), 0)
            FROM sales
            WHERE user_id = $1 AND deleted_utc IS NULL
              AND sale_date >= $2 AND sale_date <= $3
            "#,
        )
        .bind(user_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to sum sales", e))?;

        let total_purchases: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_cost), 0)
            FROM purchases
            WHERE user_id = $1 AND deleted_utc IS NULL
              AND purchase_date >= $2 AND purchase_date <= $3
            "#,
        )
        .bind(user_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to sum purchases", e))?;

        timer.observe_duration();

        Ok((total_sales, total_purchases))
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn purchase_items(&self, purchase_id: Uuid) -> Result<Vec<PurchaseItem>, AppError> {
        sqlx::query_as::<_, PurchaseItem>(
            r#"
            SELECT item_id, purchase_id, variant_id, quantity, cost_at_purchase
            FROM purchase_items
            WHERE purchase_id = $1
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load purchase items", e))
    }

    async fn sale_items(&self, sale_id: Uuid) -> Result<Vec<SaleItem>, AppError> {
        sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT item_id, sale_id, variant_id, quantity, price_at_sale
            FROM sale_items
            WHERE sale_id = $1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load sale items", e))
    }
}

/// Start a transaction on the pool.
async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, AppError> {
    pool.begin()
        .await
        .map_err(|e| db_error("Failed to begin transaction", e))
}

/// Commit a transaction.
async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), AppError> {
    tx.commit()
        .await
        .map_err(|e| db_error("Failed to commit transaction", e))
}

/// The stock adjustment primitive: apply `quantity += delta` to a live
/// variant owned by the user, on the caller's open transaction. `delta`
/// may be positive (restock) or negative (consumption/reversal).
///
/// Non-negativity is not enforced here: the purchase-edit reversal
/// sequence legitimately passes through transiently negative quantities.
/// Callers re-check before commit where a negative end state is possible.
async fn adjust_stock(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    variant_id: Uuid,
    delta: i32,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE product_variants v
        SET quantity = v.quantity + $3, updated_utc = now()
        FROM products p
        WHERE v.product_id = p.product_id
          AND v.variant_id = $1
          AND p.user_id = $2
          AND v.deleted_utc IS NULL
        "#,
    )
    .bind(variant_id)
    .bind(user_id)
    .bind(delta)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to adjust stock", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Variant {} not found",
            variant_id
        )));
    }

    Ok(())
}

/// Verify that none of the given variants ended up with negative stock;
/// aborts the caller's transaction with `Conflict` otherwise.
async fn assert_stock_non_negative(
    tx: &mut Transaction<'_, Postgres>,
    variant_ids: &[Uuid],
) -> Result<(), AppError> {
    let negative = sqlx::query_as::<_, (Uuid, String, i32)>(
        r#"
        SELECT variant_id, name, quantity
        FROM product_variants
        WHERE variant_id = ANY($1) AND quantity < 0
        LIMIT 1
        "#,
    )
    .bind(variant_ids)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to verify stock", e))?;

    if let Some((variant_id, name, quantity)) = negative {
        ERRORS_TOTAL.with_label_values(&["negative_stock"]).inc();
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Stock reversal would leave variant '{}' ({}) at {}; the goods were already sold",
            name,
            variant_id,
            quantity
        )));
    }

    Ok(())
}

/// Insert a variant row for a product (zero initial stock).
async fn insert_variant(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    input: &NewVariantInput,
) -> Result<ProductVariant, AppError> {
    sqlx::query_as::<_, ProductVariant>(
        r#"
        INSERT INTO product_variants (variant_id, product_id, name, sale_price)
        VALUES ($1, $2, $3, $4)
        RETURNING variant_id, product_id, name, sale_price, quantity, created_utc, updated_utc, deleted_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(product_id)
    .bind(&input.name)
    .bind(input.sale_price)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to insert variant", e))
}

/// Map a sqlx error to `DatabaseError`, bumping the error counter.
fn db_error(context: &str, e: sqlx::Error) -> AppError {
    ERRORS_TOTAL.with_label_values(&["db_error"]).inc();
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}
