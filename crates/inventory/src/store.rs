//! Inventory persistence with transactional batch semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{EventItem, ProductId};
use serde::Serialize;
use sqlx::{PgPool, Row, postgres::PgRow};
use thiserror::Error;

use crate::level::{StockError, StockLevel};

/// Errors from inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The product has no inventory row.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough unreserved stock for the request.
    #[error("insufficient stock for product {product_id}: available={available}, requested={requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// A release or commit did not match what is currently held.
    #[error("stock counters out of balance for product {product_id}: {source}")]
    OutOfBalance {
        product_id: ProductId,
        source: StockError,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    fn from_stock(product_id: ProductId, err: StockError) -> Self {
        match err {
            StockError::Insufficient {
                available,
                requested,
            } => InventoryError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            other => InventoryError::OutOfBalance {
                product_id,
                source: other,
            },
        }
    }

    /// True for failures of the request itself; false for infrastructure
    /// failures worth retrying.
    pub fn is_domain(&self) -> bool {
        !matches!(self, InventoryError::Database(_))
    }
}

/// One inventory row as exposed to queries.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryLevel {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available: i64,
    pub updated_at: DateTime<Utc>,
}

impl InventoryLevel {
    fn new(product_id: ProductId, level: StockLevel, updated_at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            quantity: level.quantity,
            reserved_quantity: level.reserved,
            available: level.available(),
            updated_at,
        }
    }
}

/// Which transition a batch applies to each of its items.
#[derive(Debug, Clone, Copy)]
enum BatchOp {
    Reserve,
    Release,
    Commit,
}

impl BatchOp {
    fn apply(self, level: StockLevel, quantity: i64) -> Result<StockLevel, StockError> {
        match self {
            BatchOp::Reserve => level.reserve(quantity),
            BatchOp::Release => level.release(quantity),
            BatchOp::Commit => level.commit(quantity),
        }
    }
}

/// Orders a batch by ascending product id so overlapping batches always
/// acquire row locks in the same order and cannot deadlock.
fn in_lock_order(items: &[EventItem]) -> Vec<&EventItem> {
    let mut sorted: Vec<&EventItem> = items.iter().collect();
    sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    sorted
}

/// Inventory store seam.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Places a hold on every item, or none on any failure.
    async fn reserve(&self, items: &[EventItem]) -> Result<(), InventoryError>;

    /// Returns held stock to the available pool.
    async fn release(&self, items: &[EventItem]) -> Result<(), InventoryError>;

    /// Converts held stock into a permanent deduction.
    async fn commit(&self, items: &[EventItem]) -> Result<(), InventoryError>;

    /// Reads one product's counters.
    async fn product(&self, product_id: &ProductId) -> Result<Option<InventoryLevel>, InventoryError>;

    /// Lists counters ordered by product id, up to `limit`.
    async fn levels(&self, limit: i64) -> Result<Vec<InventoryLevel>, InventoryError>;
}

/// PostgreSQL inventory store using per-row exclusive locks.
#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_level(row: &PgRow) -> Result<InventoryLevel, InventoryError> {
        Ok(InventoryLevel::new(
            ProductId::new(row.try_get::<String, _>("product_id")?),
            StockLevel::new(row.try_get("quantity")?, row.try_get("reserved_quantity")?),
            row.try_get("updated_at")?,
        ))
    }

    /// Applies one transition to every item inside a single transaction.
    ///
    /// Each row is locked with `FOR UPDATE` before the read-modify-write,
    /// in ascending product-id order across the batch.
    async fn apply_batch(&self, op: BatchOp, items: &[EventItem]) -> Result<(), InventoryError> {
        let mut tx = self.pool.begin().await?;

        for item in in_lock_order(items) {
            let row = sqlx::query(
                r#"
                SELECT quantity, reserved_quantity
                FROM inventory
                WHERE product_id = $1
                FOR UPDATE
                "#,
            )
            .bind(item.product_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                return Err(InventoryError::ProductNotFound(item.product_id.clone()));
            };

            let level = StockLevel::new(row.try_get("quantity")?, row.try_get("reserved_quantity")?);
            let next = op
                .apply(level, i64::from(item.quantity))
                .map_err(|e| InventoryError::from_stock(item.product_id.clone(), e))?;

            sqlx::query(
                r#"
                UPDATE inventory
                SET quantity = $1, reserved_quantity = $2, updated_at = now()
                WHERE product_id = $3
                "#,
            )
            .bind(next.quantity)
            .bind(next.reserved)
            .bind(item.product_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn reserve(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Reserve, items).await
    }

    async fn release(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Release, items).await
    }

    async fn commit(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Commit, items).await
    }

    async fn product(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<InventoryLevel>, InventoryError> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, reserved_quantity, updated_at
            FROM inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_level(&r)).transpose()
    }

    async fn levels(&self, limit: i64) -> Result<Vec<InventoryLevel>, InventoryError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, reserved_quantity, updated_at
            FROM inventory
            ORDER BY product_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_level).collect()
    }
}

/// In-memory inventory store for testing.
///
/// Batches are applied atomically under one lock, giving the same
/// all-or-nothing semantics as the transactional implementation.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    rows: Arc<Mutex<HashMap<ProductId, (StockLevel, DateTime<Utc>)>>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a product with `quantity` total stock and nothing reserved.
    pub fn seed(&self, product_id: impl Into<ProductId>, quantity: i64) {
        self.rows.lock().unwrap().insert(
            product_id.into(),
            (StockLevel::new(quantity, 0), Utc::now()),
        );
    }

    /// Reads a product's counters directly, for assertions.
    pub fn level_of(&self, product_id: &ProductId) -> Option<StockLevel> {
        self.rows.lock().unwrap().get(product_id).map(|(l, _)| *l)
    }

    fn apply_batch(&self, op: BatchOp, items: &[EventItem]) -> Result<(), InventoryError> {
        let mut rows = self.rows.lock().unwrap();

        // First pass: compute every new level; abort before mutating.
        let mut staged: Vec<(ProductId, StockLevel)> = Vec::with_capacity(items.len());
        for item in in_lock_order(items) {
            let current = staged
                .iter()
                .rev()
                .find(|(id, _)| *id == item.product_id)
                .map(|(_, level)| *level)
                .or_else(|| rows.get(&item.product_id).map(|(l, _)| *l))
                .ok_or_else(|| InventoryError::ProductNotFound(item.product_id.clone()))?;

            let next = op
                .apply(current, i64::from(item.quantity))
                .map_err(|e| InventoryError::from_stock(item.product_id.clone(), e))?;
            staged.push((item.product_id.clone(), next));
        }

        for (product_id, level) in staged {
            rows.insert(product_id, (level, Utc::now()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn reserve(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Reserve, items)
    }

    async fn release(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Release, items)
    }

    async fn commit(&self, items: &[EventItem]) -> Result<(), InventoryError> {
        self.apply_batch(BatchOp::Commit, items)
    }

    async fn product(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<InventoryLevel>, InventoryError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(product_id)
            .map(|(level, updated_at)| {
                InventoryLevel::new(product_id.clone(), *level, *updated_at)
            }))
    }

    async fn levels(&self, limit: i64) -> Result<Vec<InventoryLevel>, InventoryError> {
        let rows = self.rows.lock().unwrap();
        let mut levels: Vec<InventoryLevel> = rows
            .iter()
            .map(|(id, (level, updated_at))| InventoryLevel::new(id.clone(), *level, *updated_at))
            .collect();
        levels.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        levels.truncate(limit.max(0) as usize);
        Ok(levels)
    }
}
