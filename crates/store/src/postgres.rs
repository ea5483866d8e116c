use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use domain::{Money, Order, OrderItem, OrderStatus, ProductId, SagaState, SagaStatus, SagaStep};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::{OrderStore, SagaStore};

/// PostgreSQL-backed order and saga store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status_str: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status_str)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown order status {status_str}")))?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: row.try_get("user_id")?,
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            status,
            saga_id: row
                .try_get::<Option<Uuid>, _>("saga_id")?
                .map(SagaId::from_uuid),
            items,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            id: row.try_get::<Uuid, _>("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidRow(format!("negative quantity {quantity}")))?,
            price: Money::from_cents(row.try_get("price")?),
        })
    }

    fn row_to_saga(row: &PgRow) -> Result<SagaState> {
        let step_str: String = row.try_get("current_step")?;
        let status_str: String = row.try_get("status")?;

        Ok(SagaState {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            current_step: SagaStep::parse(&step_str)
                .ok_or_else(|| StoreError::InvalidRow(format!("unknown saga step {step_str}")))?,
            status: SagaStatus::parse(&status_str).ok_or_else(|| {
                StoreError::InvalidRow(format!("unknown saga status {status_str}"))
            })?,
            payload: row.try_get("payload")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    async fn items_for_orders(&self, order_ids: &[Uuid]) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY product_id ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_amount, status, saga_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.user_id)
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(order.saga_id.as_ref().map(SagaId::as_uuid))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(i64::from(item.quantity))
            .bind(item.price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, total_amount, status, saga_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.items_for_orders(&[id.as_uuid()]).await?;
                Ok(Some(Self::row_to_order(&row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total_amount, status, saga_id, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;

        let mut items_by_order: std::collections::HashMap<OrderId, Vec<OrderItem>> =
            std::collections::HashMap::new();
        for item in self.items_for_orders(&ids).await? {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        rows.iter()
            .map(|row| {
                let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
                let items = items_by_order.remove(&order_id).unwrap_or_default();
                Self::row_to_order(row, items)
            })
            .collect()
    }

    async fn set_order_saga(&self, id: OrderId, saga_id: SagaId) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET saga_id = $1, updated_at = now() WHERE id = $2")
            .bind(saga_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(())
    }

    async fn set_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PgStore {
    async fn insert_saga(&self, saga: &SagaState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_state (saga_id, order_id, current_step, status, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(saga.saga_id.as_uuid())
        .bind(saga.order_id.as_uuid())
        .bind(saga.current_step.as_str())
        .bind(saga.status.as_str())
        .bind(&saga.payload)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("saga_state_order_id_key")
            {
                return StoreError::DuplicateSaga(saga.order_id);
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn saga(&self, id: SagaId) -> Result<Option<SagaState>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, order_id, current_step, status, payload, created_at, updated_at
            FROM saga_state
            WHERE saga_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_saga(&r)).transpose()
    }

    async fn saga_for_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, order_id, current_step, status, payload, created_at, updated_at
            FROM saga_state
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_saga(&r)).transpose()
    }

    async fn advance_saga(&self, id: SagaId, step: SagaStep) -> Result<()> {
        let result = sqlx::query(
            "UPDATE saga_state SET current_step = $1, updated_at = now() WHERE saga_id = $2",
        )
        .bind(step.as_str())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SagaNotFound(id));
        }
        Ok(())
    }

    async fn close_saga(&self, id: SagaId, step: SagaStep, status: SagaStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_state
            SET current_step = $1, status = $2, updated_at = now()
            WHERE saga_id = $3
            "#,
        )
        .bind(step.as_str())
        .bind(status.as_str())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SagaNotFound(id));
        }
        Ok(())
    }

    async fn sagas_in_progress(&self) -> Result<Vec<SagaState>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id, order_id, current_step, status, payload, created_at, updated_at
            FROM saga_state
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(SagaStatus::InProgress.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_saga).collect()
    }
}
