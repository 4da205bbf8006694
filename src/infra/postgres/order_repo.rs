use {
    crate::domain::{
        error::{FulfillmentError, PipelineError},
        fulfillment::{Applied, FulfillmentEffect, FulfillmentStore},
        id::{EventId, OrderRef},
        ledger::BoxFuture,
        order::{Order, OrderStatus, Transition},
    },
    sqlx::{PgPool, Postgres, Row, Transaction},
    uuid::Uuid,
};

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_effect(
        &self,
        order_ref: &OrderRef,
        effect: FulfillmentEffect,
        event_id: &EventId,
    ) -> Result<Applied, FulfillmentError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await?;

        let Some((user_id, current)) = lock_order(&mut tx, order_ref).await? else {
            return Err(FulfillmentError::InvalidState(format!(
                "unknown order {order_ref}"
            )));
        };

        let (from, to) = match current.decide(effect.target_status())? {
            Transition::Unchanged => {
                tx.commit().await?;
                return Ok(Applied::Unchanged(current));
            }
            Transition::Advance { from, to } => (from, to),
        };

        update_status(&mut tx, order_ref, to, event_id).await?;

        match effect {
            FulfillmentEffect::Complete => {
                grant_entitlements(&mut tx, order_ref, &user_id).await?;
                release_holds(&mut tx, order_ref).await?;
            }
            FulfillmentEffect::Expire => {
                release_holds(&mut tx, order_ref).await?;
            }
            FulfillmentEffect::FlagPaymentFailed => {
                insert_failure_notice(&mut tx, order_ref, &user_id, event_id).await?;
            }
        }

        tx.commit().await?;
        Ok(Applied::Changed { from, to })
    }
}

impl FulfillmentStore for PgOrderStore {
    fn apply<'a>(
        &'a self,
        order: &'a OrderRef,
        effect: FulfillmentEffect,
        event_id: &'a EventId,
    ) -> BoxFuture<'a, Result<Applied, FulfillmentError>> {
        Box::pin(self.apply_effect(order, effect, event_id))
    }
}

/// Row-lock the order for the rest of the transaction.
async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: &OrderRef,
) -> Result<Option<(String, OrderStatus)>, FulfillmentError> {
    let row = sqlx::query("SELECT user_id, status FROM orders WHERE order_ref = $1 FOR UPDATE")
        .bind(order_ref.as_str())
        .fetch_optional(&mut **tx)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let user_id: String = row.try_get("user_id")?;
    let status: String = row.try_get("status")?;
    let status = OrderStatus::try_from(status.as_str())
        .map_err(|e| FulfillmentError::InvalidState(e.to_string()))?;
    Ok(Some((user_id, status)))
}

async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: &OrderRef,
    status: OrderStatus,
    event_id: &EventId,
) -> Result<(), FulfillmentError> {
    sqlx::query(
        "UPDATE orders SET status = $2, last_event_id = $3, updated_at = now() WHERE order_ref = $1",
    )
    .bind(order_ref.as_str())
    .bind(status.as_str())
    .bind(event_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Set-active semantics: granting twice leaves one active row per product.
async fn grant_entitlements(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: &OrderRef,
    user_id: &str,
) -> Result<u64, FulfillmentError> {
    let result = sqlx::query(
        r#"
        INSERT INTO entitlements (user_id, product_id, order_ref, active, granted_at)
        SELECT $1, product_id, order_ref, true, now()
        FROM order_lines
        WHERE order_ref = $2
        ON CONFLICT (user_id, product_id) DO UPDATE
        SET active = true, order_ref = EXCLUDED.order_ref
        "#,
    )
    .bind(user_id)
    .bind(order_ref.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn release_holds(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: &OrderRef,
) -> Result<u64, FulfillmentError> {
    let result = sqlx::query(
        "UPDATE inventory_holds SET released_at = now() WHERE order_ref = $1 AND released_at IS NULL",
    )
    .bind(order_ref.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_failure_notice(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: &OrderRef,
    user_id: &str,
    event_id: &EventId,
) -> Result<bool, FulfillmentError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payment_failure_notices (id, order_ref, user_id, event_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(order_ref.as_str())
    .bind(user_id)
    .bind(event_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Create a pending order with its lines and inventory holds.
pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<(), PipelineError> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO orders (order_ref, user_id, status) VALUES ($1, $2, $3)")
        .bind(order.order_ref.as_str())
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .execute(&mut *tx)
        .await?;

    for line in &order.lines {
        let quantity = i32::try_from(line.quantity)
            .map_err(|_| PipelineError::Validation("quantity exceeds storage capacity".into()))?;

        sqlx::query("INSERT INTO order_lines (order_ref, product_id, quantity) VALUES ($1, $2, $3)")
            .bind(order.order_ref.as_str())
            .bind(&line.product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO inventory_holds (order_ref, product_id, quantity) VALUES ($1, $2, $3)",
        )
        .bind(order.order_ref.as_str())
        .bind(&line.product_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
