use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{OrderTransaction, OrderTransactionStore, PaymentCustomFields};
use crate::reconciliation::transition::{TransactionState, TransitionAction};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const SELECT_ORDER_TRANSACTION: &str = "
    SELECT t.id::text AS transaction_id,
           o.id::text AS order_id,
           o.order_number,
           o.amount_total,
           c.iso_code AS currency,
           t.state,
           t.custom_fields
    FROM order_transactions t
    JOIN orders o ON o.id = t.order_id
    LEFT JOIN currencies c ON c.id = o.currency_id";

#[derive(Debug, FromRow)]
struct OrderTransactionRow {
    transaction_id: String,
    order_id: String,
    order_number: String,
    amount_total: Decimal,
    currency: Option<String>,
    state: String,
    custom_fields: serde_json::Value,
}

impl TryFrom<OrderTransactionRow> for OrderTransaction {
    type Error = DatabaseError;

    fn try_from(row: OrderTransactionRow) -> Result<Self, Self::Error> {
        let state = TransactionState::from_technical_name(&row.state).ok_or_else(|| {
            DatabaseError::corrupt(format!(
                "transaction {} has unknown state '{}'",
                row.transaction_id, row.state
            ))
        })?;

        Ok(OrderTransaction {
            custom_fields: PaymentCustomFields::from_json(&row.custom_fields),
            transaction_id: row.transaction_id,
            order_id: row.order_id,
            order_number: row.order_number,
            amount_total: row.amount_total,
            currency: row.currency,
            state,
        })
    }
}

/// Postgres-backed order transaction store
#[derive(Clone)]
pub struct PgOrderTransactionStore {
    pool: PgPool,
}

impl PgOrderTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn current_state(&self, transaction_id: Uuid) -> DbResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT state FROM order_transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl OrderTransactionStore for PgOrderTransactionStore {
    async fn find_by_hosted_checkout_id(
        &self,
        hosted_checkout_id: &str,
    ) -> DbResult<Option<OrderTransaction>> {
        let query = format!(
            "{} WHERE t.custom_fields ->> 'payment_transaction_id' = $1
             ORDER BY t.created_at DESC LIMIT 1",
            SELECT_ORDER_TRANSACTION
        );

        sqlx::query_as::<_, OrderTransactionRow>(&query)
            .bind(hosted_checkout_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(OrderTransaction::try_from)
            .transpose()
    }

    async fn find_by_order_id(&self, order_id: &str) -> DbResult<Option<OrderTransaction>> {
        let Ok(order_uuid) = Uuid::parse_str(order_id) else {
            return Ok(None);
        };
        let query = format!(
            "{} WHERE o.id = $1 ORDER BY t.created_at DESC LIMIT 1",
            SELECT_ORDER_TRANSACTION
        );

        sqlx::query_as::<_, OrderTransactionRow>(&query)
            .bind(order_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(OrderTransaction::try_from)
            .transpose()
    }

    async fn save_custom_fields(
        &self,
        order_id: &str,
        transaction_id: &str,
        fields: &PaymentCustomFields,
    ) -> DbResult<()> {
        let order_uuid = Uuid::parse_str(order_id)
            .map_err(|_| DatabaseError::not_found("Order", order_id))?;
        let transaction_uuid = Uuid::parse_str(transaction_id)
            .map_err(|_| DatabaseError::not_found("OrderTransaction", transaction_id))?;
        let patch = fields.to_json();

        let mut db_tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let orders = sqlx::query(
            "UPDATE orders SET custom_fields = custom_fields || $1, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(&patch)
        .bind(order_uuid)
        .execute(&mut *db_tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if orders.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }

        let transactions = sqlx::query(
            "UPDATE order_transactions SET custom_fields = custom_fields || $1, updated_at = NOW()
             WHERE id = $2 AND order_id = $3",
        )
        .bind(&patch)
        .bind(transaction_uuid)
        .bind(order_uuid)
        .execute(&mut *db_tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if transactions.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OrderTransaction", transaction_id));
        }

        db_tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        transaction_id: &str,
        action: TransitionAction,
    ) -> DbResult<TransactionState> {
        let transaction_uuid = Uuid::parse_str(transaction_id)
            .map_err(|_| DatabaseError::not_found("OrderTransaction", transaction_id))?;
        let target = action.target();
        let allowed: Vec<String> = action
            .allowed_from()
            .iter()
            .map(|state| state.technical_name().to_string())
            .collect();

        let updated = sqlx::query_scalar::<_, String>(
            "UPDATE order_transactions SET state = $1, updated_at = NOW()
             WHERE id = $2 AND state = ANY($3)
             RETURNING state",
        )
        .bind(target.technical_name())
        .bind(transaction_uuid)
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(state) => TransactionState::from_technical_name(&state)
                .ok_or_else(|| DatabaseError::corrupt(format!("unknown state '{}'", state))),
            None => match self.current_state(transaction_uuid).await? {
                // Another writer got there first.
                Some(current) if current == target.technical_name() => Ok(target),
                Some(current) => Err(DatabaseError::invalid_transition(
                    current,
                    target.technical_name(),
                )
                .with_context(format!("transaction {}", transaction_id))),
                None => Err(DatabaseError::not_found("OrderTransaction", transaction_id)),
            },
        }
    }
}
