//! PostgreSQL `RecordStore` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rrad_core::{OrderRecord, PurgeCounts, RefundRecord, ReturnReasonRecord, Shop, SyncStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{RecordStore, StoreError};

const SHOP_COLUMNS: &str = "id, currency, sync_status, last_sync_at, sync_operation_id, plan";
const ORDER_COLUMNS: &str = "id, shop, name, order_date, total_amount, currency, financial_status";
const REFUND_COLUMNS: &str = "id, shop, order_id, order_name, refund_date, amount, currency, note, reason, line_items, has_return, return_id";
const RETURN_REASON_COLUMNS: &str =
    "id, shop, return_id, order_id, reason, category, product_title, sku, quantity, created_at";

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("record store migrations applied");
        Ok(())
    }
}

fn shop_from_row(row: &PgRow) -> Result<Shop, StoreError> {
    let status: String = row.try_get("sync_status")?;
    let sync_status = status.parse::<SyncStatus>().map_err(|_| StoreError::Corrupt {
        column: "shops.sync_status",
        value: status.clone(),
    })?;
    Ok(Shop {
        id: row.try_get("id")?,
        currency: row.try_get("currency")?,
        sync_status,
        last_sync_at: row.try_get("last_sync_at")?,
        sync_operation_id: row.try_get("sync_operation_id")?,
        plan: row.try_get("plan")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<OrderRecord, StoreError> {
    Ok(OrderRecord {
        id: row.try_get("id")?,
        shop: row.try_get("shop")?,
        name: row.try_get("name")?,
        order_date: row.try_get("order_date")?,
        total_amount: row.try_get("total_amount")?,
        currency: row.try_get("currency")?,
        financial_status: row.try_get("financial_status")?,
    })
}

fn refund_from_row(row: &PgRow) -> Result<RefundRecord, StoreError> {
    Ok(RefundRecord {
        id: row.try_get("id")?,
        shop: row.try_get("shop")?,
        order_id: row.try_get("order_id")?,
        order_name: row.try_get("order_name")?,
        refund_date: row.try_get("refund_date")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        note: row.try_get("note")?,
        reason: row.try_get("reason")?,
        line_items: row.try_get("line_items")?,
        has_return: row.try_get("has_return")?,
        return_id: row.try_get("return_id")?,
    })
}

fn return_reason_from_row(row: &PgRow) -> Result<ReturnReasonRecord, StoreError> {
    let category: String = row.try_get("category")?;
    let quantity: i32 = row.try_get("quantity")?;
    Ok(ReturnReasonRecord {
        id: row.try_get("id")?,
        shop: row.try_get("shop")?,
        return_id: row.try_get("return_id")?,
        order_id: row.try_get("order_id")?,
        reason: row.try_get("reason")?,
        // Rows written before a taxonomy change may carry a retired name.
        category: category.parse().unwrap_or_default(),
        product_title: row.try_get("product_title")?,
        sku: row.try_get("sku")?,
        quantity: u32::try_from(quantity).unwrap_or(0),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn shop(&self, shop: &str) -> Result<Option<Shop>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SHOP_COLUMNS} FROM shops WHERE id = $1"))
            .bind(shop)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(shop_from_row).transpose()
    }

    async fn ensure_shop(&self, shop: &str) -> Result<Shop, StoreError> {
        sqlx::query("INSERT INTO shops (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(shop)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query(&format!("SELECT {SHOP_COLUMNS} FROM shops WHERE id = $1"))
            .bind(shop)
            .fetch_one(&self.pool)
            .await?;
        shop_from_row(&row)
    }

    async fn shops_awaiting_poll(&self) -> Result<Vec<Shop>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SHOP_COLUMNS}
              FROM shops
             WHERE sync_status = 'running'
                OR (sync_status = 'completed' AND sync_operation_id IS NOT NULL)
             ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(shop_from_row).collect()
    }

    async fn try_begin_sync(&self, shop: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO shops (id, sync_status) VALUES ($1, 'running')
            ON CONFLICT (id) DO UPDATE
               SET sync_status = 'running', sync_operation_id = NULL
             WHERE shops.sync_status <> 'running'
            RETURNING id
            "#,
        )
        .bind(shop)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn record_sync_operation(&self, shop: &str, operation_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE shops SET sync_operation_id = $2 WHERE id = $1")
            .bind(shop)
            .bind(operation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_sync_failed(&self, shop: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE shops SET sync_status = 'failed', sync_operation_id = NULL WHERE id = $1")
            .bind(shop)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_sync_completed(
        &self,
        shop: &str,
        completed_at: DateTime<Utc>,
        currency: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE shops
               SET sync_status = 'completed',
                   sync_operation_id = NULL,
                   last_sync_at = $2,
                   currency = COALESCE($3, currency)
             WHERE id = $1
            "#,
        )
        .bind(shop)
        .bind(completed_at)
        .bind(currency)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_operation_finished(&self, shop: &str, operation_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE shops SET sync_status = 'completed' WHERE id = $1 AND sync_operation_id = $2",
        )
        .bind(shop)
        .bind(operation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_order(&self, order: &OrderRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_records (id, shop, name, order_date, total_amount, currency, financial_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
               SET shop = EXCLUDED.shop,
                   name = EXCLUDED.name,
                   order_date = EXCLUDED.order_date,
                   total_amount = EXCLUDED.total_amount,
                   currency = EXCLUDED.currency,
                   financial_status = EXCLUDED.financial_status
            "#,
        )
        .bind(&order.id)
        .bind(&order.shop)
        .bind(&order.name)
        .bind(order.order_date)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(&order.financial_status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order(&self, shop: &str, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM order_records WHERE shop = $1 AND id = $2"
        ))
        .bind(shop)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order_financial_status(
        &self,
        shop: &str,
        order_id: &str,
        financial_status: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE order_records SET financial_status = $3 WHERE shop = $1 AND id = $2",
        )
        .bind(shop)
        .bind(order_id)
        .bind(financial_status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn orders_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM order_records WHERE shop = $1 AND order_date >= $2 ORDER BY order_date, id"
        ))
        .bind(shop)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn upsert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refund_records
                (id, shop, order_id, order_name, refund_date, amount, currency, note, reason, line_items, has_return, return_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
               SET shop = EXCLUDED.shop,
                   order_id = EXCLUDED.order_id,
                   order_name = EXCLUDED.order_name,
                   refund_date = EXCLUDED.refund_date,
                   amount = EXCLUDED.amount,
                   currency = EXCLUDED.currency,
                   note = EXCLUDED.note,
                   reason = EXCLUDED.reason,
                   line_items = EXCLUDED.line_items,
                   has_return = EXCLUDED.has_return,
                   return_id = EXCLUDED.return_id
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.shop)
        .bind(&refund.order_id)
        .bind(&refund.order_name)
        .bind(refund.refund_date)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(&refund.note)
        .bind(&refund.reason)
        .bind(&refund.line_items)
        .bind(refund.has_return)
        .bind(&refund.return_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refund(&self, shop: &str, refund_id: &str) -> Result<Option<RefundRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_records WHERE shop = $1 AND id = $2"
        ))
        .bind(shop)
        .bind(refund_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(refund_from_row).transpose()
    }

    async fn refunds_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<RefundRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_records WHERE shop = $1 AND refund_date >= $2 ORDER BY refund_date, id"
        ))
        .bind(shop)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(refund_from_row).collect()
    }

    async fn upsert_return_reason(&self, record: &ReturnReasonRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO return_reason_records
                (id, shop, return_id, order_id, reason, category, product_title, sku, quantity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
               SET shop = EXCLUDED.shop,
                   return_id = EXCLUDED.return_id,
                   order_id = EXCLUDED.order_id,
                   reason = EXCLUDED.reason,
                   category = EXCLUDED.category,
                   product_title = EXCLUDED.product_title,
                   sku = EXCLUDED.sku,
                   quantity = EXCLUDED.quantity,
                   created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.shop)
        .bind(&record.return_id)
        .bind(&record.order_id)
        .bind(&record.reason)
        .bind(record.category.as_str())
        .bind(&record.product_title)
        .bind(&record.sku)
        .bind(i32::try_from(record.quantity).unwrap_or(i32::MAX))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn return_reasons_since(
        &self,
        shop: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReturnReasonRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RETURN_REASON_COLUMNS} FROM return_reason_records WHERE shop = $1 AND created_at >= $2 ORDER BY created_at, id"
        ))
        .bind(shop)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(return_reason_from_row).collect()
    }

    async fn purge_shop(&self, shop: &str) -> Result<PurgeCounts, StoreError> {
        let mut tx = self.pool.begin().await?;
        let return_reasons = sqlx::query("DELETE FROM return_reason_records WHERE shop = $1")
            .bind(shop)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let refunds = sqlx::query("DELETE FROM refund_records WHERE shop = $1")
            .bind(shop)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let orders = sqlx::query("DELETE FROM order_records WHERE shop = $1")
            .bind(shop)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let shops = sqlx::query("DELETE FROM shops WHERE id = $1")
            .bind(shop)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(PurgeCounts {
            shops,
            orders,
            refunds,
            return_reasons,
        })
    }

    async fn redact_orders(&self, shop: &str, order_ids: &[String]) -> Result<PurgeCounts, StoreError> {
        if order_ids.is_empty() {
            return Ok(PurgeCounts::default());
        }
        let mut tx = self.pool.begin().await?;
        let return_reasons = sqlx::query(
            "DELETE FROM return_reason_records WHERE shop = $1 AND order_id = ANY($2)",
        )
        .bind(shop)
        .bind(order_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let refunds = sqlx::query("DELETE FROM refund_records WHERE shop = $1 AND order_id = ANY($2)")
            .bind(shop)
            .bind(order_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let orders = sqlx::query("DELETE FROM order_records WHERE shop = $1 AND id = ANY($2)")
            .bind(shop)
            .bind(order_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(PurgeCounts {
            shops: 0,
            orders,
            refunds,
            return_reasons,
        })
    }
}
