//! Storage boundary for modulkassa-service.
//!
//! The engine talks to billing storage through `ReceiptStore`; `Database`
//! implements it over a Postgres pool. The panel owns the schema, so this
//! service only reads receipts and register settings and writes back status
//! plus fiscal fields.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::{DatabaseConfig, RegisterConfig};
use crate::models::{FiscalFields, Receipt, ReceiptLineItem, ReceiptStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(anyhow::Error),

    #[error("register {0} not found")]
    RegisterNotFound(i64),
}

/// Seam between the reconciliation engine and billing storage.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn register_config(&self, register_id: i64) -> Result<RegisterConfig, StoreError>;

    async fn receipts_by_status(
        &self,
        register_id: i64,
        status: ReceiptStatus,
        created_since: NaiveDateTime,
    ) -> Result<Vec<Receipt>, StoreError>;

    async fn line_items(&self, receipt_id: i64) -> Result<Vec<ReceiptLineItem>, StoreError>;

    async fn mark_wait(&self, receipt_id: i64, external_id: &str) -> Result<(), StoreError>;

    async fn mark_success(
        &self,
        receipt_id: i64,
        external_id: &str,
        fiscal: &FiscalFields,
    ) -> Result<(), StoreError>;

    async fn mark_error(
        &self,
        receipt_id: i64,
        external_id: &str,
        message: &str,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, FromRow)]
struct RegisterRow {
    username: String,
    password: String,
    url: String,
    retail_point_id: String,
    convert_invalid_rate_to_none_rate: bool,
    default_payment_method: Option<i32>,
    default_payment_object: Option<i32>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config), fields(service = "modulkassa-service"))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| StoreError::Database(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ReceiptStore for Database {
    #[instrument(skip(self))]
    async fn register_config(&self, register_id: i64) -> Result<RegisterConfig, StoreError> {
        let row = sqlx::query_as::<_, RegisterRow>(
            r#"
            SELECT username, password, url, retail_point_id,
                   convert_invalid_rate_to_none_rate,
                   default_payment_method, default_payment_object
            FROM cash_registers
            WHERE register_id = $1
            "#,
        )
        .bind(register_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to load register config: {}", e)))?
        .ok_or(StoreError::RegisterNotFound(register_id))?;

        Ok(RegisterConfig {
            username: row.username,
            password: Secret::new(row.password),
            url: row.url,
            retail_point_id: row.retail_point_id,
            convert_invalid_rate_to_none_rate: row.convert_invalid_rate_to_none_rate,
            default_payment_method: row.default_payment_method,
            default_payment_object: row.default_payment_object,
        })
    }

    #[instrument(skip(self), fields(status = status.as_str()))]
    async fn receipts_by_status(
        &self,
        register_id: i64,
        status: ReceiptStatus,
        created_since: NaiveDateTime,
    ) -> Result<Vec<Receipt>, StoreError> {
        let receipts = sqlx::query_as::<_, Receipt>(
            r#"
            SELECT r.receipt_id AS id, r.payment_id, r.register_id, r.status,
                   r.created_at, r.amount, r.currency, r.email,
                   r.internal_id, r.external_id, r.fn_number,
                   r.fiscal_document_number, r.fiscal_document_attribute,
                   r.receipt_date, r.receipt_date_tz, r.error_message,
                   r.is_expense, r.receipt_type, r.payment_type,
                   p.bill_order
            FROM receipts r
            LEFT JOIN payments p ON p.payment_id = r.payment_id
            WHERE r.register_id = $1
              AND r.status = $2
              AND r.created_at >= $3
            ORDER BY r.receipt_id
            "#,
        )
        .bind(register_id)
        .bind(status.as_str())
        .bind(created_since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to load receipts: {}", e)))?;

        info!(count = receipts.len(), register_id, "Receipts loaded");

        Ok(receipts)
    }

    #[instrument(skip(self))]
    async fn line_items(&self, receipt_id: i64) -> Result<Vec<ReceiptLineItem>, StoreError> {
        let items = sqlx::query_as::<_, ReceiptLineItem>(
            r#"
            SELECT receipt_id, name, price, quantity, tax_rate, tax_amount,
                   payment_method, payment_object
            FROM receipt_items
            WHERE receipt_id = $1
            ORDER BY item_id
            "#,
        )
        .bind(receipt_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to load line items: {}", e)))?;

        Ok(items)
    }

    #[instrument(skip(self))]
    async fn mark_wait(&self, receipt_id: i64, external_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE receipts
            SET status = 'wait', external_id = $2, error_message = NULL
            WHERE receipt_id = $1
            "#,
        )
        .bind(receipt_id)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to mark receipt wait: {}", e)))?;

        info!(receipt_id, external_id, "Receipt marked wait");
        Ok(())
    }

    #[instrument(skip(self, fiscal))]
    async fn mark_success(
        &self,
        receipt_id: i64,
        external_id: &str,
        fiscal: &FiscalFields,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE receipts
            SET status = 'success', external_id = $2, error_message = NULL,
                fn_number = $3, fiscal_document_number = $4,
                fiscal_document_attribute = $5,
                receipt_date = $6, receipt_date_tz = $7
            WHERE receipt_id = $1
            "#,
        )
        .bind(receipt_id)
        .bind(external_id)
        .bind(&fiscal.fn_number)
        .bind(fiscal.fiscal_document_number)
        .bind(fiscal.fiscal_document_attribute)
        .bind(&fiscal.receipt_date)
        .bind(&fiscal.receipt_date_tz)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to mark receipt success: {}", e)))?;

        info!(receipt_id, external_id, "Receipt marked success");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_error(
        &self,
        receipt_id: i64,
        external_id: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE receipts
            SET status = 'error', external_id = $2, error_message = $3
            WHERE receipt_id = $1
            "#,
        )
        .bind(receipt_id)
        .bind(external_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow!("Failed to mark receipt error: {}", e)))?;

        info!(receipt_id, external_id, message, "Receipt marked error");
        Ok(())
    }
}
