//! Shared fixtures for reconciliation tests: an in-memory receipt store and
//! mock fiscalization endpoints.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use rust_decimal::Decimal;
use secrecy::Secret;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modulkassa_service::config::RegisterConfig;
use modulkassa_service::models::{FiscalFields, Receipt, ReceiptLineItem, ReceiptStatus};
use modulkassa_service::services::database::{ReceiptStore, StoreError};

pub fn register_config(base_url: &str) -> RegisterConfig {
    RegisterConfig {
        username: "merchant".to_string(),
        password: Secret::new("hunter2".to_string()),
        url: base_url.to_string(),
        retail_point_id: "rp-1".to_string(),
        convert_invalid_rate_to_none_rate: false,
        default_payment_method: None,
        default_payment_object: None,
    }
}

pub fn receipt(id: i64, status: ReceiptStatus, created_at: NaiveDateTime) -> Receipt {
    Receipt {
        id,
        payment_id: Some(id),
        register_id: 1,
        status: status.as_str().to_string(),
        created_at,
        amount: Decimal::new(10000, 2),
        currency: "RUB".to_string(),
        email: Some("customer@example.com".to_string()),
        internal_id: None,
        external_id: None,
        fn_number: None,
        fiscal_document_number: None,
        fiscal_document_attribute: None,
        receipt_date: None,
        receipt_date_tz: None,
        error_message: None,
        is_expense: false,
        receipt_type: 0,
        payment_type: None,
        bill_order: Some(1),
    }
}

pub fn recent() -> NaiveDateTime {
    Local::now().naive_local() - chrono::Duration::hours(1)
}

pub fn line_item(receipt_id: i64, tax_rate: Option<i32>) -> ReceiptLineItem {
    ReceiptLineItem {
        receipt_id,
        name: "Hosting plan".to_string(),
        price: Decimal::new(10000, 2),
        quantity: 1,
        tax_rate,
        tax_amount: Some(Decimal::new(2000, 2)),
        payment_method: None,
        payment_object: None,
    }
}

#[derive(Default)]
struct State {
    receipts: Vec<Receipt>,
    items: HashMap<i64, Vec<ReceiptLineItem>>,
}

/// In-memory stand-in for billing storage. Clones share state, so a test
/// keeps one handle for assertions while the engine owns another.
#[derive(Clone)]
pub struct InMemoryStore {
    config: RegisterConfig,
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new(config: RegisterConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn add_receipt(&self, receipt: Receipt, items: Vec<ReceiptLineItem>) {
        let mut state = self.state.lock().unwrap();
        state.items.insert(receipt.id, items);
        state.receipts.push(receipt);
    }

    pub fn receipt_by_id(&self, id: i64) -> Receipt {
        self.state
            .lock()
            .unwrap()
            .receipts
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .expect("receipt not found")
    }

    fn update<F: FnOnce(&mut Receipt)>(&self, id: i64, apply: F) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let receipt = state
            .receipts
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::Database(anyhow::anyhow!("receipt {} not found", id)))?;
        apply(receipt);
        Ok(())
    }
}

#[async_trait]
impl ReceiptStore for InMemoryStore {
    async fn register_config(&self, _register_id: i64) -> Result<RegisterConfig, StoreError> {
        Ok(self.config.clone())
    }

    async fn receipts_by_status(
        &self,
        register_id: i64,
        status: ReceiptStatus,
        created_since: NaiveDateTime,
    ) -> Result<Vec<Receipt>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .receipts
            .iter()
            .filter(|r| {
                r.register_id == register_id
                    && r.status == status.as_str()
                    && r.created_at >= created_since
            })
            .cloned()
            .collect())
    }

    async fn line_items(&self, receipt_id: i64) -> Result<Vec<ReceiptLineItem>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .get(&receipt_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_wait(&self, receipt_id: i64, external_id: &str) -> Result<(), StoreError> {
        self.update(receipt_id, |r| {
            r.status = "wait".to_string();
            r.external_id = Some(external_id.to_string());
            r.error_message = None;
        })
    }

    async fn mark_success(
        &self,
        receipt_id: i64,
        external_id: &str,
        fiscal: &FiscalFields,
    ) -> Result<(), StoreError> {
        let fiscal = fiscal.clone();
        self.update(receipt_id, move |r| {
            r.status = "success".to_string();
            r.external_id = Some(external_id.to_string());
            r.error_message = None;
            r.fn_number = fiscal.fn_number;
            r.fiscal_document_number = fiscal.fiscal_document_number;
            r.fiscal_document_attribute = fiscal.fiscal_document_attribute;
            r.receipt_date = fiscal.receipt_date;
            r.receipt_date_tz = fiscal.receipt_date_tz;
        })
    }

    async fn mark_error(
        &self,
        receipt_id: i64,
        external_id: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.update(receipt_id, |r| {
            r.status = "error".to_string();
            r.external_id = Some(external_id.to_string());
            r.error_message = Some(message.to_string());
        })
    }
}

/// Mounts a successful associate plus a readiness answer.
pub async fn mount_ready_service(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/associate/rp-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userName": "issued-user",
            "password": "issued-pass"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "READY" })),
        )
        .mount(server)
        .await;
}
