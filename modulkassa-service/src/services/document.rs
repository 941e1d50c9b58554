//! Fiscal document assembly.
//!
//! Builds the submission payload from a billing receipt and its line items.
//! Documents are constructed fresh on every send attempt; idempotency is
//! provided by the stable document id, not by caching the payload.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Receipt, ReceiptLineItem};
use crate::services::classifier::{
    self, ClassifierConfig, ClassifyError, PaymentMethod, PaymentObject, VatTag,
};

#[derive(Debug, Error)]
pub enum BuildError {
    /// Terminal for the receipt; the operator has to fix the positions.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// The receipt carries a type code outside the fiscal vocabulary.
    #[error("unknown receipt type code {0}")]
    UnknownDocType(i32),
}

/// Payment types accepted by the fiscalization service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Cash,
    Card,
    Prepaid,
    Postpay,
    // Billing keeps code 4 as "provision"; the service only accepts OTHER.
    Other,
}

impl PaymentType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Cash),
            1 => Some(Self::Card),
            2 => Some(Self::Prepaid),
            3 => Some(Self::Postpay),
            4 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Fiscal document submitted to the external service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub doc_num: String,
    pub doc_type: String,
    pub checkout_date_time: String,
    pub email: Option<String>,
    pub invent_positions: Vec<InventPosition>,
    pub money_positions: Vec<MoneyPosition>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventPosition {
    pub name: String,
    pub price: f64,
    pub quantity: i32,
    pub vat_tag: VatTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_sum: Option<f64>,
    pub payment_method: PaymentMethod,
    pub payment_object: PaymentObject,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyPosition {
    pub payment_type: PaymentType,
    pub sum: f64,
}

/// Assembles the fiscal document for one receipt.
///
/// The document id is stable across rebuilds (`Receipt::external_doc_id`);
/// the document number embeds a fresh token so two builds never collide.
pub fn build_document(
    receipt: &Receipt,
    items: &[ReceiptLineItem],
    cfg: &ClassifierConfig,
) -> Result<Document, BuildError> {
    let doc_type = receipt
        .doc_type()
        .ok_or(BuildError::UnknownDocType(receipt.receipt_type))?
        .wire_name();

    let mut positions = Vec::with_capacity(items.len());
    for item in items {
        let vat = classifier::classify_vat(item, cfg)?;
        positions.push(InventPosition {
            name: item.name.trim().to_string(),
            price: item.price.to_f64().unwrap_or(0.0),
            quantity: item.quantity,
            vat_tag: vat.tag,
            vat_sum: vat.sum.and_then(|s| s.to_f64()),
            payment_method: classifier::resolve_payment_method(receipt, item, cfg),
            payment_object: classifier::resolve_payment_object(receipt, item, cfg),
        });
    }

    Ok(Document {
        id: receipt.external_doc_id(),
        doc_num: generate_doc_num(doc_type, receipt.created_at),
        doc_type: doc_type.to_string(),
        checkout_date_time: apply_server_tz(receipt.created_at).to_rfc3339(),
        email: receipt.email.clone(),
        invent_positions: positions,
        money_positions: vec![MoneyPosition {
            payment_type: resolve_payment_type(receipt),
            sum: receipt.amount.to_f64().unwrap_or(0.0),
        }],
    })
}

fn generate_doc_num(doc_type: &str, created_at: NaiveDateTime) -> String {
    format!(
        "{}-{}_{}_{}",
        doc_type,
        created_at.format("%Y%m%d"),
        created_at.format("%H%M%S"),
        Uuid::new_v4()
    )
}

/// Interprets a naive billing timestamp in the server's local timezone at
/// that instant, so the offset tracks DST via the local calendar. Ambiguous
/// or skipped local times resolve to the earliest mapping.
pub fn apply_server_tz(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.fixed_offset(),
        None => Utc.from_utc_datetime(&naive).fixed_offset(),
    }
}

fn resolve_payment_type(receipt: &Receipt) -> PaymentType {
    match receipt.payment_type.and_then(PaymentType::from_code) {
        Some(payment_type) => payment_type,
        None if receipt.is_expense => PaymentType::Prepaid,
        None => PaymentType::Card,
    }
}
