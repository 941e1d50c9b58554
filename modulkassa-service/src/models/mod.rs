//! Domain models for modulkassa-service.

#![allow(clippy::should_implement_trait)]

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::FromRow;

/// Billing-side receipt lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    New,
    Prepare,
    Wait,
    Success,
    Error,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Prepare => "prepare",
            Self::Wait => "wait",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "prepare" => Some(Self::Prepare),
            "wait" => Some(Self::Wait),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Fiscal document type carried on the receipt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Sale,
    Return,
    SaleCorrection,
    Buy,
    BuyReturn,
    BuyCorrection,
}

impl DocType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Sale),
            1 => Some(Self::Return),
            2 => Some(Self::SaleCorrection),
            3 => Some(Self::Buy),
            4 => Some(Self::BuyReturn),
            5 => Some(Self::BuyCorrection),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Return => "RETURN",
            Self::SaleCorrection => "SALE_CORRECTION",
            Self::Buy => "BUY",
            Self::BuyReturn => "BUY_RETURN",
            Self::BuyCorrection => "BUY_CORRECTION",
        }
    }
}

/// Billing receipt, owned by the panel; this service only moves its status
/// and fiscal fields.
#[derive(Debug, Clone, FromRow)]
pub struct Receipt {
    pub id: i64,
    pub payment_id: Option<i64>,
    pub register_id: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub amount: Decimal,
    pub currency: String,
    pub email: Option<String>,
    pub internal_id: Option<String>,
    pub external_id: Option<String>,
    pub fn_number: Option<String>,
    pub fiscal_document_number: Option<i64>,
    pub fiscal_document_attribute: Option<i64>,
    pub receipt_date: Option<String>,
    pub receipt_date_tz: Option<String>,
    pub error_message: Option<String>,
    pub is_expense: bool,
    pub receipt_type: i32,
    pub payment_type: Option<i32>,
    pub bill_order: Option<i64>,
}

impl Receipt {
    /// Identifier correlating this receipt with its fiscal document.
    ///
    /// Stable across document rebuilds: the internal-id override when
    /// present, otherwise the receipt's own id. Retries therefore always
    /// target the same document on the service side.
    pub fn external_doc_id(&self) -> String {
        match &self.internal_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.id.to_string(),
        }
    }

    /// `None` means the status column holds a value this build does not
    /// recognize; such receipts never re-enter a pass.
    pub fn status(&self) -> Option<ReceiptStatus> {
        ReceiptStatus::from_str(&self.status)
    }

    pub fn doc_type(&self) -> Option<DocType> {
        DocType::from_code(self.receipt_type)
    }
}

/// Receipt position from the billing catalog. Read-only to this service.
#[derive(Debug, Clone, FromRow)]
pub struct ReceiptLineItem {
    pub receipt_id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub tax_rate: Option<i32>,
    pub tax_amount: Option<Decimal>,
    pub payment_method: Option<i32>,
    pub payment_object: Option<i32>,
}

/// Fiscal metadata persisted on a successful transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiscalFields {
    pub fn_number: Option<String>,
    pub fiscal_document_number: Option<i64>,
    pub fiscal_document_attribute: Option<i64>,
    pub receipt_date: Option<String>,
    pub receipt_date_tz: Option<String>,
}
