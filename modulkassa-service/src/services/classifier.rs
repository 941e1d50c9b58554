//! Tax and payment classification.
//!
//! Pure mapping from billing-side tax/payment codes to the fiscal vocabulary
//! the external service accepts. No I/O: everything is a function of the
//! receipt, the line item and the register's classifier settings.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Receipt, ReceiptLineItem};

/// Register-level classification settings, passed in explicitly instead of
/// being read from process-global configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierConfig {
    pub convert_invalid_rate_to_none_rate: bool,
    pub default_payment_method: Option<i32>,
    pub default_payment_object: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error(
        "invalid tax rate {rate:?} for position '{position}'; supported rates: 0, 10, 20, 110, 120"
    )]
    InvalidTaxRate {
        rate: Option<i32>,
        position: String,
    },
}

/// VAT tags of the external service. Serialized as the numeric wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VatTag {
    Percent20,
    Percent10,
    Percent0,
    NoNds,
    Percent20_120,
    Percent10_110,
}

impl VatTag {
    pub fn code(&self) -> u16 {
        match self {
            Self::Percent20 => 1102,
            Self::Percent10 => 1103,
            Self::Percent0 => 1104,
            Self::NoNds => 1105,
            Self::Percent20_120 => 1106,
            Self::Percent10_110 => 1107,
        }
    }
}

impl Serialize for VatTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

/// Payment methods of the external service (external codes 1..=7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    FullPrepayment,
    Prepayment,
    Advance,
    FullPayment,
    PartialPayment,
    Credit,
    CreditPayment,
}

impl PaymentMethod {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::FullPrepayment),
            2 => Some(Self::Prepayment),
            3 => Some(Self::Advance),
            4 => Some(Self::FullPayment),
            5 => Some(Self::PartialPayment),
            6 => Some(Self::Credit),
            7 => Some(Self::CreditPayment),
            _ => None,
        }
    }
}

/// Payment objects of the external service (external codes 1..=13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentObject {
    Commodity,
    Excise,
    Job,
    Service,
    GamblingBet,
    GamblingPrize,
    Lottery,
    LotteryPrize,
    IntellectualActivity,
    Payment,
    AgentCommission,
    Composite,
    Another,
}

impl PaymentObject {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Commodity),
            2 => Some(Self::Excise),
            3 => Some(Self::Job),
            4 => Some(Self::Service),
            5 => Some(Self::GamblingBet),
            6 => Some(Self::GamblingPrize),
            7 => Some(Self::Lottery),
            8 => Some(Self::LotteryPrize),
            9 => Some(Self::IntellectualActivity),
            10 => Some(Self::Payment),
            11 => Some(Self::AgentCommission),
            12 => Some(Self::Composite),
            13 => Some(Self::Another),
            _ => None,
        }
    }
}

/// Resolved VAT classification for one line item.
#[derive(Debug, Clone, PartialEq)]
pub struct VatClass {
    pub tag: VatTag,
    /// Omitted entirely on the no-tax fallback path.
    pub sum: Option<Decimal>,
}

/// Maps a billing tax-rate code to the external VAT tag and sum.
///
/// Unknown or NULL rates fail unless the register opted into the no-tax
/// fallback, which exists for legacy receipts that carry no classification.
pub fn classify_vat(
    item: &ReceiptLineItem,
    cfg: &ClassifierConfig,
) -> Result<VatClass, ClassifyError> {
    let tag = match item.tax_rate {
        Some(0) => Some(VatTag::NoNds),
        Some(10) => Some(VatTag::Percent10),
        Some(20) => Some(VatTag::Percent20),
        Some(110) => Some(VatTag::Percent10_110),
        Some(120) => Some(VatTag::Percent20_120),
        _ => None,
    };

    match tag {
        Some(tag) => Ok(VatClass {
            tag,
            sum: Some(item.tax_amount.unwrap_or(Decimal::ZERO).round_dp(2)),
        }),
        None if cfg.convert_invalid_rate_to_none_rate => {
            tracing::info!(
                rate = ?item.tax_rate,
                position = %item.name,
                "unsupported tax rate, falling back to no-tax tag"
            );
            Ok(VatClass {
                tag: VatTag::NoNds,
                sum: None,
            })
        }
        None => Err(ClassifyError::InvalidTaxRate {
            rate: item.tax_rate,
            position: item.name.clone(),
        }),
    }
}

/// Resolves the payment method: operator override first (with a
/// `full_payment` fallback for unrecognized overrides), then the line item's
/// own code, then a bill-order heuristic.
pub fn resolve_payment_method(
    receipt: &Receipt,
    item: &ReceiptLineItem,
    cfg: &ClassifierConfig,
) -> PaymentMethod {
    if let Some(code) = cfg.default_payment_method {
        return PaymentMethod::from_code(code).unwrap_or_else(|| {
            tracing::info!(code, "unrecognized payment-method override, using full_payment");
            PaymentMethod::FullPayment
        });
    }

    if let Some(method) = item.payment_method.and_then(PaymentMethod::from_code) {
        return method;
    }

    if receipt.bill_order.is_none() {
        PaymentMethod::Advance
    } else {
        PaymentMethod::FullPayment
    }
}

/// Resolves the payment object with the same override-then-derive ladder.
/// An unrecognized override falls through to derivation rather than to a
/// fixed default.
pub fn resolve_payment_object(
    receipt: &Receipt,
    item: &ReceiptLineItem,
    cfg: &ClassifierConfig,
) -> PaymentObject {
    if let Some(code) = cfg.default_payment_object {
        match PaymentObject::from_code(code) {
            Some(object) => return object,
            None => tracing::info!(code, "unrecognized payment-object override"),
        }
    }

    if let Some(object) = item.payment_object.and_then(PaymentObject::from_code) {
        return object;
    }

    if receipt.bill_order.is_none() {
        PaymentObject::Payment
    } else {
        PaymentObject::Service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn receipt(bill_order: Option<i64>) -> Receipt {
        Receipt {
            id: 1,
            payment_id: Some(2),
            register_id: 1,
            status: "new".to_string(),
            created_at: NaiveDate::from_ymd_opt(2025, 1, 15)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            amount: Decimal::new(10000, 2),
            currency: "RUB".to_string(),
            email: None,
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
            bill_order,
        }
    }

    fn item(tax_rate: Option<i32>) -> ReceiptLineItem {
        ReceiptLineItem {
            receipt_id: 1,
            name: "Hosting plan".to_string(),
            price: Decimal::new(10000, 2),
            quantity: 1,
            tax_rate,
            tax_amount: Some(Decimal::new(2000, 2)),
            payment_method: None,
            payment_object: None,
        }
    }

    #[test]
    fn known_rates_map_to_fixed_tags() {
        let cfg = ClassifierConfig::default();
        let cases = [
            (0, VatTag::NoNds),
            (10, VatTag::Percent10),
            (20, VatTag::Percent20),
            (110, VatTag::Percent10_110),
            (120, VatTag::Percent20_120),
        ];
        for (rate, tag) in cases {
            let vat = classify_vat(&item(Some(rate)), &cfg).unwrap();
            assert_eq!(vat.tag, tag, "rate {rate}");
            assert_eq!(vat.sum, Some(Decimal::new(2000, 2)));
        }
    }

    #[test]
    fn unknown_rate_fails_without_fallback() {
        let cfg = ClassifierConfig::default();

        let err = classify_vat(&item(Some(18)), &cfg).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::InvalidTaxRate {
                rate: Some(18),
                position: "Hosting plan".to_string(),
            }
        );

        assert!(classify_vat(&item(None), &cfg).is_err());
    }

    #[test]
    fn fallback_maps_to_no_tax_and_omits_sum() {
        let cfg = ClassifierConfig {
            convert_invalid_rate_to_none_rate: true,
            ..Default::default()
        };

        let vat = classify_vat(&item(None), &cfg).unwrap();
        assert_eq!(vat.tag, VatTag::NoNds);
        assert_eq!(vat.sum, None);
    }

    #[test]
    fn recognized_zero_rate_still_carries_sum() {
        // Rate 0 is a recognized rate, not the fallback path.
        let cfg = ClassifierConfig {
            convert_invalid_rate_to_none_rate: true,
            ..Default::default()
        };
        let vat = classify_vat(&item(Some(0)), &cfg).unwrap();
        assert_eq!(vat.tag, VatTag::NoNds);
        assert_eq!(vat.sum, Some(Decimal::new(2000, 2)));
    }

    #[test]
    fn vat_sum_rounds_to_two_places() {
        let cfg = ClassifierConfig::default();
        let mut line = item(Some(20));
        line.tax_amount = Some(Decimal::new(19999, 3)); // 19.999

        let vat = classify_vat(&line, &cfg).unwrap();
        assert_eq!(vat.sum, Some(Decimal::new(2000, 2)));
    }

    #[test]
    fn payment_method_override_wins() {
        let cfg = ClassifierConfig {
            default_payment_method: Some(3),
            ..Default::default()
        };
        let method = resolve_payment_method(&receipt(Some(1)), &item(Some(20)), &cfg);
        assert_eq!(method, PaymentMethod::Advance);
    }

    #[test]
    fn unrecognized_method_override_falls_back_to_full_payment() {
        let cfg = ClassifierConfig {
            default_payment_method: Some(99),
            ..Default::default()
        };
        let method = resolve_payment_method(&receipt(None), &item(Some(20)), &cfg);
        assert_eq!(method, PaymentMethod::FullPayment);
    }

    #[test]
    fn payment_method_derives_from_item_then_bill_order() {
        let cfg = ClassifierConfig::default();

        let mut line = item(Some(20));
        line.payment_method = Some(6);
        assert_eq!(
            resolve_payment_method(&receipt(None), &line, &cfg),
            PaymentMethod::Credit
        );

        let line = item(Some(20));
        assert_eq!(
            resolve_payment_method(&receipt(None), &line, &cfg),
            PaymentMethod::Advance
        );
        assert_eq!(
            resolve_payment_method(&receipt(Some(5)), &line, &cfg),
            PaymentMethod::FullPayment
        );
    }

    #[test]
    fn unrecognized_object_override_falls_through_to_derivation() {
        let cfg = ClassifierConfig {
            default_payment_object: Some(99),
            ..Default::default()
        };

        let mut line = item(Some(20));
        line.payment_object = Some(1);
        assert_eq!(
            resolve_payment_object(&receipt(None), &line, &cfg),
            PaymentObject::Commodity
        );

        let line = item(Some(20));
        assert_eq!(
            resolve_payment_object(&receipt(None), &line, &cfg),
            PaymentObject::Payment
        );
        assert_eq!(
            resolve_payment_object(&receipt(Some(5)), &line, &cfg),
            PaymentObject::Service
        );
    }

    #[test]
    fn payment_object_override_wins_when_recognized() {
        let cfg = ClassifierConfig {
            default_payment_object: Some(4),
            ..Default::default()
        };
        assert_eq!(
            resolve_payment_object(&receipt(None), &item(Some(20)), &cfg),
            PaymentObject::Service
        );
    }

    #[test]
    fn wire_serialization() {
        assert_eq!(
            serde_json::to_string(&VatTag::Percent20).unwrap(),
            "1102"
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::FullPayment).unwrap(),
            "\"full_payment\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentObject::IntellectualActivity).unwrap(),
            "\"intellectual_activity\""
        );
    }
}
