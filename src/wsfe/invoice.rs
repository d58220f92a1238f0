//! Invoice request model and wire-format validation.
//!
//! Business-level consistency (amount arithmetic, tax breakdown) is validated
//! by the host before a request reaches this crate; only constraints the wire
//! format itself imposes are checked here.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    config::TenantConfig,
    error::{AfipError, Result},
};

/// Invoice letter, determining the voucher type code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    /// Factura A (between registered taxpayers).
    A,
    /// Factura B (to final consumers / exempt parties).
    B,
    /// Factura C (issued by monotributistas).
    C,
}

impl InvoiceType {
    /// WSFE voucher type code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::A => 1,
            Self::B => 6,
            Self::C => 11,
        }
    }

    /// Maps a wire code back to the letter, if recognized.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::A),
            6 => Some(Self::B),
            11 => Some(Self::C),
            _ => None,
        }
    }
}

/// What the invoice covers; service concepts require a service period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concept {
    /// Goods only.
    Products,
    /// Services only.
    Services,
    /// Mixed goods and services.
    ProductsAndServices,
}

impl Concept {
    /// WSFE concept code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Products => 1,
            Self::Services => 2,
            Self::ProductsAndServices => 3,
        }
    }
}

/// Buyer identification document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Registered taxpayer id.
    Cuit,
    /// Worker id.
    Cuil,
    /// National identity document.
    Dni,
    /// Anonymous final consumer.
    FinalConsumer,
}

impl DocumentKind {
    /// WSFE document type code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Cuit => 80,
            Self::Cuil => 86,
            Self::Dni => 96,
            Self::FinalConsumer => 99,
        }
    }
}

/// Buyer document as it appears on the voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerDocument {
    /// Document kind.
    pub kind: DocumentKind,
    /// Document number; zero for an anonymous final consumer.
    pub number: u64,
}

impl BuyerDocument {
    /// Anonymous final consumer (document number 0).
    #[must_use]
    pub const fn final_consumer() -> Self {
        Self { kind: DocumentKind::FinalConsumer, number: 0 }
    }
}

/// One VAT aliquot line of the voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatLine {
    /// Aliquot id from the authority's VAT-rate table (e.g. 5 for 21%).
    pub rate_id: u32,
    /// Taxable base for this aliquot.
    pub base: Decimal,
    /// VAT amount for this aliquot.
    pub amount: Decimal,
}

/// Invoice currency and its exchange rate against the peso.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    /// Authority currency code, 3 characters (e.g. `PES`, `DOL`).
    pub code: String,
    /// Exchange rate; 1 for pesos.
    pub rate: Decimal,
}

impl Currency {
    /// Argentine pesos at rate 1.
    #[must_use]
    pub fn pesos() -> Self {
        Self { code: "PES".to_owned(), rate: Decimal::ONE }
    }
}

/// Billing period for service concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePeriod {
    /// First day covered.
    pub from: NaiveDate,
    /// Last day covered.
    pub to: NaiveDate,
    /// Payment due date.
    pub payment_due: NaiveDate,
}

/// A single voucher to submit for authorization.
///
/// The voucher number is obtained beforehand by the host; strict, gap-free,
/// per-point-of-sale sequencing is the host's responsibility and this crate
/// never mints numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    /// Invoice letter.
    pub invoice_type: InvoiceType,
    /// Concept covered.
    pub concept: Concept,
    /// Host-assigned voucher number, ≥ 1.
    pub voucher_number: u64,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Buyer identification.
    pub buyer: BuyerDocument,
    /// Grand total.
    pub total: Decimal,
    /// Net amount not subject to VAT.
    pub non_taxed: Decimal,
    /// Taxed net amount.
    pub net: Decimal,
    /// VAT-exempt amount.
    pub exempt: Decimal,
    /// Total VAT.
    pub vat_total: Decimal,
    /// Other tributes.
    pub tributes: Decimal,
    /// VAT breakdown by aliquot.
    pub vat_lines: Vec<VatLine>,
    /// Currency and exchange rate.
    pub currency: Currency,
    /// Required when `concept` involves services.
    pub service_period: Option<ServicePeriod>,
}

impl InvoiceRequest {
    /// Checks wire-format constraints only.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::InvalidRequest`] on a non-positive point of sale
    /// or voucher number, a missing service period for a service concept, or
    /// a malformed currency code. Any violation is a host bug; nothing is
    /// sent to the authority.
    pub fn validate_wire(&self, tenant: &TenantConfig) -> Result<()> {
        if tenant.point_of_sale == 0 {
            return Err(AfipError::InvalidRequest(
                "point of sale must be a positive registered number".to_owned(),
            ));
        }
        if self.voucher_number == 0 {
            return Err(AfipError::InvalidRequest("voucher number must be >= 1".to_owned()));
        }
        if self.concept != Concept::Products && self.service_period.is_none() {
            return Err(AfipError::InvalidRequest(
                "service concepts require a service period".to_owned(),
            ));
        }
        if self.currency.code.len() != 3 || !self.currency.code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AfipError::InvalidRequest(format!(
                "currency code must be 3 alphanumeric characters, got {:?}",
                self.currency.code
            )));
        }
        Ok(())
    }
}
