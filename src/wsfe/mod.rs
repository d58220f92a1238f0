//! WSFEv1: the authority's electronic invoicing service.
//!
//! The dispatcher submits one voucher per call (`FECAESolicitar`) and maps
//! the per-voucher result to a closed [`InvoiceOutcome`](outcome::InvoiceOutcome)
//! sum type; the params client reads the reference tables configuration
//! screens are built from.

pub mod dispatcher;
pub mod invoice;
pub mod outcome;
pub mod params;

pub use dispatcher::{InvoiceDispatcher, ServiceStatus};
pub use invoice::{
    BuyerDocument, Concept, Currency, DocumentKind, InvoiceRequest, InvoiceType, ServicePeriod,
    VatLine,
};
pub use outcome::InvoiceOutcome;
pub use params::{ParamTable, ParameterRecord, ParamsClient};

/// WSFEv1 SOAP namespace; also the SOAPAction prefix.
pub const WSFE_NS: &str = "http://ar.gov.afip.dif.FEV1/";
