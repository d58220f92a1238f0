//! AFIP web-service client for point-of-sale electronic invoicing.
//!
//! Every completed sale must carry an authority-issued authorization code
//! (CAE) before it is fiscally valid. Obtaining one takes three cooperating
//! pieces: a signed login ticket from WSAA, a cached token/sign pair shared
//! across concurrent callers, and a `FECAESolicitar` submission to WSFEv1
//! whose per-voucher verdict is mapped to a closed outcome type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   Host application   │  persists invoices, mints voucher numbers
//! └──────────┬───────────┘
//!            │ request_authorization / fetch_parameter_table
//! ┌──────────▼───────────────────────────────────────┐
//! │             afip-ws (this crate)                 │
//! │  ┌──────────────────┐   ┌─────────────────────┐  │
//! │  │ InvoiceDispatcher│──►│   CredentialCache   │  │
//! │  │ ParamsClient     │   │ (single-flight WSAA │  │
//! │  └──────────────────┘   │ login per identity) │  │
//! │                         └──────────┬──────────┘  │
//! │                                    │ miss/expiry │
//! │                         ┌──────────▼──────────┐  │
//! │                         │AuthenticationClient │  │
//! │                         │ + CmsSigner (CMS)   │  │
//! │                         └─────────────────────┘  │
//! └──────────┬───────────────────────────────────────┘
//!            │ SOAP/XML over HTTPS
//! ┌──────────▼───────────┐
//! │  AFIP  WSAA / WSFEv1 │  sandbox or production per Mode
//! └──────────────────────┘
//! ```
//!
//! The hard part is ticket lifecycle under concurrency: WSAA tickets are
//! rate-limited to obtain and the authority rejects a login while a prior
//! ticket is still valid, so the cache guarantees at most one in-flight
//! authentication per (cuit, mode) and shares its result with every waiter.
//! When the process cache is lost while the authority still holds a live
//! ticket, [`CredentialCache::populate`] is the operator's recovery path.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use afip_ws::{
//!     CredentialCache, InvoiceDispatcher, MasterConfig, MasterConfigResolver, Mode, SoapClient,
//!     TenantConfig,
//!     wsfe::{BuyerDocument, Concept, Currency, InvoiceOutcome, InvoiceRequest, InvoiceType},
//! };
//! use chrono::NaiveDate;
//! use rust_decimal::Decimal;
//!
//! # async fn example() -> afip_ws::Result<()> {
//! // Composition root: one transport, one cache, one resolver.
//! let transport = Arc::new(SoapClient::new()?);
//! let cache = Arc::new(CredentialCache::new());
//! let master = MasterConfig::new(
//!     30111111118,
//!     Mode::Sandbox,
//!     std::fs::read("afip.crt").expect("certificate"),
//!     std::fs::read("afip.key").expect("private key"),
//! );
//! let resolver = Arc::new(MasterConfigResolver::new(master));
//! let dispatcher = InvoiceDispatcher::new(transport, cache, resolver);
//!
//! let tenant = TenantConfig {
//!     cuit: 20222222223,
//!     point_of_sale: 4,
//!     default_invoice_type: InvoiceType::B,
//!     enabled: true,
//! };
//! let request = InvoiceRequest {
//!     invoice_type: InvoiceType::B,
//!     concept: Concept::Products,
//!     voucher_number: 42, // host-assigned, strictly sequential per point of sale
//!     issue_date: NaiveDate::from_ymd_opt(2025, 5, 14).unwrap(),
//!     buyer: BuyerDocument::final_consumer(),
//!     total: Decimal::new(121_00, 2),
//!     non_taxed: Decimal::ZERO,
//!     net: Decimal::new(100_00, 2),
//!     exempt: Decimal::ZERO,
//!     vat_total: Decimal::new(21_00, 2),
//!     tributes: Decimal::ZERO,
//!     vat_lines: vec![],
//!     currency: Currency::pesos(),
//!     service_period: None,
//! };
//!
//! match dispatcher.request_authorization(&request, &tenant).await? {
//!     InvoiceOutcome::Approved { code, code_expiration } => {
//!         println!("CAE {code}, valid until {code_expiration}");
//!     }
//!     InvoiceOutcome::Rejected { reason, authority_error_code } => {
//!         eprintln!("rejected ({authority_error_code}): {reason}");
//!     }
//!     InvoiceOutcome::TransportFailure { cause } => {
//!         eprintln!("pending, host may retry: {cause}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod soap;
pub mod transport;
pub mod wsaa;
pub mod wsfe;

pub use config::{MasterConfig, MasterConfigResolver, Mode, TenantConfig};
pub use credentials::{CacheKey, CredentialCache, Credentials};
pub use error::{AfipError, AuthError, Result};
pub use transport::{HttpConfig, SoapClient};
pub use wsaa::{AuthenticationClient, CmsSigner};
pub use wsfe::{InvoiceDispatcher, InvoiceOutcome, ParamsClient};
