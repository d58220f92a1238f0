//! WSAA: the authority's authentication service.
//!
//! Obtaining credentials is a three-step dance: build a login ticket request
//! (TRA) with a fresh timestamp window, CMS-sign it with the taxpayer's
//! certificate, and post it to the login endpoint. The response carries the
//! `token`/`sign` pair business calls embed in their `Auth` blocks.

pub mod client;
pub mod signer;

pub use client::AuthenticationClient;
pub use signer::CmsSigner;

/// Service name the login ticket request asks access for.
pub const SERVICE: &str = "wsfe";

/// WSAA SOAP namespace.
pub const WSAA_NS: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";
