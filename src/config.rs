//! Signing identity and environment configuration.
//!
//! [`MasterConfig`] is the identity this process authenticates *as* toward
//! the authority. Under a reseller setup it is shared by many tenants whose
//! own tax ids appear on the invoice bodies; [`MasterConfigResolver`] picks
//! the signing identity for a given tenant. All of it is immutable for the
//! process lifetime.

use std::{collections::HashMap, fmt, fs, path::Path, sync::Arc};

use serde::Deserialize;

use crate::{
    credentials::CacheKey,
    error::{AfipError, Result},
    wsfe::invoice::InvoiceType,
};

/// Target environment. Selects the authority's hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// AFIP homologation (testing) environment.
    Sandbox,
    /// AFIP production environment.
    Production,
}

impl Mode {
    /// WSAA login service endpoint for this environment.
    #[must_use]
    pub const fn wsaa_endpoint(self) -> &'static str {
        match self {
            Self::Sandbox => "https://wsaahomo.afip.gov.ar/ws/services/LoginCms",
            Self::Production => "https://wsaa.afip.gov.ar/ws/services/LoginCms",
        }
    }

    /// WSFEv1 invoicing service endpoint for this environment.
    #[must_use]
    pub const fn wsfe_endpoint(self) -> &'static str {
        match self {
            Self::Sandbox => "https://wswhomo.afip.gov.ar/wsfev1/service.asmx",
            Self::Production => "https://servicios1.afip.gov.ar/wsfev1/service.asmx",
        }
    }
}

/// The signing identity used toward the authority.
///
/// May be a shared master/reseller identity distinct from a tenant's own tax
/// id printed on the invoice. `Debug` redacts the key material.
#[derive(Clone)]
pub struct MasterConfig {
    /// Tax id (CUIT) of the signing identity, 11 digits.
    pub cuit: u64,
    /// Target environment.
    pub mode: Mode,
    /// X.509 certificate issued by the authority, PEM.
    pub certificate_pem: Vec<u8>,
    /// RSA private key matching the certificate, PEM.
    pub private_key_pem: Vec<u8>,
}

/// On-disk shape of [`MasterConfig`]: key material is referenced by path.
///
/// ```toml
/// cuit = 30111111118
/// mode = "sandbox"
/// certificate_path = "/etc/pos/afip.crt"
/// private_key_path = "/etc/pos/afip.key"
/// ```
#[derive(Debug, Deserialize)]
struct RawMasterConfig {
    cuit: u64,
    mode: Mode,
    certificate_path: String,
    private_key_path: String,
}

impl MasterConfig {
    /// Creates a config from in-memory PEM material.
    #[must_use]
    pub fn new(cuit: u64, mode: Mode, certificate_pem: Vec<u8>, private_key_pem: Vec<u8>) -> Self {
        Self { cuit, mode, certificate_pem, private_key_pem }
    }

    /// Parses TOML configuration and loads the referenced PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::InvalidRequest`] on malformed TOML or an invalid
    /// CUIT, and [`AfipError::Signing`] if a PEM file cannot be read.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let raw: RawMasterConfig = toml::from_str(toml_str)
            .map_err(|e| AfipError::InvalidRequest(format!("malformed master config: {e}")))?;
        let certificate_pem = read_pem(&raw.certificate_path)?;
        let private_key_pem = read_pem(&raw.private_key_path)?;
        let config = Self::new(raw.cuit, raw.mode, certificate_pem, private_key_pem);
        config.validate()?;
        Ok(config)
    }

    /// Checks structural constraints: an 11-digit CUIT and non-empty PEM
    /// material. Cryptographic validity is checked when the signer is built.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::InvalidRequest`] on violation.
    pub fn validate(&self) -> Result<()> {
        if !(10_000_000_000..=99_999_999_999).contains(&self.cuit) {
            return Err(AfipError::InvalidRequest(format!(
                "signing CUIT must have 11 digits, got {}",
                self.cuit
            )));
        }
        if self.certificate_pem.is_empty() || self.private_key_pem.is_empty() {
            return Err(AfipError::InvalidRequest("empty certificate or key material".to_owned()));
        }
        Ok(())
    }

    /// The credential-cache key for this identity.
    #[must_use]
    pub const fn cache_key(&self) -> CacheKey {
        CacheKey { cuit: self.cuit, mode: self.mode }
    }
}

impl fmt::Debug for MasterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterConfig")
            .field("cuit", &self.cuit)
            .field("mode", &self.mode)
            .field("certificate_pem", &"<redacted>")
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    fs::read(Path::new(path))
        .map_err(|e| AfipError::Signing(format!("cannot read PEM file {path}: {e}")))
}

/// Per-tenant invoicing settings, persisted by the host and read here.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    /// Tenant's own tax id, printed on the invoice body.
    pub cuit: u64,
    /// Registered point of sale scoping voucher numbering.
    pub point_of_sale: u32,
    /// Invoice type used when the host does not specify one.
    pub default_invoice_type: InvoiceType,
    /// Disabled tenants are rejected before any network work.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Resolves the operating signing identity for a tenant.
///
/// Holds the shared master identity plus optional per-tenant overrides for
/// tenants that invoice under their own certificate.
#[derive(Debug)]
pub struct MasterConfigResolver {
    shared: Arc<MasterConfig>,
    overrides: HashMap<u64, Arc<MasterConfig>>,
}

impl MasterConfigResolver {
    /// Creates a resolver around the shared master identity.
    #[must_use]
    pub fn new(shared: MasterConfig) -> Self {
        Self { shared: Arc::new(shared), overrides: HashMap::new() }
    }

    /// Registers a dedicated signing identity for one tenant.
    #[must_use]
    pub fn with_override(mut self, tenant_cuit: u64, config: MasterConfig) -> Self {
        self.overrides.insert(tenant_cuit, Arc::new(config));
        self
    }

    /// Picks the signing identity for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::InvalidRequest`] if the tenant is disabled.
    pub fn resolve(&self, tenant: &TenantConfig) -> Result<Arc<MasterConfig>> {
        if !tenant.enabled {
            return Err(AfipError::InvalidRequest(format!(
                "tenant {} is disabled for electronic invoicing",
                tenant.cuit
            )));
        }
        Ok(self
            .overrides
            .get(&tenant.cuit)
            .map_or_else(|| Arc::clone(&self.shared), Arc::clone))
    }
}
