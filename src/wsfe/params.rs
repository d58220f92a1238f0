//! Read-only queries against the authority's reference-data tables.
//!
//! Hosts refresh these to populate configuration screens (valid invoice
//! types, document kinds, currencies, VAT aliquots). Every table shares the
//! same record shape on the wire: `{Id, Desc, FchDesde, FchHasta}`, so one
//! parser serves all of them by matching on local element names.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument;

use crate::{
    config::MasterConfig,
    credentials::{CredentialCache, Credentials},
    error::{AfipError, Result},
    soap,
    transport::SoapClient,
    wsaa::AuthenticationClient,
    wsfe::WSFE_NS,
};

/// Reference tables the authority publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTable {
    /// Voucher types (`FEParamGetTiposCbte`).
    InvoiceTypes,
    /// Concept codes (`FEParamGetTiposConcepto`).
    Concepts,
    /// Buyer document types (`FEParamGetTiposDoc`).
    DocumentTypes,
    /// Currencies (`FEParamGetTiposMonedas`).
    Currencies,
    /// VAT aliquots (`FEParamGetTiposIva`).
    VatRates,
}

impl ParamTable {
    /// WSFE operation name for this table.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::InvoiceTypes => "FEParamGetTiposCbte",
            Self::Concepts => "FEParamGetTiposConcepto",
            Self::DocumentTypes => "FEParamGetTiposDoc",
            Self::Currencies => "FEParamGetTiposMonedas",
            Self::VatRates => "FEParamGetTiposIva",
        }
    }
}

/// One row of a reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRecord {
    /// Authority identifier; numeric for most tables, alphabetic for
    /// currencies.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// First day the entry is valid, if bounded.
    pub valid_from: Option<NaiveDate>,
    /// Last day the entry is valid; `None` while still open.
    pub valid_to: Option<NaiveDate>,
}

/// Client for the authority's parameter-query operations.
#[derive(Debug)]
pub struct ParamsClient {
    transport: Arc<SoapClient>,
    cache: Arc<CredentialCache>,
}

impl ParamsClient {
    /// Creates a client sharing the process transport and credential cache.
    #[must_use]
    pub fn new(transport: Arc<SoapClient>, cache: Arc<CredentialCache>) -> Self {
        Self { transport, cache }
    }

    /// Fetches one reference table, in the authority's order.
    ///
    /// # Errors
    ///
    /// [`AfipError::Transport`] on network/HTTP failures or authority error
    /// records, [`AfipError::Parse`] if the expected structure is missing,
    /// and authentication errors from the shared credential flight.
    #[instrument(skip(self, master), fields(table = ?table, cuit = master.cuit))]
    pub async fn fetch_parameter_table(
        &self,
        table: ParamTable,
        master: &Arc<MasterConfig>,
    ) -> Result<Vec<ParameterRecord>> {
        let credentials = self.credentials_for(master).await?;
        let operation = table.operation();

        let body = format!(
            "<ar:{operation}><ar:Auth><ar:Token>{}</ar:Token><ar:Sign>{}</ar:Sign><ar:Cuit>{}</ar:Cuit></ar:Auth></ar:{operation}>",
            soap::escape_text(&credentials.token),
            soap::escape_text(&credentials.sign),
            master.cuit,
        );
        let envelope = soap::envelope(&body, WSFE_NS);
        let action = format!("{WSFE_NS}{operation}");

        let raw = self.transport.post(master.mode.wsfe_endpoint(), &action, &envelope).await?;
        parse_parameter_table(&raw)
    }

    async fn credentials_for(&self, master: &Arc<MasterConfig>) -> Result<Credentials> {
        let transport = Arc::clone(&self.transport);
        let master_for_flight = Arc::clone(master);
        self.cache
            .get_or_authenticate(master.cache_key(), move || async move {
                AuthenticationClient::new(transport).authenticate(&master_for_flight).await
            })
            .await
    }
}

/// Wire dates use `yyyymmdd`; open-ended entries carry `NULL`.
fn optional_wire_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw {
        None | Some("NULL") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y%m%d")
            .map(Some)
            .map_err(|e| AfipError::Parse(format!("bad table date {text:?}: {e}"))),
    }
}

fn parse_parameter_table(raw: &str) -> Result<Vec<ParameterRecord>> {
    let doc = soap::parse_document(raw)?;

    if let Some(fault) = soap::extract_fault(&doc) {
        return Err(AfipError::Transport(format!(
            "parameter query fault {}: {}",
            fault.code, fault.message
        )));
    }
    if let Some(errors) = soap::find_local(doc.root(), "Errors") {
        let code = soap::find_text(errors, "Code").unwrap_or("unknown");
        let msg = soap::find_text(errors, "Msg").unwrap_or("no message");
        return Err(AfipError::Transport(format!("parameter query error {code}: {msg}")));
    }

    let result = soap::find_local(doc.root(), "ResultGet")
        .ok_or_else(|| AfipError::Parse("missing <ResultGet> element".to_owned()))?;

    let mut records = Vec::new();
    for node in result.children().filter(roxmltree::Node::is_element) {
        let id = soap::find_text(node, "Id")
            .ok_or_else(|| AfipError::Parse("table record missing <Id>".to_owned()))?;
        let description = soap::find_text(node, "Desc")
            .ok_or_else(|| AfipError::Parse("table record missing <Desc>".to_owned()))?;
        records.push(ParameterRecord {
            id: id.to_owned(),
            description: description.to_owned(),
            valid_from: optional_wire_date(soap::find_text(node, "FchDesde"))?,
            valid_to: optional_wire_date(soap::find_text(node, "FchHasta"))?,
        });
    }
    Ok(records)
}
