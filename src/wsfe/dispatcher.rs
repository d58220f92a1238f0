//! Invoice authorization dispatch.
//!
//! Builds and submits `FECAESolicitar`, parses the per-voucher verdict, and
//! maps it into [`InvoiceOutcome`]. Also exposes the read-only companions a
//! host needs around submission: the last authorized voucher number per point
//! of sale (`FECompUltimoAutorizado`) and the service health probe
//! (`FEDummy`).

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use roxmltree::Node;
use tracing::{info, instrument, warn};

use crate::{
    config::{MasterConfig, MasterConfigResolver, TenantConfig},
    credentials::{CredentialCache, Credentials},
    error::{AfipError, Result},
    soap,
    transport::SoapClient,
    wsaa::AuthenticationClient,
    wsfe::{WSFE_NS, invoice::InvoiceRequest, outcome::InvoiceOutcome},
};

/// WSFE error codes the authority uses for credential problems (invalid or
/// expired token/sign, identity not authorized for the service). These mean
/// the invoice was never fiscally evaluated.
const AUTH_ERROR_CODES: std::ops::RangeInclusive<u32> = 600..=602;

/// Health of the authority's application, database, and authentication
/// servers as reported by `FEDummy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Application server state, `OK` when healthy.
    pub app_server: String,
    /// Database server state.
    pub db_server: String,
    /// Authentication server state.
    pub auth_server: String,
}

impl ServiceStatus {
    /// Returns `true` when all three servers report `OK`.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.app_server == "OK" && self.db_server == "OK" && self.auth_server == "OK"
    }
}

/// Internal parse result: either a fiscal verdict or a credential rejection
/// that must trigger cache invalidation.
#[derive(Debug)]
enum CaeResponse {
    Outcome(InvoiceOutcome),
    AuthRejected { code: String, message: String },
}

/// Submits invoices for authorization on behalf of tenants.
#[derive(Debug)]
pub struct InvoiceDispatcher {
    transport: Arc<SoapClient>,
    cache: Arc<CredentialCache>,
    resolver: Arc<MasterConfigResolver>,
}

impl InvoiceDispatcher {
    /// Creates a dispatcher sharing the process transport, credential cache,
    /// and identity resolver.
    #[must_use]
    pub fn new(
        transport: Arc<SoapClient>,
        cache: Arc<CredentialCache>,
        resolver: Arc<MasterConfigResolver>,
    ) -> Self {
        Self { transport, cache, resolver }
    }

    /// Requests fiscal authorization for one voucher.
    ///
    /// The host calls this after persisting a draft invoice and obtaining the
    /// voucher number. On `Approved` it persists the code and expiration; on
    /// `Rejected` it marks the invoice rejected and surfaces the authority's
    /// message; on `TransportFailure` it leaves the invoice pending and
    /// decides itself whether to resubmit with the same number.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::InvalidRequest`] only for local precondition
    /// violations (wire-format constraints, disabled tenant) detected before
    /// anything is sent. Every failure after the submission decision is
    /// folded into [`InvoiceOutcome::TransportFailure`] so the host's outcome
    /// handling stays exhaustive.
    #[instrument(
        skip(self, request),
        fields(
            tenant_cuit = tenant.cuit,
            point_of_sale = tenant.point_of_sale,
            voucher = request.voucher_number,
            invoice_type = ?request.invoice_type,
        )
    )]
    pub async fn request_authorization(
        &self,
        request: &InvoiceRequest,
        tenant: &TenantConfig,
    ) -> Result<InvoiceOutcome> {
        request.validate_wire(tenant)?;
        let master = self.resolver.resolve(tenant)?;

        let credentials = match self.credentials_for(&master).await {
            Ok(credentials) => credentials,
            Err(cause) => return Ok(InvoiceOutcome::TransportFailure { cause }),
        };

        let body = build_cae_request(&credentials, tenant, request);
        let envelope = soap::envelope(&body, WSFE_NS);
        let action = format!("{WSFE_NS}FECAESolicitar");

        let raw = match self.transport.post(master.mode.wsfe_endpoint(), &action, &envelope).await {
            Ok(raw) => raw,
            Err(cause) => return Ok(InvoiceOutcome::TransportFailure { cause }),
        };

        Ok(self.settle_response(&master, parse_cae_response(&raw)))
    }

    /// Folds a parsed submission response into the final outcome, applying
    /// the one automatic side effect: a credential rejection evicts the
    /// cached ticket so the next attempt re-authenticates.
    fn settle_response(
        &self,
        master: &MasterConfig,
        parsed: Result<CaeResponse>,
    ) -> InvoiceOutcome {
        match parsed {
            Ok(CaeResponse::Outcome(outcome)) => {
                if let InvoiceOutcome::Approved { code, .. } = &outcome {
                    info!(cae = %code, "voucher authorized");
                }
                outcome
            }
            Ok(CaeResponse::AuthRejected { code, message }) => {
                // The invoice was not fiscally evaluated: drop the rejected
                // token so the next attempt re-authenticates, and report a
                // transport failure rather than a rejection.
                warn!(error_code = %code, "authority rejected credentials; invalidating cache entry");
                self.cache.invalidate(&master.cache_key());
                InvoiceOutcome::TransportFailure {
                    cause: AfipError::Transport(format!(
                        "authority rejected credentials ({code}): {message}"
                    )),
                }
            }
            Err(cause) => InvoiceOutcome::TransportFailure { cause },
        }
    }

    /// Returns the last voucher number the authority authorized for a point
    /// of sale and invoice type.
    ///
    /// This is the host's input for gap-free sequencing; this crate itself
    /// never mints voucher numbers.
    ///
    /// # Errors
    ///
    /// Transport, authentication, or parse failures; also
    /// [`AfipError::Transport`] when the authority answers with error
    /// records.
    #[instrument(skip(self, tenant), fields(tenant_cuit = tenant.cuit, point_of_sale = tenant.point_of_sale))]
    pub async fn last_authorized_voucher(
        &self,
        invoice_type: crate::wsfe::invoice::InvoiceType,
        tenant: &TenantConfig,
    ) -> Result<u64> {
        let master = self.resolver.resolve(tenant)?;
        let credentials = self.credentials_for(&master).await?;

        let body = format!(
            "<ar:FECompUltimoAutorizado>{}<ar:PtoVta>{}</ar:PtoVta><ar:CbteTipo>{}</ar:CbteTipo></ar:FECompUltimoAutorizado>",
            auth_block(&credentials, tenant.cuit),
            tenant.point_of_sale,
            invoice_type.code(),
        );
        let envelope = soap::envelope(&body, WSFE_NS);
        let action = format!("{WSFE_NS}FECompUltimoAutorizado");

        let raw = self.transport.post(master.mode.wsfe_endpoint(), &action, &envelope).await?;
        parse_last_authorized(&raw)
    }

    /// Probes the authority's service health. Requires no credentials.
    ///
    /// # Errors
    ///
    /// Transport or parse failures.
    #[instrument(skip(self))]
    pub async fn service_status(&self, master: &MasterConfig) -> Result<ServiceStatus> {
        let envelope = soap::envelope("<ar:FEDummy/>", WSFE_NS);
        let action = format!("{WSFE_NS}FEDummy");
        let raw = self.transport.post(master.mode.wsfe_endpoint(), &action, &envelope).await?;
        parse_dummy(&raw)
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

fn auth_block(credentials: &Credentials, cuit: u64) -> String {
    format!(
        "<ar:Auth><ar:Token>{}</ar:Token><ar:Sign>{}</ar:Sign><ar:Cuit>{}</ar:Cuit></ar:Auth>",
        soap::escape_text(&credentials.token),
        soap::escape_text(&credentials.sign),
        cuit,
    )
}

/// Builds the `FECAESolicitar` body for a single voucher.
fn build_cae_request(
    credentials: &Credentials,
    tenant: &TenantConfig,
    request: &InvoiceRequest,
) -> String {
    let mut detail = String::new();
    let _ = write!(
        detail,
        "<ar:Concepto>{}</ar:Concepto><ar:DocTipo>{}</ar:DocTipo><ar:DocNro>{}</ar:DocNro>",
        request.concept.code(),
        request.buyer.kind.code(),
        request.buyer.number,
    );
    let _ = write!(
        detail,
        "<ar:CbteDesde>{n}</ar:CbteDesde><ar:CbteHasta>{n}</ar:CbteHasta><ar:CbteFch>{}</ar:CbteFch>",
        request.issue_date.format("%Y%m%d"),
        n = request.voucher_number,
    );
    let _ = write!(
        detail,
        "<ar:ImpTotal>{}</ar:ImpTotal><ar:ImpTotConc>{}</ar:ImpTotConc><ar:ImpNeto>{}</ar:ImpNeto><ar:ImpOpEx>{}</ar:ImpOpEx><ar:ImpTrib>{}</ar:ImpTrib><ar:ImpIVA>{}</ar:ImpIVA>",
        request.total,
        request.non_taxed,
        request.net,
        request.exempt,
        request.tributes,
        request.vat_total,
    );
    if let Some(period) = &request.service_period {
        let _ = write!(
            detail,
            "<ar:FchServDesde>{}</ar:FchServDesde><ar:FchServHasta>{}</ar:FchServHasta><ar:FchVtoPago>{}</ar:FchVtoPago>",
            period.from.format("%Y%m%d"),
            period.to.format("%Y%m%d"),
            period.payment_due.format("%Y%m%d"),
        );
    }
    let _ = write!(
        detail,
        "<ar:MonId>{}</ar:MonId><ar:MonCotiz>{}</ar:MonCotiz>",
        soap::escape_text(&request.currency.code),
        request.currency.rate,
    );
    if !request.vat_lines.is_empty() {
        detail.push_str("<ar:Iva>");
        for line in &request.vat_lines {
            let _ = write!(
                detail,
                "<ar:AlicIva><ar:Id>{}</ar:Id><ar:BaseImp>{}</ar:BaseImp><ar:Importe>{}</ar:Importe></ar:AlicIva>",
                line.rate_id, line.base, line.amount,
            );
        }
        detail.push_str("</ar:Iva>");
    }

    format!(
        "<ar:FECAESolicitar>{auth}<ar:FeCAEReq><ar:FeCabReq><ar:CantReg>1</ar:CantReg><ar:PtoVta>{pos}</ar:PtoVta><ar:CbteTipo>{ty}</ar:CbteTipo></ar:FeCabReq><ar:FeDetReq><ar:FECAEDetRequest>{detail}</ar:FECAEDetRequest></ar:FeDetReq></ar:FeCAEReq></ar:FECAESolicitar>",
        auth = auth_block(credentials, tenant.cuit),
        pos = tenant.point_of_sale,
        ty = request.invoice_type.code(),
    )
}

/// Collects `{Code, Msg}` pairs from every element named `tag` under `node`.
fn collect_coded_messages(node: Node<'_, '_>, tag: &str) -> Vec<(String, String)> {
    node.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == tag)
        .filter_map(|n| {
            let code = soap::find_text(n, "Code")?;
            let msg = soap::find_text(n, "Msg").unwrap_or("no message");
            Some((code.to_owned(), msg.to_owned()))
        })
        .collect()
}

fn wire_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map_err(|e| AfipError::Parse(format!("bad wire date {raw:?}: {e}")))
}

fn parse_cae_response(raw: &str) -> Result<CaeResponse> {
    let doc = soap::parse_document(raw)?;

    if let Some(fault) = soap::extract_fault(&doc) {
        return Err(AfipError::Transport(format!(
            "WSFE fault {}: {}",
            fault.code, fault.message
        )));
    }

    // Request-level errors: the voucher was not evaluated.
    if let Some(errors) = soap::find_local(doc.root(), "Errors") {
        let coded = collect_coded_messages(errors, "Err");
        if let Some((code, message)) = coded
            .iter()
            .find(|(code, _)| code.parse::<u32>().is_ok_and(|c| AUTH_ERROR_CODES.contains(&c)))
        {
            return Ok(CaeResponse::AuthRejected { code: code.clone(), message: message.clone() });
        }
        if let Some((first_code, _)) = coded.first() {
            let reason = coded
                .iter()
                .map(|(code, msg)| format!("{code}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(CaeResponse::Outcome(InvoiceOutcome::Rejected {
                reason,
                authority_error_code: first_code.clone(),
            }));
        }
    }

    let det = soap::find_local(doc.root(), "FECAEDetResponse")
        .ok_or_else(|| AfipError::Parse("missing <FECAEDetResponse>".to_owned()))?;
    let result = soap::required_text(det, "Resultado")?;

    match result.as_str() {
        "A" => {
            // Observations on an approved voucher do not demote the outcome.
            for (code, msg) in collect_coded_messages(det, "Obs") {
                warn!(obs_code = %code, obs_msg = %msg, "voucher approved with observation");
            }
            let code = soap::required_text(det, "CAE")?;
            let expiration = soap::required_text(det, "CAEFchVto")?;
            Ok(CaeResponse::Outcome(InvoiceOutcome::Approved {
                code,
                code_expiration: wire_date(&expiration)?,
            }))
        }
        "R" => {
            let observations = collect_coded_messages(det, "Obs");
            let authority_error_code = observations
                .first()
                .map_or_else(|| "unknown".to_owned(), |(code, _)| code.clone());
            let reason = if observations.is_empty() {
                "voucher rejected without observations".to_owned()
            } else {
                observations
                    .iter()
                    .map(|(code, msg)| format!("{code}: {msg}"))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            Ok(CaeResponse::Outcome(InvoiceOutcome::Rejected { reason, authority_error_code }))
        }
        other => Err(AfipError::Parse(format!("unknown voucher result {other:?}"))),
    }
}

fn parse_last_authorized(raw: &str) -> Result<u64> {
    let doc = soap::parse_document(raw)?;
    if let Some(errors) = soap::find_local(doc.root(), "Errors") {
        let coded = collect_coded_messages(errors, "Err");
        if let Some((code, msg)) = coded.first() {
            return Err(AfipError::Transport(format!(
                "FECompUltimoAutorizado error {code}: {msg}"
            )));
        }
    }
    let number = soap::required_text(doc.root(), "CbteNro")?;
    number
        .parse()
        .map_err(|e| AfipError::Parse(format!("bad voucher number {number:?}: {e}")))
}

fn parse_dummy(raw: &str) -> Result<ServiceStatus> {
    let doc = soap::parse_document(raw)?;
    Ok(ServiceStatus {
        app_server: soap::required_text(doc.root(), "AppServer")?,
        db_server: soap::required_text(doc.root(), "DbServer")?,
        auth_server: soap::required_text(doc.root(), "AuthServer")?,
    })
}
