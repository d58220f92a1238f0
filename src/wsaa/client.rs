//! WSAA login: ticket request construction, submission, and response parsing.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    config::MasterConfig,
    credentials::Credentials,
    error::{AfipError, AuthError, Result},
    soap,
    transport::SoapClient,
    wsaa::{SERVICE, WSAA_NS, signer::CmsSigner},
};

/// Half-width of the TRA validity window. The authority tolerates moderate
/// clock skew as long as "now" falls inside
/// [generationTime, expirationTime].
const TRA_WINDOW_MINUTES: i64 = 10;

/// Stateless client for the authority's login service.
#[derive(Debug, Clone)]
pub struct AuthenticationClient {
    transport: Arc<SoapClient>,
}

impl AuthenticationClient {
    /// Creates a client sharing the process's HTTP transport.
    #[must_use]
    pub fn new(transport: Arc<SoapClient>) -> Self {
        Self { transport }
    }

    /// Obtains a fresh login ticket for the given signing identity.
    ///
    /// Builds a TRA with a fresh generation timestamp and a short validity
    /// window, CMS-signs it, posts it to the environment's login endpoint,
    /// and parses the ticket out of the response.
    ///
    /// # Errors
    ///
    /// - [`AfipError::Signing`] on bad certificate/key material.
    /// - [`AuthError::AlreadyAuthenticated`] when the authority reports a
    ///   still-valid prior ticket; the ticket's value is *not* returned on
    ///   this fault, so the caller must recover via manual cache population
    ///   or wait for natural expiry.
    /// - [`AuthError::Transient`] on network failures or any other fault.
    /// - [`AfipError::Parse`] if the response lacks the expected structure.
    #[instrument(skip(self, config), fields(cuit = config.cuit, mode = ?config.mode))]
    pub async fn authenticate(&self, config: &MasterConfig) -> Result<Credentials> {
        let signer = CmsSigner::from_config(config)?;
        let ticket_request = build_ticket_request(Utc::now(), SERVICE);
        let cms = signer.sign(ticket_request.as_bytes())?;

        let body = format!("<ar:loginCms><ar:in0>{cms}</ar:in0></ar:loginCms>");
        let request = soap::envelope(&body, WSAA_NS);

        let response = self
            .transport
            .post(config.mode.wsaa_endpoint(), "", &request)
            .await
            .map_err(|e| match e {
                AfipError::Transport(msg) => AfipError::Auth(AuthError::Transient(msg)),
                other => other,
            })?;

        let credentials = parse_login_response(&response)?;
        info!(expires_at = %credentials.expires_at, "obtained login ticket");
        Ok(credentials)
    }
}

/// Builds the `loginTicketRequest` (TRA) XML.
///
/// `uniqueId` only needs to differ between requests from the same identity;
/// unix seconds is what the authority's own examples use.
pub(crate) fn build_ticket_request(now: DateTime<Utc>, service: &str) -> String {
    let unique_id = now.timestamp();
    let generation = (now - Duration::minutes(TRA_WINDOW_MINUTES))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let expiration = (now + Duration::minutes(TRA_WINDOW_MINUTES))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><loginTicketRequest version="1.0"><header><uniqueId>{unique_id}</uniqueId><generationTime>{generation}</generationTime><expirationTime>{expiration}</expirationTime></header><service>{service}</service></loginTicketRequest>"#
    )
}

/// Parses the WSAA response into credentials, mapping faults to the error
/// taxonomy.
pub(crate) fn parse_login_response(raw: &str) -> Result<Credentials> {
    let doc = soap::parse_document(raw)?;

    if let Some(fault) = soap::extract_fault(&doc) {
        let detail = format!("{}: {}", fault.code, fault.message);
        if fault.mentions("alreadyAuthenticated") {
            warn!(fault = %detail, "authority reports a still-valid ticket for this identity");
            return Err(AuthError::AlreadyAuthenticated(detail).into());
        }
        return Err(AuthError::Transient(detail).into());
    }

    // loginCmsReturn carries an XML-escaped loginTicketResponse document;
    // the text node already has its entities resolved.
    let ticket_xml = soap::required_text(doc.root(), "loginCmsReturn")?;
    let ticket = soap::parse_document(&ticket_xml)?;

    let token = soap::required_text(ticket.root(), "token")?;
    let sign = soap::required_text(ticket.root(), "sign")?;
    let expiration = soap::required_text(ticket.root(), "expirationTime")?;
    let expires_at = DateTime::parse_from_rfc3339(&expiration)
        .map_err(|e| AfipError::Parse(format!("bad expirationTime {expiration:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(Credentials { token, sign, expires_at })
}
