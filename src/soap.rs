//! SOAP envelope construction and response navigation.
//!
//! AFIP's services speak SOAP 1.1 over HTTPS. Requests are small enough that
//! they are built with `format!` over an escaping helper; responses are
//! parsed with [`roxmltree`]. Response elements live in per-service default
//! namespaces, so navigation matches on *local* names only.

use roxmltree::{Document, Node};

use crate::error::{AfipError, Result};

/// SOAP 1.1 envelope namespace.
pub const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Escapes text for inclusion in XML element content or attribute values.
#[must_use]
pub fn escape_text(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wraps a body fragment in a SOAP 1.1 envelope.
///
/// The service namespace is bound to the `ar` prefix, which the body fragment
/// is expected to use for its elements.
#[must_use]
pub fn envelope(body: &str, service_ns: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{ENVELOPE_NS}" xmlns:ar="{service_ns}"><soapenv:Header/><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"#
    )
}

/// Finds the first descendant element with the given local name.
pub fn find_local<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.is_element() && n.tag_name().name() == local)
}

/// Returns the trimmed text of the first descendant element with the given
/// local name, if present and non-empty.
pub fn find_text<'a>(node: Node<'a, '_>, local: &str) -> Option<&'a str> {
    find_local(node, local)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Like [`find_text`] but fails with [`AfipError::Parse`] naming the missing
/// element.
pub fn required_text(node: Node<'_, '_>, local: &str) -> Result<String> {
    find_text(node, local)
        .map(str::to_owned)
        .ok_or_else(|| AfipError::Parse(format!("missing <{local}> element")))
}

/// A SOAP fault extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Fault code, e.g. `ns1:coe.alreadyAuthenticated`.
    pub code: String,
    /// Human-readable fault string, surfaced verbatim to the operator.
    pub message: String,
}

impl Fault {
    /// Returns `true` if either the code or the message mentions `needle`.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.code.contains(needle) || self.message.contains(needle)
    }
}

/// Extracts a SOAP fault from a parsed response, if one is present.
#[must_use]
pub fn extract_fault(doc: &Document<'_>) -> Option<Fault> {
    let fault = find_local(doc.root(), "Fault")?;
    let code = find_text(fault, "faultcode").unwrap_or("unknown").to_owned();
    let message = find_text(fault, "faultstring").unwrap_or("no fault string").to_owned();
    Some(Fault { code, message })
}

/// Parses a raw response body, mapping XML syntax errors to
/// [`AfipError::Parse`].
pub fn parse_document(raw: &str) -> Result<Document<'_>> {
    Document::parse(raw).map_err(|e| AfipError::Parse(format!("response is not well-formed XML: {e}")))
}
