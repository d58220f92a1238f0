//! Error types for the AFIP web-service client.
//!
//! All errors implement the standard [`std::error::Error`] trait via
//! [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Signing** ([`AfipError::Signing`]): certificate/key material problems.
//!   Fatal until an operator replaces the material; never worth retrying.
//! - **Authentication** ([`AfipError::Auth`]): WSAA login failures, split into
//!   [`AuthError::Transient`] (retryable) and [`AuthError::AlreadyAuthenticated`]
//!   (the authority holds a live ticket it will not re-issue; recover via
//!   [`CredentialCache::populate`](crate::credentials::CredentialCache::populate)
//!   or wait for natural expiry).
//! - **Transport** ([`AfipError::Transport`]): network errors, timeouts, and
//!   non-success HTTP statuses on any call. Retryable by the host; this crate
//!   never retries a submission on its own because a blind resubmit risks
//!   reusing a voucher number.
//! - **Parse** ([`AfipError::Parse`]): the authority answered with XML this
//!   crate cannot interpret.
//! - **InvalidRequest** ([`AfipError::InvalidRequest`]): a wire-format
//!   constraint was violated before anything was sent. Indicates a host bug.
//!
//! A fiscal rejection is *not* an error: the authority evaluated the invoice
//! and declined it, which is reported as
//! [`InvoiceOutcome::Rejected`](crate::wsfe::outcome::InvoiceOutcome).
//!
//! # Examples
//!
//! ```
//! use afip_ws::error::{AfipError, AuthError};
//!
//! let err = AfipError::Auth(AuthError::Transient("connection reset".to_owned()));
//! assert!(err.is_retryable());
//!
//! let err = AfipError::Signing("certificate does not match private key".to_owned());
//! assert!(!err.is_retryable());
//! ```

use thiserror::Error;

/// Result type alias for AFIP client operations.
pub type Result<T> = std::result::Result<T, AfipError>;

/// WSAA authentication failures.
///
/// Kept separate from [`AfipError`] so callers can match on the two recovery
/// paths without string inspection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The login call failed for a reason that may clear on its own
    /// (network error, timeout, or a fault other than a duplicate login).
    #[error("transient authentication failure: {0}")]
    Transient(String),

    /// The authority rejected the login because a previously issued ticket is
    /// still valid for this identity. The authority does not return the live
    /// ticket on this fault, so recovery requires manually populating the
    /// cache with a value recorded out of band, or waiting for the prior
    /// ticket's natural expiry.
    #[error("authority already holds a valid ticket: {0}")]
    AlreadyAuthenticated(String),
}

/// Errors produced by this crate.
///
/// All variants carry owned strings so the type is `Clone`: the credential
/// cache shares one in-flight authentication result, success or failure, with
/// every caller that attached to it.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AfipError {
    /// Certificate or private-key material is malformed or mismatched.
    #[error("certificate signing failed: {0}")]
    Signing(String),

    /// WSAA login failed. See [`AuthError`] for the split.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Network error, timeout, or non-success HTTP status.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The authority's response XML is missing expected structure.
    #[error("malformed authority response: {0}")]
    Parse(String),

    /// A wire-format precondition was violated before submission.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AfipError {
    /// Returns `true` if the host may reasonably retry the failed operation.
    ///
    /// Retrying an invoice submission is still the host's decision: it must
    /// decide whether to reuse the same voucher number.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Auth(AuthError::Transient(_)) => true,
            Self::Signing(_)
            | Self::Auth(AuthError::AlreadyAuthenticated(_))
            | Self::Parse(_)
            | Self::InvalidRequest(_) => false,
        }
    }
}
