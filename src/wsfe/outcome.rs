//! The closed outcome type for an authorization attempt.

use chrono::NaiveDate;

use crate::error::AfipError;

/// Result of submitting one voucher for authorization.
///
/// A closed sum type so every call site handles all three cases explicitly;
/// the host persists on `Approved`, surfaces the authority's message on
/// `Rejected`, and leaves the invoice pending for retry on
/// `TransportFailure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceOutcome {
    /// The authority issued an authorization code (CAE); the invoice is
    /// fiscally valid once the host persists it.
    Approved {
        /// Authorization code.
        code: String,
        /// Date after which the code may no longer be printed on the voucher.
        code_expiration: NaiveDate,
    },
    /// The authority evaluated the invoice and declined it. Terminal for this
    /// voucher number.
    Rejected {
        /// Authority observation messages, verbatim, for the operator.
        reason: String,
        /// First authority error/observation code.
        authority_error_code: String,
    },
    /// The submission did not reach a fiscal verdict: network error, bad
    /// status, malformed response, or rejected credentials. No internal retry
    /// is attempted because a blind resubmit risks reusing a voucher number;
    /// the host decides whether to resubmit with the same number.
    TransportFailure {
        /// Underlying failure.
        cause: AfipError,
    },
}

impl InvoiceOutcome {
    /// Returns `true` for [`InvoiceOutcome::Approved`].
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}
