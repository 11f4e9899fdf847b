//! Classification of remote mutation failures.
//!
//! The backend forwards database error codes in rejected responses. Codes in
//! the data-exception and integrity-constraint classes, and the
//! insufficient-privilege code, will fail the same way on every attempt, so
//! they are fatal. Everything else (network faults, timeouts, 5xx, unknown
//! codes) is retried.

use once_cell::sync::Lazy;
use regex::RegexSet;

use syncbridge_common::{Error, Result};

/// Response code patterns that are never retried.
pub const FATAL_RESPONSE_CODES: &[&str] = &[
    // Data exception, e.g. invalid input syntax for a column type
    r"^22...$",
    // Integrity constraint violation, e.g. unique or foreign key
    r"^23...$",
    // Insufficient privilege
    r"^42501$",
];

static FATAL_CODES: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(FATAL_RESPONSE_CODES).expect("fatal code patterns are valid"));

/// Check whether a backend response code is fatal.
pub fn is_fatal_code(code: &str) -> bool {
    FATAL_CODES.is_match(code)
}

/// Check whether an error must not be retried.
pub fn is_fatal(err: &Error) -> bool {
    err.remote_code().is_some_and(is_fatal_code)
}

/// Check whether an error may succeed on a later attempt.
pub fn is_retryable(err: &Error) -> bool {
    !is_fatal(err)
}

/// Outcome of dispatching one mutation.
#[derive(Debug)]
pub enum OpOutcome {
    /// The backend applied the mutation.
    Success,
    /// The mutation may succeed later; the transaction must stay queued.
    Retryable(Error),
    /// The mutation will never succeed; it is dropped and reported.
    Fatal(Error),
}

impl OpOutcome {
    /// Classify the result of a remote call.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => OpOutcome::Success,
            Err(err) if is_fatal(&err) => OpOutcome::Fatal(err),
            Err(err) => OpOutcome::Retryable(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Success)
    }
}
