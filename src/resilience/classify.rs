// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transient vs fatal error classification.
//!
//! Every component that reacts differently to "endpoint temporarily
//! unreachable" and "endpoint permanently wrong" asks this module. The
//! decision is a pure function of the error:
//!
//! - **Transient**: the rendered error chain contains a connectivity
//!   signature (host resolution, request send, connection refused,
//!   connection / I/O timeout), or some error in the chain reports itself
//!   as a timeout or temporary condition.
//! - **Fatal**: everything else (auth, permissions, bad config, not found).
//!
//! Matching is textual. Client libraries rewording their messages will
//! silently move errors between classes; keep the signature lists here and
//! nowhere else.
//!
//! # Example
//!
//! ```
//! use snapstore::resilience::classify::{classify, ErrorClass};
//! use snapstore::StorageError;
//!
//! let err = StorageError::Backend("dial tcp: lookup minio.local: no such host".into());
//! assert_eq!(classify(&err), ErrorClass::Transient);
//!
//! let err = StorageError::Backend("AccessDenied: bucket policy".into());
//! assert_eq!(classify(&err), ErrorClass::Fatal);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::io::ErrorKind;

use crate::storage::traits::StorageError;

/// Connectivity signatures, matched case-insensitively.
const CONNECTIVITY_SIGNATURES: &[&str] = &[
    // host resolution
    "no such host",
    "dial tcp: lookup",
    "dns error",
    "failed to lookup address",
    // request send
    "request send failed",
    "error sending request",
    // refused connections
    "connection refused",
    // timeouts
    "connection timeout",
    "i/o timeout",
    "operation timed out",
];

/// Extra markers only trusted while constructing backends: credential
/// providers and clients fail with these when the endpoint cannot be reached.
const CONSTRUCTION_SIGNATURES: &[&str] = &[
    "requesterror",
    "nocredentialserr",
    "dial tcp",
    "tcp connect error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

impl ErrorClass {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Classify an error surfaced by a store operation.
#[must_use]
pub fn classify(err: &StorageError) -> ErrorClass {
    classify_with(err, CONNECTIVITY_SIGNATURES, &[])
}

/// Classify an error raised while constructing a backend. Uses the
/// runtime signatures plus [`CONSTRUCTION_SIGNATURES`].
#[must_use]
pub fn classify_construction(err: &StorageError) -> ErrorClass {
    classify_with(err, CONNECTIVITY_SIGNATURES, CONSTRUCTION_SIGNATURES)
}

/// Shorthand for `classify(err).is_transient()`.
#[must_use]
pub fn is_transient(err: &StorageError) -> bool {
    classify(err).is_transient()
}

fn classify_with(err: &StorageError, base: &[&str], extra: &[&str]) -> ErrorClass {
    if let StorageError::HealthCheck { class, .. } = err {
        return *class;
    }
    let text = render_chain(err).to_lowercase();
    if base.iter().chain(extra).any(|sig| text.contains(sig)) {
        return ErrorClass::Transient;
    }
    if reports_network_condition(err) {
        return ErrorClass::Transient;
    }
    ErrorClass::Fatal
}

/// Display of the error followed by every source in its chain.
fn render_chain(err: &StorageError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Structured check: does any error in the chain say it is a timeout or a
/// temporary condition?
fn reports_network_condition(err: &StorageError) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        let storage = e
            .downcast_ref::<StorageError>()
            .or_else(|| e.downcast_ref::<Box<StorageError>>().map(|b| b.as_ref()));
        match storage {
            Some(StorageError::Timeout { .. }) => return true,
            Some(StorageError::HealthCheck { class, .. }) => return class.is_transient(),
            Some(StorageError::Object(o)) if o.is_temporary() => return true,
            _ => {}
        }
        if e.downcast_ref::<opendal::Error>().is_some_and(opendal::Error::is_temporary) {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if is_network_io(io) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn is_network_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    )
}
