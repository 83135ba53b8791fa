//! Error types for the ManageSieve library.

use std::time::Duration;

use thiserror::Error;

use crate::types::{Referral, Response, ResponseCode, Status};

/// Errors that can occur during ManageSieve operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed or incomplete response bytes.
    ///
    /// While a response is still arriving this usually means "not enough
    /// data yet" rather than a real syntax error.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server rejected the command with NO.
    #[error("Server returned NO: {message}")]
    No {
        /// Human-readable text sent by the server.
        message: String,
        /// Optional response code.
        code: Option<ResponseCode>,
    },

    /// Server terminated the connection with BYE.
    #[error("Server sent BYE: {message}")]
    Bye {
        /// Human-readable text sent by the server.
        message: String,
        /// Optional response code.
        code: Option<ResponseCode>,
    },

    /// Server redirected the client to another host.
    #[error("Server referred to {}", .0.url)]
    Referral(Referral),

    /// Authentication failed on the client side (bad challenge, no usable mechanism).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No complete response arrived within the request timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// TLS certificate did not pass validation.
    #[error("Certificate validation failed for {}:{}: {}", .0.host, .0.port, .0.reason)]
    Certificate(Box<CertificateError>),

    /// Connection closed or reset outside of a BYE.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Details about a rejected server certificate.
///
/// Carries enough information to let the user decide whether to trust
/// the certificate explicitly (see [`crate::CertificateStore`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateError {
    /// Host the connection was made to.
    pub host: String,
    /// Port the connection was made to.
    pub port: u16,
    /// SHA-1 fingerprint, colon separated upper-case hex.
    pub fingerprint_sha1: String,
    /// SHA-256 fingerprint, colon separated upper-case hex.
    pub fingerprint_sha256: String,
    /// DER encoding of the end-entity certificate.
    pub der: Vec<u8>,
    /// Why validation failed.
    pub reason: String,
}

impl Error {
    /// Maps a NO or BYE trailer into the matching error variant.
    ///
    /// A `REFERRAL` response code always becomes [`Error::Referral`].
    #[must_use]
    pub fn from_response(response: Response) -> Self {
        let Response {
            status,
            code,
            message,
        } = response;

        if let Some(ResponseCode::Referral(referral)) = code {
            return Self::Referral(referral);
        }

        let message = message.unwrap_or_default();
        match status {
            Status::Bye => Self::Bye { message, code },
            Status::Ok | Status::No => Self::No { message, code },
        }
    }

    /// Returns true for parse errors.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// Returns true for request timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true when the connection is gone.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Bye { .. } | Self::Io(_))
    }

    /// Returns the response code attached to a server error, if any.
    #[must_use]
    pub const fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            Self::No { code, .. } | Self::Bye { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn no_response_maps_to_no() {
        let response = Response {
            status: Status::No,
            code: Some(ResponseCode::NonExistent),
            message: Some("no such script".to_string()),
        };

        let err = Error::from_response(response);
        assert!(matches!(&err, Error::No { message, .. } if message == "no such script"));
        assert_eq!(err.response_code(), Some(&ResponseCode::NonExistent));
    }

    #[test]
    fn referral_wins_over_status() {
        let referral = Referral::parse("sieve://backup.example.com:2000").unwrap();
        let response = Response {
            status: Status::Bye,
            code: Some(ResponseCode::Referral(referral.clone())),
            message: None,
        };

        match Error::from_response(response) {
            Error::Referral(r) => assert_eq!(r, referral),
            other => panic!("expected referral, got {other:?}"),
        }
    }

    #[test]
    fn predicates() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(Error::Disconnected("gone".into()).is_disconnect());
        assert!(
            Error::Parse {
                position: 0,
                message: String::new()
            }
            .is_parse()
        );
    }
}
