//! TLS setup and certificate trust decisions.
//!
//! Certificates are checked against the webpki root store first. The
//! [`TrustVerifier`] then applies the connection's pinned fingerprints and
//! the user's [`CertificateStore`]. When a certificate is rejected, the
//! details are recorded so the handshake error can be reported as
//! [`Error::Certificate`] and offered for an explicit trust override.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use super::config::Config;
use crate::error::CertificateError;
use crate::{Error, Result};

/// Kind of certificate validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateFailure {
    /// The chain does not lead to a trusted root (includes self-signed).
    UnknownIssuer,
    /// The certificate is expired or not yet valid.
    Expired,
    /// The certificate does not name the host.
    NameMismatch,
    /// Anything else.
    Other,
}

impl CertificateFailure {
    fn classify(err: &rustls::Error) -> Self {
        use rustls::CertificateError as Cert;

        match err {
            rustls::Error::InvalidCertificate(Cert::UnknownIssuer) => Self::UnknownIssuer,
            rustls::Error::InvalidCertificate(Cert::Expired | Cert::NotValidYet) => Self::Expired,
            rustls::Error::InvalidCertificate(Cert::NotValidForName) => Self::NameMismatch,
            rustls::Error::InvalidCertificate(other) => {
                // Newer rustls releases add context-carrying variants.
                let name = format!("{other:?}");
                if name.starts_with("Expired") || name.starts_with("NotValidYet") {
                    Self::Expired
                } else if name.starts_with("NotValidForName") {
                    Self::NameMismatch
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

/// SHA-1 and SHA-256 fingerprints of a DER certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    /// Colon separated upper-case hex SHA-1 digest.
    pub sha1: String,
    /// Colon separated upper-case hex SHA-256 digest.
    pub sha256: String,
}

impl Fingerprints {
    /// Computes the fingerprints of a DER certificate.
    #[must_use]
    pub fn of(der: &[u8]) -> Self {
        Self {
            sha1: hex(&Sha1::digest(der)),
            sha256: hex(&Sha256::digest(der)),
        }
    }

    /// Returns true if `fingerprint` names either digest.
    ///
    /// Colons, whitespace and letter case are ignored.
    #[must_use]
    pub fn matches(&self, fingerprint: &str) -> bool {
        let wanted = normalize(fingerprint);
        !wanted.is_empty() && (normalize(&self.sha1) == wanted || normalize(&self.sha256) == wanted)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

fn normalize(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Certificates the user trusted explicitly, keyed by host.
///
/// Cheap to clone; clones share the same entries and may be used from
/// several connections at once.
#[derive(Debug, Clone, Default)]
pub struct CertificateStore {
    inner: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl CertificateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trusts a fingerprint for a host.
    pub fn trust(&self, host: &str, fingerprint: &str) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(host.to_ascii_lowercase())
            .or_default()
            .insert(normalize(fingerprint));
    }

    /// Returns true if the fingerprint is trusted for the host.
    #[must_use]
    pub fn is_trusted(&self, host: &str, fingerprint: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&host.to_ascii_lowercase())
            .is_some_and(|set| set.contains(&normalize(fingerprint)))
    }

    /// Forgets every fingerprint trusted for a host.
    pub fn revoke(&self, host: &str) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(&host.to_ascii_lowercase());
    }

    fn trusts(&self, host: &str, fingerprints: &Fingerprints) -> bool {
        self.is_trusted(host, &fingerprints.sha256) || self.is_trusted(host, &fingerprints.sha1)
    }
}

/// Server certificate verifier applying pins and user trust on top of webpki.
#[derive(Debug)]
pub struct TrustVerifier {
    inner: Arc<WebPkiServerVerifier>,
    host: String,
    port: u16,
    pinned: Vec<String>,
    ignorable: Vec<CertificateFailure>,
    store: CertificateStore,
    failure: Mutex<Option<CertificateError>>,
}

impl TrustVerifier {
    fn new(config: &Config) -> Result<Self> {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::InvalidState(format!("cannot build certificate verifier: {e}")))?;

        Ok(Self {
            inner,
            host: config.host.clone(),
            port: config.port,
            pinned: config.pinned_fingerprints.clone(),
            ignorable: config.ignorable_failures.clone(),
            store: config.certificates.clone(),
            failure: Mutex::new(None),
        })
    }

    fn record(&self, der: &[u8], fingerprints: Fingerprints, reason: String) {
        warn!(host = %self.host, fingerprint = %fingerprints.sha256, %reason, "Certificate rejected");
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(CertificateError {
            host: self.host.clone(),
            port: self.port,
            fingerprint_sha1: fingerprints.sha1,
            fingerprint_sha256: fingerprints.sha256,
            der: der.to_vec(),
            reason,
        });
    }

    /// Takes the details of the last rejected certificate.
    pub fn take_failure(&self) -> Option<CertificateError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let fingerprints = Fingerprints::of(end_entity.as_ref());
        let pinned = self.pinned.iter().any(|p| fingerprints.matches(p));

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) if self.pinned.is_empty() || pinned => Ok(verified),
            Ok(_) => {
                self.record(
                    end_entity.as_ref(),
                    fingerprints,
                    "certificate matches no pinned fingerprint".to_string(),
                );
                Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                ))
            }
            Err(err) => {
                let failure = CertificateFailure::classify(&err);
                let trusted = pinned || self.store.trusts(&self.host, &fingerprints);
                if trusted && self.ignorable.contains(&failure) {
                    debug!(host = %self.host, ?failure, "Accepting trusted certificate");
                    return Ok(ServerCertVerified::assertion());
                }
                self.record(end_entity.as_ref(), fingerprints, err.to_string());
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Everything needed to run a TLS handshake against one server.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
    verifier: Arc<TrustVerifier>,
    host: String,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Builds the TLS client configuration for a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the root store cannot be loaded.
    pub fn new(config: &Config) -> Result<Self> {
        let verifier = Arc::new(TrustVerifier::new(config)?);
        let tls = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls)),
            verifier,
            host: config.host.clone(),
        })
    }

    /// Runs the TLS handshake over an established TCP stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when the server certificate is
    /// rejected, and an I/O or DNS name error otherwise.
    pub async fn handshake(&self, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(self.host.clone())?;
        match self.connector.connect(server_name, tcp).await {
            Ok(stream) => {
                debug!(host = %self.host, "TLS established");
                Ok(stream)
            }
            Err(err) => Err(match self.verifier.take_failure() {
                Some(failure) => Error::Certificate(Box::new(failure)),
                None => Error::Io(err),
            }),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect
)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let fp = Fingerprints::of(b"abc");
        assert_eq!(fp.sha1, "A9:99:3E:36:47:06:81:6A:BA:3E:25:71:78:50:C2:6C:9C:D0:D8:9D");
        assert!(fp.sha256.starts_with("BA:78:16:BF"));
        assert_eq!(fp.sha256.len(), 32 * 3 - 1);
    }

    #[test]
    fn test_fingerprint_matching_ignores_format() {
        let fp = Fingerprints::of(b"abc");
        assert!(fp.matches("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert!(fp.matches(&fp.sha256.to_lowercase()));
        assert!(!fp.matches("A9:99"));
        assert!(!fp.matches(""));
    }

    #[test]
    fn test_store_is_shared_between_clones() {
        let store = CertificateStore::new();
        let other = store.clone();
        store.trust("Sieve.Example.com", "aa:bb");
        assert!(other.is_trusted("sieve.example.com", "AABB"));
        assert!(!other.is_trusted("other.example.com", "AABB"));

        other.revoke("sieve.example.com");
        assert!(!store.is_trusted("sieve.example.com", "AABB"));
    }

    #[test]
    fn test_store_concurrent_access() {
        let store = CertificateStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.trust("host", &format!("{i:02X}"));
                    store.is_trusted("host", &format!("{i:02X}"))
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_classify_failures() {
        use rustls::CertificateError as Cert;
        let classify = |e| CertificateFailure::classify(&rustls::Error::InvalidCertificate(e));
        assert_eq!(classify(Cert::UnknownIssuer), CertificateFailure::UnknownIssuer);
        assert_eq!(classify(Cert::Expired), CertificateFailure::Expired);
        assert_eq!(classify(Cert::NotValidForName), CertificateFailure::NameMismatch);
        assert_eq!(classify(Cert::Revoked), CertificateFailure::Other);
    }

    #[test]
    fn test_tls_context_builds() {
        let config = Config::new("sieve.example.com");
        assert!(TlsContext::new(&config).is_ok());
    }
}
