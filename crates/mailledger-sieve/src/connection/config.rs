//! Connection configuration types.

use std::time::Duration;

use super::tls::{CertificateFailure, CertificateStore};
use crate::types::DEFAULT_PORT;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption. **Not recommended for production.**
    None,
    /// Start with plaintext and upgrade with STARTTLS. This is how
    /// ManageSieve servers are normally reached.
    #[default]
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    ///
    /// ManageSieve has no dedicated implicit-TLS port.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        DEFAULT_PORT
    }
}

/// ManageSieve connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Time allowed for the TCP connect and the TLS handshake.
    pub connect_timeout: Duration,
    /// Certificate fingerprints (SHA-1 or SHA-256, hex, colons optional)
    /// the server must present.
    pub pinned_fingerprints: Vec<String>,
    /// Validation failures tolerated for a pinned or trusted certificate.
    pub ignorable_failures: Vec<CertificateFailure>,
    /// Certificates the user trusted explicitly.
    pub certificates: CertificateStore,
}

impl Config {
    /// Creates a STARTTLS configuration on port 4190.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Returns a copy pointing at another server, keeping every other setting.
    #[must_use]
    pub fn redirect(&self, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..self.clone()
        }
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
    pinned_fingerprints: Vec<String>,
    ignorable_failures: Vec<CertificateFailure>,
    certificates: Option<CertificateStore>,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::StartTls,
            connect_timeout: Duration::from_secs(30),
            pinned_fingerprints: Vec::new(),
            ignorable_failures: Vec::new(),
            certificates: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Pins a certificate fingerprint.
    #[must_use]
    pub fn pin_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.pinned_fingerprints.push(fingerprint.into());
        self
    }

    /// Tolerates a validation failure for pinned or trusted certificates.
    #[must_use]
    pub fn ignore_failure(mut self, failure: CertificateFailure) -> Self {
        if !self.ignorable_failures.contains(&failure) {
            self.ignorable_failures.push(failure);
        }
        self
    }

    /// Shares a certificate store between connections.
    #[must_use]
    pub fn certificates(mut self, store: CertificateStore) -> Self {
        self.certificates = Some(store);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            connect_timeout: self.connect_timeout,
            pinned_fingerprints: self.pinned_fingerprints,
            ignorable_failures: self.ignorable_failures,
            certificates: self.certificates.unwrap_or_default(),
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
    fn test_config_new() {
        let config = Config::new("sieve.example.com");
        assert_eq!(config.host, "sieve.example.com");
        assert_eq!(config.port, 4190);
        assert_eq!(config.security, Security::StartTls);
        assert!(config.pinned_fingerprints.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("sieve.example.com")
            .port(2000)
            .security(Security::Implicit)
            .connect_timeout(Duration::from_secs(10))
            .pin_fingerprint("AB:CD")
            .ignore_failure(CertificateFailure::UnknownIssuer)
            .ignore_failure(CertificateFailure::UnknownIssuer)
            .build();

        assert_eq!(config.port, 2000);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.pinned_fingerprints, vec!["AB:CD".to_string()]);
        assert_eq!(config.ignorable_failures, vec![CertificateFailure::UnknownIssuer]);
    }

    #[test]
    fn test_redirect_keeps_settings() {
        let store = CertificateStore::new();
        let config = Config::builder("a.example.com")
            .security(Security::None)
            .certificates(store.clone())
            .build();
        let moved = config.redirect("b.example.com", 4191);

        assert_eq!(moved.host, "b.example.com");
        assert_eq!(moved.port, 4191);
        assert_eq!(moved.security, Security::None);

        store.trust("b.example.com", "00:11");
        assert!(moved.certificates.is_trusted("b.example.com", "0011"));
    }
}
