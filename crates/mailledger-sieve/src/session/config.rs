//! Session configuration.

use std::time::Duration;

use crate::client::DEFAULT_TIMEOUT;
use crate::connection::{Config, Security};
use crate::request::sasl::{Credentials, Mechanism, SaslPreference};

/// Configuration for a ManageSieve session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where and how to connect.
    pub connection: Config,
    /// Authentication credentials.
    pub credentials: Credentials,
    /// SASL mechanism choice.
    pub sasl: SaslPreference,
    /// How long a request may wait for its response.
    pub timeout: Duration,
    /// Idle interval after which a keep-alive is sent. `None` disables it.
    pub keep_alive: Option<Duration>,
}

impl SessionConfig {
    /// Creates a session configuration for the given server and account.
    #[must_use]
    pub fn new(connection: Config, credentials: Credentials) -> Self {
        Self {
            connection,
            credentials,
            sasl: SaslPreference::Default,
            timeout: DEFAULT_TIMEOUT,
            keep_alive: None,
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.connection.security = security;
        self
    }

    /// Forces a SASL mechanism.
    #[must_use]
    pub const fn mechanism(mut self, mechanism: Mechanism) -> Self {
        self.sasl = SaslPreference::Forced(mechanism);
        self
    }

    /// Sets the SASL preference.
    #[must_use]
    pub const fn sasl(mut self, sasl: SaslPreference) -> Self {
        self.sasl = sasl;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables keep-alive after the given idle interval.
    #[must_use]
    pub const fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new(
            Config::new("sieve.example.com"),
            Credentials::new("user", "secret"),
        );
        assert_eq!(config.sasl, SaslPreference::Default);
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.keep_alive, None);
        assert_eq!(config.connection.security, Security::StartTls);
    }

    #[test]
    fn test_setters() {
        let config = SessionConfig::new(Config::new("h"), Credentials::default())
            .security(Security::None)
            .mechanism(Mechanism::Login)
            .timeout(Duration::from_secs(5))
            .keep_alive(Duration::from_secs(60));
        assert_eq!(config.connection.security, Security::None);
        assert_eq!(config.sasl, SaslPreference::Forced(Mechanism::Login));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.keep_alive, Some(Duration::from_secs(60)));
    }
}
