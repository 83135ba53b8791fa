//! Account file loading.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use mailledger_sieve::{Config, Credentials, Mechanism, SaslPreference, Security, SessionConfig};
use serde::Deserialize;

/// Transport security as written in the account file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Plaintext only.
    None,
    /// Upgrade with STARTTLS.
    #[default]
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

impl From<SecurityMode> for Security {
    fn from(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::None => Self::None,
            SecurityMode::StartTls => Self::StartTls,
            SecurityMode::Implicit => Self::Implicit,
        }
    }
}

/// One ManageSieve account.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    /// Server hostname.
    pub host: String,
    /// Server port, 4190 when omitted.
    #[serde(default)]
    pub port: Option<u16>,
    /// Transport security.
    #[serde(default)]
    pub security: SecurityMode,
    /// Authentication identity.
    pub username: String,
    /// Password. Not needed for EXTERNAL.
    #[serde(default)]
    pub password: Option<String>,
    /// Authorization identity.
    #[serde(default)]
    pub authorization: Option<String>,
    /// `"none"` to skip authentication, or a mechanism name to force it.
    #[serde(default)]
    pub sasl: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(default)]
    pub keep_alive: Option<u64>,
    /// Accepted certificate fingerprints (hex SHA-1 or SHA-256).
    #[serde(default)]
    pub pinned_fingerprints: Vec<String>,
}

impl Account {
    /// Reads an account from a JSON file.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read account file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid account file {}", path.display()))
    }

    /// Parses an account from JSON text.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let account: Self = serde_json::from_str(contents)?;
        if account.host.is_empty() {
            bail!("host must not be empty");
        }
        Ok(account)
    }

    fn sasl_preference(&self) -> anyhow::Result<SaslPreference> {
        match self.sasl.as_deref() {
            None => Ok(SaslPreference::Default),
            Some(name) if name.eq_ignore_ascii_case("none") => Ok(SaslPreference::None),
            Some(name) => Mechanism::from_name(name)
                .map(SaslPreference::Forced)
                .with_context(|| format!("unsupported SASL mechanism {name}")),
        }
    }

    /// Builds the session configuration for this account.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut builder = Config::builder(&self.host).security(self.security.into());
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        for fingerprint in &self.pinned_fingerprints {
            builder = builder.pin_fingerprint(fingerprint);
        }

        let credentials = Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            authorization: self.authorization.clone(),
        };

        let mut config =
            SessionConfig::new(builder.build(), credentials).sasl(self.sasl_preference()?);
        if let Some(seconds) = self.keep_alive {
            config = config.keep_alive(Duration::from_secs(seconds));
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_account() {
        let account =
            Account::parse(r#"{"host": "sieve.example.com", "username": "user"}"#).unwrap();
        assert_eq!(account.security, SecurityMode::StartTls);

        let config = account.session_config().unwrap();
        assert_eq!(config.connection.port, 4190);
        assert_eq!(config.connection.security, Security::StartTls);
        assert_eq!(config.sasl, SaslPreference::Default);
        assert!(config.credentials.password.is_none());
        assert!(config.keep_alive.is_none());
    }

    #[test]
    fn test_full_account() {
        let account = Account::parse(
            r#"{
                "host": "sieve.example.com",
                "port": 2000,
                "security": "implicit",
                "username": "user",
                "password": "secret",
                "authorization": "admin",
                "sasl": "SCRAM-SHA-256",
                "keep_alive": 60,
                "pinned_fingerprints": ["ab:cd"]
            }"#,
        )
        .unwrap();

        let config = account.session_config().unwrap();
        assert_eq!(config.connection.port, 2000);
        assert_eq!(config.connection.security, Security::Implicit);
        assert_eq!(config.connection.pinned_fingerprints, vec!["ab:cd"]);
        assert_eq!(config.sasl, SaslPreference::Forced(Mechanism::ScramSha256));
        assert_eq!(config.credentials.authorization(), "admin");
        assert_eq!(config.keep_alive, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_sasl_none_and_unknown() {
        let account = Account::parse(
            r#"{"host": "h", "username": "u", "security": "none", "sasl": "none"}"#,
        )
        .unwrap();
        assert_eq!(account.session_config().unwrap().sasl, SaslPreference::None);

        let account =
            Account::parse(r#"{"host": "h", "username": "u", "sasl": "CRAM-MD5"}"#).unwrap();
        assert!(account.session_config().is_err());
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(Account::parse(r#"{"host": "", "username": "u"}"#).is_err());
        assert!(Account::parse(r#"{"username": "u"}"#).is_err());
        assert!(Account::parse(r#"{"host": "h", "username": "u", "security": "tls"}"#).is_err());
    }
}
