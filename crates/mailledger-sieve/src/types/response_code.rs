//! Response codes.

use crate::{Error, Result};

/// Default ManageSieve port (RFC 5804).
pub const DEFAULT_PORT: u16 = 4190;

/// Response code attached to an `OK`, `NO` or `BYE` line.
///
/// These provide additional information about command completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// SASL: Base64 data for the final step of an authentication exchange.
    Sasl(String),
    /// REFERRAL: The client should reconnect to another server.
    Referral(Referral),
    /// AUTH-TOO-WEAK: The chosen SASL mechanism is not allowed.
    AuthTooWeak,
    /// ENCRYPT-NEEDED: The operation requires an encrypted channel.
    EncryptNeeded,
    /// QUOTA: A quota limit was hit, with the optional `/MAXSCRIPTS` or `/MAXSIZE` detail.
    Quota(Option<String>),
    /// TRANSITION-NEEDED: The user must switch to a different mechanism.
    TransitionNeeded,
    /// TRYLATER: Temporary server failure.
    TryLater,
    /// ACTIVE: The script is active and cannot be deleted.
    Active,
    /// NONEXISTENT: The script does not exist.
    NonExistent,
    /// ALREADYEXISTS: A script with that name already exists.
    AlreadyExists,
    /// WARNINGS: The script was stored but the server has warnings.
    Warnings,
    /// TAG: Echo of a client tag (used with NOOP).
    Tag(String),
    /// Unknown response code, with all of its parts.
    Other(Vec<String>),
}

impl ResponseCode {
    /// Builds a response code from its space separated parts.
    ///
    /// The first part is the code name; it is matched case-insensitively.
    #[must_use]
    pub fn from_parts(parts: Vec<String>) -> Self {
        let Some(name) = parts.first().map(|n| n.to_ascii_uppercase()) else {
            return Self::Other(parts);
        };
        let argument = parts.get(1).cloned();

        match (name.as_str(), argument) {
            ("SASL", Some(data)) => Self::Sasl(data),
            ("REFERRAL", Some(url)) => match Referral::parse(&url) {
                Ok(referral) => Self::Referral(referral),
                Err(_) => Self::Other(parts),
            },
            ("TAG", Some(tag)) => Self::Tag(tag),
            ("AUTH-TOO-WEAK", _) => Self::AuthTooWeak,
            ("ENCRYPT-NEEDED", _) => Self::EncryptNeeded,
            ("TRANSITION-NEEDED", _) => Self::TransitionNeeded,
            ("TRYLATER", _) => Self::TryLater,
            ("ACTIVE", _) => Self::Active,
            ("NONEXISTENT", _) => Self::NonExistent,
            ("ALREADYEXISTS", _) => Self::AlreadyExists,
            ("WARNINGS", _) => Self::Warnings,
            ("QUOTA", _) => Self::Quota(None),
            (quota, _) if quota.starts_with("QUOTA/") => {
                Self::Quota(Some(quota["QUOTA/".len()..].to_string()))
            }
            _ => Self::Other(parts),
        }
    }

    /// Returns true if this code has the given name (case-insensitive).
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        let own = match self {
            Self::Sasl(_) => "SASL",
            Self::Referral(_) => "REFERRAL",
            Self::AuthTooWeak => "AUTH-TOO-WEAK",
            Self::EncryptNeeded => "ENCRYPT-NEEDED",
            Self::Quota(_) => "QUOTA",
            Self::TransitionNeeded => "TRANSITION-NEEDED",
            Self::TryLater => "TRYLATER",
            Self::Active => "ACTIVE",
            Self::NonExistent => "NONEXISTENT",
            Self::AlreadyExists => "ALREADYEXISTS",
            Self::Warnings => "WARNINGS",
            Self::Tag(_) => "TAG",
            Self::Other(parts) => parts.first().map_or("", String::as_str),
        };
        own.eq_ignore_ascii_case(name)
    }
}

/// Target of a `REFERRAL` response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    /// The full `sieve://` URL as sent by the server.
    pub url: String,
    /// Referred host name.
    pub host: String,
    /// Referred port, if the URL names one.
    pub port: Option<u16>,
}

impl Referral {
    /// Parses a `sieve://host[:port][/path]` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not use the `sieve` scheme,
    /// has no host, or has a malformed port.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Protocol(format!("invalid referral {url:?}: {reason}"));

        let authority = match (url.get(..8), url.get(8..)) {
            (Some(scheme), Some(rest)) if scheme.eq_ignore_ascii_case("sieve://") => rest,
            _ => return Err(invalid("expected sieve:// scheme")),
        };
        let authority = authority.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| invalid("bad port"))?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Returns the port to connect to, falling back to [`DEFAULT_PORT`].
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn simple_codes() {
        assert_eq!(
            ResponseCode::from_parts(parts(&["NONEXISTENT"])),
            ResponseCode::NonExistent
        );
        assert_eq!(
            ResponseCode::from_parts(parts(&["alreadyexists"])),
            ResponseCode::AlreadyExists
        );
        assert_eq!(
            ResponseCode::from_parts(parts(&["TAG", "STARTTLS-SYNC-42"])),
            ResponseCode::Tag("STARTTLS-SYNC-42".into())
        );
    }

    #[test]
    fn unknown_code_keeps_parts() {
        let code = ResponseCode::from_parts(parts(&["X-VENDOR", "a", "b"]));
        assert_eq!(code, ResponseCode::Other(parts(&["X-VENDOR", "a", "b"])));
        assert!(code.is("x-vendor"));
    }

    #[test]
    fn referral_with_port_and_path() {
        let code = ResponseCode::from_parts(parts(&["REFERRAL", "sieve://mx.example.org:2000/user"]));
        let ResponseCode::Referral(referral) = code else {
            panic!("expected referral");
        };
        assert_eq!(referral.host, "mx.example.org");
        assert_eq!(referral.port, Some(2000));
        assert_eq!(referral.port_or_default(), 2000);
    }

    #[test]
    fn referral_default_port() {
        let referral = Referral::parse("SIEVE://mx.example.org").unwrap();
        assert_eq!(referral.host, "mx.example.org");
        assert_eq!(referral.port_or_default(), DEFAULT_PORT);
    }

    #[test]
    fn referral_rejects_other_schemes() {
        assert!(Referral::parse("imap://mx.example.org").is_err());
        assert!(Referral::parse("sieve://").is_err());
        assert!(Referral::parse("sieve://host:port").is_err());
    }

    #[test]
    fn malformed_referral_is_kept_as_other() {
        let code = ResponseCode::from_parts(parts(&["REFERRAL", "ldap://x"]));
        assert!(matches!(code, ResponseCode::Other(_)));
        assert!(code.is("REFERRAL"));
    }
}
