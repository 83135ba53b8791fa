//! SASL mechanisms for `AUTHENTICATE`.
//!
//! Implements:
//! - PLAIN (RFC 4616)
//! - LOGIN (draft-murchison-sasl-login)
//! - SCRAM-SHA-1, SCRAM-SHA-256, SCRAM-SHA-512 (RFC 5802, RFC 7677)
//! - EXTERNAL (RFC 4422)
//!
//! Each mechanism is a small state machine. The server drives it by sending
//! either a challenge (a string line) or a status line; the mechanism
//! answers a challenge with the next client reply and turns the status line
//! into the final outcome.

mod external;
mod login;
mod plain;
mod scram;

use std::fmt;

use crate::command::Command;
use crate::types::{Capabilities, Response};
use crate::{Error, Result};

use external::External;
use login::Login;
use plain::Plain;
pub use scram::ScramHash;
use scram::Scram;

/// SASL mechanism supported by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// PLAIN: authorization, username and password in one message.
    Plain,
    /// LOGIN: username and password in two challenge rounds.
    Login,
    /// SCRAM-SHA-1.
    ScramSha1,
    /// SCRAM-SHA-256.
    ScramSha256,
    /// SCRAM-SHA-512.
    ScramSha512,
    /// EXTERNAL: credentials come from the TLS layer.
    External,
}

impl Mechanism {
    /// Mechanisms in the order they are tried when none is forced.
    pub const PREFERENCE: [Self; 6] = [
        Self::Plain,
        Self::ScramSha1,
        Self::ScramSha256,
        Self::ScramSha512,
        Self::External,
        Self::Login,
    ];

    /// Returns the IANA mechanism name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
            Self::External => "EXTERNAL",
        }
    }

    /// Looks up a mechanism by name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Returns true if the mechanism needs a password.
    #[must_use]
    pub const fn needs_password(self) -> bool {
        !matches!(self, Self::External)
    }

    /// Picks the mechanism to use against a server.
    ///
    /// Returns `Ok(None)` when authentication is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if a forced mechanism is not advertised or no
    /// supported mechanism is advertised.
    pub fn select(capabilities: &Capabilities, preference: SaslPreference) -> Result<Option<Self>> {
        match preference {
            SaslPreference::None => Ok(None),
            SaslPreference::Forced(mechanism) => {
                if capabilities.supports_sasl(mechanism.name()) {
                    Ok(Some(mechanism))
                } else {
                    Err(Error::Auth(format!(
                        "{} is not advertised by the server",
                        mechanism.name()
                    )))
                }
            }
            SaslPreference::Default => Self::PREFERENCE
                .into_iter()
                .find(|m| capabilities.supports_sasl(m.name()))
                .map(Some)
                .ok_or_else(|| {
                    Error::Auth(format!(
                        "no supported SASL mechanism among [{}]",
                        capabilities.sasl.join(" ")
                    ))
                }),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the session chooses a SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslPreference {
    /// Strongest advertised mechanism, in [`Mechanism::PREFERENCE`] order.
    #[default]
    Default,
    /// Skip authentication.
    None,
    /// Always use this mechanism.
    Forced(Mechanism),
}

/// Authentication credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Password. Not needed for EXTERNAL.
    pub password: Option<String>,
    /// Authorization identity, when acting on behalf of another user.
    pub authorization: Option<String>,
}

impl Credentials {
    /// Creates username/password credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            authorization: None,
        }
    }

    /// Sets the authorization identity.
    #[must_use]
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    /// Returns the authorization identity, or an empty string.
    #[must_use]
    pub fn authorization(&self) -> &str {
        self.authorization.as_deref().unwrap_or_default()
    }

    fn password(&self, mechanism: Mechanism) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Auth(format!("{mechanism} requires a password")))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("authorization", &self.authorization)
            .finish()
    }
}

/// Running authentication exchange for one mechanism.
#[derive(Debug)]
pub(crate) enum Exchange {
    /// PLAIN exchange.
    Plain(Plain),
    /// LOGIN exchange.
    Login(Login),
    /// SCRAM exchange.
    Scram(Box<Scram>),
    /// EXTERNAL exchange.
    External(External),
}

impl Exchange {
    /// Starts an exchange for the given mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the mechanism needs a password and the
    /// credentials carry none.
    pub fn new(mechanism: Mechanism, credentials: &Credentials) -> Result<Self> {
        Ok(match mechanism {
            Mechanism::Plain => Self::Plain(Plain::new(
                credentials.authorization(),
                &credentials.username,
                credentials.password(mechanism)?,
            )),
            Mechanism::Login => Self::Login(Login::new(
                &credentials.username,
                credentials.password(mechanism)?,
            )),
            Mechanism::ScramSha1 | Mechanism::ScramSha256 | Mechanism::ScramSha512 => {
                Self::Scram(Box::new(Scram::new(
                    ScramHash::for_mechanism(mechanism)?,
                    credentials,
                    credentials.password(mechanism)?,
                    scram::generate_nonce(),
                )))
            }
            Mechanism::External => Self::External(External::new(credentials.authorization())),
        })
    }

    /// Starts a SCRAM exchange with a fixed client nonce.
    #[cfg(test)]
    pub(crate) fn scram_with_nonce(
        hash: ScramHash,
        credentials: &Credentials,
        nonce: &str,
    ) -> Result<Self> {
        Ok(Self::Scram(Box::new(Scram::new(
            hash,
            credentials,
            credentials.password(hash.mechanism())?,
            nonce.to_string(),
        ))))
    }

    /// Returns the mechanism in use.
    #[must_use]
    pub const fn mechanism(&self) -> Mechanism {
        match self {
            Self::Plain(_) => Mechanism::Plain,
            Self::Login(_) => Mechanism::Login,
            Self::Scram(scram) => scram.mechanism(),
            Self::External(_) => Mechanism::External,
        }
    }

    /// Returns the `AUTHENTICATE` command that opens the exchange.
    #[must_use]
    pub fn initial(&self) -> Command {
        let initial_response = match self {
            Self::Plain(plain) => Some(plain.initial_response()),
            Self::Login(_) => None,
            Self::Scram(scram) => Some(scram.initial_response()),
            Self::External(external) => Some(external.initial_response()),
        };

        Command::Authenticate {
            mechanism: self.mechanism().name().to_string(),
            initial_response,
        }
    }

    /// Answers a server challenge with the next client reply line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the challenge is malformed, fails
    /// verification, or is not expected at this point.
    pub fn challenge(&mut self, challenge: &str) -> Result<Vec<u8>> {
        match self {
            Self::Login(login) => login.challenge(),
            Self::Scram(scram) => scram.challenge(challenge),
            Self::Plain(_) | Self::External(_) => Err(Error::Auth(format!(
                "unexpected challenge for {}",
                self.mechanism()
            ))),
        }
    }

    /// Turns the final status line into the outcome of the exchange.
    ///
    /// # Errors
    ///
    /// Returns the server error for `NO`/`BYE`, or [`Error::Auth`] if a
    /// SCRAM server signature is missing or wrong.
    pub fn finish(&mut self, response: Response) -> Result<Response> {
        if !response.is_ok() {
            return Err(Error::from_response(response));
        }

        match self {
            Self::Scram(scram) => scram.finish(response),
            Self::Plain(_) | Self::Login(_) | Self::External(_) => Ok(response),
        }
    }
}

/// Line sent to cancel an exchange (RFC 5804 section 2.1).
pub(crate) const ABORT: &[u8] = b"\"*\"\r\n";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn capabilities(sasl: &str) -> Capabilities {
        let mut caps = Capabilities::default();
        caps.insert("IMPLEMENTATION", "test");
        caps.insert("SASL", sasl);
        caps
    }

    #[test]
    fn test_preference_order() {
        let caps = capabilities("LOGIN SCRAM-SHA-256 PLAIN");
        assert_eq!(
            Mechanism::select(&caps, SaslPreference::Default).unwrap(),
            Some(Mechanism::Plain)
        );

        let caps = capabilities("LOGIN SCRAM-SHA-512 SCRAM-SHA-256");
        assert_eq!(
            Mechanism::select(&caps, SaslPreference::Default).unwrap(),
            Some(Mechanism::ScramSha256)
        );

        let caps = capabilities("LOGIN");
        assert_eq!(
            Mechanism::select(&caps, SaslPreference::Default).unwrap(),
            Some(Mechanism::Login)
        );
    }

    #[test]
    fn test_no_supported_mechanism() {
        let caps = capabilities("CRAM-MD5 GSSAPI");
        let err = Mechanism::select(&caps, SaslPreference::Default).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("CRAM-MD5")));
    }

    #[test]
    fn test_forced_mechanism_must_be_advertised() {
        let caps = capabilities("PLAIN");
        assert!(Mechanism::select(&caps, SaslPreference::Forced(Mechanism::Login)).is_err());
        assert_eq!(
            Mechanism::select(&caps, SaslPreference::Forced(Mechanism::Plain)).unwrap(),
            Some(Mechanism::Plain)
        );
        assert_eq!(Mechanism::select(&caps, SaslPreference::None).unwrap(), None);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Mechanism::from_name("scram-sha-1"), Some(Mechanism::ScramSha1));
        assert_eq!(Mechanism::from_name("CRAM-MD5"), None);
    }

    #[test]
    fn test_password_required() {
        let credentials = Credentials {
            username: "user".into(),
            ..Credentials::default()
        };
        assert!(Exchange::new(Mechanism::Plain, &credentials).is_err());
        assert!(Exchange::new(Mechanism::External, &credentials).is_ok());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("user", "secret"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("user"));
    }

    #[test]
    fn test_plain_exchange() {
        let mut exchange = Exchange::new(Mechanism::Plain, &Credentials::new("user", "pencil")).unwrap();
        assert_eq!(
            exchange.initial().serialize(),
            b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n"
        );
        assert!(exchange.challenge("abc").is_err());

        let ok = exchange.finish(Response::new(Status::Ok)).unwrap();
        assert!(ok.is_ok());
        assert!(exchange.finish(Response::new(Status::No)).is_err());
    }

    #[test]
    fn test_external_exchange() {
        let credentials = Credentials {
            username: String::new(),
            password: None,
            authorization: Some("admin".into()),
        };
        let exchange = Exchange::new(Mechanism::External, &credentials).unwrap();
        assert_eq!(
            exchange.initial().serialize(),
            b"AUTHENTICATE \"EXTERNAL\" \"YWRtaW4=\"\r\n"
        );
    }
}
