//! Server capabilities.

use std::collections::BTreeSet;

/// Lowest protocol version that implies RENAMESCRIPT, NOOP and CHECKSCRIPT.
const VERSION_1: f64 = 1.0;

/// Capability listing sent in the greeting, after STARTTLS, after
/// AUTHENTICATE, and in reply to `CAPABILITY`.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// `IMPLEMENTATION`: server name and version.
    pub implementation: String,
    /// `VERSION`: protocol version, `None` for pre-RFC servers.
    pub version: Option<String>,
    /// `SASL`: advertised SASL mechanisms, in server order.
    pub sasl: Vec<String>,
    /// `SIEVE`: supported Sieve language extensions.
    pub extensions: BTreeSet<String>,
    /// `STARTTLS` was advertised.
    pub starttls: bool,
    /// `MAXREDIRECTS`: maximum redirect actions per script.
    pub max_redirects: Option<u32>,
    /// `LANGUAGE`: language of human-readable messages.
    pub language: String,
    /// `NOTIFY`: supported notification methods.
    pub notify: Vec<String>,
    /// `OWNER`: the authenticated user.
    pub owner: Option<String>,
    /// Explicit `RENAME` capability (pre-RFC servers).
    pub rename: bool,
    /// Explicit `NOOP` capability (pre-RFC servers).
    pub noop: bool,
    /// Capabilities this library does not interpret.
    pub other: Vec<(String, String)>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            implementation: String::new(),
            version: None,
            sasl: Vec::new(),
            extensions: BTreeSet::new(),
            starttls: false,
            max_redirects: None,
            language: "i-default".to_string(),
            notify: Vec::new(),
            owner: None,
            rename: false,
            noop: false,
            other: Vec::new(),
        }
    }
}

impl Capabilities {
    /// Applies one `"NAME" ["value"]` line of a capability listing.
    pub fn insert(&mut self, name: &str, value: &str) {
        match name.to_ascii_uppercase().as_str() {
            "IMPLEMENTATION" => self.implementation = value.to_string(),
            "VERSION" => self.version = Some(value.to_string()),
            "SASL" => self.sasl = split_words(value),
            "SIEVE" => self.extensions = split_words(value).into_iter().collect(),
            "STARTTLS" => self.starttls = true,
            "MAXREDIRECTS" => self.max_redirects = value.trim().parse().ok(),
            "LANGUAGE" => self.language = value.to_string(),
            "NOTIFY" => self.notify = split_words(value),
            "OWNER" => self.owner = Some(value.to_string()),
            "RENAME" => self.rename = true,
            "NOOP" => self.noop = true,
            _ => self.other.push((name.to_string(), value.to_string())),
        }
    }

    /// Returns the numeric protocol version, or 0 when absent or malformed.
    #[must_use]
    pub fn version_number(&self) -> f64 {
        self.version
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0)
    }

    /// Returns true if the server speaks RFC 5804 (version 1.0 or later).
    #[must_use]
    pub fn is_rfc5804(&self) -> bool {
        self.version_number() >= VERSION_1
    }

    /// Returns true if `RENAMESCRIPT` is available.
    #[must_use]
    pub fn can_rename_script(&self) -> bool {
        self.rename || self.is_rfc5804()
    }

    /// Returns true if `NOOP` is available.
    #[must_use]
    pub fn can_noop(&self) -> bool {
        self.noop || self.is_rfc5804()
    }

    /// Returns true if `CHECKSCRIPT` is available.
    #[must_use]
    pub fn can_check_script(&self) -> bool {
        self.is_rfc5804()
    }

    /// Returns true if the given SASL mechanism is advertised (case-insensitive).
    #[must_use]
    pub fn supports_sasl(&self, mechanism: &str) -> bool {
        self.sasl.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Returns true if the given Sieve extension is supported.
    #[must_use]
    pub fn has_extension(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }
}

fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let caps = Capabilities::default();
        assert_eq!(caps.language, "i-default");
        assert!(!caps.can_noop());
        assert!(!caps.can_rename_script());
        assert!(!caps.can_check_script());
    }

    #[test]
    fn version_enables_commands() {
        let mut caps = Capabilities::default();
        caps.insert("VERSION", "1.0");
        assert_eq!(caps.version_number(), 1.0);
        assert!(caps.can_noop());
        assert!(caps.can_rename_script());
        assert!(caps.can_check_script());
    }

    #[test]
    fn legacy_flags() {
        let mut caps = Capabilities::default();
        caps.insert("rename", "");
        caps.insert("NOOP", "");
        assert!(caps.can_rename_script());
        assert!(caps.can_noop());
        assert!(!caps.can_check_script());
    }

    #[test]
    fn lists_are_split() {
        let mut caps = Capabilities::default();
        caps.insert("SASL", "PLAIN  SCRAM-SHA-1");
        caps.insert("SIEVE", "fileinto vacation fileinto");
        caps.insert("MAXREDIRECTS", "5");
        caps.insert("X-UNKNOWN", "yes");

        assert_eq!(caps.sasl, vec!["PLAIN", "SCRAM-SHA-1"]);
        assert!(caps.supports_sasl("scram-sha-1"));
        assert_eq!(caps.extensions.len(), 2);
        assert!(caps.has_extension("vacation"));
        assert_eq!(caps.max_redirects, Some(5));
        assert_eq!(caps.other, vec![("X-UNKNOWN".to_string(), "yes".to_string())]);
    }
}
