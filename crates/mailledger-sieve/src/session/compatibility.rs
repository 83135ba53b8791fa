//! Commands the connected server supports natively.

use crate::types::Capabilities;

/// Which optional commands the server understands.
///
/// Commands missing here are emulated by the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compatibility {
    /// `RENAMESCRIPT`; emulated with get, put, activate and delete otherwise.
    pub rename: bool,
    /// `NOOP`; replaced by `CAPABILITY` otherwise.
    pub noop: bool,
    /// `CHECKSCRIPT`; emulated by uploading a temporary script otherwise.
    pub check_script: bool,
    /// `STARTTLS` is offered.
    pub starttls: bool,
}

impl From<&Capabilities> for Compatibility {
    fn from(capabilities: &Capabilities) -> Self {
        Self {
            rename: capabilities.can_rename_script(),
            noop: capabilities.can_noop(),
            check_script: capabilities.can_check_script(),
            starttls: capabilities.starttls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_enables_everything() {
        let mut caps = Capabilities::default();
        caps.insert("VERSION", "1.0");
        caps.insert("STARTTLS", "");
        let compat = Compatibility::from(&caps);
        assert!(compat.rename && compat.noop && compat.check_script && compat.starttls);
    }

    #[test]
    fn test_legacy_server() {
        let mut caps = Capabilities::default();
        caps.insert("RENAME", "");
        let compat = Compatibility::from(&caps);
        assert!(compat.rename);
        assert!(!compat.noop);
        assert!(!compat.check_script);
        assert!(!compat.starttls);
    }
}
