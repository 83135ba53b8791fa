//! ManageSieve command builder.
//!
//! This module provides the [`Command`] enum and its wire serialization.
//! Script names are always sent as quoted strings; script bodies are sent
//! as literals after line-ending normalization.

mod builder;

pub use builder::{
    RequestBuilder, byte_length, decode_base64, encode_base64, normalize_line_endings,
};

/// ManageSieve command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY command.
    Capability,
    /// STARTTLS command.
    StartTls,
    /// LOGOUT command.
    Logout,
    /// NOOP command, optionally echoing a tag.
    Noop {
        /// Tag returned by the server in a `TAG` response code.
        tag: Option<String>,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// SASL mechanism name.
        mechanism: String,
        /// Initial client response, base64-encoded on the wire.
        initial_response: Option<Vec<u8>>,
    },
    /// LISTSCRIPTS command.
    ListScripts,
    /// GETSCRIPT command.
    GetScript {
        /// Script name.
        name: String,
    },
    /// PUTSCRIPT command.
    PutScript {
        /// Script name.
        name: String,
        /// Script body.
        script: String,
    },
    /// CHECKSCRIPT command.
    CheckScript {
        /// Script body.
        script: String,
    },
    /// SETACTIVE command. An empty name deactivates all scripts.
    SetActive {
        /// Script name.
        name: String,
    },
    /// DELETESCRIPT command.
    DeleteScript {
        /// Script name.
        name: String,
    },
    /// RENAMESCRIPT command.
    RenameScript {
        /// Current script name.
        old_name: String,
        /// New script name.
        new_name: String,
    },
}

impl Command {
    /// Returns the command keyword.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Logout => "LOGOUT",
            Self::Noop { .. } => "NOOP",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::ListScripts => "LISTSCRIPTS",
            Self::GetScript { .. } => "GETSCRIPT",
            Self::PutScript { .. } => "PUTSCRIPT",
            Self::CheckScript { .. } => "CHECKSCRIPT",
            Self::SetActive { .. } => "SETACTIVE",
            Self::DeleteScript { .. } => "DELETESCRIPT",
            Self::RenameScript { .. } => "RENAMESCRIPT",
        }
    }

    /// Returns true if the serialized command carries credentials.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Authenticate { .. })
    }

    /// Serializes the command to bytes, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let builder = RequestBuilder::new(self.name());

        let builder = match self {
            Self::Capability | Self::StartTls | Self::Logout | Self::ListScripts => builder,
            Self::Noop { tag } => match tag {
                Some(tag) => builder.add_quoted_string(tag),
                None => builder,
            },
            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                let builder = builder.add_quoted_string(mechanism);
                match initial_response {
                    Some(data) => builder.add_quoted_base64(data),
                    None => builder,
                }
            }
            Self::GetScript { name } | Self::SetActive { name } | Self::DeleteScript { name } => {
                builder.add_quoted_string(name)
            }
            Self::PutScript { name, script } => builder
                .add_quoted_string(name)
                .add_literal(&normalize_line_endings(script)),
            Self::CheckScript { script } => builder.add_literal(&normalize_line_endings(script)),
            Self::RenameScript { old_name, new_name } => {
                builder.add_quoted_string(old_name).add_quoted_string(new_name)
            }
        };

        builder.into_bytes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Capability.serialize(), b"CAPABILITY\r\n");
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
        assert_eq!(Command::Logout.serialize(), b"LOGOUT\r\n");
        assert_eq!(Command::ListScripts.serialize(), b"LISTSCRIPTS\r\n");
        assert_eq!(Command::Noop { tag: None }.serialize(), b"NOOP\r\n");
    }

    #[test]
    fn test_noop_with_tag() {
        let cmd = Command::Noop {
            tag: Some("STARTTLS-SYNC-42".into()),
        };
        assert_eq!(cmd.serialize(), b"NOOP \"STARTTLS-SYNC-42\"\r\n");
    }

    #[test]
    fn test_authenticate_plain() {
        let cmd = Command::Authenticate {
            mechanism: "PLAIN".into(),
            initial_response: Some(b"\0user\0pencil".to_vec()),
        };
        assert_eq!(cmd.serialize(), b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n");
        assert!(cmd.is_sensitive());
    }

    #[test]
    fn test_authenticate_without_initial_response() {
        let cmd = Command::Authenticate {
            mechanism: "LOGIN".into(),
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTHENTICATE \"LOGIN\"\r\n");
    }

    #[test]
    fn test_putscript_normalizes_body() {
        let cmd = Command::PutScript {
            name: "vacation".into(),
            script: "keep;\nstop;".into(),
        };
        assert_eq!(
            cmd.serialize(),
            b"PUTSCRIPT \"vacation\" {12+}\r\nkeep;\r\nstop;\r\n"
        );
    }

    #[test]
    fn test_checkscript() {
        let cmd = Command::CheckScript {
            script: "keep;".into(),
        };
        assert_eq!(cmd.serialize(), b"CHECKSCRIPT {5+}\r\nkeep;\r\n");
        assert!(!cmd.is_sensitive());
    }

    #[test]
    fn test_setactive_empty_deactivates() {
        let cmd = Command::SetActive { name: String::new() };
        assert_eq!(cmd.serialize(), b"SETACTIVE \"\"\r\n");
    }

    #[test]
    fn test_rename_and_delete() {
        let cmd = Command::RenameScript {
            old_name: "a".into(),
            new_name: "b".into(),
        };
        assert_eq!(cmd.serialize(), b"RENAMESCRIPT \"a\" \"b\"\r\n");
        assert_eq!(
            Command::DeleteScript { name: "a".into() }.serialize(),
            b"DELETESCRIPT \"a\"\r\n"
        );
        assert_eq!(
            Command::GetScript { name: "a".into() }.serialize(),
            b"GETSCRIPT \"a\"\r\n"
        );
    }
}
