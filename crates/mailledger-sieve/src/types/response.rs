//! Status trailer shared by every ManageSieve response.

use std::fmt;

use super::ResponseCode;

/// Completion status of a response.
///
/// The discriminants are stable and ordered: `Ok < Bye < No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    /// Command completed successfully.
    Ok = 0,
    /// Server is closing the connection.
    Bye = 1,
    /// Command failed.
    No = 2,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns the wire keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Bye => "BYE",
            Self::No => "NO",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `OK` / `NO` / `BYE` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Completion status.
    pub status: Status,
    /// Optional parenthesized response code.
    pub code: Option<ResponseCode>,
    /// Optional human-readable message.
    pub message: Option<String>,
}

impl Response {
    /// Creates a bare response with the given status.
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            status,
            code: None,
            message: None,
        }
    }

    /// Returns true for an `OK` response.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Returns the message, or an empty string.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Returns the SASL payload carried in the response code, if any.
    #[must_use]
    pub fn sasl(&self) -> Option<&str> {
        match &self.code {
            Some(ResponseCode::Sasl(data)) => Some(data),
            _ => None,
        }
    }
}
