//! Outgoing wire data.
//!
// Allow missing_const_for_fn since Vec methods aren't const in stable Rust.
#![allow(clippy::missing_const_for_fn)]

/// Data to transmit to the server.
///
/// The client produces these; the I/O layer writes them in order.
#[derive(Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes to send to the server.
    pub data: Vec<u8>,
    /// True if the bytes carry credentials and must not be logged.
    pub sensitive: bool,
}

impl Transmit {
    /// Creates a new transmit from bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            sensitive: false,
        }
    }

    /// Creates a transmit whose content is never logged.
    #[must_use]
    pub fn sensitive(data: Vec<u8>) -> Self {
        Self {
            data,
            sensitive: true,
        }
    }

    /// Returns the data as text for logging, or a placeholder for credentials.
    #[must_use]
    pub fn display(&self) -> std::borrow::Cow<'_, str> {
        if self.sensitive {
            std::borrow::Cow::Borrowed("<authentication data elided>")
        } else {
            String::from_utf8_lossy(&self.data)
        }
    }

    /// Returns the length of the data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the transmit is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Transmit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmit")
            .field("data", &self.display())
            .field("len", &self.len())
            .finish()
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_new() {
        let t = Transmit::new(b"NOOP\r\n".to_vec());
        assert_eq!(t.len(), 6);
        assert!(!t.is_empty());
        assert_eq!(t.display(), "NOOP\r\n");
    }

    #[test]
    fn test_sensitive_is_elided() {
        let t = Transmit::sensitive(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n".to_vec());
        assert!(!t.display().contains("AHVz"));
        assert!(!format!("{t:?}").contains("AHVz"));
        assert_eq!(t.as_ref(), t.data.as_slice());
    }
}
