//! PLAIN mechanism (RFC 4616).

/// Single-message PLAIN exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Plain {
    message: Vec<u8>,
}

impl Plain {
    pub(super) fn new(authorization: &str, username: &str, password: &str) -> Self {
        Self {
            message: format!("{authorization}\0{username}\0{password}").into_bytes(),
        }
    }

    /// Returns `authzid NUL authcid NUL passwd`, sent with `AUTHENTICATE`.
    pub(super) fn initial_response(&self) -> Vec<u8> {
        self.message.clone()
    }
}

impl std::fmt::Debug for Plain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plain").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_authorization() {
        let plain = Plain::new("admin", "user", "pencil");
        assert_eq!(plain.initial_response(), b"admin\0user\0pencil");
        assert!(!format!("{plain:?}").contains("pencil"));
    }
}
