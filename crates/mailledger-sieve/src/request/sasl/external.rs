//! EXTERNAL mechanism (RFC 4422 appendix A).

/// EXTERNAL exchange: the TLS client certificate authenticates, the client
/// only names the authorization identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct External {
    authorization: String,
}

impl External {
    pub(super) fn new(authorization: &str) -> Self {
        Self {
            authorization: authorization.to_string(),
        }
    }

    pub(super) fn initial_response(&self) -> Vec<u8> {
        self.authorization.as_bytes().to_vec()
    }
}
