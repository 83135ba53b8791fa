//! Connection state of the protocol engine.

/// Lifecycle of one connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Upgrading
///       ^                           |
///       +---------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport. New requests are rejected.
    #[default]
    Disconnected,
    /// Transport is being established; requests are queued but not sent.
    Connecting,
    /// Transport is open. The engine is busy while requests are queued
    /// and idle otherwise.
    Connected,
    /// STARTTLS was accepted and the transport is switching to TLS.
    /// Nothing is sent until the upgrade completes.
    Upgrading,
}

impl ConnectionState {
    /// Returns `true` if requests may be written.
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` unless disconnected.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!ConnectionState::default().is_open());
        assert!(ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Connecting.can_send());
        assert!(ConnectionState::Connected.can_send());
        assert!(!ConnectionState::Upgrading.can_send());
    }
}
