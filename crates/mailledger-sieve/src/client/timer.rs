//! Request timeout and idle timer.

use std::time::Instant;

/// The single timer of a connection.
///
/// At most one of the timeout and idle deadlines is armed at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timer {
    /// Nothing scheduled.
    #[default]
    None,
    /// A response is outstanding and must arrive before the deadline.
    Timeout(Instant),
    /// The queue is empty; the deadline marks a keep-alive opportunity.
    Idle(Instant),
}

impl Timer {
    /// Returns the armed deadline, if any.
    #[must_use]
    pub const fn deadline(self) -> Option<Instant> {
        match self {
            Self::None => None,
            Self::Timeout(at) | Self::Idle(at) => Some(at),
        }
    }

    /// Returns `true` if the deadline has passed.
    #[must_use]
    pub fn is_expired(self, now: Instant) -> bool {
        self.deadline().is_some_and(|at| now >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_deadline() {
        let now = Instant::now();
        assert_eq!(Timer::None.deadline(), None);
        assert!(!Timer::None.is_expired(now));

        let timer = Timer::Timeout(now + Duration::from_secs(1));
        assert!(!timer.is_expired(now));
        assert!(timer.is_expired(now + Duration::from_secs(1)));
        assert_eq!(Timer::Idle(now).deadline(), Some(now));
    }
}
