//! LOGIN mechanism.
//!
//! The server sends two challenges (conventionally `Username:` and
//! `Password:`); their content is ignored. Each client reply is a
//! base64 literal.

use crate::command::RequestBuilder;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Username,
    Password,
    Completed,
}

/// Three-round LOGIN exchange.
#[derive(Clone)]
pub struct Login {
    username: String,
    password: String,
    state: State,
}

impl Login {
    pub(super) fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            state: State::Username,
        }
    }

    pub(super) fn challenge(&mut self) -> Result<Vec<u8>> {
        let (secret, next) = match self.state {
            State::Username => (&self.username, State::Password),
            State::Password => (&self.password, State::Completed),
            State::Completed => {
                return Err(Error::Auth("unexpected LOGIN challenge".to_string()));
            }
        };

        let reply = RequestBuilder::continuation()
            .add_literal_base64(secret.as_bytes())
            .into_bytes();
        self.state = next;
        Ok(reply)
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_two_rounds() {
        let mut login = Login::new("geek", "th3g33k1");
        assert_eq!(login.challenge().unwrap(), b"{8+}\r\nZ2Vlaw==\r\n");
        assert_eq!(login.challenge().unwrap(), b"{12+}\r\ndGgzZzMzazE=\r\n");
        assert!(login.challenge().is_err());
    }
}
