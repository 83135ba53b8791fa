//! Script listing entries.

use std::fmt;

/// One entry of a `LISTSCRIPTS` response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptInfo {
    /// Script name.
    pub name: String,
    /// Whether this is the active script.
    pub active: bool,
}

impl ScriptInfo {
    /// Creates a new script entry.
    #[must_use]
    pub fn new(name: impl Into<String>, active: bool) -> Self {
        Self {
            name: name.into(),
            active,
        }
    }
}

impl fmt::Display for ScriptInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.active {
            write!(f, "{} (active)", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}
