//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manage Sieve scripts on a ManageSieve server.
#[derive(Debug, Parser)]
#[command(name = "sievectl", version, about)]
pub struct Cli {
    /// Account file (JSON).
    #[arg(short, long)]
    pub account: PathBuf,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Operation,
}

/// One session operation.
#[derive(Debug, Subcommand)]
pub enum Operation {
    /// Show the server's capabilities.
    Capabilities,
    /// List scripts.
    List,
    /// Print a script.
    Get {
        /// Script name.
        name: String,
    },
    /// Upload a script from a file.
    Put {
        /// Script name.
        name: String,
        /// Script file.
        file: PathBuf,
    },
    /// Validate a script file without storing it.
    Check {
        /// Script file.
        file: PathBuf,
    },
    /// Make a script the active one.
    Activate {
        /// Script name.
        name: String,
    },
    /// Deactivate the active script.
    Deactivate,
    /// Delete a script.
    Delete {
        /// Script name.
        name: String,
    },
    /// Rename a script.
    Rename {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put() {
        let cli = Cli::try_parse_from([
            "sievectl",
            "--account",
            "work.json",
            "put",
            "vacation",
            "vacation.sieve",
        ])
        .unwrap();
        assert_eq!(cli.account, PathBuf::from("work.json"));
        assert!(matches!(
            cli.command,
            Operation::Put { ref name, ref file } if name == "vacation" && file == &PathBuf::from("vacation.sieve")
        ));
    }

    #[test]
    fn test_parse_rename_and_flags() {
        let cli = Cli::try_parse_from(["sievectl", "-a", "a.json", "rename", "old", "new"]).unwrap();
        assert!(matches!(
            cli.command,
            Operation::Rename { ref old, ref new } if old == "old" && new == "new"
        ));

        assert!(Cli::try_parse_from(["sievectl", "-a", "a.json", "get"]).is_err());
        assert!(Cli::try_parse_from(["sievectl", "-a", "a.json", "frobnicate"]).is_err());
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
