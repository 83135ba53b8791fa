//! `sievectl` - manage Sieve scripts from the command line.
//!
//! Connects with the settings of an account file, runs one operation and
//! logs out.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod account;
mod cli;

use anyhow::Context;
use clap::Parser;
use mailledger_sieve::{Capabilities, Error, Response, Session};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account::Account;
use cli::{Cli, Operation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sievectl=info,mailledger_sieve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let account = Account::load(&cli.account).await?;
    let config = account.session_config()?;

    info!(host = %account.host, "Connecting");
    let mut session = match Session::connect(config).await {
        Ok(session) => session,
        Err(Error::Certificate(certificate)) => {
            eprintln!(
                "The certificate of {}:{} was rejected: {}",
                certificate.host, certificate.port, certificate.reason
            );
            eprintln!("SHA-256 fingerprint: {}", certificate.fingerprint_sha256);
            eprintln!("Add it to \"pinned_fingerprints\" in the account file to trust it.");
            anyhow::bail!("certificate validation failed");
        }
        Err(err) => return Err(anyhow::Error::new(err).context("failed to connect")),
    };

    let result = run(&mut session, cli.command).await;
    session.disconnect(false).await;
    result
}

async fn run(session: &mut Session, operation: Operation) -> anyhow::Result<()> {
    match operation {
        Operation::Capabilities => {
            let capabilities = session.refresh_capabilities().await?;
            print_capabilities(capabilities);
        }
        Operation::List => {
            for script in session.list_scripts().await? {
                println!("{script}");
            }
        }
        Operation::Get { name } => {
            let script = session
                .get_script(&name)
                .await
                .with_context(|| format!("failed to fetch {name}"))?;
            print!("{script}");
        }
        Operation::Put { name, file } => {
            let script = read_script(&file).await?;
            let response = session
                .put_script(&name, &script)
                .await
                .with_context(|| format!("failed to upload {name}"))?;
            report(&response);
        }
        Operation::Check { file } => {
            let script = read_script(&file).await?;
            let response = session
                .check_script(&script)
                .await
                .context("script is invalid")?;
            report(&response);
        }
        Operation::Activate { name } => {
            session
                .activate_script(&name)
                .await
                .with_context(|| format!("failed to activate {name}"))?;
        }
        Operation::Deactivate => session.deactivate().await?,
        Operation::Delete { name } => {
            session
                .delete_script(&name)
                .await
                .with_context(|| format!("failed to delete {name}"))?;
        }
        Operation::Rename { old, new } => {
            session
                .rename_script(&old, &new)
                .await
                .with_context(|| format!("failed to rename {old} to {new}"))?;
        }
    }
    Ok(())
}

async fn read_script(path: &std::path::Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Prints server warnings attached to an OK.
fn report(response: &Response) {
    let message = response.message();
    if response.code.is_some() && !message.is_empty() {
        warn!("{message}");
    }
}

fn print_capabilities(capabilities: &Capabilities) {
    println!("Implementation: {}", capabilities.implementation);
    if let Some(version) = &capabilities.version {
        println!("Version: {version}");
    }
    println!("SASL: {}", capabilities.sasl.join(" "));
    println!(
        "Sieve: {}",
        capabilities
            .extensions
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    );
    if let Some(max) = capabilities.max_redirects {
        println!("Max redirects: {max}");
    }
    if !capabilities.notify.is_empty() {
        println!("Notify: {}", capabilities.notify.join(" "));
    }
    if let Some(owner) = &capabilities.owner {
        println!("Owner: {owner}");
    }
    println!("Language: {}", capabilities.language);
}
