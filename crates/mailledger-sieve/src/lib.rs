//! # mailledger-sieve
//!
//! A ManageSieve client library implementing RFC 5804, for managing Sieve
//! mail-filtering scripts on a remote server.
//!
//! ## Features
//!
//! - **Sans-I/O protocol engine**: [`client::Client`] pairs queued requests
//!   with server replies, handles fragmentation, pipelining, timeouts and
//!   idle detection without touching a socket
//! - **Typed requests**: every command declares its reply type and
//!   delivers it through a one-shot channel
//! - **SASL**: PLAIN, LOGIN, SCRAM-SHA-1/256/512 and EXTERNAL
//! - **TLS via rustls**: implicit TLS or STARTTLS, with certificate pinning
//!   and explicit trust overrides
//! - **Session façade**: connect sequence, referrals, and emulation of
//!   RENAMESCRIPT, CHECKSCRIPT and NOOP on older servers
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailledger_sieve::{Config, Credentials, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> mailledger_sieve::Result<()> {
//!     let config = SessionConfig::new(
//!         Config::new("sieve.example.com"),
//!         Credentials::new("user@example.com", "password"),
//!     );
//!     let mut session = Session::connect(config).await?;
//!
//!     println!("Server: {}", session.capabilities().implementation);
//!     for script in session.list_scripts().await? {
//!         println!("{script}");
//!     }
//!
//!     session.put_script("vacation", "require \"vacation\";\nvacation \"Away\";").await?;
//!     session.activate_script("vacation").await?;
//!     session.disconnect(false).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! ```text
//! Session ──► Connection (tokio task) ──► Client (sans-I/O) ──► Request
//!                  │                          │
//!              Transport                ResponseParser
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Sans-I/O protocol engine
//! - [`command`]: Command serialization and wire helpers
//! - [`connection`]: Transport, TLS and the async driver
//! - [`parser`]: Sans-I/O response parser
//! - [`request`]: Requests and SASL mechanisms
//! - [`session`]: High-level session and registry
//! - [`types`]: Responses, response codes, capabilities, scripts

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod request;
pub mod session;
pub mod types;

pub use client::{Client, ClientConfig, ConnectionState, Event, Transmit};
pub use command::Command;
pub use connection::{
    CertificateFailure, CertificateStore, Config, ConfigBuilder, Security, SieveStream, Transport,
};
pub use error::{CertificateError, Error, Result};
pub use parser::ResponseParser;
pub use request::sasl::{Credentials, Mechanism, SaslPreference};
pub use request::{Progress, ReplyReceiver, Request};
pub use session::{
    Compatibility, Session, SessionConfig, SessionEvent, SessionId, SessionRegistry,
};
pub use types::{Capabilities, Referral, Response, ResponseCode, ScriptInfo, Status};

/// IANA-registered ManageSieve port.
pub const DEFAULT_PORT: u16 = types::DEFAULT_PORT;
