//! ManageSieve connection management.
//!
//! This module provides the I/O side of the library:
//! - Configuration (host, port, security mode, certificate trust)
//! - TLS/plaintext stream abstraction behind the [`Transport`] trait
//! - Certificate verification with pinning and explicit trust overrides
//! - The driver task that runs the sans-I/O client over a transport

mod config;
mod driver;
mod stream;
mod tls;

pub use config::{Config, ConfigBuilder, Security};
pub use driver::Connection;
pub use stream::{SecurityInfo, SieveStream, Transport};
pub use tls::{CertificateFailure, CertificateStore, Fingerprints, TlsContext, TrustVerifier};
