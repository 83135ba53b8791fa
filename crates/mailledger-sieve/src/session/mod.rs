//! High-level ManageSieve session.
//!
//! A [`Session`] owns one connection and runs the connect sequence:
//!
//! 1. wait for the capability greeting,
//! 2. STARTTLS when the configuration asks for it, then re-read the
//!    capabilities over the encrypted channel,
//! 3. AUTHENTICATE with the configured or negotiated SASL mechanism.
//!
//! Script operations then map onto single requests, except where the
//! server lacks a command and the session emulates it (see
//! [`Compatibility`]). A `REFERRAL` answer moves the session to the
//! referred server and retries the operation once.
//!
//! ## Example
//!
//! ```no_run
//! use mailledger_sieve::connection::Config;
//! use mailledger_sieve::request::sasl::Credentials;
//! use mailledger_sieve::session::{Session, SessionConfig};
//!
//! # async fn example() -> mailledger_sieve::Result<()> {
//! let config = SessionConfig::new(
//!     Config::new("sieve.example.com"),
//!     Credentials::new("user@example.com", "password"),
//! );
//!
//! let mut session = Session::connect(config).await?;
//! for script in session.list_scripts().await? {
//!     println!("{script}");
//! }
//! session.put_script("vacation", "keep;").await?;
//! session.activate_script("vacation").await?;
//! session.disconnect(false).await;
//! # Ok(())
//! # }
//! ```

mod compatibility;
mod config;
mod registry;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use compatibility::Compatibility;
pub use config::SessionConfig;
pub use registry::{SessionId, SessionRegistry};

use crate::client::ClientConfig;
use crate::connection::{Connection, Security, SieveStream, TlsContext, Transport};
use crate::error::CertificateError;
use crate::request::sasl::Mechanism;
use crate::request::{ReplyReceiver, Request};
use crate::types::{Capabilities, Referral, Response, ResponseCode, ScriptInfo, Status};
use crate::{Error, Result};

/// Script name used to emulate `CHECKSCRIPT`.
pub const CHECK_SCRIPT_NAME: &str = "TMP_FILE_DELETE_ME";

/// Notification about the session's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection idled and a keep-alive was sent.
    Idle,
    /// The request timeout fired while only optional requests were waiting.
    Timeout,
    /// The connection closed.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

/// ManageSieve session over one connection.
pub struct Session {
    config: SessionConfig,
    connection: Option<Connection>,
    capabilities: Capabilities,
    compatibility: Compatibility,
    secure: bool,
    authenticated: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Session {
    /// Creates a session that is not connected yet.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connection: None,
            capabilities: Capabilities::default(),
            compatibility: Compatibility::default(),
            secure: false,
            authenticated: false,
            events,
            events_rx: Some(events_rx),
        }
    }

    /// Connects over TCP, secures the channel and authenticates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when the server certificate is
    /// rejected, [`Error::Auth`] or [`Error::No`] when authentication
    /// fails, and an I/O or protocol error otherwise.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.open().await?;
        Ok(session)
    }

    /// Runs the connect sequence over an already open transport.
    ///
    /// A referral received during the handshake is followed over TCP.
    ///
    /// # Errors
    ///
    /// Same as [`Session::connect`].
    pub async fn connect_with<T: Transport>(config: SessionConfig, transport: T) -> Result<Self> {
        let mut session = Self::new(config);
        let tls = session.tls_context()?;
        session.attach(transport, tls);

        match session.handshake().await {
            Ok(()) => Ok(session),
            Err(Error::Referral(referral)) => {
                session.follow(&referral).await;
                session.establish().await?;
                Ok(session)
            }
            Err(err) => Err(err),
        }
    }

    /// Opens a new connection, following a referral once.
    ///
    /// # Errors
    ///
    /// Same as [`Session::connect`].
    pub async fn open(&mut self) -> Result<()> {
        match self.establish().await {
            Err(Error::Referral(referral)) => {
                self.follow(&referral).await;
                self.establish().await
            }
            other => other,
        }
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the host the session is (or was last) connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.connection.host
    }

    /// Returns the last capability listing received.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns which optional commands the server supports.
    #[must_use]
    pub const fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Returns true if the channel is encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns true once AUTHENTICATE succeeded.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Takes the receiver for [`SessionEvent`]s.
    ///
    /// Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Trusts a rejected certificate for future connections to its host.
    ///
    /// The certificate still has to fail only in ways listed in the
    /// connection's ignorable failures.
    pub fn trust_certificate(&self, certificate: &CertificateError) {
        info!(host = %certificate.host, fingerprint = %certificate.fingerprint_sha256, "Trusting certificate");
        self.config
            .connection
            .certificates
            .trust(&certificate.host, &certificate.fingerprint_sha256);
    }

    /// Re-reads the server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn refresh_capabilities(&mut self) -> Result<&Capabilities> {
        let capabilities = self.execute(Request::capability).await?;
        self.update_capabilities(capabilities);
        Ok(&self.capabilities)
    }

    /// Lists the scripts on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_scripts(&mut self) -> Result<Vec<ScriptInfo>> {
        self.execute(Request::list_scripts).await
    }

    /// Downloads a script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] with [`ResponseCode::NonExistent`] for an
    /// unknown script.
    pub async fn get_script(&mut self, name: &str) -> Result<String> {
        self.execute(|| Request::get_script(name)).await
    }

    /// Uploads a script, replacing any script with the same name.
    ///
    /// The returned response may carry [`ResponseCode::Warnings`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] when the server rejects the script.
    pub async fn put_script(&mut self, name: &str, script: &str) -> Result<Response> {
        self.execute(|| Request::put_script(name, script)).await
    }

    /// Deletes a script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the script is active or unknown.
    pub async fn delete_script(&mut self, name: &str) -> Result<()> {
        self.execute(|| Request::delete_script(name)).await?;
        Ok(())
    }

    /// Activates a script. An empty name deactivates every script.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn activate_script(&mut self, name: &str) -> Result<()> {
        self.execute(|| Request::set_active(name)).await?;
        Ok(())
    }

    /// Deactivates the active script.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn deactivate(&mut self) -> Result<()> {
        self.activate_script("").await
    }

    /// Renames a script.
    ///
    /// Servers without `RENAMESCRIPT` get a download, upload, activate and
    /// delete sequence with the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] with [`ResponseCode::AlreadyExists`] when the
    /// new name is taken, or [`ResponseCode::NonExistent`] when the old
    /// script is unknown.
    pub async fn rename_script(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if self.compatibility.rename {
            self.execute(|| Request::rename_script(old_name, new_name))
                .await?;
            return Ok(());
        }

        debug!(old_name, new_name, "Emulating RENAMESCRIPT");
        let scripts = self.list_scripts().await?;
        if scripts.iter().any(|s| s.name == new_name) {
            return Err(Error::No {
                message: format!("script {new_name:?} already exists"),
                code: Some(ResponseCode::AlreadyExists),
            });
        }
        let Some(active) = scripts.iter().find(|s| s.name == old_name).map(|s| s.active) else {
            return Err(Error::No {
                message: format!("script {old_name:?} does not exist"),
                code: Some(ResponseCode::NonExistent),
            });
        };

        let body = self.get_script(old_name).await?;
        self.put_script(new_name, &body).await?;
        if active {
            self.activate_script(new_name).await?;
        }
        self.delete_script(old_name).await
    }

    /// Asks the server to validate a script without storing it.
    ///
    /// An empty script is valid. Servers without `CHECKSCRIPT` get the
    /// script uploaded as [`CHECK_SCRIPT_NAME`] and deleted again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] describing the problem when the script is
    /// invalid.
    pub async fn check_script(&mut self, script: &str) -> Result<Response> {
        if script.is_empty() {
            return Ok(Response::new(Status::Ok));
        }

        if self.compatibility.check_script {
            return self.execute(|| Request::check_script(script)).await;
        }

        debug!("Emulating CHECKSCRIPT");
        let response = self.put_script(CHECK_SCRIPT_NAME, script).await?;
        self.delete_script(CHECK_SCRIPT_NAME).await?;
        Ok(response)
    }

    /// Keeps the connection alive.
    ///
    /// Uses `CAPABILITY` when the server has no `NOOP`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn noop(&mut self) -> Result<()> {
        if self.compatibility.noop {
            self.execute(|| Request::noop(None)).await?;
        } else {
            self.execute(Request::capability).await?;
        }
        Ok(())
    }

    /// Sends LOGOUT and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the LOGOUT. The connection is
    /// closed either way.
    pub async fn logout(&mut self) -> Result<()> {
        let result = self.execute(Request::logout).await;
        self.close("logout").await;
        result.map(|_| ())
    }

    /// Ends the session.
    ///
    /// Unless `force` is set, a graceful LOGOUT is attempted first. Calling
    /// this on a disconnected session does nothing.
    pub async fn disconnect(&mut self, force: bool) {
        if self.connection.is_none() {
            return;
        }

        if !force && self.is_connected() {
            if let Err(err) = self.logout().await {
                warn!(error = %err, "Graceful logout failed");
            }
        }
        self.close("disconnect requested").await;
    }

    async fn establish(&mut self) -> Result<()> {
        let tls = self.tls_context()?;
        let stream = SieveStream::connect(&self.config.connection, tls.as_ref()).await?;
        self.attach(stream, tls);
        self.handshake().await
    }

    fn tls_context(&self) -> Result<Option<TlsContext>> {
        match self.config.connection.security {
            Security::None => Ok(None),
            Security::StartTls | Security::Implicit => {
                Ok(Some(TlsContext::new(&self.config.connection)?))
            }
        }
    }

    fn attach<T: Transport>(&mut self, transport: T, tls: Option<TlsContext>) {
        self.secure = transport.is_secure();
        self.authenticated = false;

        let config = ClientConfig {
            timeout: self.config.timeout,
            idle: self.config.keep_alive,
        };
        self.connection = Some(Connection::spawn(
            transport,
            config,
            tls,
            self.events.clone(),
        ));
    }

    async fn handshake(&mut self) -> Result<()> {
        let result = self.negotiate().await;
        if result.is_err() {
            self.close("handshake failed").await;
        }
        result
    }

    async fn negotiate(&mut self) -> Result<()> {
        let mut capabilities = self.call(Request::init()).await?;
        debug!(implementation = %capabilities.implementation, "Greeting received");

        if self.needs_starttls(&capabilities)? {
            self.call(Request::start_tls()).await?;
            self.secure = true;

            // The server may push its capabilities unprompted after TLS.
            let (capability, rx) = Request::capability();
            let (init, _) = Request::init();
            self.enqueue(capability)?;
            self.enqueue(init.greedy())?;
            capabilities = wait(rx).await?;
        }
        self.update_capabilities(capabilities);

        self.authenticate().await?;

        if let Some(connection) = &self.connection {
            connection.set_keep_alive(self.compatibility.noop);
        }
        info!(
            host = %self.config.connection.host,
            secure = self.secure,
            authenticated = self.authenticated,
            "Session ready"
        );
        Ok(())
    }

    fn needs_starttls(&self, capabilities: &Capabilities) -> Result<bool> {
        match self.config.connection.security {
            Security::None | Security::Implicit => Ok(false),
            Security::StartTls if self.secure => Ok(false),
            Security::StartTls if capabilities.starttls => Ok(true),
            Security::StartTls => Err(Error::Protocol(
                "server does not offer STARTTLS".to_string(),
            )),
        }
    }

    async fn authenticate(&mut self) -> Result<()> {
        let Some(mechanism) = Mechanism::select(&self.capabilities, self.config.sasl)? else {
            debug!("Skipping authentication");
            return Ok(());
        };

        info!(%mechanism, username = %self.config.credentials.username, "Authenticating");
        let request = Request::authenticate(mechanism, &self.config.credentials)?;
        self.call(request).await?;
        self.authenticated = true;
        Ok(())
    }

    fn update_capabilities(&mut self, capabilities: Capabilities) {
        self.compatibility = Compatibility::from(&capabilities);
        self.capabilities = capabilities;
    }

    /// Moves the session to the referred server.
    async fn follow(&mut self, referral: &Referral) {
        info!(url = %referral.url, "Following referral");
        self.close("referral").await;
        self.config.connection = self
            .config
            .connection
            .redirect(referral.host.clone(), referral.port_or_default());
    }

    /// Runs a request, following a referral and retrying once.
    async fn execute<T, F>(&mut self, make: F) -> Result<T>
    where
        F: Fn() -> (Request, ReplyReceiver<T>),
    {
        match self.call(make()).await {
            Err(Error::Referral(referral)) => {
                self.follow(&referral).await;
                self.establish().await?;
                self.call(make()).await
            }
            other => other,
        }
    }

    async fn call<T>(&mut self, (request, rx): (Request, ReplyReceiver<T>)) -> Result<T> {
        self.enqueue(request)?;
        wait(rx).await
    }

    fn enqueue(&self, request: Request) -> Result<()> {
        match &self.connection {
            Some(connection) if connection.is_open() => {
                connection.send(request);
                Ok(())
            }
            _ => {
                request.abandon(Error::Disconnected("session is not connected".to_string()));
                Err(Error::Disconnected("session is not connected".to_string()))
            }
        }
    }

    async fn close(&mut self, reason: &str) {
        if let Some(connection) = self.connection.take() {
            connection.close(reason).await;
        }
        self.authenticated = false;
    }
}

async fn wait<T>(rx: ReplyReceiver<T>) -> Result<T> {
    rx.await
        .unwrap_or_else(|_| Err(Error::Disconnected("request dropped".to_string())))
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.connection.host)
            .field("port", &self.config.connection.port)
            .field("connected", &self.is_connected())
            .field("secure", &self.secure)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect
)]
mod tests {
    use super::*;
    use crate::connection::Config;
    use crate::request::sasl::{Credentials, SaslPreference};

    fn config() -> SessionConfig {
        SessionConfig::new(
            Config::builder("sieve.example.com")
                .security(Security::None)
                .build(),
            Credentials::new("user", "secret"),
        )
    }

    #[tokio::test]
    async fn test_disconnected_session_rejects_requests() {
        let mut session = Session::new(config());
        assert!(!session.is_connected());

        let err = session.list_scripts().await.unwrap_err();
        assert!(err.is_disconnect());

        session.disconnect(false).await;
        session.disconnect(true).await;
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let mut session = Session::new(config());
        assert!(session.take_events().is_some());
        assert!(session.take_events().is_none());
    }

    #[tokio::test]
    async fn test_empty_script_is_valid_offline() {
        let mut session = Session::new(config());
        assert!(session.check_script("").await.unwrap().is_ok());
    }

    #[test]
    fn test_starttls_requirement() {
        let mut caps = Capabilities::default();
        let mut session = Session::new(config().security(Security::StartTls));
        assert!(session.needs_starttls(&caps).is_err());

        caps.insert("STARTTLS", "");
        assert!(session.needs_starttls(&caps).unwrap());

        session.secure = true;
        assert!(!session.needs_starttls(&caps).unwrap());

        let session = Session::new(config().sasl(SaslPreference::None));
        assert!(!session.needs_starttls(&caps).unwrap());
    }

    #[test]
    fn test_trust_certificate() {
        let session = Session::new(config());
        let certificate = CertificateError {
            host: "sieve.example.com".into(),
            port: 4190,
            fingerprint_sha1: "AA".into(),
            fingerprint_sha256: "BB:CC".into(),
            der: Vec::new(),
            reason: "invalid peer certificate: UnknownIssuer".into(),
        };
        session.trust_certificate(&certificate);
        assert!(
            session
                .config()
                .connection
                .certificates
                .is_trusted("sieve.example.com", "BBCC")
        );
    }
}
