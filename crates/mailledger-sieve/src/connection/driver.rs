//! Async driver tying the sans-I/O [`Client`] to a transport.
//!
//! The driver runs as a tokio task that owns both the engine and the
//! transport. Callers talk to it through a [`Connection`] handle, which
//! forwards requests over a channel. Replies travel back on each request's
//! own one-shot channel.

use std::time::Instant as StdInstant;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::stream::Transport;
use super::tls::TlsContext;
use crate::client::{Client, ClientConfig, Event};
use crate::request::{ReplyReceiver, Request};
use crate::session::SessionEvent;
use crate::types::{Capabilities, Response};
use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 8192;

enum Command {
    Enqueue(Request),
    KeepAlive { noop: bool },
    Disconnect { reason: String },
}

/// Keep-alive request in flight.
enum KeepAlive {
    Noop(ReplyReceiver<Response>),
    Capability(ReplyReceiver<Capabilities>),
}

impl KeepAlive {
    /// Returns the outcome once the reply arrived.
    fn poll(&mut self) -> Option<Result<()>> {
        fn check<T>(rx: &mut ReplyReceiver<T>) -> Option<Result<()>> {
            match rx.try_recv() {
                Ok(result) => Some(result.map(|_| ())),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(Error::Disconnected(
                    "keep-alive dropped".to_string(),
                ))),
            }
        }

        match self {
            Self::Noop(rx) => check(rx),
            Self::Capability(rx) => check(rx),
        }
    }
}

/// Handle to a running driver task.
#[derive(Debug)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enqueue(request) => f.debug_tuple("Enqueue").field(&request.name()).finish(),
            Self::KeepAlive { noop } => f.debug_struct("KeepAlive").field("noop", noop).finish(),
            Self::Disconnect { reason } => {
                f.debug_struct("Disconnect").field("reason", reason).finish()
            }
        }
    }
}

impl Connection {
    /// Spawns the driver task over an open transport.
    ///
    /// `tls` is required for STARTTLS. Session events are sent to `events`.
    pub fn spawn<T: Transport>(
        transport: T,
        config: ClientConfig,
        tls: Option<TlsContext>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let secure = transport.is_secure();

        let mut client = Client::new(config);
        client.connecting();
        client.connected(now(), secure);

        let driver = Driver {
            client,
            commands: rx,
            events,
            tls,
            noop: false,
            keep_alive: None,
        };
        let task = tokio::spawn(driver.run(transport));

        Self { commands, task }
    }

    /// Queues a request.
    ///
    /// If the driver has already stopped, the request fails with
    /// [`Error::Disconnected`].
    pub fn send(&self, request: Request) {
        if let Err(mpsc::error::SendError(Command::Enqueue(request))) =
            self.commands.send(Command::Enqueue(request))
        {
            request.abandon(Error::Disconnected("connection closed".to_string()));
        }
    }

    /// Chooses the keep-alive command sent when the connection idles.
    pub fn set_keep_alive(&self, noop: bool) {
        let _ = self.commands.send(Command::KeepAlive { noop });
    }

    /// Returns true while the driver task runs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the driver and waits for the transport to close.
    ///
    /// Queued requests fail with [`Error::Disconnected`].
    pub async fn close(self, reason: &str) {
        let _ = self.commands.send(Command::Disconnect {
            reason: reason.to_string(),
        });
        if let Err(err) = self.task.await {
            warn!(error = %err, "Connection task failed");
        }
    }
}

fn now() -> StdInstant {
    Instant::now().into_std()
}

struct Driver {
    client: Client,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tls: Option<TlsContext>,
    noop: bool,
    keep_alive: Option<KeepAlive>,
}

impl Driver {
    async fn run<T: Transport>(mut self, mut transport: T) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            // Events can queue new requests (keep-alive), so settle before waiting.
            let upgrade = loop {
                if let Err(err) = self.flush(&mut transport).await {
                    self.client.disconnect(&err.to_string());
                }

                let upgrade = self.dispatch_events();
                self.check_keep_alive();

                if upgrade || !self.client.has_pending_output() {
                    break upgrade;
                }
            };

            if upgrade {
                transport = match self.upgrade(transport).await {
                    Some(transport) => transport,
                    None => {
                        self.dispatch_events();
                        self.abandon_commands();
                        return;
                    }
                };
                continue;
            }

            if !self.client.state().is_open() {
                self.abandon_commands();
                let _ = transport.shutdown().await;
                return;
            }

            let deadline = self.client.poll_timeout();
            let sleep = sleep_until(deadline.map_or_else(Instant::now, Instant::from_std));

            tokio::select! {
                read = transport.read(&mut buf) => match read {
                    Ok(0) => self.client.disconnect("connection closed by server"),
                    Ok(n) => self.client.handle_input(&buf[..n], now()),
                    Err(err) => self.client.disconnect(&err.to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Enqueue(request)) => self.client.enqueue(request, now()),
                    Some(Command::KeepAlive { noop }) => self.noop = noop,
                    Some(Command::Disconnect { reason }) => self.client.disconnect(&reason),
                    None => self.client.disconnect("session dropped"),
                },
                () = sleep, if deadline.is_some() => self.client.handle_timeout(now()),
            }
        }
    }

    async fn flush<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> Result<()> {
        let mut wrote = false;
        while let Some(transmit) = self.client.poll_transmit() {
            out.write_all(&transmit.data).await?;
            wrote = true;
        }
        if wrote {
            out.flush().await?;
        }
        Ok(())
    }

    /// Handles engine events. Returns true when a TLS upgrade is due.
    fn dispatch_events(&mut self) -> bool {
        let mut upgrade = false;

        while let Some(event) = self.client.poll_event() {
            match event {
                Event::SecureUpgrade => upgrade = true,
                Event::Idle => self.send_keep_alive(),
                Event::Timeout => {
                    let _ = self.events.send(SessionEvent::Timeout);
                }
                Event::Disconnected { reason } => {
                    info!(%reason, "Connection closed");
                    self.keep_alive = None;
                    let _ = self.events.send(SessionEvent::Disconnected { reason });
                }
            }
        }

        upgrade
    }

    async fn upgrade<T: Transport>(&mut self, transport: T) -> Option<T> {
        let Some(tls) = self.tls.as_ref() else {
            self.client.complete_upgrade(
                Err(Error::InvalidState("no TLS settings for STARTTLS".to_string())),
                now(),
            );
            return None;
        };

        match transport.upgrade(tls).await {
            Ok(transport) => {
                info!("Connection upgraded to TLS");
                self.client.complete_upgrade(Ok(()), now());
                Some(transport)
            }
            Err(err) => {
                self.client.complete_upgrade(Err(err), now());
                None
            }
        }
    }

    /// Fails requests that reached the channel after the engine stopped.
    fn abandon_commands(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Enqueue(request) = command {
                request.abandon(Error::Disconnected("connection closed".to_string()));
            }
        }
    }

    fn send_keep_alive(&mut self) {
        if self.keep_alive.is_some() {
            return;
        }
        let _ = self.events.send(SessionEvent::Idle);

        debug!(noop = self.noop, "Sending keep-alive");
        let keep_alive = if self.noop {
            let (request, rx) = Request::noop(None);
            self.client.enqueue(request, now());
            KeepAlive::Noop(rx)
        } else {
            let (request, rx) = Request::capability();
            self.client.enqueue(request, now());
            KeepAlive::Capability(rx)
        };
        self.keep_alive = Some(keep_alive);
    }

    fn check_keep_alive(&mut self) {
        let Some(outcome) = self.keep_alive.as_mut().and_then(KeepAlive::poll) else {
            return;
        };
        self.keep_alive = None;

        if let Err(err) = outcome {
            warn!(error = %err, "Keep-alive failed");
            self.client.disconnect(&format!("keep-alive failed: {err}"));
            self.dispatch_events();
        }
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
    use std::time::Duration;

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn driver(client: Client) -> (Driver, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            client,
            commands: mpsc::unbounded_channel().1,
            events,
            tls: None,
            noop: false,
            keep_alive: None,
        };
        (driver, events_rx)
    }

    #[tokio::test]
    async fn test_wire_writes() {
        let mut transport = tokio_test::io::Builder::new()
            .read(b"\"IMPLEMENTATION\" \"mock\"\r\nOK\r\n")
            .write(b"LISTSCRIPTS\r\n")
            .read(b"\"a\" ACTIVE\r\nOK\r\n")
            .build();

        let mut client = Client::new(ClientConfig::default());
        client.connecting();
        client.connected(now(), false);
        let (init, _init_rx) = Request::init();
        let (list, list_rx) = Request::list_scripts();
        client.enqueue(init, now());
        client.enqueue(list, now());

        let (mut driver, _events_rx) = driver(client);
        let mut buf = vec![0u8; 256];
        for _ in 0..2 {
            driver.flush(&mut transport).await.unwrap();
            let n = transport.read(&mut buf).await.unwrap();
            driver.client.handle_input(&buf[..n], now());
        }

        let scripts = list_rx.await.unwrap().unwrap();
        assert_eq!(scripts[0].name, "a");
        assert!(scripts[0].active);
    }

    #[tokio::test]
    async fn test_disconnect_event_is_forwarded() {
        let mut client = Client::new(ClientConfig::default());
        client.connecting();
        client.connected(now(), false);
        let (init, _init_rx) = Request::init();
        client.enqueue(init.greedy(), now());
        client.disconnect("test");

        let (mut driver, mut events_rx) = driver(client);
        assert!(!driver.dispatch_events());
        assert!(matches!(
            events_rx.recv().await,
            Some(SessionEvent::Disconnected { reason }) if reason == "test"
        ));
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (client, mut server) = duplex(1024);
        let (events, _events_rx) = mpsc::unbounded_channel();
        let connection = Connection::spawn(client, ClientConfig::default(), None, events);

        let (request, rx) = Request::delete_script("old");
        connection.send(request);

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"DELETESCRIPT \"old\"\r\n");

        server.write_all(b"OK\r\n").await.unwrap();
        assert!(rx.await.unwrap().is_ok());

        connection.close("done").await;
    }

    #[tokio::test]
    async fn test_server_close_reports_disconnect() {
        let (client, server) = duplex(1024);
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let connection = Connection::spawn(client, ClientConfig::default(), None, events);

        let (request, rx) = Request::list_scripts();
        connection.send(request);
        drop(server);

        assert!(rx.await.unwrap().unwrap_err().is_disconnect());
        assert!(matches!(
            events_rx.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));

        let (late, late_rx) = Request::noop(None);
        connection.send(late);
        assert!(!matches!(late_rx.await, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn test_queued_commands_fail_when_driver_stops() {
        let mut client = Client::new(ClientConfig::default());
        client.connecting();
        client.connected(now(), false);
        client.disconnect("gone");

        let (mut driver, _events_rx) = driver(client);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        driver.commands = commands_rx;

        let (request, rx) = Request::list_scripts();
        commands.send(Command::Enqueue(request)).unwrap();

        let (transport, _server) = duplex(64);
        driver.run(transport).await;

        assert!(rx.await.unwrap().unwrap_err().is_disconnect());
        assert!(commands.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_answered_keeps_connection() {
        let (client, mut server) = duplex(1024);
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            idle: Some(Duration::from_secs(300)),
            ..ClientConfig::default()
        };
        let connection = Connection::spawn(client, config, None, events);

        assert!(matches!(events_rx.recv().await, Some(SessionEvent::Idle)));
        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CAPABILITY\r\n");
        server
            .write_all(b"\"IMPLEMENTATION\" \"x\"\r\nOK\r\n")
            .await
            .unwrap();

        // A second idle period means the first keep-alive succeeded.
        assert!(matches!(events_rx.recv().await, Some(SessionEvent::Idle)));
        assert!(connection.is_open());
        connection.close("done").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sends_keep_alive() {
        let (client, mut server) = duplex(1024);
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            idle: Some(Duration::from_secs(300)),
            ..ClientConfig::default()
        };
        let connection = Connection::spawn(client, config, None, events);
        connection.set_keep_alive(true);

        assert!(matches!(events_rx.recv().await, Some(SessionEvent::Idle)));
        let idle_at = Instant::now();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"NOOP\r\n");
        assert!(idle_at.elapsed() < Duration::from_secs(1));

        server.write_all(b"NO \"go away\"\r\n").await.unwrap();
        assert!(matches!(
            events_rx.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert!(connection.task.await.is_ok());
    }
}
