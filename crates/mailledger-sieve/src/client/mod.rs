//! Sans-I/O ManageSieve protocol engine.
//!
// Allow missing_const_for_fn since VecDeque methods aren't const in stable Rust.
#![allow(clippy::missing_const_for_fn)]
//!
//! [`Client`] owns the request queue, the receive buffer and the connection
//! timer, but performs no I/O itself:
//!
//! - [`Client::enqueue`] adds a request and schedules its bytes.
//! - [`Client::poll_transmit`] yields bytes to write to the transport.
//! - [`Client::handle_input`] feeds received bytes and pairs them with the
//!   queued requests.
//! - [`Client::poll_timeout`] / [`Client::handle_timeout`] drive the request
//!   timeout and the idle timer.
//! - [`Client::poll_event`] reports idle, timeout, TLS upgrade and
//!   disconnect notifications.
//!
//! Responses are matched strictly in queue order. Requests are pipelined,
//! except that nothing is sent past the greeting, `STARTTLS` or
//! `AUTHENTICATE` until that request has completed.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use mailledger_sieve::client::{Client, ClientConfig};
//! use mailledger_sieve::request::Request;
//!
//! let mut client = Client::new(ClientConfig::default());
//! let now = Instant::now();
//! client.connecting();
//! client.connected(now, false);
//!
//! let (request, mut reply) = Request::list_scripts();
//! client.enqueue(request, now);
//!
//! let transmit = client.poll_transmit().unwrap();
//! assert_eq!(transmit.data, b"LISTSCRIPTS\r\n");
//!
//! client.handle_input(b"\"vacation\" ACTIVE\r\nOK\r\n", now);
//! let scripts = reply.try_recv().unwrap().unwrap();
//! assert!(scripts[0].active);
//! ```

mod state;
mod timer;
mod transmit;

use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

pub use state::ConnectionState;
pub use timer::Timer;
pub use transmit::Transmit;

use crate::Error;
use crate::parser::ResponseParser;
use crate::request::{Progress, Request};

/// Default time to wait for a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a sent request may wait for its response.
    pub timeout: Duration,
    /// Delay after the queue drains before [`Event::Idle`] fires.
    /// `None` or zero disables the idle timer.
    pub idle: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            idle: None,
        }
    }
}

/// Notification produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The queue has been empty for the idle interval.
    Idle,
    /// The request timeout fired while only optional requests were waiting.
    Timeout,
    /// STARTTLS was accepted; upgrade the transport and call
    /// [`Client::complete_upgrade`].
    SecureUpgrade,
    /// The connection is gone.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

/// Sans-I/O ManageSieve client.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    state: ConnectionState,
    secured: bool,
    queue: VecDeque<Request>,
    buffer: BytesMut,
    outbound: VecDeque<Transmit>,
    events: VecDeque<Event>,
    timer: Timer,
    upgrade: Option<Request>,
}

impl Client {
    /// Creates a disconnected engine.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            secured: false,
            queue: VecDeque::new(),
            buffer: BytesMut::new(),
            outbound: VecDeque::new(),
            events: VecDeque::new(),
            timer: Timer::None,
            upgrade: None,
        }
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns `true` once the channel is encrypted.
    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// Returns `true` while requests are queued.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Returns the number of queued requests.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Marks the transport as being established.
    ///
    /// Requests enqueued from now on are held until [`Client::connected`].
    pub fn connecting(&mut self) {
        debug!("Connecting");
        self.state = ConnectionState::Connecting;
        self.secured = false;
        self.buffer.clear();
    }

    /// Marks the transport as open and sends whatever is queued.
    pub fn connected(&mut self, now: Instant, secured: bool) {
        debug!(secured, "Connected");
        self.state = ConnectionState::Connected;
        self.secured = secured;
        self.flush();
        self.rearm(now);
    }

    /// Queues a request.
    ///
    /// A disconnected engine fails the request immediately.
    pub fn enqueue(&mut self, request: Request, now: Instant) {
        if !self.state.is_open() {
            request.abandon(Error::Disconnected("not connected".to_string()));
            return;
        }

        debug!(request = request.name(), greedy = request.is_greedy(), "Enqueue");
        self.queue.push_back(request);

        if self.state.can_send() {
            if !self.buffer.is_empty() {
                self.demultiplex();
            }
            self.flush();
            self.rearm(now);
        }
    }

    /// Returns the next bytes to write, if any.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Returns the next notification, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Returns true while transmits or events are waiting to be polled.
    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty() || !self.events.is_empty()
    }

    /// Returns when [`Client::handle_timeout`] should be called next.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Feeds bytes received from the server.
    pub fn handle_input(&mut self, data: &[u8], now: Instant) {
        trace!(data = %String::from_utf8_lossy(data), "S: ");
        self.buffer.extend_from_slice(data);

        if self.queue.is_empty() {
            debug!(buffered = self.buffer.len(), "No request waiting, keeping data");
            return;
        }

        self.timer = Timer::None;
        self.demultiplex();
        self.flush();
        self.rearm(now);
    }

    /// Pairs buffered bytes with queued requests.
    ///
    /// The queue is detached while responses are dispatched and merged back
    /// afterwards, so requests queued meanwhile always land behind it.
    fn demultiplex(&mut self) {
        let mut queue = mem::take(&mut self.queue);
        let mut idx = 0;

        while idx < queue.len() && !self.buffer.is_empty() {
            let mut parser = ResponseParser::new(&self.buffer);
            let result = queue[idx].add_response(&mut parser);
            let consumed = parser.position();

            match result {
                Ok(progress) => {
                    self.buffer.advance(consumed);

                    // Greedy requests skipped on the way never got their response.
                    for skipped in queue.drain(..idx) {
                        skipped.abandon(Error::Protocol("no response".to_string()));
                    }
                    idx = 0;

                    match progress {
                        Progress::Pending => break,
                        Progress::Complete => {
                            if let Some(done) = queue.pop_front() {
                                debug!(request = done.name(), "Request complete");
                            }
                        }
                        Progress::SecureUpgrade => {
                            self.begin_upgrade(queue.pop_front());
                            break;
                        }
                    }
                }
                Err(err) if queue[idx].is_greedy() => {
                    debug!(request = queue[idx].name(), error = %err, "Optional request skipped");
                    idx += 1;
                }
                Err(err) => {
                    trace!(request = queue[idx].name(), error = %err, "Waiting for more data");
                    break;
                }
            }
        }

        queue.extend(self.queue.drain(..));
        self.queue = queue;
    }

    fn begin_upgrade(&mut self, request: Option<Request>) {
        if !self.buffer.is_empty() {
            warn!(
                discarded = self.buffer.len(),
                "Discarding plaintext received after STARTTLS"
            );
            self.buffer.clear();
        }

        debug!("Upgrading to TLS");
        self.upgrade = request;
        self.state = ConnectionState::Upgrading;
        self.events.push_back(Event::SecureUpgrade);
    }

    /// Reports the outcome of the transport upgrade requested by
    /// [`Event::SecureUpgrade`].
    ///
    /// On failure the STARTTLS request fails with the given error and the
    /// engine disconnects.
    pub fn complete_upgrade(&mut self, result: crate::Result<()>, now: Instant) {
        if self.state != ConnectionState::Upgrading {
            return;
        }
        let request = self.upgrade.take();

        match result {
            Ok(()) => {
                debug!("TLS upgrade complete");
                self.secured = true;
                self.state = ConnectionState::Connected;
                if let Some(request) = request {
                    request.finish_upgrade(Ok(()));
                }
                self.flush();
                self.rearm(now);
            }
            Err(err) => {
                let reason = format!("TLS upgrade failed: {err}");
                if let Some(request) = request {
                    request.finish_upgrade(Err(err));
                }
                self.disconnect(&reason);
            }
        }
    }

    /// Handles an expired timer.
    pub fn handle_timeout(&mut self, now: Instant) {
        if !self.timer.is_expired(now) {
            return;
        }

        match self.timer {
            Timer::Timeout(_) => {
                self.timer = Timer::None;
                self.buffer.clear();

                if let Some(idx) = self.queue.iter().position(|r| !r.is_greedy()) {
                    warn!(request = self.queue[idx].name(), timeout = ?self.config.timeout, "Request timed out");
                    for expired in self.queue.drain(..=idx) {
                        expired.abandon(Error::Timeout(self.config.timeout));
                    }
                } else {
                    // Only optional requests were waiting: drop them unanswered.
                    warn!(dropped = self.queue.len(), "Timed out with no request pending");
                    self.queue.clear();
                    self.events.push_back(Event::Timeout);
                }

                self.flush();
                self.rearm(now);
            }
            Timer::Idle(_) => {
                trace!("Idle");
                self.timer = Timer::None;
                self.events.push_back(Event::Idle);
            }
            Timer::None => {}
        }
    }

    /// Tears the connection down.
    ///
    /// Buffered bytes are matched one last time, then every remaining
    /// request fails with [`Error::Disconnected`]. Calling this again has no
    /// effect.
    pub fn disconnect(&mut self, reason: &str) {
        if !self.state.is_open() {
            return;
        }

        if !self.queue.is_empty() && !self.buffer.is_empty() {
            self.demultiplex();
        }

        debug!(reason, "Disconnected");
        self.state = ConnectionState::Disconnected;
        self.secured = false;
        self.timer = Timer::None;
        self.buffer.clear();
        self.outbound.clear();

        if let Some(request) = self.upgrade.take() {
            request.finish_upgrade(Err(Error::Disconnected(reason.to_string())));
        }
        for request in self.queue.drain(..) {
            request.abandon(Error::Disconnected(reason.to_string()));
        }

        self.events.push_back(Event::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Moves every pending request chunk into the outbound queue.
    fn flush(&mut self) {
        if !self.state.can_send() {
            return;
        }

        for request in &mut self.queue {
            if let Some(transmit) = request.next_request() {
                trace!(request = request.name(), data = %transmit.display(), "C: ");
                self.outbound.push_back(transmit);
            }
            if request.is_exclusive() {
                break;
            }
        }
    }

    /// Arms the timeout while anything is queued, the idle timer otherwise.
    fn rearm(&mut self, now: Instant) {
        self.timer = if !self.state.can_send() {
            Timer::None
        } else if !self.queue.is_empty() {
            Timer::Timeout(now + self.config.timeout)
        } else {
            match self.config.idle {
                Some(idle) if !idle.is_zero() => Timer::Idle(now + idle),
                _ => Timer::None,
            }
        };
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
    use crate::request::sasl::{Credentials, Mechanism};
    use proptest::prelude::*;
    use tokio::sync::oneshot::error::TryRecvError;

    fn connected(config: ClientConfig) -> (Client, Instant) {
        let now = Instant::now();
        let mut client = Client::new(config);
        client.connecting();
        client.connected(now, false);
        (client, now)
    }

    fn sent(client: &mut Client) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(t) = client.poll_transmit() {
            out.extend_from_slice(&t.data);
        }
        out
    }

    #[test]
    fn test_pipelined_requests_resolve_in_order() {
        let (mut client, now) = connected(ClientConfig::default());
        let (first, mut first_rx) = Request::get_script("a");
        let (second, mut second_rx) = Request::delete_script("b");
        client.enqueue(first, now);
        client.enqueue(second, now);

        assert_eq!(sent(&mut client), b"GETSCRIPT \"a\"\r\nDELETESCRIPT \"b\"\r\n");

        client.handle_input(b"{4}\r\nkeep\r\nOK\r\nNO (NONEXISTENT)\r\n", now);
        assert_eq!(first_rx.try_recv().unwrap().unwrap(), "keep");
        assert!(second_rx.try_recv().unwrap().is_err());
        assert!(!client.is_busy());
    }

    #[test]
    fn test_fragmented_response() {
        let (mut client, now) = connected(ClientConfig::default());
        let (request, mut rx) = Request::list_scripts();
        client.enqueue(request, now);

        client.handle_input(b"\"vaca", now);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(client.poll_timeout(), Some(_)));

        client.handle_input(b"tion\" ACTIVE\r\nOK\r", now);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        client.handle_input(b"\n", now);
        assert_eq!(rx.try_recv().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_unsolicited_data_is_kept() {
        let now = Instant::now();
        let mut client = Client::new(ClientConfig::default());
        client.connecting();
        client.connected(now, false);
        client.handle_input(b"\"IMPLEMENTATION\" \"x\"\r\nOK\r\n", now);

        let (request, mut rx) = Request::init();
        client.enqueue(request, now);
        assert_eq!(rx.try_recv().unwrap().unwrap().implementation, "x");
    }

    #[test]
    fn test_greedy_request_is_skipped() {
        let (mut client, now) = connected(ClientConfig::default());
        let (greedy, mut greedy_rx) = Request::init();
        let (list, mut list_rx) = Request::list_scripts();
        client.enqueue(greedy.greedy(), now);
        client.enqueue(list, now);

        client.handle_input(b"\"a\"\r\nOK\r\n", now);
        assert_eq!(list_rx.try_recv().unwrap().unwrap().len(), 1);
        assert!(matches!(greedy_rx.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(client.queue_len(), 0);
    }

    #[test]
    fn test_greedy_request_behind_survives() {
        let (mut client, now) = connected(ClientConfig::default());
        let (capability, mut capability_rx) = Request::capability();
        let (greedy, mut greedy_rx) = Request::init();
        client.enqueue(capability, now);
        client.enqueue(greedy.greedy(), now);

        client.handle_input(b"\"IMPLEMENTATION\" \"one\"\r\nOK\r\n", now);
        assert_eq!(capability_rx.try_recv().unwrap().unwrap().implementation, "one");
        assert_eq!(client.queue_len(), 1);

        // Only greedy requests left: the timeout stays armed.
        assert!(matches!(client.timer, Timer::Timeout(_)));

        client.handle_input(b"\"IMPLEMENTATION\" \"two\"\r\nOK\r\n", now);
        assert_eq!(greedy_rx.try_recv().unwrap().unwrap().implementation, "two");
        assert_eq!(client.queue_len(), 0);
    }

    #[test]
    fn test_timeout_fails_request() {
        let (mut client, now) = connected(ClientConfig::default());
        let (request, mut rx) = Request::get_script("never");
        client.enqueue(request, now);
        sent(&mut client);

        let deadline = client.poll_timeout().unwrap();
        assert_eq!(deadline, now + DEFAULT_TIMEOUT);

        client.handle_timeout(deadline - Duration::from_millis(1));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        client.handle_timeout(deadline);
        assert!(rx.try_recv().unwrap().unwrap_err().is_timeout());
        assert_eq!(client.queue_len(), 0);
        assert_eq!(client.poll_event(), None);
    }

    #[test]
    fn test_timeout_drops_greedy_ahead_but_keeps_greedy_behind() {
        let (mut client, now) = connected(ClientConfig::default());
        let (ahead, mut ahead_rx) = Request::init();
        let (noop, mut noop_rx) = Request::noop(None);
        let (behind, mut behind_rx) = Request::init();
        client.enqueue(ahead.greedy(), now);
        client.enqueue(noop, now);
        client.enqueue(behind.greedy(), now);

        client.handle_timeout(client.poll_timeout().unwrap());
        assert!(matches!(ahead_rx.try_recv(), Err(TryRecvError::Closed)));
        assert!(noop_rx.try_recv().unwrap().unwrap_err().is_timeout());
        assert!(matches!(behind_rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(client.queue_len(), 1);
    }

    #[test]
    fn test_oversized_literal_times_out() {
        let (mut client, now) = connected(ClientConfig::default());
        let (request, mut rx) = Request::get_script("big");
        client.enqueue(request, now);

        client.handle_input(b"{18446744073709551615}\r\nabc", now);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        client.handle_timeout(client.poll_timeout().unwrap());
        assert!(rx.try_recv().unwrap().unwrap_err().is_timeout());
    }

    #[test]
    fn test_timeout_with_only_greedy_requests() {
        let (mut client, now) = connected(ClientConfig::default());
        let (greedy, mut greedy_rx) = Request::init();
        client.enqueue(greedy.greedy(), now);

        let deadline = client.poll_timeout().unwrap();
        assert_eq!(deadline, now + DEFAULT_TIMEOUT);

        client.handle_timeout(deadline);
        assert!(matches!(greedy_rx.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(client.poll_event(), Some(Event::Timeout));
        assert_eq!(client.queue_len(), 0);
        assert!(!client.is_busy());
    }

    #[test]
    fn test_idle_event() {
        let idle = Duration::from_secs(60);
        let (mut client, now) = connected(ClientConfig {
            idle: Some(idle),
            ..ClientConfig::default()
        });
        assert_eq!(client.poll_timeout(), Some(now + idle));

        client.handle_timeout(now + idle);
        assert_eq!(client.poll_event(), Some(Event::Idle));
        assert_eq!(client.poll_timeout(), None);
    }

    #[test]
    fn test_zero_idle_disables_timer() {
        let (client, _) = connected(ClientConfig {
            idle: Some(Duration::ZERO),
            ..ClientConfig::default()
        });
        assert_eq!(client.poll_timeout(), None);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut client, now) = connected(ClientConfig::default());
        let (request, mut rx) = Request::noop(None);
        client.enqueue(request, now);

        client.disconnect("closed by peer");
        client.disconnect("closed again");

        assert!(rx.try_recv().unwrap().unwrap_err().is_disconnect());
        assert_eq!(
            client.poll_event(),
            Some(Event::Disconnected {
                reason: "closed by peer".into()
            })
        );
        assert_eq!(client.poll_event(), None);
        assert_eq!(client.poll_timeout(), None);
    }

    #[test]
    fn test_disconnect_flushes_buffered_response() {
        let (mut client, now) = connected(ClientConfig::default());
        let (request, mut rx) = Request::logout();
        client.enqueue(request, now);
        client.handle_input(b"OK \"Logout\"\r", now);
        client.buffer.extend_from_slice(b"\n");

        client.disconnect("eof");
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_enqueue_while_disconnected() {
        let mut client = Client::new(ClientConfig::default());
        let (request, mut rx) = Request::capability();
        client.enqueue(request, Instant::now());
        assert!(rx.try_recv().unwrap().unwrap_err().is_disconnect());
        assert!(client.poll_transmit().is_none());
    }

    #[test]
    fn test_requests_wait_for_connection() {
        let now = Instant::now();
        let mut client = Client::new(ClientConfig::default());
        client.connecting();
        let (request, _rx) = Request::capability();
        client.enqueue(request, now);
        assert!(client.poll_transmit().is_none());

        client.connected(now, false);
        assert_eq!(sent(&mut client), b"CAPABILITY\r\n");
    }

    #[test]
    fn test_exclusive_request_blocks_pipeline() {
        let (mut client, now) = connected(ClientConfig::default());
        let (init, _init_rx) = Request::init();
        let (list, _list_rx) = Request::list_scripts();
        client.enqueue(init, now);
        client.enqueue(list, now);
        assert!(client.poll_transmit().is_none());

        client.handle_input(b"\"IMPLEMENTATION\" \"x\"\r\nOK\r\n", now);
        assert_eq!(sent(&mut client), b"LISTSCRIPTS\r\n");
    }

    #[test]
    fn test_starttls_upgrade() {
        let (mut client, now) = connected(ClientConfig::default());
        let (starttls, mut starttls_rx) = Request::start_tls();
        let (capability, _capability_rx) = Request::capability();
        client.enqueue(starttls, now);
        client.enqueue(capability, now);
        assert_eq!(sent(&mut client), b"STARTTLS\r\n");

        client.handle_input(b"OK\r\n", now);
        assert_eq!(client.poll_event(), Some(Event::SecureUpgrade));
        assert_eq!(client.state(), ConnectionState::Upgrading);
        assert!(matches!(starttls_rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(client.poll_transmit().is_none());

        client.complete_upgrade(Ok(()), now);
        assert!(client.is_secured());
        assert!(starttls_rx.try_recv().unwrap().is_ok());
        assert_eq!(sent(&mut client), b"CAPABILITY\r\n");
    }

    #[test]
    fn test_failed_upgrade_disconnects() {
        let (mut client, now) = connected(ClientConfig::default());
        let (starttls, mut starttls_rx) = Request::start_tls();
        client.enqueue(starttls, now);
        client.handle_input(b"OK\r\n", now);

        client.complete_upgrade(Err(Error::Protocol("bad certificate".into())), now);
        assert!(matches!(starttls_rx.try_recv().unwrap(), Err(Error::Protocol(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_sasl_login_writes() {
        let (mut client, now) = connected(ClientConfig::default());
        let credentials = Credentials::new("geek", "th3g33k1");
        let (auth, mut auth_rx) = Request::authenticate(Mechanism::Login, &credentials).unwrap();
        let (list, _list_rx) = Request::list_scripts();
        client.enqueue(auth, now);
        client.enqueue(list, now);

        let mut writes = Vec::new();
        writes.push(client.poll_transmit().unwrap().data);
        assert!(client.poll_transmit().is_none());

        client.handle_input(b"{12}\r\nVXNlcm5hbWU6\r\n", now);
        writes.push(client.poll_transmit().unwrap().data);
        client.handle_input(b"{12}\r\nUGFzc3dvcmQ6\r\n", now);
        writes.push(client.poll_transmit().unwrap().data);

        assert_eq!(
            writes,
            vec![
                b"AUTHENTICATE \"LOGIN\"\r\n".to_vec(),
                b"{8+}\r\nZ2Vlaw==\r\n".to_vec(),
                b"{12+}\r\ndGgzZzMzazE=\r\n".to_vec(),
            ]
        );
        assert!(client.poll_transmit().is_none());

        client.handle_input(b"OK\r\n", now);
        assert!(auth_rx.try_recv().unwrap().is_ok());
        assert_eq!(sent(&mut client), b"LISTSCRIPTS\r\n");
    }

    fn split_points(len: usize, cuts: &[usize]) -> Vec<usize> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (len + 1)).collect();
        points.push(0);
        points.push(len);
        points.sort_unstable();
        points.dedup();
        points
    }

    proptest! {
        #[test]
        fn fragmentation_does_not_change_results(cuts in proptest::collection::vec(any::<usize>(), 0..8)) {
            let wire: &[u8] = b"\"IMPLEMENTATION\" \"Example v1\"\r\n\"SASL\" \"PLAIN LOGIN\"\r\nOK\r\n\
{12}\r\nkeep;\r\nstop;\r\nOK\r\n\
\"a\"\r\n\"b\" ACTIVE\r\nOK \"done\"\r\n";

            let (mut client, now) = connected(ClientConfig::default());
            let (init, mut init_rx) = Request::init();
            let (get, mut get_rx) = Request::get_script("a");
            let (list, mut list_rx) = Request::list_scripts();
            client.enqueue(init, now);
            client.enqueue(get, now);
            client.enqueue(list, now);

            let points = split_points(wire.len(), &cuts);
            for pair in points.windows(2) {
                client.handle_input(&wire[pair[0]..pair[1]], now);
            }

            let caps = init_rx.try_recv().unwrap().unwrap();
            prop_assert_eq!(caps.implementation, "Example v1");
            prop_assert_eq!(caps.sasl, vec!["PLAIN".to_string(), "LOGIN".to_string()]);
            prop_assert_eq!(get_rx.try_recv().unwrap().unwrap(), "keep;\r\nstop;");
            let scripts = list_rx.try_recv().unwrap().unwrap();
            prop_assert_eq!(scripts.len(), 2);
            prop_assert!(scripts[1].active);
            prop_assert_eq!(client.queue_len(), 0);
        }

        #[test]
        fn responses_fire_in_enqueue_order(count in 1usize..12) {
            let (mut client, now) = connected(ClientConfig::default());
            let mut receivers = Vec::new();
            for i in 0..count {
                let (request, rx) = Request::set_active(format!("s{i}"));
                client.enqueue(request, now);
                receivers.push(rx);
            }

            let mut wire = Vec::new();
            for i in 0..count {
                wire.extend_from_slice(format!("OK \"{i}\"\r\n").as_bytes());
            }
            client.handle_input(&wire, now);

            for (i, mut rx) in receivers.into_iter().enumerate() {
                let response = rx.try_recv().unwrap().unwrap();
                prop_assert_eq!(response.message(), i.to_string());
            }
        }
    }
}
