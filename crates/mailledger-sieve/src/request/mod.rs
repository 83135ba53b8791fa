//! Requests and their response handling.
//!
//! A [`Request`] pairs a ManageSieve command with the code that interprets
//! the server's answer and a one-shot channel that receives the typed
//! outcome. The set of requests is closed: each constructor returns the
//! request together with the receiving end of its reply channel.
//!
//! Requests are driven by the [`Client`](crate::client::Client):
//!
//! 1. [`Request::next_request`] yields the bytes to send.
//! 2. [`Request::add_response`] consumes one server reply from a
//!    [`ResponseParser`]. A parse failure leaves the request untouched so
//!    it can be retried once more bytes arrive.
//! 3. On completion the reply channel fires exactly once, unless the
//!    request is greedy and is dropped unanswered.

pub mod sasl;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::Transmit;
use crate::command::Command;
use crate::parser::{ResponseParser, response};
use crate::types::{Capabilities, Response, ScriptInfo, Status};
use crate::{Error, Result};

use sasl::{Credentials, Exchange, Mechanism};

/// Receiving end of a request's reply channel.
pub type ReplyReceiver<T> = oneshot::Receiver<Result<T>>;

type Slot<T> = Option<oneshot::Sender<Result<T>>>;

fn slot<T>() -> (Slot<T>, ReplyReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (Some(tx), rx)
}

fn resolve<T>(slot: &mut Slot<T>, result: Result<T>) {
    if let Some(tx) = slot.take() {
        // The caller may have stopped waiting.
        let _ = tx.send(result);
    }
}

/// Outcome of feeding one server reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The request owes more output (a SASL reply) and stays at the queue head.
    Pending,
    /// The request is finished and its reply has been delivered.
    Complete,
    /// STARTTLS succeeded; the transport must be upgraded before the reply
    /// is delivered with [`Request::finish_upgrade`].
    SecureUpgrade,
}

enum Kind {
    Init(Slot<Capabilities>),
    Capability(Slot<Capabilities>),
    StartTls {
        reply: Slot<Response>,
        accepted: Option<Response>,
    },
    Logout(Slot<Response>),
    Simple(Slot<Response>),
    ListScripts(Slot<Vec<ScriptInfo>>),
    GetScript(Slot<String>),
    Authenticate {
        exchange: Exchange,
        pending: Option<Vec<u8>>,
        failure: Option<Error>,
        reply: Slot<Response>,
    },
}

/// A queued ManageSieve command.
pub struct Request {
    name: &'static str,
    command: Option<Command>,
    kind: Kind,
    greedy: bool,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name)
            .field("greedy", &self.greedy)
            .field("has_request", &self.has_request())
            .finish_non_exhaustive()
    }
}

impl Request {
    fn new(name: &'static str, command: Option<Command>, kind: Kind) -> Self {
        Self {
            name,
            command,
            kind,
            greedy: false,
        }
    }

    fn simple(command: Command) -> (Self, ReplyReceiver<Response>) {
        let (reply, rx) = slot();
        (Self::new(command.name(), Some(command), Kind::Simple(reply)), rx)
    }

    /// Waits for the capability greeting the server sends unprompted.
    ///
    /// Sends no bytes.
    #[must_use]
    pub fn init() -> (Self, ReplyReceiver<Capabilities>) {
        let (reply, rx) = slot();
        (Self::new("INIT", None, Kind::Init(reply)), rx)
    }

    /// `CAPABILITY`.
    #[must_use]
    pub fn capability() -> (Self, ReplyReceiver<Capabilities>) {
        let (reply, rx) = slot();
        (
            Self::new("CAPABILITY", Some(Command::Capability), Kind::Capability(reply)),
            rx,
        )
    }

    /// `STARTTLS`.
    #[must_use]
    pub fn start_tls() -> (Self, ReplyReceiver<Response>) {
        let (reply, rx) = slot();
        (
            Self::new(
                "STARTTLS",
                Some(Command::StartTls),
                Kind::StartTls {
                    reply,
                    accepted: None,
                },
            ),
            rx,
        )
    }

    /// `LOGOUT`. A `BYE` answer counts as success.
    #[must_use]
    pub fn logout() -> (Self, ReplyReceiver<Response>) {
        let (reply, rx) = slot();
        (Self::new("LOGOUT", Some(Command::Logout), Kind::Logout(reply)), rx)
    }

    /// `NOOP`, optionally with a tag the server echoes back.
    #[must_use]
    pub fn noop(tag: Option<String>) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::Noop { tag })
    }

    /// `LISTSCRIPTS`.
    #[must_use]
    pub fn list_scripts() -> (Self, ReplyReceiver<Vec<ScriptInfo>>) {
        let (reply, rx) = slot();
        (
            Self::new("LISTSCRIPTS", Some(Command::ListScripts), Kind::ListScripts(reply)),
            rx,
        )
    }

    /// `GETSCRIPT`.
    #[must_use]
    pub fn get_script(name: impl Into<String>) -> (Self, ReplyReceiver<String>) {
        let (reply, rx) = slot();
        let command = Command::GetScript { name: name.into() };
        (Self::new("GETSCRIPT", Some(command), Kind::GetScript(reply)), rx)
    }

    /// `PUTSCRIPT`. The body's line endings are normalized to CRLF.
    #[must_use]
    pub fn put_script(
        name: impl Into<String>,
        script: impl Into<String>,
    ) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::PutScript {
            name: name.into(),
            script: script.into(),
        })
    }

    /// `CHECKSCRIPT`.
    #[must_use]
    pub fn check_script(script: impl Into<String>) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::CheckScript {
            script: script.into(),
        })
    }

    /// `SETACTIVE`. An empty name deactivates every script.
    #[must_use]
    pub fn set_active(name: impl Into<String>) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::SetActive { name: name.into() })
    }

    /// `DELETESCRIPT`.
    #[must_use]
    pub fn delete_script(name: impl Into<String>) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::DeleteScript { name: name.into() })
    }

    /// `RENAMESCRIPT`.
    #[must_use]
    pub fn rename_script(
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> (Self, ReplyReceiver<Response>) {
        Self::simple(Command::RenameScript {
            old_name: old_name.into(),
            new_name: new_name.into(),
        })
    }

    /// `AUTHENTICATE` with the given mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the credentials do not fit the mechanism.
    pub fn authenticate(
        mechanism: Mechanism,
        credentials: &Credentials,
    ) -> Result<(Self, ReplyReceiver<Response>)> {
        Ok(Self::from_exchange(Exchange::new(mechanism, credentials)?))
    }

    pub(crate) fn from_exchange(exchange: Exchange) -> (Self, ReplyReceiver<Response>) {
        let (reply, rx) = slot();
        let command = exchange.initial();
        (
            Self::new(
                "AUTHENTICATE",
                Some(command),
                Kind::Authenticate {
                    exchange,
                    pending: None,
                    failure: None,
                    reply,
                },
            ),
            rx,
        )
    }

    /// Marks the request as greedy: it may receive no response at all.
    ///
    /// A greedy request that cannot parse the buffered bytes is skipped, and
    /// one left unanswered is dropped without firing its reply.
    #[must_use]
    pub const fn greedy(mut self) -> Self {
        self.greedy = true;
        self
    }

    /// Returns true if the request is greedy.
    #[must_use]
    pub const fn is_greedy(&self) -> bool {
        self.greedy
    }

    /// Returns the command keyword, or `INIT` for the greeting.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if bytes are waiting to be sent.
    #[must_use]
    pub const fn has_request(&self) -> bool {
        self.command.is_some()
            || matches!(
                self.kind,
                Kind::Authenticate {
                    pending: Some(_),
                    ..
                }
            )
    }

    /// Returns true if the request expects further rounds after its last reply.
    #[must_use]
    pub const fn has_next_request(&self) -> bool {
        match &self.kind {
            Kind::Authenticate { reply, .. } => reply.is_some(),
            _ => false,
        }
    }

    /// Returns true if nothing may be sent after this request until it completes.
    ///
    /// The greeting, STARTTLS and AUTHENTICATE change the session state that
    /// later commands depend on.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        match self.kind {
            Kind::Init(_) => !self.greedy,
            Kind::StartTls { .. } | Kind::Authenticate { .. } => true,
            _ => false,
        }
    }

    /// Takes the next chunk of wire output.
    pub fn next_request(&mut self) -> Option<Transmit> {
        if let Some(command) = self.command.take() {
            let data = command.serialize();
            return Some(if command.is_sensitive() {
                Transmit::sensitive(data)
            } else {
                Transmit::new(data)
            });
        }

        match &mut self.kind {
            Kind::Authenticate { pending, .. } => pending.take().map(Transmit::sensitive),
            _ => None,
        }
    }

    /// Consumes one server reply from the parser.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered bytes do not hold a complete reply
    /// for this request. A greedy request also fails on a non-`OK` status so
    /// the reply is left for the requests behind it.
    pub fn add_response(&mut self, parser: &mut ResponseParser<'_>) -> Result<Progress> {
        let greedy = self.greedy;

        match &mut self.kind {
            Kind::Init(reply) | Kind::Capability(reply) => {
                let (capabilities, status) = response::parse_capabilities(parser)?;
                settle(greedy, reply, status, capabilities)
            }
            Kind::ListScripts(reply) => {
                let (scripts, status) = response::parse_script_list(parser)?;
                settle(greedy, reply, status, scripts)
            }
            Kind::GetScript(reply) => {
                let (body, status) = response::parse_script_body(parser)?;
                settle(greedy, reply, status, body.unwrap_or_default())
            }
            Kind::Simple(reply) => {
                let status = response::parse_response(parser)?;
                let value = status.clone();
                settle(greedy, reply, status, value)
            }
            Kind::Logout(reply) => {
                let status = response::parse_response(parser)?;
                if status.status == Status::Bye {
                    resolve(reply, Ok(status));
                    return Ok(Progress::Complete);
                }
                let value = status.clone();
                settle(greedy, reply, status, value)
            }
            Kind::StartTls { reply, accepted } => {
                let status = response::parse_response(parser)?;
                if status.is_ok() {
                    *accepted = Some(status);
                    return Ok(Progress::SecureUpgrade);
                }
                resolve(reply, Err(Error::from_response(status)));
                Ok(Progress::Complete)
            }
            Kind::Authenticate {
                exchange,
                pending,
                failure,
                reply,
            } => {
                if parser.is_string() {
                    let challenge = parser.extract_string()?;
                    parser.extract_line_break()?;

                    if failure.is_some() {
                        *pending = Some(sasl::ABORT.to_vec());
                        return Ok(Progress::Pending);
                    }

                    match exchange.challenge(&challenge) {
                        Ok(answer) => *pending = Some(answer),
                        Err(err) => {
                            warn!(mechanism = %exchange.mechanism(), error = %err, "Aborting SASL exchange");
                            *failure = Some(err);
                            *pending = Some(sasl::ABORT.to_vec());
                        }
                    }
                    return Ok(Progress::Pending);
                }

                let status = response::parse_response(parser)?;
                let result = match failure.take() {
                    Some(err) => Err(err),
                    None => exchange.finish(status),
                };
                resolve(reply, result);
                Ok(Progress::Complete)
            }
        }
    }

    /// Delivers the STARTTLS reply once the transport upgrade finished.
    pub fn finish_upgrade(mut self, result: Result<()>) {
        if let Kind::StartTls { reply, accepted } = &mut self.kind {
            let accepted = accepted.take().unwrap_or_else(|| Response::new(Status::Ok));
            resolve(reply, result.map(|()| accepted));
        }
    }

    /// Fails the request with the given error.
    ///
    /// Greedy requests are dropped silently.
    pub fn abandon(mut self, error: Error) {
        if self.greedy {
            debug!(request = self.name, "Dropping unanswered optional request");
            return;
        }

        debug!(request = self.name, error = %error, "Abandoning request");
        match &mut self.kind {
            Kind::Init(reply) | Kind::Capability(reply) => resolve(reply, Err(error)),
            Kind::StartTls { reply, .. }
            | Kind::Logout(reply)
            | Kind::Simple(reply)
            | Kind::Authenticate { reply, .. } => resolve(reply, Err(error)),
            Kind::ListScripts(reply) => resolve(reply, Err(error)),
            Kind::GetScript(reply) => resolve(reply, Err(error)),
        }
    }
}

/// Delivers the value for `OK` and the server error otherwise.
fn settle<T>(greedy: bool, reply: &mut Slot<T>, status: Response, value: T) -> Result<Progress> {
    if status.is_ok() {
        resolve(reply, Ok(value));
    } else if greedy {
        return Err(Error::Protocol(format!(
            "optional request does not take a {} response",
            status.status
        )));
    } else {
        resolve(reply, Err(Error::from_response(status)));
    }
    Ok(Progress::Complete)
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
    use crate::types::ResponseCode;

    fn feed(request: &mut Request, input: &[u8]) -> (Result<Progress>, usize) {
        let mut parser = ResponseParser::new(input);
        let progress = request.add_response(&mut parser);
        (progress, parser.position())
    }

    #[test]
    fn test_init_sends_nothing() {
        let (mut request, _rx) = Request::init();
        assert!(!request.has_request());
        assert!(request.next_request().is_none());
        assert!(request.is_exclusive());
        assert!(!request.greedy().is_exclusive());
    }

    #[test]
    fn test_command_is_sent_once() {
        let (mut request, _rx) = Request::get_script("vacation");
        assert!(request.has_request());
        assert_eq!(request.next_request().unwrap().data, b"GETSCRIPT \"vacation\"\r\n");
        assert!(!request.has_request());
        assert!(request.next_request().is_none());
    }

    #[test]
    fn test_get_script_success() {
        let (mut request, mut rx) = Request::get_script("s");
        let (progress, consumed) = feed(&mut request, b"{5}\r\nkeep;\r\nOK\r\nextra");
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert_eq!(consumed, 16);
        assert_eq!(rx.try_recv().unwrap().unwrap(), "keep;");
    }

    #[test]
    fn test_no_status_is_delivered_as_error() {
        let (mut request, mut rx) = Request::delete_script("s");
        let (progress, _) = feed(&mut request, b"NO (ACTIVE) \"script is active\"\r\n");
        assert_eq!(progress.unwrap(), Progress::Complete);

        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.response_code(), Some(&ResponseCode::Active));
    }

    #[test]
    fn test_partial_input_does_not_resolve() {
        let (mut request, mut rx) = Request::list_scripts();
        let (progress, _) = feed(&mut request, b"\"a\" ACTIVE\r\n\"b\"\r\nO");
        assert!(progress.unwrap_err().is_parse());
        assert!(rx.try_recv().is_err());

        let (progress, _) = feed(&mut request, b"\"a\" ACTIVE\r\n\"b\"\r\nOK\r\n");
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert_eq!(rx.try_recv().unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_greedy_rejects_failure_status() {
        let (request, mut rx) = Request::init();
        let mut request = request.greedy();
        let (progress, _) = feed(&mut request, b"NO \"nope\"\r\n");
        assert!(progress.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_logout_accepts_bye() {
        let (mut request, mut rx) = Request::logout();
        let (progress, _) = feed(&mut request, b"BYE \"see you\"\r\n");
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert_eq!(rx.try_recv().unwrap().unwrap().status, Status::Bye);
    }

    #[test]
    fn test_starttls_waits_for_upgrade() {
        let (mut request, mut rx) = Request::start_tls();
        assert!(request.is_exclusive());
        let (progress, _) = feed(&mut request, b"OK \"Begin TLS negotiation now\"\r\n");
        assert_eq!(progress.unwrap(), Progress::SecureUpgrade);
        assert!(rx.try_recv().is_err());

        request.finish_upgrade(Ok(()));
        assert_eq!(rx.try_recv().unwrap().unwrap().message(), "Begin TLS negotiation now");
    }

    #[test]
    fn test_starttls_upgrade_failure() {
        let (mut request, mut rx) = Request::start_tls();
        feed(&mut request, b"OK\r\n").0.unwrap();
        request.finish_upgrade(Err(Error::Disconnected("handshake failed".into())));
        assert!(rx.try_recv().unwrap().unwrap_err().is_disconnect());
    }

    #[test]
    fn test_abandon() {
        let (request, mut rx) = Request::noop(None);
        request.abandon(Error::Timeout(std::time::Duration::from_secs(20)));
        assert!(rx.try_recv().unwrap().unwrap_err().is_timeout());

        let (request, mut rx) = Request::capability();
        request.greedy().abandon(Error::Disconnected("gone".into()));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_login_exchange() {
        let credentials = Credentials::new("geek", "th3g33k1");
        let (mut request, mut rx) = Request::authenticate(Mechanism::Login, &credentials).unwrap();

        let first = request.next_request().unwrap();
        assert_eq!(first.data, b"AUTHENTICATE \"LOGIN\"\r\n");
        assert!(first.sensitive);
        assert!(request.has_next_request());

        let (progress, _) = feed(&mut request, b"{12}\r\nVXNlcm5hbWU6\r\n");
        assert_eq!(progress.unwrap(), Progress::Pending);
        assert_eq!(request.next_request().unwrap().data, b"{8+}\r\nZ2Vlaw==\r\n");

        let (progress, _) = feed(&mut request, b"{12}\r\nUGFzc3dvcmQ6\r\n");
        assert_eq!(progress.unwrap(), Progress::Pending);
        assert_eq!(request.next_request().unwrap().data, b"{12+}\r\ndGgzZzMzazE=\r\n");

        let (progress, _) = feed(&mut request, b"OK\r\n");
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert!(!request.has_next_request());
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_bad_challenge_aborts_exchange() {
        let credentials = Credentials::new("user", "pencil");
        let exchange =
            Exchange::scram_with_nonce(sasl::ScramHash::Sha1, &credentials, "fyko+d2lbbFgONRv9qkxdawL")
                .unwrap();
        let (mut request, mut rx) = Request::from_exchange(exchange);
        assert_eq!(
            request.next_request().unwrap().data,
            b"AUTHENTICATE \"SCRAM-SHA-1\" \"biwsbj11c2VyLHI9ZnlrbytkMmxiYkZnT05Sdjlxa3hkYXdM\"\r\n"
        );

        // Server nonce does not extend ours.
        let (progress, _) = feed(&mut request, b"\"cj1hdHRhY2tlcixzPVFTWENSK1E2c2VrOGJmOTIsaT00MDk2\"\r\n");
        assert_eq!(progress.unwrap(), Progress::Pending);
        assert_eq!(request.next_request().unwrap().data, b"\"*\"\r\n");

        let (progress, _) = feed(&mut request, b"NO \"Authentication aborted\"\r\n");
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Auth(_))));
    }

    #[test]
    fn test_scram_verifier_in_ok_code() {
        let credentials = Credentials::new("user", "pencil");
        let exchange =
            Exchange::scram_with_nonce(sasl::ScramHash::Sha1, &credentials, "fyko+d2lbbFgONRv9qkxdawL")
                .unwrap();
        let (mut request, mut rx) = Request::from_exchange(exchange);
        request.next_request().unwrap();

        let (progress, _) = feed(
            &mut request,
            b"\"cj1meWtvK2QybGJiRmdPTlJ2OXFreGRhd0wzcmZjTkhZSlkxWlZ2V1ZzN2oscz1RU1hDUitRNnNlazhiZjkyLGk9NDA5Ng==\"\r\n",
        );
        assert_eq!(progress.unwrap(), Progress::Pending);
        assert_eq!(
            request.next_request().unwrap().data,
            b"\"Yz1iaXdzLHI9ZnlrbytkMmxiYkZnT05Sdjlxa3hkYXdMM3JmY05IWUpZMVpWdldWczdqLHA9djBYOHYzQnoyVDBDSkdiSlF5RjBYK0hJNFRzPQ==\"\r\n"
        );

        let (progress, _) = feed(
            &mut request,
            b"OK (SASL \"dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9\")\r\n",
        );
        assert_eq!(progress.unwrap(), Progress::Complete);
        assert!(rx.try_recv().unwrap().is_ok());
    }
}
