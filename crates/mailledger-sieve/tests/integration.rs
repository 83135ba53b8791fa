//! Integration tests for the ManageSieve session.
//!
//! These tests drive a full [`Session`] against a scripted server on the
//! other end of an in-memory duplex stream.

#![allow(clippy::unwrap_used, clippy::needless_collect)]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, duplex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mailledger_sieve::{
    Config, Credentials, Error, Mechanism, ResponseCode, SaslPreference, Security, Session,
    SessionConfig, SessionEvent,
};

const GREETING: &[u8] = b"\"IMPLEMENTATION\" \"Mock Sieve\"\r\n\
\"SASL\" \"PLAIN LOGIN\"\r\n\
\"SIEVE\" \"fileinto reject vacation\"\r\n\
\"VERSION\" \"1.0\"\r\n\
OK\r\n";

const LEGACY_GREETING: &[u8] = b"\"IMPLEMENTATION\" \"Old Sieve\"\r\n\
\"SASL\" \"PLAIN\"\r\n\
\"SIEVE\" \"fileinto\"\r\n\
OK\r\n";

/// One step of a scripted conversation.
enum Step {
    /// Server sends these bytes.
    Reply(&'static [u8]),
    /// Client must send exactly these bytes.
    Expect(&'static [u8]),
}

use Step::{Expect, Reply};

/// Plays the script and hands the stream back so the caller decides when
/// the connection closes.
async fn run_script<S>(mut stream: S, script: Vec<Step>) -> S
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for step in script {
        match step {
            Reply(data) => stream.write_all(data).await.unwrap(),
            Expect(expected) => {
                let mut buf = vec![0u8; expected.len()];
                stream.read_exact(&mut buf).await.unwrap();
                assert_eq!(
                    String::from_utf8_lossy(&buf),
                    String::from_utf8_lossy(expected)
                );
            }
        }
    }
    stream
}

fn serve(script: Vec<Step>) -> (DuplexStream, JoinHandle<DuplexStream>) {
    let (client, server) = duplex(4096);
    let task = tokio::spawn(run_script(server, script));
    (client, task)
}

fn config() -> SessionConfig {
    SessionConfig::new(
        Config::builder("sieve.example.com")
            .security(Security::None)
            .build(),
        Credentials::new("user", "secret"),
    )
}

fn login() -> Vec<Step> {
    vec![
        Reply(GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(b"OK \"Logged in\"\r\n"),
    ]
}

#[tokio::test]
async fn test_connect_and_manage_scripts() {
    let mut script = login();
    script.extend([
        Expect(b"LISTSCRIPTS\r\n"),
        Reply(b"\"vacation\" ACTIVE\r\n\"spam\"\r\nOK\r\n"),
        Expect(b"GETSCRIPT \"vacation\"\r\n"),
        Reply(b"{5}\r\nkeep;\r\nOK\r\n"),
        Expect(b"PUTSCRIPT \"new\" {12+}\r\nkeep;\r\nstop;\r\n"),
        Reply(b"OK (WARNINGS) \"line 2: stop is redundant\"\r\n"),
        Expect(b"SETACTIVE \"new\"\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"DELETESCRIPT \"new\"\r\n"),
        Reply(b"NO (ACTIVE) \"You may not delete an active script\"\r\n"),
        Expect(b"LOGOUT\r\n"),
        Reply(b"OK \"Logout complete\"\r\n"),
    ]);
    let (transport, server) = serve(script);

    let mut session = Session::connect_with(config(), transport).await.unwrap();
    assert!(session.is_connected());
    assert!(session.is_authenticated());
    assert!(!session.is_secure());
    assert_eq!(session.capabilities().implementation, "Mock Sieve");
    assert!(session.capabilities().has_extension("vacation"));
    assert!(session.compatibility().rename);

    let scripts = session.list_scripts().await.unwrap();
    assert_eq!(scripts.len(), 2);
    assert!(scripts[0].active);
    assert_eq!(scripts[1].name, "spam");

    assert_eq!(session.get_script("vacation").await.unwrap(), "keep;");

    let response = session.put_script("new", "keep;\nstop;").await.unwrap();
    assert_eq!(response.code, Some(ResponseCode::Warnings));

    session.activate_script("new").await.unwrap();

    let err = session.delete_script("new").await.unwrap_err();
    assert_eq!(err.response_code(), Some(&ResponseCode::Active));

    session.disconnect(false).await;
    assert!(!session.is_connected());
    session.disconnect(false).await;

    server.await.unwrap();
}

#[tokio::test]
async fn test_sasl_login_exchange() {
    let script = vec![
        Reply(GREETING),
        Expect(b"AUTHENTICATE \"LOGIN\"\r\n"),
        Reply(b"{12}\r\nVXNlcm5hbWU6\r\n"),
        Expect(b"{8+}\r\nZ2Vlaw==\r\n"),
        Reply(b"{12}\r\nUGFzc3dvcmQ6\r\n"),
        Expect(b"{12+}\r\ndGgzZzMzazE=\r\n"),
        Reply(b"OK\r\n"),
    ];
    let (transport, server) = serve(script);

    let config = SessionConfig::new(
        Config::builder("sieve.example.com")
            .security(Security::None)
            .build(),
        Credentials::new("geek", "th3g33k1"),
    )
    .mechanism(Mechanism::Login);

    let mut session = Session::connect_with(config, transport).await.unwrap();
    assert!(session.is_authenticated());

    server.await.unwrap();
    session.disconnect(true).await;
}

#[tokio::test]
async fn test_authentication_rejected() {
    let script = vec![
        Reply(GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(b"NO \"Authentication failed\"\r\n"),
    ];
    let (transport, server) = serve(script);

    let err = Session::connect_with(config(), transport).await.unwrap_err();
    assert!(matches!(err, Error::No { ref message, .. } if message == "Authentication failed"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_starttls_required_but_missing() {
    let (transport, server) = serve(vec![Reply(GREETING)]);
    let config = config().security(Security::StartTls);

    let err = Session::connect_with(config, transport).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_rename_and_check_are_emulated() {
    let script = vec![
        Reply(LEGACY_GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(b"OK\r\n"),
        // rename
        Expect(b"LISTSCRIPTS\r\n"),
        Reply(b"\"old\" ACTIVE\r\nOK\r\n"),
        Expect(b"GETSCRIPT \"old\"\r\n"),
        Reply(b"{5}\r\nkeep;\r\nOK\r\n"),
        Expect(b"PUTSCRIPT \"new\" {5+}\r\nkeep;\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"SETACTIVE \"new\"\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"DELETESCRIPT \"old\"\r\n"),
        Reply(b"OK\r\n"),
        // check
        Expect(b"PUTSCRIPT \"TMP_FILE_DELETE_ME\" {5+}\r\nkeep;\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"DELETESCRIPT \"TMP_FILE_DELETE_ME\"\r\n"),
        Reply(b"OK\r\n"),
        // noop falls back to capability
        Expect(b"CAPABILITY\r\n"),
        Reply(LEGACY_GREETING),
    ];
    let (transport, server) = serve(script);

    let mut session = Session::connect_with(config(), transport).await.unwrap();
    let compatibility = session.compatibility();
    assert!(!compatibility.rename);
    assert!(!compatibility.check_script);
    assert!(!compatibility.noop);

    session.rename_script("old", "new").await.unwrap();
    assert!(session.check_script("keep;").await.unwrap().is_ok());
    assert!(session.check_script("").await.unwrap().is_ok());
    session.noop().await.unwrap();

    server.await.unwrap();
    session.disconnect(true).await;
}

#[tokio::test]
async fn test_emulated_rename_refuses_existing_name() {
    let script = vec![
        Reply(LEGACY_GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"LISTSCRIPTS\r\n"),
        Reply(b"\"old\"\r\n\"new\"\r\nOK\r\n"),
    ];
    let (transport, server) = serve(script);

    let mut session = Session::connect_with(config(), transport).await.unwrap();
    let err = session.rename_script("old", "new").await.unwrap_err();
    assert_eq!(err.response_code(), Some(&ResponseCode::AlreadyExists));

    server.await.unwrap();
    session.disconnect(true).await;
}

#[tokio::test]
async fn test_referral_during_authentication() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let referral: &'static [u8] = format!(
        "BYE (REFERRAL \"sieve://127.0.0.1:{port}\") \"Try elsewhere\"\r\n"
    )
    .into_bytes()
    .leak();

    let (transport, first) = serve(vec![
        Reply(GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(referral),
    ]);

    let second = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = login();
        script.extend([Expect(b"LISTSCRIPTS\r\n"), Reply(b"OK\r\n")]);
        run_script(stream, script).await;
    });

    let mut session = Session::connect_with(config(), transport).await.unwrap();
    assert_eq!(session.host(), "127.0.0.1");
    assert_eq!(session.config().connection.port, port);
    assert!(session.is_authenticated());
    assert!(session.list_scripts().await.unwrap().is_empty());

    first.await.unwrap();
    second.await.unwrap();
    session.disconnect(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let (transport, server) = serve(vec![
        Reply(GREETING),
        Expect(b"GETSCRIPT \"slow\"\r\n"),
    ]);
    let config = config().sasl(SaslPreference::None).timeout(Duration::from_secs(5));

    let mut session = Session::connect_with(config, transport).await.unwrap();
    assert!(!session.is_authenticated());

    let err = session.get_script("slow").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(session.is_connected());

    server.await.unwrap();
    session.disconnect(true).await;
}

#[tokio::test]
async fn test_server_hangup_is_reported() {
    let (transport, server) = serve(vec![
        Reply(GREETING),
        Expect(b"AUTHENTICATE \"PLAIN\" \"AHVzZXIAc2VjcmV0\"\r\n"),
        Reply(b"OK\r\n"),
        Expect(b"LISTSCRIPTS\r\n"),
    ]);

    let mut session = Session::connect_with(config(), transport).await.unwrap();
    let mut events = session.take_events().unwrap();

    let (result, ()) = tokio::join!(session.list_scripts(), async {
        drop(server.await.unwrap());
    });
    assert!(result.unwrap_err().is_disconnect());
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::Disconnected { .. })
    ));
    assert!(!session.is_connected());

    let err = session.list_scripts().await.unwrap_err();
    assert!(err.is_disconnect());
}
