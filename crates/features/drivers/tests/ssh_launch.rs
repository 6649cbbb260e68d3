//! End-to-end SSH driver test against an in-process echo server.

use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use serde_json::json;
use shellcn_drivers::{AcceptAllVerifier, Driver, DriverError, SessionRequest, SshDriver};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct EchoHandler;

impl russh::server::Handler for EchoHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == "tester" && password == "secret" {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject { proceed_with_methods: None })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.data(channel, CryptoVec::from(data.to_vec()));
        Ok(())
    }
}

/// Binds an ephemeral port and serves SSH echo sessions on it.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let port = listener.local_addr().expect("local addr").port();

    let key = russh_keys::key::KeyPair::generate_ed25519().expect("generate host key");
    let config = Arc::new(russh::server::Config {
        keys: vec![key],
        ..russh::server::Config::default()
    });

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                if let Ok(session) =
                    russh::server::run_stream(config, socket, EchoHandler).await
                {
                    let _ = session.await;
                }
            });
        }
    });

    port
}

fn request(port: u16, protocol: &str) -> SessionRequest {
    let mut settings = BTreeMap::new();
    settings.insert("host".to_owned(), "127.0.0.1".to_owned());
    settings.insert("port".to_owned(), port.to_string());
    settings.insert("timeout".to_owned(), "5s".to_owned());

    SessionRequest {
        connection_id: "c-test".to_owned(),
        protocol_id: protocol.to_owned(),
        user_id: "u-test".to_owned(),
        settings,
        secret: json!({
            "username": "tester",
            "auth_method": "password",
            "password": "secret",
        }),
        timeout: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn launch_password_echo_roundtrip() {
    let port = spawn_echo_server().await;
    let driver = SshDriver::new(Arc::new(AcceptAllVerifier));

    let handle = driver.launch(request(port, "ssh")).await.expect("launch");
    let mut stdout = handle.take_stdout().expect("stdout pipe");
    assert!(handle.take_stdout().is_none(), "stdout pipe is taken once");

    handle.write_stdin(b"hello\n").await.expect("stdin write");

    let echoed = tokio::time::timeout(Duration::from_secs(2), stdout.recv())
        .await
        .expect("echo within deadline")
        .expect("stream open");
    assert_eq!(echoed, b"hello\n".to_vec());

    assert!(handle.close().await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent() {
    let port = spawn_echo_server().await;
    let driver = SshDriver::new(Arc::new(AcceptAllVerifier));

    let handle = driver.launch(request(port, "ssh")).await.expect("launch");

    let first = handle.close().await;
    let second = handle.close().await;
    assert_eq!(first.is_ok(), second.is_ok(), "both closes observe the same outcome");
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_is_rejected() {
    let port = spawn_echo_server().await;
    let driver = SshDriver::new(Arc::new(AcceptAllVerifier));

    let mut req = request(port, "ssh");
    req.secret = json!({
        "username": "tester",
        "auth_method": "password",
        "password": "not-it",
    });

    let err = driver.launch(req).await.unwrap_err();
    assert!(matches!(err, DriverError::Upstream { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn resize_and_write_after_close_fail() {
    let port = spawn_echo_server().await;
    let driver = SshDriver::new(Arc::new(AcceptAllVerifier));

    let handle = driver.launch(request(port, "ssh")).await.expect("launch");
    handle.resize(120, 40).await.expect("resize while open");

    handle.close().await.expect("close");

    // SFTP acquisition on a closed session fails.
    let err = handle.acquire_sftp().await.unwrap_err();
    assert!(matches!(err, DriverError::Canceled { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn dial_failure_is_upstream_or_timeout() {
    let driver = SshDriver::new(Arc::new(AcceptAllVerifier));

    // A port nothing listens on: connection refused (or a timeout on filtered hosts).
    let err = driver.launch(request(1, "ssh")).await.unwrap_err();
    assert!(matches!(err, DriverError::Upstream { .. } | DriverError::Timeout { .. }));
}
