#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use draftws_core::protocol::subproto::Role;
use draftws_core::{DraftWsError, ErrorKind};
use draftws_net::config::{self, ClientConfig, ConnectionConfig, DraftWsConfig, FrameMode};
use draftws_net::echo::EchoHandler;
use draftws_net::server::LiveSet;
use draftws_net::{
    ChannelHandler, Client, ConnectionBuilder, ConnectionEvent, ConnectionState, Server,
};

use failing_stream::FailingStream;

const WAIT: Duration = Duration::from_secs(5);

fn local_config(extra: &str) -> DraftWsConfig {
    let yaml = format!("version: 1\nserver:\n  listen: \"127.0.0.1:0\"\n{extra}");
    config::load_from_str(&yaml).unwrap()
}

async fn echo_server(cfg: &DraftWsConfig) -> Server {
    Server::start(cfg, Arc::new(EchoHandler)).await.unwrap()
}

async fn next_event(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_message(rx: &mut UnboundedReceiver<ConnectionEvent>) -> String {
    loop {
        match next_event(rx).await {
            ConnectionEvent::Message(_, text) => return text,
            ConnectionEvent::Open(_) => continue,
            other => panic!("expected a message, got {other:?}"),
        }
    }
}

async fn wait_for_len(server: &Server, n: usize) {
    timeout(WAIT, async {
        while server.len() != n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("server never reached {n} connections, has {}", server.len()));
}

async fn connect(
    url: &str,
    cfg: ClientConfig,
) -> (Client, UnboundedReceiver<ConnectionEvent>) {
    let (handler, rx) = ChannelHandler::new();
    let mut client = Client::with_config(url, cfg).unwrap();
    client.connect(Arc::new(handler)).await.unwrap();
    (client, rx)
}

#[tokio::test]
async fn echo_round_trip() {
    let server = echo_server(&local_config("")).await;
    let url = format!("ws://{}/echo", server.local_addr());
    let (client, mut rx) = connect(&url, ClientConfig::default()).await;

    assert_eq!(client.state(), ConnectionState::Open);
    let response = client.server_handshake().unwrap();
    assert_eq!(response.location, format!("ws://{}/echo", server.local_addr()));

    client.send("hi").unwrap();
    assert_eq!(next_message(&mut rx).await, "Echo - hi");
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "echo must fire exactly once"
    );

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    server.stop().await;
}

#[tokio::test]
async fn sub_protocol_echo_round_trip() {
    let server = echo_server(&local_config("connection:\n  mode: sub_protocol\n")).await;
    let url = format!("ws://{}/", server.local_addr());
    let client_cfg = ClientConfig::default().connection(ConnectionConfig {
        mode: FrameMode::SubProtocol,
        ..ConnectionConfig::default()
    });
    let (client, mut rx) = connect(&url, client_cfg).await;

    client.send("hi").unwrap();
    assert_eq!(next_message(&mut rx).await, "Echo - hi");

    let key = client.connection().and_then(|c| c.session_key().map(str::to_owned));
    let server_key = server.connections()[0].session_key().map(str::to_owned);
    assert!(key.is_some());
    assert_eq!(key, server_key);

    server.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_every_live_connection() {
    let server = echo_server(&local_config("")).await;
    let url = format!("ws://{}/", server.local_addr());

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&url, ClientConfig::default()).await);
    }
    wait_for_len(&server, 3).await;

    assert_eq!(server.send_to_all("all"), 3);
    for (_, rx) in clients.iter_mut() {
        assert_eq!(next_message(rx).await, "all");
    }

    let excluded = server.connections()[0].clone();
    assert_eq!(server.send_to_all_except("some", &excluded), 2);
    let mut received = 0;
    for (_, rx) in clients.iter_mut() {
        if let Ok(Some(ConnectionEvent::Message(_, text))) =
            timeout(Duration::from_millis(300), rx.recv()).await
        {
            assert_eq!(text, "some");
            received += 1;
        }
    }
    assert_eq!(received, 2);

    let (gone, _) = clients.remove(1);
    gone.close().await;
    wait_for_len(&server, 2).await;

    assert_eq!(server.send_to_all("still"), 2);
    for (_, rx) in clients.iter_mut() {
        assert_eq!(next_message(rx).await, "still");
    }

    server.stop().await;
}

#[tokio::test]
async fn broadcast_skips_dead_members() {
    let live = LiveSet::new();
    let mut peers = Vec::new();
    let mut conns = Vec::new();
    for _ in 0..3 {
        let (local, peer) = duplex(4096);
        let (handler, _rx) = ChannelHandler::new();
        let conn = ConnectionBuilder::new(Role::Server).spawn(local, Arc::new(handler));
        live.insert(conn.clone());
        conns.push(conn);
        peers.push(peer);
    }

    conns[1].close();
    timeout(WAIT, conns[1].closed()).await.unwrap();
    assert_eq!(live.len(), 3);

    assert_eq!(live.send_to_all("x"), 2);
    assert_eq!(live.send_to_all_except("y", conns[0].id()), 1);

    let mut a = [0u8; 3];
    timeout(WAIT, peers[0].read_exact(&mut a)).await.unwrap().unwrap();
    assert_eq!(&a, b"\x00x\xff");

    let mut c = [0u8; 6];
    timeout(WAIT, peers[2].read_exact(&mut c)).await.unwrap().unwrap();
    assert_eq!(&c, b"\x00x\xff\x00y\xff");

    assert!(live.remove(conns[1].id()).is_some());
    assert!(live.remove(conns[1].id()).is_none());
}

#[tokio::test]
async fn broadcast_survives_a_failing_writer() {
    let live = LiveSet::new();

    let (a_local, mut a_peer) = duplex(4096);
    let (c_local, mut c_peer) = duplex(4096);
    let (ha, _rx_a) = ChannelHandler::new();
    let (hb, mut rx_b) = ChannelHandler::new();
    let (hc, _rx_c) = ChannelHandler::new();
    let a = ConnectionBuilder::new(Role::Server).spawn(a_local, Arc::new(ha));
    let b = ConnectionBuilder::new(Role::Server).spawn(FailingStream, Arc::new(hb));
    let c = ConnectionBuilder::new(Role::Server).spawn(c_local, Arc::new(hc));
    for conn in [&a, &b, &c] {
        live.insert(conn.clone());
    }

    assert_eq!(live.send_to_all("x"), 3);

    let mut buf = [0u8; 3];
    timeout(WAIT, a_peer.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"\x00x\xff");
    timeout(WAIT, c_peer.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"\x00x\xff");

    let mut saw_error = false;
    loop {
        match timeout(WAIT, rx_b.recv()).await.unwrap().unwrap() {
            ConnectionEvent::Error { kind, .. } => {
                assert_eq!(kind, ErrorKind::Transport);
                saw_error = true;
            }
            ConnectionEvent::Closed(_) => break,
            ConnectionEvent::Open(_) => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_error);
    assert_eq!(b.state(), ConnectionState::Closed);

    assert_eq!(live.send_to_all("y"), 2);
    timeout(WAIT, a_peer.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"\x00y\xff");
    timeout(WAIT, c_peer.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"\x00y\xff");
}

#[tokio::test]
async fn disallowed_origin_never_joins() {
    let server = echo_server(&local_config(
        "  allowed_origins: [\"http://allowed.example\"]\n",
    ))
    .await;
    let url = format!("ws://{}/", server.local_addr());

    let (handler, _rx) = ChannelHandler::new();
    let mut client = Client::new(&url).unwrap();
    let err = client.connect(Arc::new(handler)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeParse);

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.send("x").unwrap_err().kind(), ErrorKind::NotConnected);
    assert!(server.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn bad_handshake_does_not_stop_accepting() {
    let server = echo_server(&local_config("")).await;
    let addr = server.local_addr();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"garbage\r\n\r\n12345678").await.unwrap();
    let mut rest = Vec::new();
    let _ = timeout(WAIT, raw.read_to_end(&mut rest)).await.unwrap();
    assert!(rest.is_empty(), "no response to a malformed request");

    let (client, mut rx) = connect(&format!("ws://{addr}/"), ClientConfig::default()).await;
    client.send("still here").unwrap();
    assert_eq!(next_message(&mut rx).await, "Echo - still here");
    assert_eq!(server.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn silent_client_is_dropped_after_handshake_timeout() {
    let server = echo_server(&local_config("  handshake_timeout_ms: 100\n")).await;

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut rest = Vec::new();
    let _ = timeout(WAIT, raw.read_to_end(&mut rest))
        .await
        .expect("server should hang up on a silent client");
    assert!(server.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn client_connect_times_out_on_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        sleep(Duration::from_secs(2)).await;
        drop(sock);
    });

    let (handler, _rx) = ChannelHandler::new();
    let cfg = ClientConfig::default().handshake_timeout_ms(100);
    let mut client = Client::with_config(&format!("ws://{addr}/"), cfg).unwrap();
    let err = client.connect(Arc::new(handler)).await.unwrap_err();

    match err {
        DraftWsError::Transport(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(client.connection().is_none());
    hold.abort();
}

#[tokio::test]
async fn stop_closes_live_connections() {
    let server = echo_server(&local_config("")).await;
    let addr = server.local_addr();
    let (client, mut rx) = connect(&format!("ws://{addr}/"), ClientConfig::default()).await;
    wait_for_len(&server, 1).await;

    server.stop().await;
    assert!(server.is_empty());

    loop {
        match next_event(&mut rx).await {
            ConnectionEvent::Closed(_) => break,
            ConnectionEvent::Open(_) => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
    timeout(WAIT, client.close()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);

    let (handler, _rx) = ChannelHandler::new();
    let mut late = Client::new(&format!("ws://{addr}/")).unwrap();
    let err = late.connect(Arc::new(handler)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[test]
fn client_before_connect_is_not_connected() {
    let client = Client::new("ws://127.0.0.1:9/").unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.send("x").unwrap_err().kind(), ErrorKind::NotConnected);
    assert!(client.server_handshake().is_none());
}

#[test]
fn non_websocket_url_is_config_error() {
    let err = Client::new("http://127.0.0.1/").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}
