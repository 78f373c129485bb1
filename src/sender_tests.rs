//! Tests for the sender façade over real sockets.

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Read},
    net::{TcpListener, TcpStream},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use rstest::{fixture, rstest};
use serde::{Serialize, Serializer, de::DeserializeOwned, ser::Error as _};

use super::*;
use crate::time_value::EventTime;

const STAMP: TimeValue = TimeValue::Seconds(1_700_000_000);

#[derive(Serialize)]
struct Record<'a> {
    name: &'a str,
}

struct Unencodable;

impl Serialize for Unencodable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("refuses to serialise"))
    }
}

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

fn port_of(listener: &TcpListener) -> u16 {
    listener.local_addr().expect("listener has address").port()
}

fn sender_for(port: u16) -> FluentSender {
    FluentSender::builder()
        .with_tcp("127.0.0.1", port)
        .with_timeout_ms(2_000)
        .build()
        .expect("build sender")
}

fn accept_all(listener: &TcpListener) -> Vec<TcpStream> {
    listener.set_nonblocking(true).expect("nonblocking listener");
    let mut accepted = Vec::new();
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).expect("blocking stream");
                accepted.push(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) => panic!("accept failed: {err}"),
        }
    }
    accepted
}

type Fields = BTreeMap<String, String>;

fn decode<P: DeserializeOwned>(frame: &[u8]) -> (String, u64, P) {
    rmp_serde::from_slice(frame).expect("decode frame")
}

async fn wait_until_disconnected(sender: &FluentSender) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while sender.is_connected() {
        assert!(Instant::now() < deadline, "sender never noticed the loss");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[rstest]
#[tokio::test]
async fn pack_is_pure_and_decodable() {
    let sender = sender_for(9);
    let frame = sender
        .pack_with_time("tag", STAMP, &Record { name: "test" })
        .expect("pack");
    let (tag, time, payload) = decode::<Fields>(&frame);
    assert_eq!(tag, "tag");
    assert_eq!(time, 1_700_000_000);
    assert_eq!(payload.get("name").map(String::as_str), Some("test"));
    assert_eq!(sender.connection_state(), ConnectionState::Disconnected);
}

#[rstest]
#[tokio::test]
async fn prefix_is_joined_to_label() {
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", 9)
        .with_tag_prefix("app")
        .build()
        .expect("build sender");
    let (tag, _, ()) = decode(&sender.pack_with_time("web", STAMP, &()).expect("pack"));
    assert_eq!(tag, "app.web");
    let (tag, _, ()) = decode(&sender.pack_with_time("", STAMP, &()).expect("pack"));
    assert_eq!(tag, "app");
}

#[rstest]
#[tokio::test]
async fn empty_tag_is_a_caller_error() {
    let sender = sender_for(9);
    let err = sender.emit("", &()).await.expect_err("empty tag");
    assert!(matches!(err, SenderError::EmptyTag));
    assert!(sender.pack("", &()).is_err());
    assert!(sender.emit_later("", &()).is_err());
}

#[rstest]
#[tokio::test]
async fn unencodable_payload_fails_without_io(tcp_listener: TcpListener) {
    let sender = sender_for(port_of(&tcp_listener));
    assert!(!sender.emit("tag", &Unencodable).await.expect("valid tag"));
    assert!(matches!(sender.last_error(), Some(SenderError::Encode(_))));
    assert_eq!(sender.connection_state(), ConnectionState::Disconnected);
    assert!(accept_all(&tcp_listener).is_empty());
}

#[rstest]
#[tokio::test]
async fn refused_connect_returns_false_and_calls_hook(tcp_listener: TcpListener) {
    let port = port_of(&tcp_listener);
    drop(tcp_listener);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", port)
        .with_error_hook(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("build sender");

    assert!(!sender.emit("tag", &Record { name: "x" }).await.expect("valid tag"));
    assert!(sender.last_error().is_some_and(|err| err.is_transport()));
    assert!(calls.load(Ordering::SeqCst) >= 1);
}

#[rstest]
#[tokio::test]
async fn panicking_hook_does_not_escape(tcp_listener: TcpListener) {
    let port = port_of(&tcp_listener);
    drop(tcp_listener);
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", port)
        .with_error_hook(|_| panic!("hook failure"))
        .build()
        .expect("build sender");
    assert!(!sender.emit("tag", &()).await.expect("valid tag"));
    assert!(sender.last_error().is_some());
}

#[rstest]
#[tokio::test]
async fn emit_close_emit_uses_two_connections(tcp_listener: TcpListener) {
    let sender = sender_for(port_of(&tcp_listener));
    let record = Record { name: "test" };
    let expected = sender.pack_with_time("tag", STAMP, &record).expect("pack");

    assert!(sender.emit_with_time("tag", STAMP, &record).await.expect("valid tag"));
    sender.close().await;
    sender.close().await;
    assert_eq!(sender.connection_state(), ConnectionState::Disconnected);

    assert!(sender.emit_with_time("tag", STAMP, &record).await.expect("valid tag"));
    sender.close().await;

    let peers = accept_all(&tcp_listener);
    assert_eq!(peers.len(), 2);
    for mut peer in peers {
        let mut received = Vec::new();
        peer.read_to_end(&mut received).expect("read until eof");
        assert_eq!(received, expected);
    }
    assert!(sender.last_error().is_none());
}

#[rstest]
#[tokio::test]
async fn recovers_once_collector_returns(tcp_listener: TcpListener) {
    let port = port_of(&tcp_listener);
    let sender = sender_for(port);
    assert!(sender.emit("tag", &Record { name: "first" }).await.expect("valid tag"));

    drop(accept_all(&tcp_listener));
    drop(tcp_listener);
    wait_until_disconnected(&sender).await;
    assert!(sender.last_error().is_some_and(|err| err.is_transport()));

    assert!(!sender.emit("tag", &Record { name: "lost" }).await.expect("valid tag"));

    let relisten = TcpListener::bind(("127.0.0.1", port)).expect("rebind collector port");
    assert!(sender.emit("tag", &Record { name: "back" }).await.expect("valid tag"));
    sender.close().await;

    let mut peer = accept_all(&relisten).pop().expect("reconnected");
    let mut received = Vec::new();
    peer.read_to_end(&mut received).expect("read until eof");
    let (_, _, payload) = decode::<Fields>(&received);
    assert_eq!(payload.get("name").map(String::as_str), Some("back"));
}

#[rstest]
#[tokio::test]
async fn nanosecond_precision_sends_event_time() {
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", 9)
        .with_nanosecond_precision(true)
        .build()
        .expect("build sender");
    let frame = sender
        .pack_with_time(
            "tag",
            TimeValue::from_secs_f64(1_700_000_000.25, true),
            &(),
        )
        .expect("pack");
    // fixarray(3), fixstr "tag", fixext8 of type 0
    assert_eq!(&frame[..6], &[0x93, 0xa3, b't', b'a', b'g', 0xd7]);
    assert_eq!(frame[6], 0x00);
    let time = EventTime::from_bytes(&frame[7..15]).expect("event time body");
    assert_eq!(time.seconds(), 1_700_000_000);
    assert_eq!(time.nanoseconds(), 250_000_000);

    assert!(matches!(
        sender.pack("tag", &()).map(|frame| frame[5]),
        Ok(0xd7)
    ));
}

#[rstest]
#[tokio::test]
async fn blocked_flow_holds_emits_until_writable(tcp_listener: TcpListener) {
    let sender = sender_for(port_of(&tcp_listener));
    assert!(sender.emit("tag", &()).await.expect("valid tag"));
    let flow = sender.inner.pipeline.connection().flow();
    flow.mark_blocked();

    let background = sender.clone();
    let pending = tokio::spawn(async move { background.emit("tag", &()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    flow.mark_writable();
    assert!(pending.await.expect("emit task").expect("valid tag"));
}

#[rstest]
#[tokio::test]
async fn timeout_keeps_connection(tcp_listener: TcpListener) {
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", port_of(&tcp_listener))
        .with_timeout_ms(100)
        .build()
        .expect("build sender");
    assert!(sender.emit("tag", &()).await.expect("valid tag"));
    sender.inner.pipeline.connection().flow().mark_blocked();

    assert!(!sender.emit("tag", &()).await.expect("valid tag"));
    assert!(matches!(sender.last_error(), Some(SenderError::Timeout(_))));
    assert_eq!(sender.connection_state(), ConnectionState::Connected);
}

#[rstest]
#[tokio::test]
async fn emit_later_delivers_in_background(tcp_listener: TcpListener) {
    let sender = sender_for(port_of(&tcp_listener));
    let handle = sender
        .emit_later("tag", &Record { name: "later" })
        .expect("valid tag");
    assert!(handle.await.expect("emit task"));
    sender.close().await;

    let mut peer = accept_all(&tcp_listener).pop().expect("connected");
    let mut received = Vec::new();
    peer.read_to_end(&mut received).expect("read until eof");
    let (_, _, payload) = decode::<Fields>(&received);
    assert_eq!(payload.get("name").map(String::as_str), Some("later"));
}

#[rstest]
#[tokio::test]
async fn high_water_suspends_concurrent_emits_until_peer_reads(tcp_listener: TcpListener) {
    const BIG: usize = 16 * 1024 * 1024;
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", port_of(&tcp_listener))
        .with_high_water(1024)
        .with_low_water(0)
        .with_timeout_ms(30_000)
        .build()
        .expect("build sender");
    let body = "x".repeat(BIG);
    let frame_len = sender
        .pack_with_time("tag", STAMP, &Record { name: &body })
        .expect("pack")
        .len();

    // Queued above the high water mark while the peer is not reading.
    assert!(
        sender
            .emit_with_time("tag", STAMP, &Record { name: &body })
            .await
            .expect("valid tag")
    );
    let mut peer = accept_all(&tcp_listener).pop().expect("connected");
    assert!(!sender.inner.pipeline.connection().flow().is_writable());

    let pending: Vec<_> = (0..4)
        .map(|_| {
            let sender = sender.clone();
            let body = body.clone();
            tokio::spawn(async move {
                sender
                    .emit_with_time("tag", STAMP, &Record { name: &body })
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pending.iter().all(|emit| !emit.is_finished()));

    let reader = std::thread::spawn(move || {
        let mut received = 0usize;
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match peer.read(&mut chunk) {
                Ok(0) => return received,
                Ok(n) => received += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => panic!("peer read failed: {err}"),
            }
        }
    });
    for emit in pending {
        assert!(emit.await.expect("emit task").expect("valid tag"));
    }
    sender.close().await;

    assert_eq!(reader.join().expect("reader thread"), 5 * frame_len);
    assert!(sender.last_error().is_none());
}

#[rstest]
fn emits_awaited_on_another_runtime_use_the_configured_one(tcp_listener: TcpListener) {
    let owner = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .expect("owner runtime");
    // No time driver: timers must come from the configured runtime.
    let caller = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("caller runtime");
    let sender = FluentSender::builder()
        .with_tcp("127.0.0.1", port_of(&tcp_listener))
        .with_runtime(owner.handle().clone())
        .build()
        .expect("build sender");

    let record = Record { name: "elsewhere" };
    assert!(caller.block_on(sender.emit("tag", &record)).expect("valid tag"));
    caller.block_on(sender.close());

    let mut peer = accept_all(&tcp_listener).pop().expect("connected");
    let mut received = Vec::new();
    peer.read_to_end(&mut received).expect("read until eof");
    let (_, _, payload) = decode::<Fields>(&received);
    assert_eq!(payload.get("name").map(String::as_str), Some("elsewhere"));
    drop(sender);
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn adopted_socket_carries_one_record() {
        let (ours, mut peer) = UnixStream::pair().expect("socket pair");
        let sender = FluentSender::builder()
            .with_socket(ours)
            .build()
            .expect("build sender");
        let record = Record { name: "test" };
        let expected = sender.pack_with_time("tag", STAMP, &record).expect("pack");

        assert!(sender.emit_with_time("tag", STAMP, &record).await.expect("valid tag"));
        sender.close().await;

        let mut received = Vec::new();
        peer.read_to_end(&mut received).expect("read until eof");
        assert_eq!(received, expected);

        // The adopted socket is spent once closed.
        assert!(!sender.emit("tag", &record).await.expect("valid tag"));
        assert!(matches!(sender.last_error(), Some(SenderError::Transport(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn unix_path_transport_delivers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("fluent.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind unix socket");
        let sender = FluentSender::builder()
            .with_target(&format!("unix://{}", path.display()), 0)
            .build()
            .expect("build sender");

        assert!(sender.emit("tag", &Record { name: "unix" }).await.expect("valid tag"));
        sender.close().await;

        let (mut peer, _) = listener.accept().expect("accept");
        let mut received = Vec::new();
        peer.read_to_end(&mut received).expect("read until eof");
        let (tag, _, payload) = decode::<Fields>(&received);
        assert_eq!(tag, "tag");
        assert_eq!(payload.get("name").map(String::as_str), Some("unix"));
    }
}
