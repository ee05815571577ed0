//! End-to-end client scenarios against real sockets on 127.0.0.1.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ark_net::{
    ClientConfig, ConnectionId, ConnectionState, FrameConfig, FrameHeader, HEADER_SIZE, NetError,
    NetEvent, PlayerId, TcpClient, decode_frame, encode_frame,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Event(NetEvent, ConnectionId, i32),
    Data(u16, Vec<u8>, ConnectionId),
}

fn recording_client() -> (TcpClient, Arc<Mutex<Vec<Seen>>>) {
    let seen: Arc<Mutex<Vec<Seen>>> = Arc::default();
    let mut client = TcpClient::new(ClientConfig::default());

    let data = Arc::clone(&seen);
    client.set_data_handler(move |_, message_id, body, id| {
        data.lock().push(Seen::Data(message_id, body.to_vec(), id));
    });
    let events = Arc::clone(&seen);
    client.set_event_handler(move |event, id, target| {
        events.lock().push(Seen::Event(event, id, target));
    });
    (client, seen)
}

/// Tick until `cond` holds or five seconds pass.
fn tick_until(client: &TcpClient, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        client.tick();
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn frame(message_id: u16, body: &[u8]) -> Vec<u8> {
    encode_frame(FrameHeader::new(message_id, PlayerId::default()), body).to_vec()
}

#[test]
fn test_ping_then_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (close_tx, close_rx) = std::sync::mpsc::channel::<()>();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&frame(7, b"PING")).unwrap();
        close_rx.recv().unwrap();
    });

    let (client, seen) = recording_client();
    let id = client
        .start(3, "127.0.0.1", port, Duration::from_millis(5000))
        .unwrap();
    assert!(client.is_working());

    assert!(tick_until(&client, || seen.lock().len() >= 2));
    assert_eq!(
        *seen.lock(),
        vec![
            Seen::Event(NetEvent::Connected, id, 3),
            Seen::Data(7, b"PING".to_vec(), id),
        ]
    );
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    close_tx.send(()).unwrap();
    server.join().unwrap();

    assert!(tick_until(&client, || seen.lock().len() >= 3));
    assert_eq!(seen.lock()[2], Seen::Event(NetEvent::Disconnected, id, 3));
    assert_eq!(client.connection_id(), None);

    client.shutdown();
    assert!(!client.is_working());
}

#[test]
fn test_frames_split_across_writes_arrive_intact() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut wire = Vec::new();
    for n in 1..=20u16 {
        wire.extend(frame(n, &vec![n as u8; n as usize * 7]));
    }
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        for chunk in wire.chunks(13) {
            stream.write_all(chunk).unwrap();
            stream.flush().unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
    });

    let (client, seen) = recording_client();
    client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();

    let data_count = |seen: &[Seen]| seen.iter().filter(|s| matches!(s, Seen::Data(..))).count();
    assert!(tick_until(&client, || data_count(&seen.lock()) == 20));

    let ids: Vec<u16> = seen
        .lock()
        .iter()
        .filter_map(|s| match s {
            Seen::Data(message_id, body, _) => {
                assert_eq!(body, &vec![*message_id as u8; *message_id as usize * 7]);
                Some(*message_id)
            }
            Seen::Event(..) => None,
        })
        .collect();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    server.join().unwrap();
}

#[test]
fn test_send_message_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut wire = vec![0u8; HEADER_SIZE + 5];
        stream.read_exact(&mut wire).unwrap();
        wire
    });

    let (client, _) = recording_client();
    let id = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    client
        .send_message(42, b"hello", id, PlayerId::from_parts(1, 2))
        .unwrap();

    let wire = server.join().unwrap();
    let (len, header) = decode_frame(&wire, &FrameConfig::default()).unwrap();
    assert_eq!(len, 5);
    assert_eq!(header.message_id, 42);
    assert_eq!(header.player_id, PlayerId::from_parts(1, 2));
    assert_eq!(&wire[HEADER_SIZE..], b"hello");
}

#[test]
fn test_mismatched_send_is_not_written() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut buf = [0u8; 64];
        matches!(stream.read(&mut buf), Ok(n) if n > 0)
    });

    let (client, _) = recording_client();
    let id = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    let wrong = ConnectionId::new(id.high, id.low + 1);

    let result = client.send_message(1, b"nope", wrong, PlayerId::default());
    assert!(matches!(result, Err(NetError::ConnectionMismatch { .. })));
    assert!(!server.join().unwrap(), "server must not receive anything");
}

#[test]
fn test_refused_start_creates_no_connection() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let (client, seen) = recording_client();
    let result = client.start(0, "127.0.0.1", port, Duration::from_millis(500));
    assert!(result.is_err());
    assert!(!client.is_working());
    assert_eq!(client.connection_id(), None);
    assert_eq!(client.tick(), 0);
    assert!(seen.lock().is_empty());
}

#[test]
fn test_reconnect_after_disconnect_assigns_new_id() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        for _ in 0..2 {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        }
    });

    let (client, seen) = recording_client();
    let first = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    assert!(tick_until(&client, || client.connection_id().is_none()));

    let second = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    assert_ne!(first, second);
    assert!(tick_until(&client, || client.connection_id().is_none()));
    server.join().unwrap();

    let events: Vec<_> = seen.lock().clone();
    assert_eq!(
        events,
        vec![
            Seen::Event(NetEvent::Connected, first, 0),
            Seen::Event(NetEvent::Disconnected, first, 0),
            Seen::Event(NetEvent::Connected, second, 0),
            Seen::Event(NetEvent::Disconnected, second, 0),
        ]
    );
}

#[test]
fn test_ordering_with_concurrent_ticks() {
    for _ in 0..50 {
        let (client, seen) = recording_client();
        let client = Arc::new(client);
        let events = client.transport_events();

        let ticker = {
            let client = Arc::clone(&client);
            let seen = Arc::clone(&seen);
            std::thread::spawn(move || {
                while !seen
                    .lock()
                    .iter()
                    .any(|s| matches!(s, Seen::Event(NetEvent::Disconnected, ..)))
                {
                    client.tick();
                    std::thread::yield_now();
                }
            })
        };

        let handle = Arc::new(NullHandle);
        let id = events.on_connect(handle);
        for n in 1..=5u16 {
            events.on_data(id, &frame(n, &[n as u8]));
        }
        events.on_disconnect(id);
        ticker.join().unwrap();

        let mut expected = vec![Seen::Event(NetEvent::Connected, id, 0)];
        expected.extend((1..=5u16).map(|n| Seen::Data(n, vec![n as u8], id)));
        expected.push(Seen::Event(NetEvent::Disconnected, id, 0));
        assert_eq!(*seen.lock(), expected);

        // Nothing is left to dispatch twice.
        assert_eq!(client.tick(), 0);
        assert_eq!(client.connection_id(), None);
    }
}

#[test]
fn test_shutdown_closes_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 16];
        stream.read(&mut buf).unwrap_or(usize::MAX)
    });

    let (client, seen) = recording_client();
    let id = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    client.shutdown();
    client.shutdown();

    assert_eq!(server.join().unwrap(), 0, "server should observe EOF");
    client.tick();
    assert_eq!(
        seen.lock().last(),
        Some(&Seen::Event(NetEvent::Disconnected, id, 0))
    );
    assert_eq!(client.connection_id(), None);
}

fn read_all_server(listener: TcpListener) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut wire = Vec::new();
        stream.read_to_end(&mut wire).unwrap();
        wire
    })
}

#[test]
fn test_frame_sent_before_close_connection_is_delivered() {
    for _ in 0..30 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = read_all_server(listener);

        let (client, _) = recording_client();
        let id = client
            .start(0, "127.0.0.1", port, Duration::from_secs(5))
            .unwrap();
        client
            .send_message(7, b"BYE!", id, PlayerId::default())
            .unwrap();
        client.close_connection(id).unwrap();

        assert_eq!(server.join().unwrap(), frame(7, b"BYE!"));
    }
}

#[test]
fn test_frame_sent_before_shutdown_is_delivered() {
    for _ in 0..30 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = read_all_server(listener);

        let (client, _) = recording_client();
        let id = client
            .start(0, "127.0.0.1", port, Duration::from_secs(5))
            .unwrap();
        client
            .send_message(7, b"BYE!", id, PlayerId::default())
            .unwrap();
        client.shutdown();

        assert_eq!(server.join().unwrap(), frame(7, b"BYE!"));
    }
}

#[test]
fn test_zero_message_id_is_not_written() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = read_all_server(listener);

    let (client, _) = recording_client();
    let id = client
        .start(0, "127.0.0.1", port, Duration::from_secs(5))
        .unwrap();
    let result = client.send_message(0, b"zero", id, PlayerId::default());
    assert!(matches!(result, Err(NetError::InvalidMessageId)));
    client.close_connection(id).unwrap();

    assert!(server.join().unwrap().is_empty());
}

#[test]
fn test_start_times_out_against_full_backlog() {
    use socket2::{Domain, Socket, Type};

    // A backlog of 0 admits one pending connection; later SYNs are dropped.
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    socket.bind(&addr.into()).unwrap();
    socket.listen(0).unwrap();
    let listener: TcpListener = socket.into();
    let addr = listener.local_addr().unwrap();

    let mut pending = Vec::new();
    let mut saturated = false;
    for _ in 0..8 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => pending.push(stream),
            Err(_) => {
                saturated = true;
                break;
            }
        }
    }
    assert!(saturated, "listen backlog never filled");

    let (client, seen) = recording_client();
    let started = Instant::now();
    let result = client.start(4, "127.0.0.1", addr.port(), Duration::from_millis(100));

    assert!(matches!(
        result,
        Err(NetError::ConnectTimeout { timeout, .. }) if timeout == Duration::from_millis(100)
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.connection_id(), None);
    assert!(!client.is_working());
    assert_eq!(client.tick(), 0);
    assert!(seen.lock().is_empty());
    drop(pending);
}

/// Handle for tests that drive the session without a socket.
struct NullHandle;

impl ark_net::TransportHandle for NullHandle {
    fn send(&self, _bytes: bytes::Bytes) -> bool {
        true
    }

    fn disconnect(&self) {}

    fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        None
    }
}
