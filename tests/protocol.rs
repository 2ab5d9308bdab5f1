//! Wire-level tests driving a server connection with hand-built frames.

mod common;

use common::*;
use scheelite::{Config, Message, PermessageDeflate};
use std::io::Write;
use std::net::TcpStream;

fn expect_open(rx: &std::sync::mpsc::Receiver<Event>) {
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open);
}

#[test]
fn delivers_single_frame_text() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x1, b"hello")).unwrap();
    expect_open(&rx);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Message(Message::text("hello")));

    stream.write_all(&masked_close(1000, "bye")).unwrap();
    assert_eq!(read_close(&mut stream), (1000, String::new()));
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1000, "bye".into()));
    server.join().unwrap();
}

#[test]
fn reassembles_fragmented_text() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(false, false, 0x1, Some(MASK), b"He")).unwrap();
    stream.write_all(&build_frame(true, false, 0x0, Some(MASK), b"llo")).unwrap();
    expect_open(&rx);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Message(Message::text("Hello")));

    stream.write_all(&masked_close(1000, "")).unwrap();
    server.join().unwrap();
}

#[test]
fn answers_ping_before_subsequent_data() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x9, b"pq")).unwrap();
    let (first, payload) = read_frame(&mut stream);
    assert_eq!(first, 0x8a);
    assert_eq!(payload, b"pq");

    expect_open(&rx);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Ping(b"pq".to_vec()));

    stream.write_all(&masked_close(1000, "")).unwrap();
    server.join().unwrap();
}

#[test]
fn one_byte_close_payload_is_a_protocol_error() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x8, &[0x03])).unwrap();
    assert_eq!(read_close(&mut stream).0, 1002);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn empty_close_payload_echoes_empty_close() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x8, &[])).unwrap();
    assert_eq!(read_close(&mut stream), (0, String::new()));
    expect_open(&rx);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1000, String::new()));
    server.join().unwrap();
}

#[test]
fn close_code_validation_table() {
    // (code on the wire, code echoed back, code reported to the handler)
    let table = [
        (999u16, 1002u16, 1002u16),
        (1000, 1000, 1000),
        (1004, 1002, 1002),
        (1005, 1002, 1002),
        (1006, 1002, 1002),
        (1015, 1002, 1002),
        (1016, 1002, 1002),
        (2999, 1002, 1002),
        (3000, 3000, 3000),
        (4999, 4999, 4999),
        (5000, 1002, 1002),
    ];
    for (code, echoed, reported) in table {
        let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
        let mut stream = TcpStream::connect(addr).unwrap();

        stream.write_all(&masked_close(code, "")).unwrap();
        assert_eq!(read_close(&mut stream).0, echoed, "echo for {code}");
        expect_open(&rx);
        match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            Event::Close(observed, _) => assert_eq!(observed, reported, "handler code for {code}"),
            other => panic!("unexpected event: {other:?}"),
        }
        server.join().unwrap();
    }
}

#[test]
fn codepoint_straddling_fragments_validates_on_aggregation() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(false, false, 0x1, Some(MASK), &[0xe2, 0x82])).unwrap();
    stream.write_all(&build_frame(true, false, 0x0, Some(MASK), &[0xac])).unwrap();
    expect_open(&rx);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Message(Message::text("\u{20ac}")));

    stream.write_all(&masked_close(1000, "")).unwrap();
    server.join().unwrap();
}

#[test]
fn invalid_utf8_text_closes_1007() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x1, &[0xff, 0xfe, 0xfd])).unwrap();
    assert_eq!(read_close(&mut stream).0, 1007);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1007, _)));
    server.join().unwrap();
}

#[test]
fn continuation_without_start_closes_1002() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(true, false, 0x0, Some(MASK), b"stray")).unwrap();
    assert_eq!(read_close(&mut stream).0, 1002);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn new_data_frame_during_continuation_closes_1002() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(false, false, 0x1, Some(MASK), b"He")).unwrap();
    stream.write_all(&build_frame(true, false, 0x2, Some(MASK), b"nope")).unwrap();
    assert_eq!(read_close(&mut stream).0, 1002);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn unmasked_client_frame_closes_1002() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(true, false, 0x1, None, b"bare")).unwrap();
    assert_eq!(read_close(&mut stream).0, 1002);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn oversized_frame_closes_1009() {
    let config = Config { read_max_payload_size: 16, ..Default::default() };
    let (addr, rx, server) = serve(config, PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&masked(0x2, &[0u8; 64])).unwrap();
    assert_eq!(read_close(&mut stream).0, 1009);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1009, _)));
    server.join().unwrap();
}

#[test]
fn oversized_aggregate_closes_1009() {
    let config = Config { read_max_payload_size: 16, ..Default::default() };
    let (addr, rx, server) = serve(config, PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(false, false, 0x2, Some(MASK), &[0u8; 10])).unwrap();
    stream.write_all(&build_frame(true, false, 0x0, Some(MASK), &[0u8; 10])).unwrap();
    assert_eq!(read_close(&mut stream).0, 1009);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1009, _)));
    server.join().unwrap();
}

#[test]
fn rsv_bit_without_negotiation_closes_1002() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(&build_frame(true, true, 0x1, Some(MASK), b"x")).unwrap();
    assert_eq!(read_close(&mut stream).0, 1002);
    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn abrupt_disconnect_reports_protocol_error() {
    let (addr, rx, server) = serve(Config::default(), PermessageDeflate::default());
    let stream = TcpStream::connect(addr).unwrap();
    drop(stream);

    expect_open(&rx);
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1002, _)));
    server.join().unwrap();
}

#[test]
fn read_deadline_terminates_the_connection() {
    use scheelite::{Conn, Role, Upgrade};
    use std::net::TcpListener;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let _idle = TcpStream::connect(addr).unwrap();

    let (stream, _) = listener.accept().unwrap();
    let (tx, rx) = channel();
    let conn = Conn::new(Upgrade::new(stream, Role::Server), Config::default(), Events::new(tx))
        .unwrap();
    conn.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

    let reader = std::sync::Arc::clone(&conn);
    let handle = std::thread::spawn(move || reader.read_loop());

    expect_open(&rx);
    // 1006: the transport failed, nothing went on the wire.
    assert!(matches!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(1006, _)));
    handle.join().unwrap();
    assert!(conn.is_closed());
}
