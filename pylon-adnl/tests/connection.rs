//! Connection-level tests against an in-process server emulation: the
//! server side derives its keystreams from the same init block and
//! speaks the record layer through the public frame API.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::scalar::Scalar;
use pylon_adnl::{AdnlEvent, ConnectionError, Connection, FrameError, FrameReader, QueryError, frame, key_id};
use pylon_crypto::CtrProcessor;
use pylon_crypto::ecdh::ed25519_seed_to_x25519;
use pylon_crypto::sha256;
use pylon_tl::{Codec, Obj, Registry, Value};
use x25519_dalek::{PublicKey, StaticSecret};

const SERVER_SEED: [u8; 32] = [5u8; 32];
const CLIENT_SEED: [u8; 32] = [7u8; 32];

const SCHEME: &str = r#"{
    "constructors": [
        {"id": "1326826968", "predicate": "tcp.pong", "type": "tcp.Pong", "params": [
            {"name": "random_id", "type": "long"}
        ]},
        {"id": "2063174580", "predicate": "adnl.message.query", "type": "adnl.Message", "params": [
            {"name": "query_id", "type": "int256"},
            {"name": "query", "type": "bytes"}
        ]},
        {"id": "377793551", "predicate": "adnl.message.answer", "type": "adnl.Message", "params": [
            {"name": "query_id", "type": "int256"},
            {"name": "answer", "type": "bytes"}
        ]},
        {"id": "1209251014", "predicate": "pub.ed25519", "type": "PublicKey", "params": [
            {"name": "key", "type": "int256"}
        ]}
    ],
    "methods": [
        {"id": "2586511437", "method": "tcp.ping", "type": "tcp.Pong", "params": [
            {"name": "random_id", "type": "long"}
        ]}
    ]
}"#;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.load_json(pylon_adnl::ADNL_LAYER, SCHEME).unwrap();
    registry
}

fn init_block() -> [u8; 160] {
    core::array::from_fn(|i| (i * 3) as u8)
}

fn server_public() -> [u8; 32] {
    let scalar = ed25519_seed_to_x25519(&SERVER_SEED);
    (ED25519_BASEPOINT_POINT * Scalar::from_bytes_mod_order(scalar))
        .compress()
        .0
}

/// The server's half of the record layer, keyed from the init block.
struct Server {
    rx: FrameReader,
    tx: CtrProcessor,
}

impl Server {
    fn new(init: &[u8; 160]) -> Self {
        let tx_key: [u8; 32] = init[..32].try_into().unwrap();
        let rx_key: [u8; 32] = init[32..64].try_into().unwrap();
        let tx_iv: [u8; 16] = init[64..80].try_into().unwrap();
        let rx_iv: [u8; 16] = init[80..96].try_into().unwrap();
        Self {
            rx: FrameReader::new(CtrProcessor::new(&rx_key, &rx_iv)),
            tx: CtrProcessor::new(&tx_key, &tx_iv),
        }
    }

    fn send(&mut self, nonce: &[u8; 32], payload: &[u8]) -> Vec<u8> {
        frame::pack(&mut self.tx, nonce, payload)
    }

    fn recv(&mut self, wire: &[u8]) -> Vec<u8> {
        self.rx.feed(wire);
        self.rx.next_payload().unwrap().expect("incomplete frame")
    }
}

fn connect() -> (Connection, Server, Vec<u8>) {
    let init = init_block();
    let (connection, packet) =
        Connection::do_connect(&server_public(), &CLIENT_SEED, &init).unwrap();
    (connection, Server::new(&init), packet)
}

fn confirm(connection: &mut Connection, server: &mut Server, codec: &Codec<'_>) {
    let events = connection
        .process_chunk(codec, &server.send(&[0xAA; 32], &[]))
        .unwrap();
    assert_eq!(events, vec![AdnlEvent::Ready]);
}

#[test]
fn handshake_packet_opens_server_side() {
    let (_connection, _server, packet) = connect();
    assert_eq!(packet.len(), 256);
    assert_eq!(packet[..32], key_id(&server_public()));

    let ephemeral: [u8; 32] = packet[32..64].try_into().unwrap();
    let digest: [u8; 32] = packet[64..96].try_into().unwrap();
    let secret = StaticSecret::from(ed25519_seed_to_x25519(&SERVER_SEED))
        .diffie_hellman(&PublicKey::from(ephemeral))
        .to_bytes();

    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&secret[..16]);
    key[16..].copy_from_slice(&digest[16..]);
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&digest[..4]);
    iv[4..].copy_from_slice(&secret[20..]);

    let mut init = packet[96..].to_vec();
    CtrProcessor::new(&key, &iv).process(&mut init);
    assert_eq!(init, init_block());
    assert_eq!(digest, sha256!(&init));
}

#[test]
fn empty_frame_confirms_handshake_and_starts_pings() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();

    let rnd = [0x11u8; 40];
    // silent until the server confirms
    assert!(connection.do_tick(&codec, 1000, &rnd).unwrap().is_none());
    assert!(!connection.is_ready());
    confirm(&mut connection, &mut server, &codec);
    assert!(connection.is_ready());

    let wire = connection.do_tick(&codec, 1000, &rnd).unwrap().unwrap();
    let ping = codec.from_bytes(&server.recv(&wire)).unwrap();
    let ping = ping.as_obj().unwrap();
    assert_eq!(ping.predicate(), "tcp.ping");
    assert_eq!(
        ping.get("random_id").and_then(Value::as_i64),
        Some(i64::from_le_bytes([0x11; 8]))
    );

    // once per interval
    let rnd = [0x22u8; 40];
    assert!(connection.do_tick(&codec, 1004, &rnd).unwrap().is_none());
    assert!(connection.do_tick(&codec, 1005, &rnd).unwrap().is_some());
}

#[test]
fn pong_resolves_only_outstanding_pings() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let rnd = [0x33u8; 40];
    let wire = connection.do_tick(&codec, 2000, &rnd).unwrap().unwrap();
    server.recv(&wire);
    let random_id = i64::from_le_bytes([0x33; 8]);

    let pong = Obj::new("tcp.pong").with("random_id", random_id);
    let payload = codec.to_bytes(&pong.into(), pylon_adnl::ADNL_LAYER).unwrap();

    let events = connection
        .process_chunk(&codec, &server.send(&[1u8; 32], &payload))
        .unwrap();
    assert_eq!(events, vec![AdnlEvent::Pong { random_id }]);

    // a second copy matches nothing
    let events = connection
        .process_chunk(&codec, &server.send(&[2u8; 32], &payload))
        .unwrap();
    assert!(events.is_empty());
}

#[test]
fn query_answer_round_trip() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let inner = [0xDEu8, 0xAD, 0xBE, 0xEF];
    let (query_id, wire) = connection
        .do_query(&codec, &inner, None, &[0xAB; 64])
        .unwrap();
    assert_eq!(query_id, [0xAB; 32]);

    let query = codec.from_bytes(&server.recv(&wire)).unwrap();
    let query = query.as_obj().unwrap();
    assert_eq!(query.predicate(), "adnl.message.query");
    assert_eq!(
        query.get("query_id").and_then(Value::int256_bytes),
        Some(query_id)
    );
    assert_eq!(
        query.get("query").and_then(Value::as_bytes),
        Some(&inner[..])
    );

    let answer = Obj::new("adnl.message.answer")
        .with("query_id", query_id)
        .with("answer", b"result".to_vec());
    let payload = codec
        .to_bytes(&answer.into(), pylon_adnl::ADNL_LAYER)
        .unwrap();
    let events = connection
        .process_chunk(&codec, &server.send(&[3u8; 32], &payload))
        .unwrap();
    assert_eq!(
        events,
        vec![AdnlEvent::Answer {
            query_id,
            answer: b"result".to_vec(),
        }]
    );
}

#[test]
fn unsolicited_answers_are_dropped() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let answer = Obj::new("adnl.message.answer")
        .with("query_id", [0x99u8; 32])
        .with("answer", b"orphan".to_vec());
    let payload = codec
        .to_bytes(&answer.into(), pylon_adnl::ADNL_LAYER)
        .unwrap();
    let events = connection
        .process_chunk(&codec, &server.send(&[4u8; 32], &payload))
        .unwrap();
    assert!(events.is_empty());
}

#[test]
fn answers_arrive_across_chunks() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let (query_id, wire) = connection
        .do_query(&codec, &[1, 2, 3, 4], None, &[0x55; 64])
        .unwrap();
    server.recv(&wire);

    let answer = Obj::new("adnl.message.answer")
        .with("query_id", query_id)
        .with("answer", b"slow".to_vec());
    let payload = codec
        .to_bytes(&answer.into(), pylon_adnl::ADNL_LAYER)
        .unwrap();
    let frame = server.send(&[5u8; 32], &payload);

    let (head, tail) = frame.split_at(frame.len() - 1);
    for byte in head {
        assert!(connection.process_chunk(&codec, &[*byte]).unwrap().is_empty());
    }
    let events = connection.process_chunk(&codec, tail).unwrap();
    assert_eq!(
        events,
        vec![AdnlEvent::Answer {
            query_id,
            answer: b"slow".to_vec(),
        }]
    );
}

#[test]
fn expired_queries_fail() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let (query_id, _wire) = connection
        .do_query(&codec, &[9, 9, 9, 9], Some(500), &[0x77; 64])
        .unwrap();
    assert!(connection.expire(499).is_empty());
    assert_eq!(
        connection.expire(500),
        vec![AdnlEvent::Failed {
            query_id,
            error: QueryError::Timeout,
        }]
    );
    assert!(connection.expire(501).is_empty());
}

#[test]
fn corrupted_stream_is_fatal() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let (mut connection, mut server, _packet) = connect();
    confirm(&mut connection, &mut server, &codec);

    let mut frame = server.send(&[6u8; 32], b"anything");
    frame[10] ^= 0x80;
    assert_eq!(
        connection.process_chunk(&codec, &frame),
        Err(ConnectionError::Frame(FrameError::ChecksumMismatch))
    );
}
