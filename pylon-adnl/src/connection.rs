//! Sans-IO ADNL connection driver.
//!
//! The connection never touches a socket. [`Connection::connect`]
//! yields the handshake packet to send first; afterwards callers wrap
//! requests with [`Connection::query`], let [`Connection::tick`] emit
//! keepalive pings, and feed every received chunk to
//! [`Connection::process_chunk`], reacting to the returned
//! [`AdnlEvent`]s.

use std::collections::{HashMap, HashSet};
use std::fmt;

use pylon_crypto::CtrProcessor;
use pylon_crypto::ecdh::{KeyError, KeyPair};
use pylon_tl::{Codec, Obj, Value};

use crate::frame::{self, FrameError, FrameReader};
use crate::handshake;

/// Keepalive cadence; servers drop connections that stay silent.
pub const PING_INTERVAL_SECS: u64 = 5;

/// Outstanding queries kept at most; the oldest is evicted beyond this.
const PENDING_CAPACITY: usize = 256;

/// Why a query will never get its answer.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryError {
    /// No answer within the query's deadline.
    Timeout,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "query timed out"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Connection-level failures.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionError {
    Tl(pylon_tl::Error),
    Frame(FrameError),
    Key(KeyError),
    /// A wrapper message lacks a field its dispatch needs.
    MissingField { predicate: String, name: &'static str },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tl(err) => write!(f, "tl: {err}"),
            Self::Frame(err) => write!(f, "frame: {err}"),
            Self::Key(err) => write!(f, "key: {err}"),
            Self::MissingField { predicate, name } => {
                write!(f, "message {predicate} lacks field {name}")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<pylon_tl::Error> for ConnectionError {
    fn from(err: pylon_tl::Error) -> Self {
        Self::Tl(err)
    }
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

impl From<KeyError> for ConnectionError {
    fn from(err: KeyError) -> Self {
        Self::Key(err)
    }
}

/// What incoming bytes produced.
#[derive(Clone, Debug, PartialEq)]
pub enum AdnlEvent {
    /// The server confirmed the handshake with its first (empty) frame.
    Ready,
    /// `tcp.pong` for a ping this connection sent.
    Pong { random_id: i64 },
    /// A pending query resolved; `answer` is the TL-serialized reply.
    Answer { query_id: [u8; 32], answer: Vec<u8> },
    /// A pending query that will never resolve.
    Failed {
        query_id: [u8; 32],
        error: QueryError,
    },
}

/// Numeric id of a smart-contract get-method, as lite-server
/// `runSmcMethod` queries expect: `crc16(name)` with bit 16 set.
pub fn method_id(name: &str) -> i64 {
    i64::from(pylon_crypto::crc16(name.as_bytes())) | 0x10000
}

struct PendingQuery {
    deadline: Option<u64>,
}

/// One connection to a lite-server.
pub struct Connection {
    reader: FrameReader,
    tx: CtrProcessor,
    pending: HashMap<[u8; 32], PendingQuery>,
    pings: HashSet<i64>,
    last_ping: Option<u64>,
    ready: bool,
}

impl Connection {
    /// Opens a connection toward the server's Ed25519 identity. The
    /// returned packet must reach the server before any frame.
    pub fn connect(server_public: &[u8; 32]) -> Result<(Self, Vec<u8>), ConnectionError> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("failed to generate secure random data");
        let mut init = [0u8; 160];
        getrandom::getrandom(&mut init).expect("failed to generate secure random data");
        Self::do_connect(server_public, &seed, &init)
    }

    pub fn do_connect(
        server_public: &[u8; 32],
        seed: &[u8; 32],
        init: &[u8; 160],
    ) -> Result<(Self, Vec<u8>), ConnectionError> {
        let ephemeral = KeyPair::from_bytes(*seed);
        let (packet, keys) = handshake::do_client_handshake(server_public, &ephemeral, init)?;
        Ok((
            Self {
                reader: FrameReader::new(keys.rx),
                tx: keys.tx,
                pending: HashMap::new(),
                pings: HashSet::new(),
                last_ping: None,
                ready: false,
            },
            packet,
        ))
    }

    /// The handshake has been confirmed and frames may flow.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Wraps a TL-serialized request in `adnl.message.query` and seals
    /// it into a wire frame. Returns the query id the answer will be
    /// correlated by. `timeout` is an absolute deadline in seconds.
    pub fn query(
        &mut self,
        codec: &Codec<'_>,
        query: &[u8],
        timeout: Option<u64>,
    ) -> Result<([u8; 32], Vec<u8>), ConnectionError> {
        let mut rnd = [0u8; 64];
        getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
        self.do_query(codec, query, timeout, &rnd)
    }

    pub fn do_query(
        &mut self,
        codec: &Codec<'_>,
        query: &[u8],
        timeout: Option<u64>,
        rnd: &[u8; 64],
    ) -> Result<([u8; 32], Vec<u8>), ConnectionError> {
        let query_id: [u8; 32] = rnd[..32].try_into().unwrap();
        let nonce: [u8; 32] = rnd[32..].try_into().unwrap();

        let message = Obj::new("adnl.message.query")
            .with("query_id", query_id)
            .with("query", query.to_vec());
        let payload = codec.to_bytes(&message.into(), crate::ADNL_LAYER)?;

        if self.pending.len() >= PENDING_CAPACITY {
            if let Some(&oldest) = self.pending.keys().min() {
                self.pending.remove(&oldest);
                log::warn!("pending table full, evicting query {oldest:02x?}");
            }
        }
        self.pending.insert(query_id, PendingQuery { deadline: timeout });
        Ok((query_id, frame::pack(&mut self.tx, &nonce, &payload)))
    }

    /// Emits a `tcp.ping` frame once per interval, and nothing while
    /// the handshake is still unconfirmed.
    pub fn tick(
        &mut self,
        codec: &Codec<'_>,
        now_secs: u64,
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        let mut rnd = [0u8; 40];
        getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
        self.do_tick(codec, now_secs, &rnd)
    }

    pub fn do_tick(
        &mut self,
        codec: &Codec<'_>,
        now_secs: u64,
        rnd: &[u8; 40],
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        if !self.ready {
            return Ok(None);
        }
        if let Some(last) = self.last_ping {
            if now_secs < last + PING_INTERVAL_SECS {
                return Ok(None);
            }
        }
        let random_id = i64::from_le_bytes(rnd[..8].try_into().unwrap());
        let nonce: [u8; 32] = rnd[8..].try_into().unwrap();

        let ping = Obj::new("tcp.ping").with("random_id", random_id);
        let payload = codec.to_bytes(&ping.into(), crate::ADNL_LAYER)?;

        if self.pings.len() >= PENDING_CAPACITY {
            if let Some(&oldest) = self.pings.iter().min() {
                self.pings.remove(&oldest);
            }
        }
        self.pings.insert(random_id);
        self.last_ping = Some(now_secs);
        Ok(Some(frame::pack(&mut self.tx, &nonce, &payload)))
    }

    /// Absorbs raw bytes off the wire and dispatches every frame they
    /// complete. Empty frames confirm the handshake and keep the
    /// connection alive; anything else is a TL message.
    pub fn process_chunk(
        &mut self,
        codec: &Codec<'_>,
        chunk: &[u8],
    ) -> Result<Vec<AdnlEvent>, ConnectionError> {
        let mut events = Vec::new();
        self.reader.feed(chunk);
        while let Some(payload) = self.reader.next_payload()? {
            if payload.is_empty() {
                if !self.ready {
                    self.ready = true;
                    events.push(AdnlEvent::Ready);
                }
                continue;
            }
            match codec.from_bytes(&payload)? {
                Value::Obj(obj) => self.dispatch_obj(obj, &mut events)?,
                other => log::debug!("dropping non-object message: {}", other.kind()),
            }
        }
        Ok(events)
    }

    fn dispatch_obj(
        &mut self,
        mut obj: Obj,
        events: &mut Vec<AdnlEvent>,
    ) -> Result<(), ConnectionError> {
        match obj.predicate() {
            "tcp.pong" => {
                let random_id = long_field(&obj, "random_id")?;
                if self.pings.remove(&random_id) {
                    events.push(AdnlEvent::Pong { random_id });
                } else {
                    log::debug!("pong {random_id} matches no outstanding ping");
                }
            }
            "adnl.message.answer" => {
                let query_id = int256_field(&obj, "query_id")?;
                let answer = take_bytes(&mut obj, "answer")?;
                if self.pending.remove(&query_id).is_some() {
                    events.push(AdnlEvent::Answer { query_id, answer });
                } else {
                    log::debug!("answer matches no outstanding query");
                }
            }
            _ => log::debug!("unroutable message {}", obj.predicate()),
        }
        Ok(())
    }

    /// Fails every pending query whose deadline has passed.
    pub fn expire(&mut self, now_secs: u64) -> Vec<AdnlEvent> {
        let expired: Vec<[u8; 32]> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline.is_some_and(|deadline| now_secs >= deadline))
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .map(|query_id| {
                self.pending.remove(&query_id);
                AdnlEvent::Failed {
                    query_id,
                    error: QueryError::Timeout,
                }
            })
            .collect()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection(ready={}, pending={})",
            self.ready,
            self.pending.len()
        )
    }
}

fn missing(obj: &Obj, name: &'static str) -> ConnectionError {
    ConnectionError::MissingField {
        predicate: obj.predicate().to_owned(),
        name,
    }
}

fn long_field(obj: &Obj, name: &'static str) -> Result<i64, ConnectionError> {
    obj.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing(obj, name))
}

fn int256_field(obj: &Obj, name: &'static str) -> Result<[u8; 32], ConnectionError> {
    obj.get(name)
        .and_then(Value::int256_bytes)
        .ok_or_else(|| missing(obj, name))
}

fn take_bytes(obj: &mut Obj, name: &'static str) -> Result<Vec<u8>, ConnectionError> {
    let value = obj.remove(name).ok_or_else(|| missing(obj, name))?;
    value
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| missing(obj, name))
}
