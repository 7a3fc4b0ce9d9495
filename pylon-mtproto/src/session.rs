//! Sans-IO session state machine: outgoing queue, container packing,
//! encrypted framing and incoming dispatch.
//!
//! The session never touches the network. Callers serialize requests
//! through [`Session::push`], drain wire frames with [`Session::flush`],
//! and feed every received frame to [`Session::process_incoming`],
//! reacting to the returned [`SessionEvent`]s.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use pylon_crypto::{AuthKey, DecryptError, DequeBuffer, decrypt_data_v2, do_encrypt_data_v2};
use pylon_tl::{Codec, Obj, Stream, Value};

use crate::msg_id::{MsgIdError, MsgIdGen, MsgIdValidator, now_parts};
use crate::transport;

/// `msg_container` constructor id.
const MSG_CONTAINER_ID: u32 = 0x73f1_f8dc;

/// Combined inner-message size ceiling for one container.
pub const CONTAINER_MAX_BYTES: usize = 32760;
/// Inner-message count ceiling for one container.
pub const CONTAINER_MAX_COUNT: usize = 1020;

/// Outstanding requests kept at most; the oldest is evicted beyond this.
const PENDING_CAPACITY: usize = 512;

/// Why a request will never get its answer.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestError {
    /// No response within the request's deadline.
    Timeout,
    /// The transport reported an error frame; the session was reset.
    Transport { code: i32 },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Transport { code } => write!(f, "transport error {code}"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Session-level failures.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionError {
    Tl(pylon_tl::Error),
    Decrypt(DecryptError),
    MsgId(MsgIdError),
    /// A frame too short or with an impossible layout.
    InvalidFrame { len: usize },
    SessionIdMismatch { got: i64, expected: i64 },
    /// Encrypted traffic requested before any auth key was installed.
    NoAuthKey,
    /// Only handshake RPCs (dotless predicates) may travel unencrypted.
    NotPlaintextEligible { predicate: String },
    /// A service message lacks a field its dispatch needs.
    MissingField { predicate: String, name: &'static str },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tl(err) => write!(f, "tl: {err}"),
            Self::Decrypt(err) => write!(f, "decrypt: {err}"),
            Self::MsgId(err) => write!(f, "msg_id: {err}"),
            Self::InvalidFrame { len } => write!(f, "invalid frame of {len} bytes"),
            Self::SessionIdMismatch { got, expected } => {
                write!(f, "session_id {got} does not match {expected}")
            }
            Self::NoAuthKey => write!(f, "no auth key installed"),
            Self::NotPlaintextEligible { predicate } => {
                write!(f, "{predicate} cannot be sent in plaintext")
            }
            Self::MissingField { predicate, name } => {
                write!(f, "service message {predicate} lacks field {name}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<pylon_tl::Error> for SessionError {
    fn from(err: pylon_tl::Error) -> Self {
        Self::Tl(err)
    }
}

impl From<DecryptError> for SessionError {
    fn from(err: DecryptError) -> Self {
        Self::Decrypt(err)
    }
}

impl From<MsgIdError> for SessionError {
    fn from(err: MsgIdError) -> Self {
        Self::MsgId(err)
    }
}

/// What an incoming frame produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A plaintext (handshake) message arrived.
    Plain(Value),
    /// A pending request resolved with a result.
    RpcResult { req_msg_id: i64, result: Value },
    /// A pending request resolved with an `rpc_error`.
    RpcError {
        req_msg_id: i64,
        code: i32,
        message: String,
    },
    /// `pong` for the ping sent as `req_msg_id`.
    Pong { req_msg_id: i64, ping_id: i64 },
    /// `bad_server_salt`; the session already adopted the new salt and
    /// dropped the offending request, which should be resent.
    SaltChanged { req_msg_id: i64, salt: i64 },
    /// `bad_msg_notification` for an outgoing message.
    BadMsg { req_msg_id: i64, error_code: i32 },
    /// The server opened a fresh session; its salt was adopted.
    NewSession { first_msg_id: i64, unique_id: i64 },
    /// `future_salts` answer, kept whole.
    FutureSalts { req_msg_id: i64, salts: Value },
    /// `msgs_state_info` answer, kept whole.
    MsgsStateInfo { req_msg_id: i64, info: Value },
    /// A message whose declared type is `Updates`.
    Update(Value),
    /// A pending request that will never resolve.
    Failed {
        req_msg_id: i64,
        error: RequestError,
    },
    /// Transport error frame; the auth key was discarded and the session
    /// must re-handshake before further traffic.
    Reset { code: i32 },
}

/// Client metadata announced through `initConnection`, plus the API
/// layer every query is serialized against.
#[derive(Clone, Debug)]
pub struct InitParams {
    pub layer: u32,
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            layer: crate::MTPROTO_LAYER,
            api_id: 0,
            device_model: "Unknown".into(),
            system_version: "1.0".into(),
            app_version: "1.0".into(),
            system_lang_code: "en".into(),
            lang_pack: String::new(),
            lang_code: "en".into(),
        }
    }
}

struct Outgoing {
    msg_id: i64,
    seq_no: i32,
    body: Vec<u8>,
}

struct Pending {
    ret_ty: String,
    deadline: Option<u64>,
}

/// One logical connection to a datacenter.
pub struct Session {
    params: InitParams,
    session_id: i64,
    sequence: i32,
    r#gen: MsgIdGen,
    validator: MsgIdValidator,
    auth_key: Option<AuthKey>,
    salt: i64,
    queue: VecDeque<Outgoing>,
    pending: HashMap<i64, Pending>,
    pending_acks: Vec<i64>,
    init_sent: bool,
}

impl Session {
    pub fn new(params: InitParams) -> Self {
        let mut id = [0u8; 8];
        getrandom::getrandom(&mut id).expect("failed to generate secure random data");
        Self::with_session_id(params, i64::from_le_bytes(id))
    }

    /// Session with a caller-chosen id, for deterministic tests.
    pub fn with_session_id(params: InitParams, session_id: i64) -> Self {
        Self {
            params,
            session_id,
            sequence: 0,
            r#gen: MsgIdGen::new(0),
            validator: MsgIdValidator::new(),
            auth_key: None,
            salt: 0,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            pending_acks: Vec::new(),
            init_sent: false,
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    pub fn auth_key(&self) -> Option<&AuthKey> {
        self.auth_key.as_ref()
    }

    /// Installs the key a finished handshake produced. The next method
    /// call will announce client metadata again.
    pub fn set_auth_key(&mut self, key: AuthKey, salt: i64, time_offset: i32) {
        self.auth_key = Some(key);
        self.salt = salt;
        self.r#gen.set_time_offset(time_offset);
        self.init_sent = false;
    }

    /// Content-related messages take the next odd value and advance the
    /// counter; service messages reuse the current even value.
    fn next_seq(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.sequence * 2 + 1;
            self.sequence += 1;
            seq
        } else {
            self.sequence * 2
        }
    }

    /// Frames one handshake request as an unencrypted message:
    /// `zero auth_key_id || msg_id || length || body`.
    pub fn pack_plain(&mut self, codec: &Codec<'_>, request: &Obj) -> Result<Vec<u8>, SessionError> {
        let (secs, nanos) = now_parts();
        self.do_pack_plain(codec, request, secs, nanos)
    }

    pub fn do_pack_plain(
        &mut self,
        codec: &Codec<'_>,
        request: &Obj,
        secs: u64,
        nanos: u32,
    ) -> Result<Vec<u8>, SessionError> {
        if request.predicate().contains('.') {
            return Err(SessionError::NotPlaintextEligible {
                predicate: request.predicate().to_owned(),
            });
        }
        let body = codec.to_bytes(&request.clone().into(), self.params.layer)?;
        let msg_id = self.r#gen.do_next(secs, nanos);

        let mut frame = Vec::with_capacity(20 + body.len());
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(&msg_id.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Splits an unencrypted frame into `(msg_id, body)`.
    pub fn unpack_plain(frame: &[u8]) -> Result<(i64, &[u8]), SessionError> {
        if frame.len() < 20 || frame[..8] != [0u8; 8] {
            return Err(SessionError::InvalidFrame { len: frame.len() });
        }
        let msg_id = i64::from_le_bytes(frame[8..16].try_into().unwrap());
        let len = u32::from_le_bytes(frame[16..20].try_into().unwrap()) as usize;
        if 20 + len > frame.len() {
            return Err(SessionError::InvalidFrame { len: frame.len() });
        }
        Ok((msg_id, &frame[20..20 + len]))
    }

    /// Queues a method call. Returns the message id the answer will be
    /// correlated by. `timeout` is an absolute deadline in seconds.
    pub fn push(
        &mut self,
        codec: &Codec<'_>,
        request: &Obj,
        timeout: Option<u64>,
    ) -> Result<i64, SessionError> {
        let (secs, nanos) = now_parts();
        self.do_push(codec, request, timeout, secs, nanos)
    }

    pub fn do_push(
        &mut self,
        codec: &Codec<'_>,
        request: &Obj,
        timeout: Option<u64>,
        secs: u64,
        nanos: u32,
    ) -> Result<i64, SessionError> {
        let def = codec
            .registry()
            .find_by_predicate(request.predicate(), self.params.layer)?;
        let ret_ty = def.ty.clone();
        // announce client metadata around the first API call per key.
        // Service-scheme methods never wrap; API methods do, even when
        // resolved through layer fallback.
        let wrap = !self.init_sent && def.is_method && def.layer != crate::MTPROTO_LAYER;

        let value = if wrap {
            self.init_sent = true;
            let query = Obj::new("initConnection")
                .with("api_id", self.params.api_id)
                .with("device_model", self.params.device_model.clone())
                .with("system_version", self.params.system_version.clone())
                .with("app_version", self.params.app_version.clone())
                .with("system_lang_code", self.params.system_lang_code.clone())
                .with("lang_pack", self.params.lang_pack.clone())
                .with("lang_code", self.params.lang_code.clone())
                .with("query", Value::Obj(request.clone()));
            Value::Obj(
                Obj::new("invokeWithLayer")
                    .with("layer", self.params.layer as i32)
                    .with("query", Value::Obj(query)),
            )
        } else {
            Value::Obj(request.clone())
        };

        let body = codec.to_bytes(&value, self.params.layer)?;
        let msg_id = self.r#gen.do_next(secs, nanos);
        let seq_no = self.next_seq(true);
        self.queue.push_back(Outgoing {
            msg_id,
            seq_no,
            body,
        });

        if self.pending.len() >= PENDING_CAPACITY {
            if let Some(&oldest) = self.pending.keys().min() {
                self.pending.remove(&oldest);
                log::warn!("pending table full, evicting request {oldest}");
            }
        }
        self.pending.insert(
            msg_id,
            Pending {
                ret_ty,
                deadline: timeout,
            },
        );
        Ok(msg_id)
    }

    /// Drains queued messages into one encrypted wire frame: a single
    /// message as-is, several wrapped in a `msg_container`. Accumulated
    /// acknowledgements ride along as a `msgs_ack`. Returns `None` when
    /// there is nothing to send; messages beyond the container ceilings
    /// stay queued for the next call.
    pub fn flush(&mut self, codec: &Codec<'_>) -> Result<Option<Vec<u8>>, SessionError> {
        let mut rnd = [0u8; 32];
        getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
        let (secs, nanos) = now_parts();
        self.do_flush(codec, secs, nanos, &rnd)
    }

    pub fn do_flush(
        &mut self,
        codec: &Codec<'_>,
        secs: u64,
        nanos: u32,
        rnd: &[u8; 32],
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let auth_key = self.auth_key.clone().ok_or(SessionError::NoAuthKey)?;

        if !self.pending_acks.is_empty() {
            let ids: Vec<Value> = self.pending_acks.drain(..).map(Value::Long).collect();
            let ack = Obj::new("msgs_ack").with("msg_ids", Value::Vector(ids));
            let body = codec.to_bytes(&ack.into(), self.params.layer)?;
            let msg_id = self.r#gen.do_next(secs, nanos);
            let seq_no = self.next_seq(false);
            self.queue.push_front(Outgoing {
                msg_id,
                seq_no,
                body,
            });
        }
        if self.queue.is_empty() {
            return Ok(None);
        }

        let mut batch: Vec<Outgoing> = Vec::new();
        let mut total = 0;
        while let Some(front) = self.queue.front() {
            let framed = 16 + front.body.len();
            if !batch.is_empty()
                && (total + framed > CONTAINER_MAX_BYTES || batch.len() >= CONTAINER_MAX_COUNT)
            {
                break;
            }
            total += framed;
            batch.push(self.queue.pop_front().unwrap());
        }

        let mut buffer = DequeBuffer::with_capacity(32 + 8 + total + 48, 24);
        buffer.extend(self.salt.to_le_bytes());
        buffer.extend(self.session_id.to_le_bytes());
        if batch.len() == 1 {
            let msg = &batch[0];
            buffer.extend(msg.msg_id.to_le_bytes());
            buffer.extend(msg.seq_no.to_le_bytes());
            buffer.extend((msg.body.len() as u32).to_le_bytes());
            buffer.extend(msg.body.iter().copied());
        } else {
            let container_id = self.r#gen.do_next(secs, nanos);
            let seq_no = self.next_seq(false);
            buffer.extend(container_id.to_le_bytes());
            buffer.extend(seq_no.to_le_bytes());
            buffer.extend(((8 + total) as u32).to_le_bytes());
            buffer.extend(MSG_CONTAINER_ID.to_le_bytes());
            buffer.extend((batch.len() as u32).to_le_bytes());
            for msg in &batch {
                buffer.extend(msg.msg_id.to_le_bytes());
                buffer.extend(msg.seq_no.to_le_bytes());
                buffer.extend((msg.body.len() as u32).to_le_bytes());
                buffer.extend(msg.body.iter().copied());
            }
        }

        do_encrypt_data_v2(&mut buffer, &auth_key, rnd);
        Ok(Some(buffer.as_ref().to_vec()))
    }

    /// Handles one complete frame off the wire.
    pub fn process_incoming(
        &mut self,
        codec: &Codec<'_>,
        frame: &[u8],
        now_secs: u64,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let mut events = Vec::new();

        if let Some(code) = transport::error_code(frame) {
            log::warn!("transport error {code}, resetting session");
            for (&req_msg_id, _) in self.pending.iter() {
                events.push(SessionEvent::Failed {
                    req_msg_id,
                    error: RequestError::Transport { code },
                });
            }
            self.reset();
            events.push(SessionEvent::Reset { code });
            return Ok(events);
        }

        if frame.len() >= 8 && frame[..8] == [0u8; 8] {
            let (_msg_id, body) = Self::unpack_plain(frame)?;
            events.push(SessionEvent::Plain(codec.from_bytes(body)?));
            return Ok(events);
        }

        let plain = {
            let auth_key = self.auth_key.as_ref().ok_or(SessionError::NoAuthKey)?;
            let mut buffer = frame.to_vec();
            decrypt_data_v2(&mut buffer, auth_key)?.to_vec()
        };
        if plain.len() < 32 {
            return Err(SessionError::InvalidFrame { len: plain.len() });
        }
        let session_id = i64::from_le_bytes(plain[8..16].try_into().unwrap());
        if session_id != self.session_id {
            return Err(SessionError::SessionIdMismatch {
                got: session_id,
                expected: self.session_id,
            });
        }
        let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
        self.validator
            .check(msg_id, now_secs, self.r#gen.time_offset())?;
        let seq_no = i32::from_le_bytes(plain[24..28].try_into().unwrap());
        let len = u32::from_le_bytes(plain[28..32].try_into().unwrap()) as usize;
        if 32 + len > plain.len() {
            return Err(SessionError::InvalidFrame { len: plain.len() });
        }

        self.dispatch_body(codec, msg_id, seq_no, &plain[32..32 + len], &mut events)?;
        Ok(events)
    }

    /// Dispatches one decoded message body, expanding containers.
    fn dispatch_body(
        &mut self,
        codec: &Codec<'_>,
        msg_id: i64,
        seq_no: i32,
        body: &[u8],
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        // content-related incoming messages demand an acknowledgement
        if seq_no % 2 != 0 {
            self.pending_acks.push(msg_id);
        }

        if body.len() >= 4
            && u32::from_le_bytes(body[..4].try_into().unwrap()) == MSG_CONTAINER_ID
        {
            let mut stream = Stream::from_bytes(body);
            stream.set_pos(1);
            let count = stream.read_u32()? as usize;
            if count > stream.remaining() {
                return Err(SessionError::InvalidFrame { len: body.len() });
            }
            for _ in 0..count {
                let inner_id = stream.read_i64()?;
                let inner_seq = stream.read_i32()?;
                let inner_len = stream.read_u32()? as usize;
                let offset = stream.pos() * 4;
                if inner_len % 4 != 0 || offset + inner_len > body.len() {
                    return Err(SessionError::InvalidFrame { len: body.len() });
                }
                stream.set_pos(stream.pos() + inner_len / 4);
                if let Err(err) = MsgIdValidator::check_container_inner(inner_id, msg_id) {
                    log::warn!("rejecting contained message: {err}");
                    continue;
                }
                self.dispatch_body(
                    codec,
                    inner_id,
                    inner_seq,
                    &body[offset..offset + inner_len],
                    events,
                )?;
            }
            return Ok(());
        }

        match codec.from_bytes(body)? {
            Value::Obj(obj) => self.dispatch_obj(codec, obj, events),
            other => {
                log::debug!("dropping non-object message: {}", other.kind());
                Ok(())
            }
        }
    }

    fn dispatch_obj(
        &mut self,
        codec: &Codec<'_>,
        mut obj: Obj,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        match obj.predicate() {
            "rpc_result" => {
                let req_msg_id = long_field(&obj, "req_msg_id")?;
                self.pending.remove(&req_msg_id);
                let result = obj
                    .remove("result")
                    .ok_or_else(|| missing(&obj, "result"))?;
                match result.as_obj() {
                    Some(error) if error.predicate() == "rpc_error" => {
                        events.push(SessionEvent::RpcError {
                            req_msg_id,
                            code: int_field(error, "error_code")?,
                            message: string_field(error, "error_message")?,
                        });
                    }
                    _ => events.push(SessionEvent::RpcResult { req_msg_id, result }),
                }
            }
            "pong" => {
                let req_msg_id = long_field(&obj, "msg_id")?;
                self.pending.remove(&req_msg_id);
                events.push(SessionEvent::Pong {
                    req_msg_id,
                    ping_id: long_field(&obj, "ping_id")?,
                });
            }
            "bad_server_salt" => {
                let req_msg_id = long_field(&obj, "bad_msg_id")?;
                let salt = long_field(&obj, "new_server_salt")?;
                self.salt = salt;
                self.pending.remove(&req_msg_id);
                events.push(SessionEvent::SaltChanged { req_msg_id, salt });
            }
            "bad_msg_notification" => {
                let req_msg_id = long_field(&obj, "bad_msg_id")?;
                self.pending.remove(&req_msg_id);
                events.push(SessionEvent::BadMsg {
                    req_msg_id,
                    error_code: int_field(&obj, "error_code")?,
                });
            }
            "new_session_created" => {
                self.salt = long_field(&obj, "server_salt")?;
                events.push(SessionEvent::NewSession {
                    first_msg_id: long_field(&obj, "first_msg_id")?,
                    unique_id: long_field(&obj, "unique_id")?,
                });
            }
            "future_salts" => {
                let req_msg_id = long_field(&obj, "req_msg_id")?;
                self.pending.remove(&req_msg_id);
                events.push(SessionEvent::FutureSalts {
                    req_msg_id,
                    salts: Value::Obj(obj),
                });
            }
            "msgs_state_info" => {
                let req_msg_id = long_field(&obj, "req_msg_id")?;
                self.pending.remove(&req_msg_id);
                events.push(SessionEvent::MsgsStateInfo {
                    req_msg_id,
                    info: Value::Obj(obj),
                });
            }
            "msgs_ack" => {
                log::debug!("server acknowledged {:?}", obj.get("msg_ids"));
            }
            _ => {
                let ty = codec
                    .registry()
                    .find_by_predicate(obj.predicate(), self.params.layer)
                    .map(|def| def.ty.clone())
                    .ok();
                match ty {
                    Some(ty) if ty == "Updates" => {
                        events.push(SessionEvent::Update(Value::Obj(obj)));
                    }
                    Some(ty) => {
                        // answers delivered without an rpc_result wrapper
                        // correlate by declared return type
                        let matched = self
                            .pending
                            .iter()
                            .filter(|(_, pending)| pending.ret_ty == ty)
                            .map(|(&id, _)| id)
                            .min();
                        match matched {
                            Some(req_msg_id) => {
                                self.pending.remove(&req_msg_id);
                                events.push(SessionEvent::RpcResult {
                                    req_msg_id,
                                    result: Value::Obj(obj),
                                });
                            }
                            None => {
                                log::debug!("no pending request wants a {}", obj.predicate());
                            }
                        }
                    }
                    None => log::debug!("unroutable message {}", obj.predicate()),
                }
            }
        }
        Ok(())
    }

    /// Fails every pending request whose deadline has passed.
    pub fn expire(&mut self, now_secs: u64) -> Vec<SessionEvent> {
        let expired: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline.is_some_and(|deadline| now_secs >= deadline))
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .map(|req_msg_id| {
                self.pending.remove(&req_msg_id);
                SessionEvent::Failed {
                    req_msg_id,
                    error: RequestError::Timeout,
                }
            })
            .collect()
    }

    /// Discards the auth key and all per-connection state. A new
    /// handshake must complete before encrypted traffic can flow again.
    pub fn reset(&mut self) {
        self.auth_key = None;
        self.salt = 0;
        self.sequence = 0;
        self.validator = MsgIdValidator::new();
        self.queue.clear();
        self.pending.clear();
        self.pending_acks.clear();
        self.init_sent = false;
    }
}

fn missing(obj: &Obj, name: &'static str) -> SessionError {
    SessionError::MissingField {
        predicate: obj.predicate().to_owned(),
        name,
    }
}

fn long_field(obj: &Obj, name: &'static str) -> Result<i64, SessionError> {
    obj.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing(obj, name))
}

fn int_field(obj: &Obj, name: &'static str) -> Result<i32, SessionError> {
    obj.get(name)
        .and_then(Value::as_i32)
        .ok_or_else(|| missing(obj, name))
}

// service schemes may declare this as `string` or `bytes` depending on
// the layer they were published at
fn string_field(obj: &Obj, name: &'static str) -> Result<String, SessionError> {
    obj.get(name)
        .and_then(Value::as_bytes)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .ok_or_else(|| missing(obj, name))
}
