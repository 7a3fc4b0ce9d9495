//! Sans-IO authorization key generation, including the temp-key
//! variant and temp-to-permanent binding.
//!
//! # Flow
//!
//! ```text
//! let mut handshake = Handshake::perm();
//! let req = handshake.start()?;
//! // send req (plaintext framing), receive resp, then repeatedly:
//! match handshake.advance(&codec, &resp)? {
//!     HandshakeEvent::Send(req) => { /* send, receive, loop */ }
//!     HandshakeEvent::Done(finished) => { /* finished.auth_key is ready */ }
//! }
//! ```
//!
//! Requests and responses are dynamic objects resolved through the
//! schema registry; the handshake constructors must be loaded there.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use pylon_crypto::{
    AuthKey, DequeBuffer, FactorizeError, aes, do_encrypt_data_v1, factorize,
    generate_key_data_from_nonce, rsa, sha1,
};
use pylon_tl::{Codec, Obj, Stream, Value};

use crate::MTPROTO_LAYER;

/// Errors that can occur during auth key generation.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    UnknownFingerprints { fingerprints: Vec<i64> },
    Factorize(FactorizeError),
    DhParamsFail,
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    EncryptedResponseNotPadded { len: usize },
    GParameterOutOfRange { value: BigUint, low: BigUint, high: BigUint },
    DhGenRetry,
    DhGenFail,
    InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
    /// The response constructor does not belong to this step.
    UnexpectedResponse { predicate: String },
    /// A response field is absent or has the wrong shape.
    MissingField { predicate: String, name: &'static str },
    /// (De)serialization through the registry failed.
    Tl(pylon_tl::Error),
    /// Retry budget exhausted.
    AttemptsExhausted,
    /// `advance` called without an outstanding request.
    OutOfOrder,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => {
                write!(f, "nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known fingerprint in {fingerprints:?}")
            }
            Self::Factorize(err) => write!(f, "pq factorization failed: {err}"),
            Self::DhParamsFail => write!(f, "server returned DH params failure"),
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::EncryptedResponseNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::GParameterOutOfRange { value, low, high } => {
                write!(f, "g={value} not in range ({low}, {high})")
            }
            Self::DhGenRetry => write!(f, "DH gen retry requested"),
            Self::DhGenFail => write!(f, "DH gen failed"),
            Self::InvalidAnswerHash { got, expected } => {
                write!(f, "answer hash mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "new nonce hash mismatch: got {got:?}, expected {expected:?}")
            }
            Self::UnexpectedResponse { predicate } => {
                write!(f, "unexpected response constructor {predicate}")
            }
            Self::MissingField { predicate, name } => {
                write!(f, "response {predicate} lacks field {name}")
            }
            Self::Tl(err) => write!(f, "tl: {err}"),
            Self::AttemptsExhausted => write!(f, "auth key exchange attempts exhausted"),
            Self::OutOfOrder => write!(f, "no outstanding handshake request"),
        }
    }
}

impl From<pylon_tl::Error> for Error {
    fn from(err: pylon_tl::Error) -> Self {
        Self::Tl(err)
    }
}

/// State after step 1.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State after step 2.
#[derive(Debug)]
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// DH modulus and bases accepted in step 3, kept around so the client
/// half of the exchange can be re-run with a fresh `b` when the server
/// answers `dh_gen_retry`.
struct DhParams {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    g: BigUint,
    dh_prime: BigUint,
    g_a: BigUint,
    time_offset: i32,
}

/// State after step 3.
pub struct Step3 {
    params: DhParams,
    gab: BigUint,
}

/// The final output of a successful handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Clock skew in seconds relative to the server.
    pub time_offset: i32,
    /// Initial server salt, `new_nonce[..8] XOR server_nonce[..8]`.
    pub first_salt: i64,
}

/// Generate a `req_pq_multi` request. Returns the request + opaque state.
pub fn step1() -> Result<(Obj, Step1), Error> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).expect("failed to generate secure random data");
    do_step1(&buf)
}

pub fn do_step1(random: &[u8; 16]) -> Result<(Obj, Step1), Error> {
    let nonce = *random;
    Ok((
        Obj::new("req_pq_multi").with("nonce", nonce),
        Step1 { nonce },
    ))
}

/// Process `resPQ` and generate `req_DH_params`.
///
/// `expires_in` switches the inner data to the temp-key variant.
pub fn step2(
    codec: &Codec<'_>,
    data: Step1,
    response: &Value,
    expires_in: Option<i32>,
) -> Result<(Obj, Step2), Error> {
    let mut rnd = [0u8; 287];
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    do_step2(codec, data, response, expires_in, &rnd)
}

pub fn do_step2(
    codec: &Codec<'_>,
    data: Step1,
    response: &Value,
    expires_in: Option<i32>,
    random: &[u8; 287],
) -> Result<(Obj, Step2), Error> {
    let Step1 { nonce } = data;
    let res_pq = expect_predicate(response, "resPQ")?;

    check_nonce(&int128_field(res_pq, "nonce")?, &nonce)?;
    let server_nonce = int128_field(res_pq, "server_nonce")?;

    let pq_bytes = bytes_field(res_pq, "pq")?;
    if pq_bytes.len() != 8 {
        return Err(Error::InvalidPqSize {
            size: pq_bytes.len(),
        });
    }
    let pq = u64::from_be_bytes(pq_bytes.try_into().unwrap());
    let (p, q) = factorize(pq).map_err(Error::Factorize)?;

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);
    let rsa_padding: &[u8; 255] = random[32..].try_into().unwrap();

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let mut inner = Obj::new(match expires_in {
        Some(_) => "p_q_inner_data_temp",
        None => "p_q_inner_data",
    })
    .with("pq", pq.to_be_bytes().to_vec())
    .with("p", p_bytes.clone())
    .with("q", q_bytes.clone())
    .with("nonce", nonce)
    .with("server_nonce", server_nonce)
    .with("new_nonce", new_nonce);
    if let Some(expires_in) = expires_in {
        inner.set("expires_in", expires_in);
    }
    let inner_bytes = codec.to_bytes(&inner.into(), MTPROTO_LAYER)?;

    let fingerprints: Vec<i64> = long_vector_field(res_pq, "server_public_key_fingerprints")?;
    let fingerprint = fingerprints
        .iter()
        .copied()
        .find(|&fp| key_for_fingerprint(fp).is_some())
        .ok_or(Error::UnknownFingerprints {
            fingerprints: fingerprints.clone(),
        })?;
    let key = key_for_fingerprint(fingerprint).unwrap();
    let ciphertext = rsa::do_encrypt_hashed(&inner_bytes, &key, rsa_padding);

    let request = Obj::new("req_DH_params")
        .with("nonce", nonce)
        .with("server_nonce", server_nonce)
        .with("p", p_bytes)
        .with("q", q_bytes)
        .with("public_key_fingerprint", fingerprint)
        .with("encrypted_data", ciphertext);

    Ok((
        request,
        Step2 {
            nonce,
            server_nonce,
            new_nonce,
        },
    ))
}

/// Process `Server_DH_Params` and generate `set_client_DH_params`.
pub fn step3(codec: &Codec<'_>, data: Step2, response: &Value) -> Result<(Obj, Step3), Error> {
    let mut rnd = [0u8; 272]; // 256 for DH b, 16 for padding
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i32;
    do_step3(codec, data, response, &rnd, now)
}

pub fn do_step3(
    codec: &Codec<'_>,
    data: Step2,
    response: &Value,
    random: &[u8; 272],
    now: i32,
) -> Result<(Obj, Step3), Error> {
    let Step2 {
        nonce,
        server_nonce,
        new_nonce,
    } = data;

    let obj = response.as_obj().ok_or_else(|| Error::UnexpectedResponse {
        predicate: response.kind().to_owned(),
    })?;
    match obj.predicate() {
        "server_DH_params_fail" => {
            check_nonce(&int128_field(obj, "nonce")?, &nonce)?;
            check_server_nonce(&int128_field(obj, "server_nonce")?, &server_nonce)?;
            let digest = sha1!(&new_nonce);
            let mut expected = [0u8; 16];
            expected.copy_from_slice(&digest[4..]);
            check_new_nonce_hash(&int128_field(obj, "new_nonce_hash")?, &expected)?;
            return Err(Error::DhParamsFail);
        }
        "server_DH_params_ok" => {}
        other => {
            return Err(Error::UnexpectedResponse {
                predicate: other.to_owned(),
            });
        }
    }

    check_nonce(&int128_field(obj, "nonce")?, &nonce)?;
    check_server_nonce(&int128_field(obj, "server_nonce")?, &server_nonce)?;

    let mut answer = bytes_field(obj, "encrypted_answer")?.to_vec();
    if answer.len() % 16 != 0 {
        return Err(Error::EncryptedResponseNotPadded { len: answer.len() });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut answer, &key, &iv);

    let got_hash: [u8; 20] = answer[..20].try_into().unwrap();
    let mut stream = Stream::from_bytes(&answer[20..]);
    let inner_value = codec.deserialize(&mut stream)?;
    let answer_len = stream.pos() * 4;

    let expected_hash = sha1!(&answer[20..20 + answer_len]);
    if got_hash != expected_hash {
        return Err(Error::InvalidAnswerHash {
            got: got_hash,
            expected: expected_hash,
        });
    }

    let inner = expect_predicate(&inner_value, "server_DH_inner_data")?;
    check_nonce(&int128_field(inner, "nonce")?, &nonce)?;
    check_server_nonce(&int128_field(inner, "server_nonce")?, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(bytes_field(inner, "dh_prime")?);
    let g = BigUint::from(int_field(inner, "g")? as u32);
    let g_a = BigUint::from_bytes_be(bytes_field(inner, "g_a")?);
    let time_offset = int_field(inner, "server_time")? - now;

    let one = BigUint::from(1u32);
    check_g_in_range(&g, &one, &(&dh_prime - &one))?;
    check_g_in_range(&g_a, &one, &(&dh_prime - &one))?;
    let safety = one << (2048 - 64);
    check_g_in_range(&g_a, &safety, &(&dh_prime - &safety))?;

    let params = DhParams {
        nonce,
        server_nonce,
        new_nonce,
        g,
        dh_prime,
        g_a,
        time_offset,
    };
    let (request, gab) = client_dh_request(codec, &params, 0, random)?;
    Ok((request, Step3 { params, gab }))
}

/// Re-runs the client half of the exchange after `dh_gen_retry`.
///
/// `retry_id` must be the aux hash of the key the server rejected; the
/// negotiated modulus and bases are kept, only `b` is drawn fresh.
pub fn step3_retry(codec: &Codec<'_>, data: Step3, retry_id: i64) -> Result<(Obj, Step3), Error> {
    let mut rnd = [0u8; 272];
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    do_step3_retry(codec, data, retry_id, &rnd)
}

pub fn do_step3_retry(
    codec: &Codec<'_>,
    data: Step3,
    retry_id: i64,
    random: &[u8; 272],
) -> Result<(Obj, Step3), Error> {
    let Step3 { params, .. } = data;
    let (request, gab) = client_dh_request(codec, &params, retry_id, random)?;
    Ok((request, Step3 { params, gab }))
}

/// Draws `b`, derives `g_b` and the shared secret, and builds the
/// encrypted `set_client_DH_params` request.
fn client_dh_request(
    codec: &Codec<'_>,
    params: &DhParams,
    retry_id: i64,
    random: &[u8; 272],
) -> Result<(Obj, BigUint), Error> {
    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = params.g.modpow(&b, &params.dh_prime);
    let gab = params.g_a.modpow(&b, &params.dh_prime);

    let one = BigUint::from(1u32);
    check_g_in_range(&g_b, &one, &(&params.dh_prime - &one))?;
    let safety = one << (2048 - 64);
    check_g_in_range(&g_b, &safety, &(&params.dh_prime - &safety))?;

    let client_inner = Obj::new("client_DH_inner_data")
        .with("nonce", params.nonce)
        .with("server_nonce", params.server_nonce)
        .with("retry_id", retry_id)
        .with("g_b", g_b.to_bytes_be());
    let client_inner_bytes = codec.to_bytes(&client_inner.into(), MTPROTO_LAYER)?;

    let digest = sha1!(&client_inner_bytes);
    let pad_len = (16 - ((20 + client_inner_bytes.len()) % 16)) % 16;

    let mut hashed = Vec::with_capacity(20 + client_inner_bytes.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_inner_bytes);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    let (key, iv) = generate_key_data_from_nonce(&params.server_nonce, &params.new_nonce);
    aes::ige_encrypt(&mut hashed, &key, &iv);

    let request = Obj::new("set_client_DH_params")
        .with("nonce", params.nonce)
        .with("server_nonce", params.server_nonce)
        .with("encrypted_data", hashed);

    Ok((request, gab))
}

/// Finalise the handshake. Returns the ready [`Finished`] on success.
pub fn finish(data: &Step3, response: &Value) -> Result<Finished, Error> {
    let DhParams {
        nonce,
        server_nonce,
        new_nonce,
        time_offset,
        ..
    } = data.params;

    let obj = response.as_obj().ok_or_else(|| Error::UnexpectedResponse {
        predicate: response.kind().to_owned(),
    })?;
    let (hash_field, num) = match obj.predicate() {
        "dh_gen_ok" => ("new_nonce_hash1", 1u8),
        "dh_gen_retry" => ("new_nonce_hash2", 2),
        "dh_gen_fail" => ("new_nonce_hash3", 3),
        other => {
            return Err(Error::UnexpectedResponse {
                predicate: other.to_owned(),
            });
        }
    };

    check_nonce(&int128_field(obj, "nonce")?, &nonce)?;
    check_server_nonce(&int128_field(obj, "server_nonce")?, &server_nonce)?;

    let auth_key = AuthKey::from_bytes(assemble_key(&data.gab));
    let expected_hash = auth_key.calc_new_nonce_hash(&new_nonce, num);
    let got = int128_field(obj, hash_field)?;
    check_new_nonce_hash(&got, &expected_hash)?;

    let first_salt = {
        let mut buf = [0u8; 8];
        for ((dst, a), b) in buf.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
            *dst = a ^ b;
        }
        i64::from_le_bytes(buf)
    };

    match num {
        1 => Ok(Finished {
            auth_key: auth_key.to_bytes(),
            time_offset,
            first_salt,
        }),
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

/// Right-aligns the shared secret into the 256-byte key layout.
fn assemble_key(gab: &BigUint) -> [u8; 256] {
    let mut key = [0u8; 256];
    let bytes = gab.to_bytes_be();
    key[256 - bytes.len()..].copy_from_slice(&bytes);
    key
}

/// Maximum whole-exchange attempts before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// What the caller should do after feeding a response in.
pub enum HandshakeEvent {
    /// Send this request (plaintext framing) and feed the answer back.
    Send(Obj),
    /// The key is ready.
    Done(Finished),
}

enum State {
    Idle,
    WaitResPq(Step1),
    WaitDhParams(Step2),
    WaitDhGen(Step3),
    Done,
}

/// Drives the three steps. A `dh_gen_retry` answer re-sends
/// `set_client_DH_params` with a fresh `b` and the failed key's aux
/// hash as `retry_id`; a DH params failure or a lost factorization
/// race restarts the whole exchange. Both share the [`MAX_ATTEMPTS`]
/// budget.
pub struct Handshake {
    state: State,
    attempts: u32,
    expires_in: Option<i32>,
}

impl Handshake {
    /// Handshake for a permanent key.
    pub fn perm() -> Self {
        Self {
            state: State::Idle,
            attempts: 0,
            expires_in: None,
        }
    }

    /// Handshake for a temporary key living `expires_in` seconds.
    pub fn temp(expires_in: i32) -> Self {
        Self {
            state: State::Idle,
            attempts: 0,
            expires_in: Some(expires_in),
        }
    }

    /// Produces the opening `req_pq_multi`.
    pub fn start(&mut self) -> Result<Obj, Error> {
        let (request, state) = step1()?;
        self.state = State::WaitResPq(state);
        Ok(request)
    }

    /// Feeds one decoded response in and returns the next action.
    pub fn advance(&mut self, codec: &Codec<'_>, response: &Value) -> Result<HandshakeEvent, Error> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let step = match state {
            State::WaitResPq(data) => {
                step2(codec, data, response, self.expires_in).map(|(request, next)| {
                    self.state = State::WaitDhParams(next);
                    HandshakeEvent::Send(request)
                })
            }
            State::WaitDhParams(data) => step3(codec, data, response).map(|(request, next)| {
                self.state = State::WaitDhGen(next);
                HandshakeEvent::Send(request)
            }),
            State::WaitDhGen(data) => self.finish_or_retry(codec, data, response),
            State::Idle | State::Done => Err(Error::OutOfOrder),
        };
        match step {
            Err(err) if retryable(&err) => {
                self.attempts += 1;
                if self.attempts >= MAX_ATTEMPTS {
                    return Err(Error::AttemptsExhausted);
                }
                log::warn!("auth key exchange restarting after: {err}");
                Ok(HandshakeEvent::Send(self.start()?))
            }
            other => other,
        }
    }

    /// Completes the exchange, or re-sends `set_client_DH_params` with
    /// a fresh `b` when the server answered `dh_gen_retry`.
    fn finish_or_retry(
        &mut self,
        codec: &Codec<'_>,
        data: Step3,
        response: &Value,
    ) -> Result<HandshakeEvent, Error> {
        match finish(&data, response) {
            Ok(finished) => {
                self.state = State::Done;
                Ok(HandshakeEvent::Done(finished))
            }
            Err(Error::DhGenRetry) => {
                self.attempts += 1;
                if self.attempts >= MAX_ATTEMPTS {
                    return Err(Error::AttemptsExhausted);
                }
                log::warn!("server requested a DH retry, picking a new b");
                let failed = AuthKey::from_bytes(assemble_key(&data.gab));
                let retry_id = i64::from_le_bytes(failed.aux_hash());
                let (request, next) = step3_retry(codec, data, retry_id)?;
                self.state = State::WaitDhGen(next);
                Ok(HandshakeEvent::Send(request))
            }
            Err(err) => Err(err),
        }
    }
}

fn retryable(err: &Error) -> bool {
    matches!(err, Error::DhParamsFail | Error::Factorize(_))
}

/// Builds `auth.bindTempAuthKey` for sending under the temp key.
///
/// `msg_id` must be the id the outer request will be sent with; the
/// server cross-checks it against the embedded message.
pub fn bind_temp_auth_key(
    codec: &Codec<'_>,
    perm: &AuthKey,
    temp: &AuthKey,
    temp_session_id: i64,
    msg_id: i64,
    expires_at: i32,
) -> Result<Obj, Error> {
    let mut rnd = [0u8; 40];
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    do_bind_temp_auth_key(codec, perm, temp, temp_session_id, msg_id, expires_at, &rnd)
}

pub fn do_bind_temp_auth_key(
    codec: &Codec<'_>,
    perm: &AuthKey,
    temp: &AuthKey,
    temp_session_id: i64,
    msg_id: i64,
    expires_at: i32,
    random: &[u8; 40],
) -> Result<Obj, Error> {
    let nonce = i64::from_le_bytes(random[..8].try_into().unwrap());
    let inner = Obj::new("bind_auth_key_inner")
        .with("nonce", nonce)
        .with("temp_auth_key_id", temp.key_id_i64())
        .with("perm_auth_key_id", perm.key_id_i64())
        .with("temp_session_id", temp_session_id)
        .with("expires_at", expires_at);
    let body = codec.to_bytes(&inner.into(), MTPROTO_LAYER)?;

    // framed like a standalone message with random salt and session id,
    // then sealed with the 1.0 scheme under the permanent key
    let mut buffer = DequeBuffer::with_capacity(32 + body.len(), 24);
    buffer.extend(random[8..16].iter().copied()); // salt
    buffer.extend(random[16..24].iter().copied()); // session_id
    buffer.extend(msg_id.to_le_bytes());
    buffer.extend(0i32.to_le_bytes()); // seq_no
    buffer.extend((body.len() as u32).to_le_bytes());
    buffer.extend(body.iter().copied());

    let pad: [u8; 16] = random[24..40].try_into().unwrap();
    do_encrypt_data_v1(&mut buffer, perm, &pad);

    Ok(Obj::new("auth.bindTempAuthKey")
        .with("perm_auth_key_id", perm.key_id_i64())
        .with("nonce", nonce)
        .with("expires_at", expires_at)
        .with("encrypted_message", buffer.as_ref().to_vec()))
}

fn trim_be(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

fn expect_predicate<'a>(value: &'a Value, predicate: &str) -> Result<&'a Obj, Error> {
    match value.as_obj() {
        Some(obj) if obj.predicate() == predicate => Ok(obj),
        Some(obj) => Err(Error::UnexpectedResponse {
            predicate: obj.predicate().to_owned(),
        }),
        None => Err(Error::UnexpectedResponse {
            predicate: value.kind().to_owned(),
        }),
    }
}

fn missing(obj: &Obj, name: &'static str) -> Error {
    Error::MissingField {
        predicate: obj.predicate().to_owned(),
        name,
    }
}

fn int128_field(obj: &Obj, name: &'static str) -> Result<[u8; 16], Error> {
    obj.get(name)
        .and_then(Value::int128_bytes)
        .ok_or_else(|| missing(obj, name))
}

fn bytes_field<'a>(obj: &'a Obj, name: &'static str) -> Result<&'a [u8], Error> {
    obj.get(name)
        .and_then(Value::as_bytes)
        .ok_or_else(|| missing(obj, name))
}

fn int_field(obj: &Obj, name: &'static str) -> Result<i32, Error> {
    obj.get(name)
        .and_then(Value::as_i32)
        .ok_or_else(|| missing(obj, name))
}

fn long_vector_field(obj: &Obj, name: &'static str) -> Result<Vec<i64>, Error> {
    obj.get(name)
        .and_then(Value::as_vector)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .ok_or_else(|| missing(obj, name))
}

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_g_in_range(value: &BigUint, low: &BigUint, high: &BigUint) -> Result<(), Error> {
    if low < value && value < high {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange {
            value: value.clone(),
            low: low.clone(),
            high: high.clone(),
        })
    }
}

/// RSA key by server fingerprint. Includes both production and test DC keys.
pub fn key_for_fingerprint(fp: i64) -> Option<rsa::Key> {
    Some(match fp {
        // Production DC key
        -3414540481677951611 => rsa::Key::new(
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            "65537"
        )?,
        // Test DC key
        -5595554452916591101 => rsa::Key::new(
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            "65537"
        )?,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_tl::Registry;

    const SCHEME: &str = r#"{
        "constructors": [
            {"id": "1715713620", "predicate": "client_DH_inner_data", "type": "Client_DH_Inner_Data", "params": [
                {"name": "nonce", "type": "int128"},
                {"name": "server_nonce", "type": "int128"},
                {"name": "retry_id", "type": "long"},
                {"name": "g_b", "type": "bytes"}
            ]}
        ],
        "methods": []
    }"#;

    const NONCE: [u8; 16] = [1; 16];
    const SERVER_NONCE: [u8; 16] = [2; 16];
    const NEW_NONCE: [u8; 32] = [3; 32];

    fn dh_state() -> Step3 {
        let params = DhParams {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            new_nonce: NEW_NONCE,
            g: BigUint::from(3u32),
            dh_prime: (BigUint::from(1u32) << 2048u32) - BigUint::from(359u32),
            g_a: BigUint::from(1u32) << 2000u32,
            time_offset: 0,
        };
        let b = BigUint::from_bytes_be(&[0x5A; 256]);
        let gab = params.g_a.modpow(&b, &params.dh_prime);
        Step3 { params, gab }
    }

    fn current_gab(handshake: &Handshake) -> BigUint {
        match &handshake.state {
            State::WaitDhGen(data) => data.gab.clone(),
            _ => panic!("not waiting on a dh_gen answer"),
        }
    }

    /// The server's `dh_gen_retry` answer for the given shared secret.
    fn retry_answer(gab: &BigUint) -> Value {
        let key = AuthKey::from_bytes(assemble_key(gab));
        Obj::new("dh_gen_retry")
            .with("nonce", NONCE)
            .with("server_nonce", SERVER_NONCE)
            .with("new_nonce_hash2", key.calc_new_nonce_hash(&NEW_NONCE, 2))
            .into()
    }

    #[test]
    fn dh_retry_resends_client_params_instead_of_restarting() {
        let mut registry = Registry::new();
        registry.load_json(MTPROTO_LAYER, SCHEME).unwrap();
        let codec = Codec::new(&registry);

        let mut handshake = Handshake {
            state: State::WaitDhGen(dh_state()),
            attempts: 0,
            expires_in: None,
        };
        let failed = AuthKey::from_bytes(assemble_key(&dh_state().gab));

        let request = match handshake.advance(&codec, &retry_answer(&dh_state().gab)) {
            Ok(HandshakeEvent::Send(request)) => request,
            _ => panic!("a retry must produce a follow-up request"),
        };
        assert_eq!(request.predicate(), "set_client_DH_params");

        // the resent inner data names the rejected key
        let (key, iv) = generate_key_data_from_nonce(&SERVER_NONCE, &NEW_NONCE);
        let mut encrypted = request
            .get("encrypted_data")
            .unwrap()
            .as_bytes()
            .unwrap()
            .to_vec();
        aes::ige_decrypt(&mut encrypted, &key, &iv);
        let inner = codec.from_bytes(&encrypted[20..]).unwrap();
        let inner = inner.as_obj().unwrap();
        assert_eq!(
            inner.get("retry_id").unwrap().as_i64(),
            Some(i64::from_le_bytes(failed.aux_hash()))
        );

        // accepting the second key finishes the exchange
        let accepted = AuthKey::from_bytes(assemble_key(&current_gab(&handshake)));
        let done: Value = Obj::new("dh_gen_ok")
            .with("nonce", NONCE)
            .with("server_nonce", SERVER_NONCE)
            .with("new_nonce_hash1", accepted.calc_new_nonce_hash(&NEW_NONCE, 1))
            .into();
        match handshake.advance(&codec, &done) {
            Ok(HandshakeEvent::Done(finished)) => {
                assert_eq!(finished.auth_key, accepted.to_bytes());
            }
            _ => panic!("the exchange must finish after dh_gen_ok"),
        }
    }

    #[test]
    fn repeated_dh_retries_exhaust_the_budget() {
        let mut registry = Registry::new();
        registry.load_json(MTPROTO_LAYER, SCHEME).unwrap();
        let codec = Codec::new(&registry);

        let mut handshake = Handshake {
            state: State::WaitDhGen(dh_state()),
            attempts: 0,
            expires_in: None,
        };
        for _ in 0..MAX_ATTEMPTS - 1 {
            let response = retry_answer(&current_gab(&handshake));
            match handshake.advance(&codec, &response) {
                Ok(HandshakeEvent::Send(request)) => {
                    assert_eq!(request.predicate(), "set_client_DH_params");
                }
                _ => panic!("retries within the budget must resend"),
            }
        }
        let response = retry_answer(&current_gab(&handshake));
        assert!(matches!(
            handshake.advance(&codec, &response),
            Err(Error::AttemptsExhausted)
        ));
    }
}
