//! RSA step of the auth key exchange.
//!
//! Uses the classic MTProto scheme: `sha1(data) || data || random`
//! padded to 255 bytes, then raw modular exponentiation with the
//! server's public key. The key to use is chosen by fingerprint from
//! the server's `resPQ` list.

use num_bigint::BigUint;

use crate::sha1;

/// An RSA public key `(n, e)`.
pub struct Key {
    n: BigUint,
    e: BigUint,
}

/// Longest payload that still leaves room for the 20-byte hash.
pub const MAX_PLAIN_LEN: usize = 255 - 20;

impl Key {
    /// Parses decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The 64-bit fingerprint servers advertise:
    /// `sha1(TL(rsa_public_key))[12..20]` as a little-endian `long`.
    pub fn fingerprint(&self) -> i64 {
        let mut encoded = Vec::new();
        tl_bytes(&mut encoded, &self.n.to_bytes_be());
        tl_bytes(&mut encoded, &self.e.to_bytes_be());
        let sha = sha1!(&encoded);
        i64::from_le_bytes(sha[12..20].try_into().unwrap())
    }
}

/// TL `bytes` encoding, as the fingerprint hash input requires.
fn tl_bytes(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() <= 253 {
        out.push(data.len() as u8);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
    }
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Encrypts `data` for the handshake: prefix with its SHA-1, pad with
/// random bytes to 255, exponentiate. Returns the 256-byte block.
pub fn encrypt_hashed(data: &[u8], key: &Key) -> Vec<u8> {
    let mut padding = [0u8; 255];
    getrandom::getrandom(&mut padding).expect("failed to generate secure random data");
    do_encrypt_hashed(data, key, &padding)
}

pub fn do_encrypt_hashed(data: &[u8], key: &Key, padding: &[u8; 255]) -> Vec<u8> {
    assert!(data.len() <= MAX_PLAIN_LEN, "data too large for hashed RSA");

    let mut padded = Vec::with_capacity(255);
    padded.extend_from_slice(&sha1!(data));
    padded.extend_from_slice(data);
    padded.extend_from_slice(&padding[..255 - padded.len()]);

    let payload = BigUint::from_bytes_be(&padded);
    let encrypted = payload.modpow(&key.e, &key.n);
    let mut block = encrypted.to_bytes_be();
    while block.len() < 256 {
        block.insert(0, 0);
    }
    block
}
