//! Cryptographic primitives for the MTProto engine and its ADNL
//! companion transport.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption and a streaming AES-CTR processor
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho PQ factorization
//! - hashed RSA encryption for the key exchange
//! - `AuthKey` — the 256-byte authorization key
//! - MTProto 2.0 message encryption / decryption, plus the 1.0 variant
//!   kept alive by temp-key binding
//! - DH nonce→key derivation
//! - X25519 agreement against Ed25519 identities

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod crc;
mod deque_buffer;
pub mod ecdh;
mod factorize;
pub mod rsa;
mod sha;

pub use aes::CtrProcessor;
pub use auth_key::AuthKey;
pub use crc::crc16;
pub use deque_buffer::DequeBuffer;
pub use factorize::{FactorizeError, do_factorize, factorize};

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// Direction a message travels in; selects the key-derivation offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(&self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// MTProto 1.0 key schedule, still required for `bind_auth_key_inner`.
fn calc_key_v1(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let key = &auth_key.data;
    let sha_a = sha1!(msg_key, &key[x..x + 32]);
    let sha_b = sha1!(&key[32 + x..48 + x], msg_key, &key[48 + x..64 + x]);
    let sha_c = sha1!(&key[64 + x..96 + x], msg_key);
    let sha_d = sha1!(msg_key, &key[96 + x..128 + x]);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..20].copy_from_slice(&sha_b[8..20]);
    aes_key[20..].copy_from_slice(&sha_c[4..16]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..12].copy_from_slice(&sha_a[8..20]);
    aes_iv[12..20].copy_from_slice(&sha_b[..8]);
    aes_iv[20..24].copy_from_slice(&sha_c[16..20]);
    aes_iv[24..].copy_from_slice(&sha_d[..8]);

    (aes_key, aes_iv)
}

fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt `buffer` (in place, with prepended header) using MTProto 2.0.
///
/// After this call `buffer` contains `key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey) {
    let mut rnd = [0u8; 32];
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    do_encrypt_data_v2(buffer, auth_key, &rnd);
}

pub fn do_encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey, rnd: &[u8; 32]) {
    do_encrypt_data_v2_as(buffer, auth_key, rnd, Side::Client)
}

/// Side-parameterized encryption. [`Side::Server`] produces frames that
/// [`decrypt_data_v2`] accepts, which server emulations and protocol
/// tests need.
pub fn do_encrypt_data_v2_as(buffer: &mut DequeBuffer, auth_key: &AuthKey, rnd: &[u8; 32], side: Side) {
    let pad = padding_len(buffer.len());
    buffer.extend(rnd.iter().take(pad).copied());

    let x = side.x();
    let msg_key_large = sha256!(&auth_key.data[88 + x..88 + x + 32], buffer.as_ref());
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&msg_key_large[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id());
}

/// Decrypt an MTProto 2.0 ciphertext.
///
/// `buffer` must start with `key_id || msg_key || ciphertext`.
/// On success returns a slice of `buffer` containing the plaintext
/// (still including the trailing random padding).
pub fn decrypt_data_v2<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id() != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, Side::Server);
    aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    let x = Side::Server.x();
    let our_key = sha256!(&auth_key.data[88 + x..88 + x + 32], &buffer[24..]);
    if msg_key != our_key[8..24] {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Encrypt `buffer` using MTProto 1.0. Only the key-binding payload
/// still travels this way; there is no client-side decrypt.
///
/// The message key covers the unpadded plaintext, unlike 2.0.
pub fn encrypt_data_v1(buffer: &mut DequeBuffer, auth_key: &AuthKey) {
    let mut rnd = [0u8; 16];
    getrandom::getrandom(&mut rnd).expect("failed to generate secure random data");
    do_encrypt_data_v1(buffer, auth_key, &rnd);
}

pub fn do_encrypt_data_v1(buffer: &mut DequeBuffer, auth_key: &AuthKey, rnd: &[u8; 16]) {
    let sha = sha1!(buffer.as_ref());
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&sha[4..20]);

    let pad = (16 - buffer.len() % 16) % 16;
    buffer.extend(rnd.iter().take(pad).copied());

    let (key, iv) = calc_key_v1(auth_key, &msg_key, Side::Client);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id());
}

/// Derive `(key, iv)` from nonces for the DH `encrypted_answer`.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_buffer(payload: &[u8]) -> DequeBuffer {
        let mut buffer = DequeBuffer::with_capacity(payload.len() + 64, 24);
        buffer.extend(payload.iter().copied());
        buffer
    }

    #[test]
    fn v2_server_encrypt_decrypts() {
        let auth_key = AuthKey::from_bytes(core::array::from_fn(|i| i as u8));
        let payload = b"the quick brown fox jumps over the lazy dog";

        let mut buffer = payload_buffer(payload);
        do_encrypt_data_v2_as(&mut buffer, &auth_key, &[0x3c; 32], Side::Server);

        let mut wire = buffer.as_ref().to_vec();
        let plain = decrypt_data_v2(&mut wire, &auth_key).unwrap();
        assert_eq!(&plain[..payload.len()], payload);
    }

    #[test]
    fn v2_header_and_padding_shape() {
        let auth_key = AuthKey::from_bytes([0xaa; 256]);
        let payload = [7u8; 32];

        let mut buffer = payload_buffer(&payload);
        do_encrypt_data_v2(&mut buffer, &auth_key, &[0; 32]);

        assert_eq!(&buffer[..8], auth_key.key_id());
        // aligned input takes the maximum padding
        assert_eq!(buffer.len(), 8 + 16 + payload.len() + 32);
    }

    #[test]
    fn v2_rejects_foreign_and_damaged_frames() {
        let auth_key = AuthKey::from_bytes([1; 256]);
        let other_key = AuthKey::from_bytes([2; 256]);

        let mut buffer = payload_buffer(b"hello");
        do_encrypt_data_v2_as(&mut buffer, &auth_key, &[9; 32], Side::Server);
        let wire = buffer.as_ref().to_vec();

        assert_eq!(
            decrypt_data_v2(&mut wire.clone(), &other_key),
            Err(DecryptError::AuthKeyMismatch)
        );

        let mut damaged = wire.clone();
        let last = damaged.len() - 1;
        damaged[last] ^= 1;
        assert_eq!(
            decrypt_data_v2(&mut damaged, &auth_key),
            Err(DecryptError::MessageKeyMismatch)
        );

        assert_eq!(
            decrypt_data_v2(&mut wire[..20].to_vec(), &auth_key),
            Err(DecryptError::InvalidBuffer)
        );
    }

    #[test]
    fn v1_msg_key_covers_unpadded_plaintext() {
        let auth_key = AuthKey::from_bytes([0x11; 256]);
        let payload = b"bind payload";

        let mut buffer = payload_buffer(payload);
        do_encrypt_data_v1(&mut buffer, &auth_key, &[0x44; 16]);

        assert_eq!(&buffer[..8], auth_key.key_id());
        assert_eq!(&buffer[8..24], &sha1!(payload)[4..20]);
        assert_eq!((buffer.len() - 24) % 16, 0);
    }

    #[test]
    fn nonce_key_derivation_layout() {
        let server_nonce = [4u8; 16];
        let new_nonce = [8u8; 32];
        let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);

        let h1 = sha1!(&new_nonce, &server_nonce);
        let h2 = sha1!(&server_nonce, &new_nonce);
        assert_eq!(key[..20], h1);
        assert_eq!(key[20..], h2[..12]);
        assert_eq!(iv[28..], new_nonce[..4]);
    }
}
