//! One-shot ADNL handshake.
//!
//! The client draws a 160-byte init block, derives both session
//! keystreams from it and ships it to the server encrypted under a
//! secret agreed against the server's Ed25519 identity. The server
//! answers nothing in cleartext; receipt is proven by an empty frame
//! under the new keys.

use pylon_crypto::CtrProcessor;
use pylon_crypto::ecdh::{KeyError, KeyPair};
use pylon_crypto::sha256;

/// Constructor id of `pub.ed25519 key:int256 = PublicKey`.
const ED25519_PUB_ID: u32 = 1_209_251_014;

/// Short key id: SHA-256 over the TL encoding of the public key.
pub fn key_id(public_key: &[u8; 32]) -> [u8; 32] {
    sha256!(ED25519_PUB_ID.to_le_bytes(), public_key)
}

/// Both directions of the session keystream, cut from the init block.
pub(crate) struct SessionKeys {
    /// Decrypts server to client traffic.
    pub rx: CtrProcessor,
    /// Encrypts client to server traffic.
    pub tx: CtrProcessor,
}

pub(crate) fn session_keys(init: &[u8; 160]) -> SessionKeys {
    let rx_key: [u8; 32] = init[..32].try_into().unwrap();
    let tx_key: [u8; 32] = init[32..64].try_into().unwrap();
    let rx_iv: [u8; 16] = init[64..80].try_into().unwrap();
    let tx_iv: [u8; 16] = init[80..96].try_into().unwrap();
    SessionKeys {
        rx: CtrProcessor::new(&rx_key, &rx_iv),
        tx: CtrProcessor::new(&tx_key, &tx_iv),
    }
}

/// Builds the cleartext handshake packet and the session keystreams.
///
/// Packet layout:
/// `key_id(32) || ephemeral_public(32) || sha256(init)(32) || ctr(init)(160)`,
/// where the one-shot CTR key and IV interleave the agreed secret with
/// the init digest, so only the addressed server can recover the block.
pub(crate) fn do_client_handshake(
    server_public: &[u8; 32],
    ephemeral: &KeyPair,
    init: &[u8; 160],
) -> Result<(Vec<u8>, SessionKeys), KeyError> {
    let secret = ephemeral.agree_ed25519(server_public)?;
    let digest = sha256!(init);

    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&secret[..16]);
    key[16..].copy_from_slice(&digest[16..]);
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&digest[..4]);
    iv[4..].copy_from_slice(&secret[20..]);

    let mut sealed = *init;
    CtrProcessor::new(&key, &iv).process(&mut sealed);

    let mut packet = Vec::with_capacity(96 + sealed.len());
    packet.extend_from_slice(&key_id(server_public));
    packet.extend_from_slice(&ephemeral.public());
    packet.extend_from_slice(&digest);
    packet.extend_from_slice(&sealed);
    Ok((packet, session_keys(init)))
}
