//! X25519 agreement against Ed25519 identities.
//!
//! ADNL servers publish Ed25519 keys; the shared secret is computed on
//! the Montgomery curve, so the server point is mapped
//! Edwards -> Montgomery and our side uses a plain X25519 key pair.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};

/// Errors from key conversion and agreement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyError {
    /// The 32 bytes are not a valid Ed25519 point encoding.
    InvalidEd25519Point,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEd25519Point => write!(f, "invalid ed25519 public key"),
        }
    }
}

impl std::error::Error for KeyError {}

/// An ephemeral X25519 key pair for one connection handshake.
pub struct KeyPair {
    secret: StaticSecret,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("failed to generate secure random data");
        Self::from_bytes(seed)
    }

    /// Key pair from raw scalar bytes; clamping is applied internally.
    pub fn from_bytes(seed: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(seed),
        }
    }

    pub fn public(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Shared secret with a peer's Ed25519 public key.
    pub fn agree_ed25519(&self, peer: &[u8; 32]) -> Result<[u8; 32], KeyError> {
        let montgomery = ed25519_public_to_x25519(peer)?;
        Ok(self
            .secret
            .diffie_hellman(&PublicKey::from(montgomery))
            .to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair(public={:02x?})", self.public())
    }
}

/// Maps an Ed25519 public key to its X25519 (Montgomery u) form.
pub fn ed25519_public_to_x25519(public: &[u8; 32]) -> Result<[u8; 32], KeyError> {
    CompressedEdwardsY(*public)
        .decompress()
        .map(|point| point.to_montgomery().to_bytes())
        .ok_or(KeyError::InvalidEd25519Point)
}

/// Derives the X25519 scalar belonging to an Ed25519 seed, as servers
/// do on their side: `clamp(sha512(seed)[..32])`.
pub fn ed25519_seed_to_x25519(seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    scalar
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
    use curve25519_dalek::scalar::Scalar;

    #[test]
    fn agreement_is_symmetric() {
        // server identity derived from an Ed25519 seed the way servers
        // derive theirs; clamping is idempotent so StaticSecret keeps it
        let scalar_bytes = ed25519_seed_to_x25519(&[5u8; 32]);
        let server_ed_public = (ED25519_BASEPOINT_POINT
            * Scalar::from_bytes_mod_order(scalar_bytes))
        .compress()
        .0;

        let client = KeyPair::from_bytes([7u8; 32]);
        let client_side = client.agree_ed25519(&server_ed_public).unwrap();

        let server = StaticSecret::from(scalar_bytes);
        let server_side = server
            .diffie_hellman(&PublicKey::from(client.public()))
            .to_bytes();
        assert_eq!(client_side, server_side);
    }

    #[test]
    fn seed_conversion_is_clamped() {
        let scalar = ed25519_seed_to_x25519(&[9u8; 32]);
        assert_eq!(scalar[0] & 7, 0);
        assert_eq!(scalar[31] & 0x80, 0);
        assert_eq!(scalar[31] & 0x40, 0x40);
    }
}
