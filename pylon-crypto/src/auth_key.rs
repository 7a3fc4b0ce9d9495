//! Authorization key material: the 256-byte DH output plus the hashes
//! derived from it that the protocol keeps referring back to.

use crate::sha1;

/// A 256-byte authorization key with its pre-computed identifiers.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Builds a key from the raw DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&sha[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self {
            data,
            aux_hash,
            key_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The 8-byte identifier sent in clear before every ciphertext,
    /// `SHA-1(key)[12..20]`.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The identifier as the `long` the TL schema carries it as.
    pub fn key_id_i64(&self) -> i64 {
        i64::from_le_bytes(self.key_id)
    }

    /// `SHA-1(key)[0..8]`, mixed into handshake nonce hashes.
    pub fn aux_hash(&self) -> [u8; 8] {
        self.aux_hash
    }

    /// `SHA-1(new_nonce || number || aux_hash)[4..20]`, the check value
    /// of the `dh_gen_ok` / `dh_gen_retry` / `dh_gen_fail` answers
    /// (`number` is 1, 2 or 3 respectively).
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let sha = sha1!(new_nonce, [number], self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&sha[4..]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}
