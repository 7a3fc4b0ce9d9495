//! AES-256 in IGE mode (MTProto) and a streaming CTR processor (ADNL).

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};

type Ctr128 = ctr::Ctr128BE<Aes256>;

/// Encrypt `buffer` in place with AES-256-IGE.
///
/// `buffer` must be a multiple of 16 bytes; IGE has no padding of its own.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    ige_encrypt_blocks(buffer, iv, |block| {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    });
}

/// Decrypt `buffer` in place with AES-256-IGE.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    ige_decrypt_blocks(buffer, iv, |block| {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    });
}

/// IGE chaining over a caller-supplied 16-byte block encryptor.
fn ige_encrypt_blocks(buffer: &mut [u8], iv: &[u8; 32], mut encrypt: impl FnMut(&mut [u8])) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let mut y_prev: [u8; 16] = iv[..16].try_into().unwrap();
    let mut x_prev: [u8; 16] = iv[16..].try_into().unwrap();
    for block in buffer.chunks_exact_mut(16) {
        let x: [u8; 16] = block.as_ref().try_into().unwrap();
        for (b, y) in block.iter_mut().zip(y_prev) {
            *b ^= y;
        }
        encrypt(block);
        for (b, x) in block.iter_mut().zip(x_prev) {
            *b ^= x;
        }
        y_prev.copy_from_slice(block);
        x_prev = x;
    }
}

/// IGE chaining over a caller-supplied 16-byte block decryptor.
fn ige_decrypt_blocks(buffer: &mut [u8], iv: &[u8; 32], mut decrypt: impl FnMut(&mut [u8])) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let mut y_prev: [u8; 16] = iv[..16].try_into().unwrap();
    let mut x_prev: [u8; 16] = iv[16..].try_into().unwrap();
    for block in buffer.chunks_exact_mut(16) {
        let y: [u8; 16] = block.as_ref().try_into().unwrap();
        for (b, x) in block.iter_mut().zip(x_prev) {
            *b ^= x;
        }
        decrypt(block);
        for (b, y) in block.iter_mut().zip(y_prev) {
            *b ^= y;
        }
        x_prev.copy_from_slice(block);
        y_prev = y;
    }
}

/// Stateful AES-256-CTR keystream.
///
/// The counter position carries over between `process` calls, so a
/// record layer can feed data as it arrives without realigning.
pub struct CtrProcessor {
    inner: Ctr128,
}

impl CtrProcessor {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self {
            inner: Ctr128::new(key.into(), iv.into()),
        }
    }

    /// XORs the next keystream bytes into `data`, encrypting or
    /// decrypting depending on which side produced it.
    pub fn process(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

impl std::fmt::Debug for CtrProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrProcessor")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn ige_round_trip() {
        let key = [7u8; 32];
        let iv: [u8; 32] = core::array::from_fn(|i| i as u8);
        for len in [16usize, 64, 160, 256] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut buffer = plain.clone();
            ige_encrypt(&mut buffer, &key, &iv);
            assert_ne!(buffer, plain);
            ige_decrypt(&mut buffer, &key, &iv);
            assert_eq!(buffer, plain);
        }
    }

    // OpenSSL's AES-128-IGE test vector (test_ige_vectors[0])
    #[test]
    fn ige_published_vector() {
        use aes::Aes128;

        let key: [u8; 16] = unhex("000102030405060708090a0b0c0d0e0f").try_into().unwrap();
        let iv: [u8; 32] =
            unhex("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
                .try_into()
                .unwrap();
        let expected = unhex("1a8519a6557be652e9da8e43da4ef4453cf456b4ca488aa383c79c98b34797cb");

        let cipher = Aes128::new(GenericArray::from_slice(&key));
        let mut buffer = vec![0u8; 32];
        ige_encrypt_blocks(&mut buffer, &iv, |block| {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        });
        assert_eq!(buffer, expected);

        ige_decrypt_blocks(&mut buffer, &iv, |block| {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        });
        assert_eq!(buffer, vec![0u8; 32]);
    }

    #[test]
    fn ige_chains_across_blocks() {
        let key = [7u8; 32];
        let iv = [0u8; 32];
        // identical plaintext blocks must not produce identical ciphertext
        let mut buffer = [0x5au8; 32];
        ige_encrypt(&mut buffer, &key, &iv);
        assert_ne!(buffer[..16], buffer[16..]);
    }

    // NIST SP 800-38A, F.5.5 (CTR-AES256.Encrypt, first block)
    #[test]
    fn ctr_known_answer() {
        let key: [u8; 32] =
            unhex("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
                .try_into()
                .unwrap();
        let iv: [u8; 16] = unhex("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").try_into().unwrap();
        let mut data = unhex("6bc1bee22e409f96e93d7e117393172a");
        CtrProcessor::new(&key, &iv).process(&mut data);
        assert_eq!(data, unhex("601ec313775789a5b7a7f504bbf3d228"));
    }

    #[test]
    fn ctr_keystream_carries_over() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        let mut whole = [0u8; 40];
        CtrProcessor::new(&key, &iv).process(&mut whole);

        let mut chunked = [0u8; 40];
        let mut processor = CtrProcessor::new(&key, &iv);
        processor.process(&mut chunked[..7]);
        processor.process(&mut chunked[7..25]);
        processor.process(&mut chunked[25..]);
        assert_eq!(chunked, whole);
    }
}
