//! Encrypted record layer.
//!
//! Every frame is `length(4) || nonce(32) || payload || sha256(nonce || payload)`,
//! AES-CTR encrypted as one continuous keystream per direction. The
//! length counts everything after itself, so boundaries are known
//! before the checksum can be verified. There is no alignment padding.

use std::fmt;

use pylon_crypto::CtrProcessor;
use pylon_crypto::sha256;

/// Nonce plus checksum; the smallest legal declared length.
pub const FRAME_OVERHEAD: usize = 64;

/// Declared lengths beyond this mean a corrupt or hostile stream.
const MAX_FRAME_LEN: usize = 1 << 24;

#[derive(Clone, Debug, PartialEq)]
pub enum FrameError {
    /// The declared length cannot hold a nonce and checksum, or is
    /// beyond any message the protocol produces.
    BadLength { len: usize },
    ChecksumMismatch,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength { len } => write!(f, "frame declares impossible length {len}"),
            Self::ChecksumMismatch => write!(f, "frame checksum mismatch"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Seals one payload into an encrypted frame.
pub fn pack(tx: &mut CtrProcessor, nonce: &[u8; 32], payload: &[u8]) -> Vec<u8> {
    let len = FRAME_OVERHEAD + payload.len();
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_le_bytes());
    frame.extend_from_slice(nonce);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&sha256!(nonce, payload));
    tx.process(&mut frame);
    frame
}

/// Incremental frame reader for one direction of the stream.
///
/// Chunks are decrypted as they arrive, since the keystream position
/// does not depend on frame boundaries; complete frames are then cut
/// at the declared lengths.
pub struct FrameReader {
    rx: CtrProcessor,
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new(rx: CtrProcessor) -> Self {
        Self {
            rx,
            buffer: Vec::new(),
        }
    }

    /// Absorbs raw bytes off the wire.
    pub fn feed(&mut self, chunk: &[u8]) {
        let start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        self.rx.process(&mut self.buffer[start..]);
    }

    /// Next complete payload, stripped of nonce and checksum, or `None`
    /// until enough bytes arrive.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(self.buffer[..4].try_into().unwrap()) as usize;
        if !(FRAME_OVERHEAD..=MAX_FRAME_LEN).contains(&len) {
            return Err(FrameError::BadLength { len });
        }
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buffer.drain(..4 + len).collect();
        let (covered, checksum) = frame[4..].split_at(len - 32);
        if sha256!(covered) != checksum[..32] {
            return Err(FrameError::ChecksumMismatch);
        }
        Ok(Some(covered[32..].to_vec()))
    }
}

impl fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameReader(buffered={})", self.buffer.len())
    }
}
