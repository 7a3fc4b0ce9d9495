//! Pluggable transport layer and abridged framing.
//!
//! Implement [`Transport`] over TCP, WebSocket, or any other byte-stream
//! protocol. [`Abridged`] is a pure framing codec usable on its own;
//! [`AbridgedTransport`] glues the two together.

/// A full-duplex byte-stream transport.
///
/// `recv` returns whatever bytes are available; framing is recovered by
/// the [`Abridged`] codec, so implementations do not need to preserve
/// packet boundaries.
pub trait Transport {
    /// The error type returned by read/write operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send raw bytes to the remote.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next chunk of bytes from the remote.
    ///
    /// Implementations should block until at least one byte is available.
    fn recv(&mut self) -> Result<Vec<u8>, Self::Error>;
}

/// Interprets a 4-byte frame as a transport error code.
///
/// Servers answer with a single negative little-endian `i32` (for
/// example `-404` when the auth key is unknown) instead of a framed
/// message.
pub fn error_code(frame: &[u8]) -> Option<i32> {
    if frame.len() == 4 {
        let code = i32::from_le_bytes(frame.try_into().unwrap());
        if code < 0 {
            return Some(code);
        }
    }
    None
}

/// The [MTProto Abridged] framing codec, sans-IO.
///
/// The first outgoing byte on a connection is `0xef`; every packet is
/// then `[length/4 as 1 or 4 bytes][payload]`. Both plaintext handshake
/// frames and encrypted frames travel the same way.
///
/// [MTProto Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
#[derive(Debug, Default)]
pub struct Abridged {
    init_sent: bool,
    buffer: Vec<u8>,
}

impl Abridged {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames one outgoing packet, prepending the `0xef` marker on the
    /// first call. `data` must be word-aligned.
    pub fn pack(&mut self, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(data.len() % 4, 0);
        let len = data.len() / 4;
        let mut out = Vec::with_capacity(data.len() + 5);
        if !self.init_sent {
            out.push(0xef);
            self.init_sent = true;
        }
        if len < 0x7f {
            out.push(len as u8);
        } else {
            out.push(0x7f);
            out.push((len & 0xff) as u8);
            out.push(((len >> 8) & 0xff) as u8);
            out.push(((len >> 16) & 0xff) as u8);
        }
        out.extend_from_slice(data);
        out
    }

    /// Feeds received bytes into the reassembly buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pops the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let (len, header) = if self.buffer[0] < 0x7f {
            (self.buffer[0] as usize * 4, 1)
        } else {
            if self.buffer.len() < 4 {
                return None;
            }
            let words = self.buffer[1] as usize
                | (self.buffer[2] as usize) << 8
                | (self.buffer[3] as usize) << 16;
            (words * 4, 4)
        };
        if self.buffer.len() < header + len {
            return None;
        }
        let frame = self.buffer[header..header + len].to_vec();
        self.buffer.drain(..header + len);
        Some(frame)
    }
}

/// Wraps a [`Transport`] and applies abridged framing.
pub struct AbridgedTransport<T: Transport> {
    inner: T,
    codec: Abridged,
}

impl<T: Transport> AbridgedTransport<T> {
    /// Wrap an existing transport in abridged framing.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            codec: Abridged::new(),
        }
    }

    /// Send one framed packet.
    pub fn send_message(&mut self, data: &[u8]) -> Result<(), T::Error> {
        let packet = self.codec.pack(data);
        self.inner.send(&packet)
    }

    /// Receive the next complete frame, reading from the inner transport
    /// as many times as needed.
    pub fn recv_message(&mut self) -> Result<Vec<u8>, T::Error> {
        loop {
            if let Some(frame) = self.codec.next_frame() {
                return Ok(frame);
            }
            let chunk = self.inner.recv()?;
            self.codec.feed(&chunk);
        }
    }

    /// Access the underlying transport.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frames_use_one_length_byte() {
        let mut codec = Abridged::new();
        let packet = codec.pack(&[1, 2, 3, 4]);
        assert_eq!(packet, vec![0xef, 1, 1, 2, 3, 4]);
        // marker only once
        let packet = codec.pack(&[5, 6, 7, 8]);
        assert_eq!(packet, vec![1, 5, 6, 7, 8]);
    }

    #[test]
    fn long_frames_use_four_length_bytes() {
        let mut codec = Abridged::new();
        codec.pack(&[0; 4]);
        let data = vec![0xaa; 0x7f * 4];
        let packet = codec.pack(&data);
        assert_eq!(&packet[..4], &[0x7f, 0x7f, 0, 0]);
        assert_eq!(packet.len(), 4 + data.len());
    }

    #[test]
    fn reassembles_frames_across_chunks() {
        let mut sender = Abridged::new();
        sender.pack(&[]); // swallow the init marker
        let first = sender.pack(&[1, 2, 3, 4]);
        let second = sender.pack(&[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut receiver = Abridged::new();
        let wire: Vec<u8> = first.iter().chain(&second).copied().collect();
        // drip-feed one byte at a time
        let mut frames = Vec::new();
        for byte in wire {
            receiver.feed(&[byte]);
            while let Some(frame) = receiver.next_frame() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8, 9, 10, 11, 12]]);
    }

    #[test]
    fn error_frames_are_recognized() {
        assert_eq!(error_code(&(-404i32).to_le_bytes()), Some(-404));
        assert_eq!(error_code(&404i32.to_le_bytes()), None);
        assert_eq!(error_code(&[1, 2, 3]), None);
        assert_eq!(error_code(&[0; 8]), None);
    }
}
