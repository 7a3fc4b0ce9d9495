//! Growable buffer of 32-bit words with a word-granular cursor.
//!
//! TL keeps everything aligned to 32-bit boundaries; the only byte-level
//! accesses are the length-prefixed `bytes`/`string` encodings, which pad
//! back up to the next word. Words are normalized to little-endian byte
//! order on the way in and out, so the in-memory representation never
//! depends on host endianness.

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stream {
    words: Vec<u32>,
    pos: usize,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_word_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
            pos: 0,
        }
    }

    /// Builds a stream over received bytes. A trailing partial word is
    /// zero-padded; TL payloads are word-aligned so this only triggers on
    /// malformed input, which the reads then reject by length.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = Vec::with_capacity((bytes.len() + 3) / 4);
        for chunk in bytes.chunks(4) {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            words.push(u32::from_le_bytes(buf));
        }
        Self { words, pos: 0 }
    }

    /// Word position of the cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Length of the backing store, in words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.words.len().saturating_sub(self.pos)
    }

    /// Guarantees at least `words` words of zeroed backing store past the
    /// cursor. Serializers call this with a constructor's precomputed
    /// minimum size so the field loop mostly writes into place.
    pub fn prepare_length(&mut self, words: usize) {
        let need = self.pos + words;
        if self.words.len() < need {
            self.words.resize(need, 0);
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let word = *self.words.get(self.pos).ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(word)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let low = self.read_u32()? as u64;
        let high = self.read_u32()? as u64;
        Ok(((high << 32) | low) as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let low = self.read_u32()? as u64;
        let high = self.read_u32()? as u64;
        Ok(f64::from_bits((high << 32) | low))
    }

    /// Reads `N` consecutive words (int128 is `N = 4`, int256 is `N = 8`).
    pub fn read_words<const N: usize>(&mut self) -> Result<[u32; N]> {
        if self.remaining() < N {
            return Err(Error::UnexpectedEof);
        }
        let mut out = [0u32; N];
        out.copy_from_slice(&self.words[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads a TL byte string and realigns the cursor to the next word.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let limit = self.words.len() * 4;
        let mut bpos = self.pos * 4;
        if bpos >= limit {
            return Err(Error::UnexpectedEof);
        }
        let first = self.byte_at(bpos);
        let len;
        if first == 0xfe {
            if bpos + 4 > limit {
                return Err(Error::UnexpectedEof);
            }
            len = self.byte_at(bpos + 1) as usize
                | (self.byte_at(bpos + 2) as usize) << 8
                | (self.byte_at(bpos + 3) as usize) << 16;
            bpos += 4;
        } else {
            len = first as usize;
            bpos += 1;
        }
        if bpos + len > limit {
            return Err(Error::UnexpectedEof);
        }
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.byte_at(bpos + i));
        }
        self.pos = (bpos + len + 3) / 4;
        Ok(out)
    }

    /// Reads a TL string; invalid UTF-8 falls back to a Latin-1 view of
    /// the bytes rather than failing the whole frame.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
        })
    }

    pub fn write_u32(&mut self, value: u32) {
        self.prepare_length(1);
        self.words[self.pos] = value;
        self.pos += 1;
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_i64(&mut self, value: i64) {
        let value = value as u64;
        self.write_u32(value as u32);
        self.write_u32((value >> 32) as u32);
    }

    pub fn write_f64(&mut self, value: f64) {
        let bits = value.to_bits();
        self.write_u32(bits as u32);
        self.write_u32((bits >> 32) as u32);
    }

    pub fn write_words(&mut self, words: &[u32]) {
        self.prepare_length(words.len());
        self.words[self.pos..self.pos + words.len()].copy_from_slice(words);
        self.pos += words.len();
    }

    /// Writes a TL byte string with the 1-byte or `0xfe` + 3-byte length
    /// prefix and zero padding to the next word boundary.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        let header = if len <= 253 { 1 } else { 4 };
        let words = (len + header + 3) / 4;
        self.prepare_length(words);
        let mut bpos = self.pos * 4;
        let end = (self.pos + words) * 4;
        if header == 1 {
            self.set_byte(bpos, len as u8);
        } else {
            self.set_byte(bpos, 0xfe);
            self.set_byte(bpos + 1, len as u8);
            self.set_byte(bpos + 2, (len >> 8) as u8);
            self.set_byte(bpos + 3, (len >> 16) as u8);
        }
        bpos += header;
        for &b in bytes {
            self.set_byte(bpos, b);
            bpos += 1;
        }
        // the buffer may be reused after a rewind, so the padding is
        // cleared explicitly
        while bpos < end {
            self.set_byte(bpos, 0);
            bpos += 1;
        }
        self.pos += words;
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// The written prefix of the buffer, as little-endian bytes.
    pub fn written_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pos * 4);
        for &word in &self.words[..self.pos] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// The whole backing store, as little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 4);
        for &word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn byte_at(&self, index: usize) -> u8 {
        (self.words[index / 4] >> (8 * (index % 4))) as u8
    }

    fn set_byte(&mut self, index: usize, value: u8) {
        let shift = 8 * (index % 4);
        let word = &mut self.words[index / 4];
        *word = (*word & !(0xff << shift)) | ((value as u32) << shift);
    }
}
