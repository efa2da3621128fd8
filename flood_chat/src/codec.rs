// src/codec.rs
//! Newline-delimited framing for `tokio_util::codec`.
//!
//! Unlike `LinesCodec`, frames are yielded as raw bytes so a single frame with
//! bad UTF-8 can be dropped by the caller without tearing down the stream, and
//! an oversized frame is skipped instead of surfacing as a fatal error.

use std::cmp;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_len: usize,
    // bytes already scanned for a newline, so a frame arriving in many reads
    // is not rescanned from the start every time
    next_index: usize,
    discarding: bool,
    skipped: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            next_index: 0,
            discarding: false,
            skipped: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Number of oversized frames dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            let read_to = cmp::min(self.max_len.saturating_add(1), buf.len());
            let start = cmp::min(self.next_index, read_to);
            let newline = buf[start..read_to].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(start + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let idx = start + offset;
                    self.next_index = 0;
                    let mut line = buf.split_to(idx + 1);
                    line.truncate(idx);
                    if line.last() == Some(&b'\r') {
                        line.truncate(idx - 1);
                    }
                    return Ok(Some(line.freeze()));
                }
                (false, None) if buf.len() > self.max_len => {
                    tracing::warn!(max_len = self.max_len, "frame exceeds max length; discarding");
                    self.discarding = true;
                    self.skipped += 1;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // a last frame missing its newline is still a frame
        if self.discarding || buf.is_empty() {
            buf.clear();
            return Ok(None);
        }
        self.next_index = 0;
        let mut line = buf.split();
        if line.last() == Some(&b'\r') {
            let len = line.len();
            line.truncate(len - 1);
        }
        Ok(Some(line.freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(frame.len() + 1);
        dst.put(frame);
        dst.put_u8(b'\n');
        Ok(())
    }
}
