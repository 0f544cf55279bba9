//! Length-prefixed frame parser for a byte stream (spec.md §4.11).
//!
//! Grounded in the `gattaca-com-flux` TCP stream's state-machine framing
//! (`flux-network/src/tcp/stream.rs`'s `RxState::ReadingHeader` /
//! `ReadingPayload`) — same "accumulate into a ring until a length-prefixed
//! frame is complete" shape, rewritten as an explicit power-of-two ring
//! buffer (matching this crate's [`particle_core`] primitives) instead of
//! that source's fixed scratch buffer, and adding the resync-on-corruption
//! policy spec.md calls for.

use particle_core::error::{ParticleError, Result};

/// How a completed frame is handed to the caller.
pub enum DispatchMode {
    /// Contiguous frames are views into the ring; wrapped frames are
    /// coalesced into a scratch buffer. Both are valid only for the
    /// duration of the dispatch call.
    ZeroCopy,
    /// Every frame is copied into a freshly allocated, owned buffer.
    CopyOnDispatch,
}

/// A completed frame, dispatched by [`FrameParser::parse_and_dispatch`].
pub enum Frame<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl<'a> Frame<'a> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Borrowed(b) => b,
            Frame::Owned(v) => v,
        }
    }
}

/// Power-of-two byte ring that accumulates a TCP stream's bytes and
/// extracts length-prefixed frames from it.
pub struct FrameParser {
    buffer: Vec<u8>,
    mask: usize,
    head: usize,
    len: usize,
    max_frame: usize,
    mode: DispatchMode,
    scratch: Vec<u8>,
}

impl FrameParser {
    /// `capacity` must be a power of two and at least `4 + max_frame`.
    pub fn new(capacity: usize, max_frame: usize, mode: DispatchMode) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(ParticleError::config("frame parser capacity must be a power of two"));
        }
        if capacity < 4 + max_frame {
            return Err(ParticleError::config("frame parser capacity must hold at least one max-size frame"));
        }
        Ok(Self {
            buffer: vec![0u8; capacity],
            mask: capacity - 1,
            head: 0,
            len: 0,
            max_frame,
            mode,
            scratch: Vec::with_capacity(max_frame),
        })
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn tail(&self) -> usize {
        (self.head + self.len) & self.mask
    }

    /// Append freshly-read socket bytes. Fails with `Backpressure` if
    /// there isn't room (spec.md §4.11 overflow policy).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if self.len + bytes.len() > self.capacity() {
            return Err(ParticleError::Backpressure { substrate: "tcp frame parser" });
        }
        let start = self.tail();
        let cap = self.capacity();
        let first = (cap - start).min(bytes.len());
        self.buffer[start..start + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            self.buffer[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        }
        self.len += bytes.len();
        Ok(())
    }

    fn read_at(&self, offset: usize, out: &mut [u8]) {
        let start = (self.head + offset) & self.mask;
        let cap = self.capacity();
        let first = (cap - start).min(out.len());
        out[..first].copy_from_slice(&self.buffer[start..start + first]);
        let out_len = out.len();
        if first < out_len {
            out[first..].copy_from_slice(&self.buffer[..out_len - first]);
        }
    }

    fn advance(&mut self, n: usize) {
        self.head = (self.head + n) & self.mask;
        self.len -= n;
    }

    /// Extract as many complete frames as are currently buffered,
    /// invoking `on_frame` for each and `on_error` for each resync drop.
    pub fn parse_and_dispatch(&mut self, mut on_frame: impl FnMut(Frame<'_>), mut on_error: impl FnMut(&ParticleError)) {
        loop {
            if self.len < 4 {
                return;
            }
            let mut len_bytes = [0u8; 4];
            self.read_at(0, &mut len_bytes);
            let frame_len = u32::from_le_bytes(len_bytes) as usize;

            if frame_len == 0 || frame_len > self.max_frame {
                on_error(&ParticleError::protocol(format!(
                    "resync: frame length {frame_len} outside (0, {}]",
                    self.max_frame
                )));
                // Discard the whole corrupt header as one unit and try the
                // next 4 bytes as a fresh header, rather than rescanning
                // byte by byte.
                self.advance(4);
                continue;
            }
            if self.len < 4 + frame_len {
                return;
            }

            let start = (self.head + 4) & self.mask;
            let cap = self.capacity();
            let contiguous = start + frame_len <= cap;

            match self.mode {
                DispatchMode::ZeroCopy if contiguous => {
                    on_frame(Frame::Borrowed(&self.buffer[start..start + frame_len]));
                }
                DispatchMode::ZeroCopy => {
                    let mut scratch = std::mem::take(&mut self.scratch);
                    scratch.clear();
                    scratch.resize(frame_len, 0);
                    self.read_at(4, &mut scratch[..frame_len]);
                    self.scratch = scratch;
                    // SAFETY: `self.scratch` is not touched by `on_frame`;
                    // we only reborrow it immutably for the callback.
                    let view: &[u8] = &self.scratch;
                    on_frame(Frame::Borrowed(unsafe { std::slice::from_raw_parts(view.as_ptr(), view.len()) }));
                }
                DispatchMode::CopyOnDispatch => {
                    let mut owned = vec![0u8; frame_len];
                    self.read_at(4, &mut owned);
                    on_frame(Frame::Owned(owned));
                }
            }

            self.advance(4 + frame_len);
        }
    }
}
