//! Wire framing: `u32 magic | u32 length | payload`, little-endian.
//!
//! Two magic values share the framing: display-list/pixel-data frames and
//! outbound pointer/touch-event frames. [`FrameDecoder`] is an incremental
//! parser fed arbitrary read chunks; frame boundaries are recovered
//! regardless of how the byte stream was split. A corrupted magic puts the
//! decoder into desync, from which it recovers by scanning forward one
//! byte at a time until a plausible header reappears — it never hangs and
//! never drops a frame that survives the corruption.

use tracing::{debug, warn};

/// Magic prefix of display-list and pixel-data frames.
pub const DISPLAY_MAGIC: u32 = 0x3FAC_BE5A;

/// Magic prefix of outbound pointer/touch-event frames.
pub const TOUCH_MAGIC: u32 = 0x3FAC_BE5B;

/// Frame header size on the wire.
pub const HEADER_LEN: usize = 8;

/// Sanity cap on declared payload length; anything larger is treated as
/// desync noise rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// One framed message, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(magic: u32, payload: Vec<u8>) -> Self {
        Self { magic, payload }
    }
}

/// Encode one frame for the wire.
pub fn encode_frame(magic: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental frame parser over a re-chunked byte stream.
pub struct FrameDecoder {
    accepted: Vec<u32>,
    buf: Vec<u8>,
    start: usize,
    skipped: usize,
}

impl FrameDecoder {
    /// `accepted` lists the magic values considered valid frame starts.
    pub fn new(accepted: &[u32]) -> Self {
        Self { accepted: accepted.to_vec(), buf: Vec::new(), start: 0, skipped: 0 }
    }

    /// Append freshly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Extract the next complete frame, if any.
    ///
    /// Invalid headers are scanned past byte by byte; the number of bytes
    /// discarded in a desync run is reported once recovery succeeds.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.remaining() < HEADER_LEN {
                self.compact();
                return None;
            }
            let header = &self.buf[self.start..self.start + HEADER_LEN];
            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

            if !self.accepted.contains(&magic) || len > MAX_FRAME_LEN {
                if self.skipped == 0 {
                    warn!(magic = format_args!("{magic:#010x}"), "bad frame magic, resyncing");
                }
                self.start += 1;
                self.skipped += 1;
                continue;
            }

            if self.remaining() < HEADER_LEN + len {
                self.compact();
                return None;
            }

            if self.skipped > 0 {
                debug!(skipped = self.skipped, "frame stream resynchronized");
                self.skipped = 0;
            }
            let payload = self.buf[self.start + HEADER_LEN..self.start + HEADER_LEN + len].to_vec();
            self.start += HEADER_LEN + len;
            return Some(Frame { magic, payload });
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn encode_layout_is_little_endian() {
        let bytes = encode_frame(DISPLAY_MAGIC, &[0xAA, 0xBB]);
        assert_eq!(&bytes[0..4], &[0x5A, 0xBE, 0xAC, 0x3F]);
        assert_eq!(&bytes[4..8], &[2, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[0xAA, 0xBB]);
    }

    #[test]
    fn two_frames_survive_any_chunking() {
        let mut stream = encode_frame(DISPLAY_MAGIC, b"first");
        stream.extend_from_slice(&encode_frame(DISPLAY_MAGIC, b"second payload"));

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
            let mut frames = Vec::new();
            decoder.feed(&stream[..split]);
            frames.extend(drain(&mut decoder));
            decoder.feed(&stream[split..]);
            frames.extend(drain(&mut decoder));

            assert_eq!(frames.len(), 2, "split at {split}");
            assert_eq!(frames[0].payload, b"first");
            assert_eq!(frames[1].payload, b"second payload");
        }
    }

    #[test]
    fn empty_payload_frame_decodes() {
        let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
        decoder.feed(&encode_frame(DISPLAY_MAGIC, &[]));
        assert_eq!(decoder.next_frame(), Some(Frame::new(DISPLAY_MAGIC, Vec::new())));
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn recovers_after_corrupted_magic() {
        let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
        decoder.feed(&[0xDE, 0xAD, 0xBE, 0xEF, 0x55, 0x66, 0x77, 0x88, 0x01]);
        assert_eq!(decoder.next_frame(), None);
        decoder.feed(&encode_frame(DISPLAY_MAGIC, b"ok"));
        let frame = decoder.next_frame().expect("valid frame after garbage");
        assert_eq!(frame.payload, b"ok");
    }

    #[test]
    fn oversize_length_is_treated_as_desync() {
        // Valid magic but an absurd length, then a real frame.
        let mut bad = DISPLAY_MAGIC.to_le_bytes().to_vec();
        bad.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
        decoder.feed(&bad);
        decoder.feed(&encode_frame(DISPLAY_MAGIC, b"after"));
        let frame = decoder.next_frame().expect("recovered frame");
        assert_eq!(frame.payload, b"after");
    }

    #[test]
    fn unaccepted_magic_is_scanned_past() {
        let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
        decoder.feed(&encode_frame(TOUCH_MAGIC, &[1, 2, 3, 4, 5, 6, 7, 8]));
        decoder.feed(&encode_frame(DISPLAY_MAGIC, b"display"));
        let frame = decoder.next_frame().expect("display frame");
        assert_eq!(frame.magic, DISPLAY_MAGIC);
        assert_eq!(frame.payload, b"display");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn random_chunking_preserves_frame_sequence(
                payloads in proptest::collection::vec(
                    proptest::collection::vec(any::<u8>(), 0..64),
                    1..6,
                ),
                chunk in 1usize..32,
            ) {
                let mut stream = Vec::new();
                for payload in &payloads {
                    stream.extend_from_slice(&encode_frame(DISPLAY_MAGIC, payload));
                }
                let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
                let mut frames = Vec::new();
                for piece in stream.chunks(chunk) {
                    decoder.feed(piece);
                    while let Some(frame) = decoder.next_frame() {
                        frames.push(frame.payload);
                    }
                }
                prop_assert_eq!(frames, payloads);
            }
        }
    }
}
