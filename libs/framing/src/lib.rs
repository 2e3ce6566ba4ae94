//! Length-prefixed wire framing, big-endian throughout.
//!
//! ```text
//! outer frame:  [u32 frame_length][frame_body]      frame_length = len(frame_body)
//! frame_body:   [u16 topic_length][topic bytes][payload bytes]
//! ```

mod error;

pub use error::FrameError;

/// Hard cap on a declared frame length. Anything larger closes the connection.
pub const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;

const LENGTH_BYTES: usize = 4;
const TOPIC_LENGTH_BYTES: usize = 2;

// ═══════════════════════════════════════════════════════════════
//  Frame
// ═══════════════════════════════════════════════════════════════

/// Decoded frame borrowing from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
}

/// `[u16 topic_length][topic][payload]` → (topic, payload).
///
/// Payload is everything after the topic; an empty payload is valid.
pub fn decode_frame_body(body: &[u8]) -> Result<Frame<'_>, FrameError> {
    if body.len() < TOPIC_LENGTH_BYTES {
        return Err(FrameError::MissingTopicLength { len: body.len() });
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let rest = &body[TOPIC_LENGTH_BYTES..];
    if rest.len() < topic_len {
        return Err(FrameError::TopicTruncated {
            declared: topic_len,
            available: rest.len(),
        });
    }
    let (topic, payload) = rest.split_at(topic_len);
    let topic = std::str::from_utf8(topic).map_err(FrameError::InvalidTopic)?;
    Ok(Frame { topic, payload })
}

/// `[u32 frame_length][frame_body]` → (topic, payload).
///
/// The declared length must equal exactly `bytes.len() - 4`.
pub fn decode_outer_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < LENGTH_BYTES {
        return Err(FrameError::MissingFrameLength { len: bytes.len() });
    }
    let declared = read_u32_be(bytes) as usize;
    let actual = bytes.len() - LENGTH_BYTES;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }
    decode_frame_body(&bytes[LENGTH_BYTES..])
}

/// Append `[u16 topic_length][topic][payload]` to `buf`.
pub fn encode_frame_body(topic: &str, payload: &[u8], buf: &mut Vec<u8>) -> Result<(), FrameError> {
    let topic_len = u16::try_from(topic.len())
        .map_err(|_| FrameError::TopicTooLong { len: topic.len() })?;
    buf.extend_from_slice(&topic_len.to_be_bytes());
    buf.extend_from_slice(topic.as_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Append a complete outer frame to `buf`.
pub fn encode_frame(topic: &str, payload: &[u8], buf: &mut Vec<u8>) -> Result<(), FrameError> {
    let body_len = TOPIC_LENGTH_BYTES + topic.len() + payload.len();
    let frame_len = u32::try_from(body_len).map_err(|_| FrameError::FrameTooLarge { len: body_len })?;
    buf.reserve(LENGTH_BYTES + body_len);
    buf.extend_from_slice(&frame_len.to_be_bytes());
    encode_frame_body(topic, payload, buf)
}

fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

// ═══════════════════════════════════════════════════════════════
//  Stream framing
// ═══════════════════════════════════════════════════════════════

/// What the head of a stream buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Zero-length frame: only the 4-byte prefix is consumed.
    KeepAlive,
    /// A complete outer frame occupies `buf[..consumed]`.
    Frame,
}

/// Peels complete outer frames off the head of a growable stream buffer.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedFraming {
    max_frame: u32,
}

impl Default for LengthPrefixedFraming {
    fn default() -> Self {
        Self { max_frame: MAX_FRAME_BYTES }
    }
}

impl LengthPrefixedFraming {
    /// `max_frame` is clamped to [`MAX_FRAME_BYTES`].
    pub fn new(max_frame: u32) -> Self {
        Self { max_frame: max_frame.min(MAX_FRAME_BYTES) }
    }

    pub fn max_frame(&self) -> u32 {
        self.max_frame
    }

    /// `Ok(None)` — need more bytes. `Ok(Some((kind, consumed)))` — the first
    /// `consumed` bytes of `buf` can be taken. `Err(Oversized)` is fatal for
    /// the stream.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Decoded, usize)>, FrameError> {
        if buf.len() < LENGTH_BYTES {
            return Ok(None);
        }

        let len = read_u32_be(buf);
        if len == 0 {
            return Ok(Some((Decoded::KeepAlive, LENGTH_BYTES)));
        }
        if len > self.max_frame {
            return Err(FrameError::Oversized { len, max: self.max_frame });
        }

        let total = LENGTH_BYTES + len as usize;
        if buf.len() < total {
            return Ok(None); // partial frame
        }
        Ok(Some((Decoded::Frame, total)))
    }
}
