use std::collections::HashMap;

use block_pool::PooledBuf;

use crate::error::StreamError;

// ════════════════════════════════════════════════════════════════
//  Source Type
// ════════════════════════════════════════════════════════════════

/// Откуда пришло событие. Ordinal is persisted as one byte in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceType {
    Tcp = 0,
    Udp = 1,
    File = 2,
    Internal = 3,
    Plugin = 4,
    Python = 5,
}

impl SourceType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SourceType {
    type Error = StreamError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SourceType::Tcp),
            1 => Ok(SourceType::Udp),
            2 => Ok(SourceType::File),
            3 => Ok(SourceType::Internal),
            4 => Ok(SourceType::Plugin),
            5 => Ok(SourceType::Python),
            other => Err(StreamError::format_err(format!("unknown source type ordinal {other}"))),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Tcp => f.write_str("tcp"),
            SourceType::Udp => f.write_str("udp"),
            SourceType::File => f.write_str("file"),
            SourceType::Internal => f.write_str("internal"),
            SourceType::Plugin => f.write_str("plugin"),
            SourceType::Python => f.write_str("python"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Event
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub source_type: SourceType,
    pub id: u32,
    /// Unix ms at creation.
    pub timestamp: u64,
    pub body_len: u32,
    pub topic_len: u16,
    /// Reserved, always 0.
    pub checksum: u32,
}

pub type Metadata = HashMap<String, String>;

/// Единица работы pipeline: header + topic + opaque body + metadata.
///
/// Immutable after construction; ownership moves publisher → bus →
/// processor queue → storage task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    header: EventHeader,
    topic: String,
    body: PooledBuf,
    metadata: Metadata,
}

impl Event {
    /// Assemble an event from already-stamped parts.
    ///
    /// `body_len` and `topic_len` in the header are overwritten with the
    /// actual lengths. Fails if the topic does not fit in `u16` or the body
    /// in `u32`.
    pub fn from_parts(
        mut header: EventHeader,
        topic: String,
        body: PooledBuf,
        metadata: Metadata,
    ) -> Result<Self, StreamError> {
        header.topic_len = u16::try_from(topic.len()).map_err(|_| {
            StreamError::format_err(format!("topic too long: {} bytes (max {})", topic.len(), u16::MAX))
        })?;
        header.body_len = u32::try_from(body.len()).map_err(|_| {
            StreamError::format_err(format!("body too large: {} bytes", body.len()))
        })?;
        Ok(Self { header, topic, body, metadata })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn id(&self) -> u32 {
        self.header.id
    }

    pub fn source_type(&self) -> SourceType {
        self.header.source_type
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether the body buffer was served from a block pool.
    pub fn is_body_pooled(&self) -> bool {
        self.body.is_pooled()
    }
}
