use std::io::Read;

use stream_api::{Event, EventHeader, Metadata, PooledBuf, SourceType};

use crate::error::StorageError;

/// On-disk record, native byte order, no delimiter:
///
/// ```text
/// timestamp   u64
/// source      u8   (SourceType ordinal)
/// id          u32
/// topic_len   u32
/// topic       topic_len bytes
/// payload_len u64
/// payload     payload_len bytes
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub timestamp: u64,
    pub source_type: SourceType,
    pub id: u32,
    pub topic: String,
    pub payload: Vec<u8>,
}

const FIXED_HEAD: usize = 8 + 1 + 4 + 4;

pub fn encode_record(event: &Event, buf: &mut Vec<u8>) {
    let topic = event.topic().as_bytes();
    let body = event.body();
    buf.reserve(FIXED_HEAD + topic.len() + 8 + body.len());
    buf.extend_from_slice(&event.timestamp().to_ne_bytes());
    buf.push(event.source_type().as_u8());
    buf.extend_from_slice(&event.id().to_ne_bytes());
    buf.extend_from_slice(&(topic.len() as u32).to_ne_bytes());
    buf.extend_from_slice(topic);
    buf.extend_from_slice(&(body.len() as u64).to_ne_bytes());
    buf.extend_from_slice(body);
}

impl StoredRecord {
    /// Read the next record. `Ok(None)` at a clean end of file; a record cut
    /// short by EOF is `Truncated`.
    pub fn read_from<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(Self, u64)>, StorageError> {
        let mut head = [0u8; FIXED_HEAD];
        match read_full(reader, &mut head)? {
            0 => return Ok(None),
            n if n < FIXED_HEAD => return Err(StorageError::Truncated { offset }),
            _ => {}
        }

        let timestamp = u64::from_ne_bytes(head[0..8].try_into().unwrap_or_default());
        let source = head[8];
        let id = u32::from_ne_bytes(head[9..13].try_into().unwrap_or_default());
        let topic_len = u32::from_ne_bytes(head[13..17].try_into().unwrap_or_default()) as usize;

        let source_type = SourceType::try_from(source).map_err(|e| StorageError::Corrupt {
            offset,
            detail: e.to_string(),
        })?;
        if topic_len > u16::MAX as usize {
            return Err(StorageError::Corrupt {
                offset,
                detail: format!("topic length {topic_len} exceeds u16"),
            });
        }

        let mut topic = vec![0u8; topic_len];
        if read_full(reader, &mut topic)? < topic_len {
            return Err(StorageError::Truncated { offset });
        }
        let topic = String::from_utf8(topic).map_err(|e| StorageError::Corrupt {
            offset,
            detail: format!("topic: {e}"),
        })?;

        let mut len_buf = [0u8; 8];
        if read_full(reader, &mut len_buf)? < len_buf.len() {
            return Err(StorageError::Truncated { offset });
        }
        let payload_len = u64::from_ne_bytes(len_buf);
        if payload_len > u32::MAX as u64 {
            return Err(StorageError::Corrupt {
                offset,
                detail: format!("payload length {payload_len} exceeds u32"),
            });
        }

        let mut payload = vec![0u8; payload_len as usize];
        if read_full(reader, &mut payload)? < payload.len() {
            return Err(StorageError::Truncated { offset });
        }

        let size = (FIXED_HEAD + topic_len + 8) as u64 + payload_len;
        Ok(Some((
            Self { timestamp, source_type, id, topic, payload },
            size,
        )))
    }

    pub fn into_event(self) -> Result<Event, stream_api::StreamError> {
        let header = EventHeader {
            source_type: self.source_type,
            id: self.id,
            timestamp: self.timestamp,
            body_len: 0,
            topic_len: 0,
            checksum: 0,
        };
        Event::from_parts(header, self.topic, PooledBuf::from_vec(self.payload), Metadata::new())
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Read(e)),
        }
    }
    Ok(filled)
}
