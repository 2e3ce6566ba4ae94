use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use framing::{Decoded, LengthPrefixedFraming, decode_outer_frame};
use stream_api::{EventFactory, EventPublisher, Metadata, SourceType};

/// Metadata key carrying the peer address of a TCP-ingested event.
pub const CLIENT_ADDRESS: &str = "client_address";

#[derive(Debug, Default)]
pub struct IngestStats {
    connections_accepted: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
}

impl IngestStats {
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    pub(crate) fn on_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a connection handler needs, shared by all handlers.
pub(crate) struct ConnContext {
    pub publisher: Arc<dyn EventPublisher>,
    pub factory: EventFactory,
    pub framing: LengthPrefixedFraming,
    pub stats: Arc<IngestStats>,
}

/// Read loop for one client: stream → frames → events → publisher.
///
/// Returns when the peer closes, a read fails, or the peer declares an
/// oversized frame.
pub(crate) fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ConnContext) {
    let mut buf = Vec::with_capacity(8192);
    let mut tmp = [0u8; 4096];

    loop {
        let mut pos = 0;
        loop {
            match ctx.framing.decode(&buf[pos..]) {
                Ok(Some((Decoded::KeepAlive, consumed))) => {
                    tracing::debug!(peer = %peer, "zero-length frame, skipping");
                    pos += consumed;
                }
                Ok(Some((Decoded::Frame, consumed))) => {
                    dispatch_frame(&buf[pos..pos + consumed], peer, ctx);
                    pos += consumed;
                }
                Ok(None) => break,
                Err(e) => {
                    ctx.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer, error = %e, "protocol violation, closing connection");
                    return;
                }
            }
        }
        buf.drain(..pos);

        match stream.read(&mut tmp) {
            Ok(0) => {
                tracing::info!(peer = %peer, "client disconnected");
                return;
            }
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::info!(peer = %peer, error = %e, "read error, closing connection");
                return;
            }
        }
    }
}

fn dispatch_frame(bytes: &[u8], peer: SocketAddr, ctx: &ConnContext) {
    let frame = match decode_outer_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            ctx.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(peer = %peer, error = %e, "bad frame, skipping");
            return;
        }
    };
    ctx.stats.frames_received.fetch_add(1, Ordering::Relaxed);

    let mut metadata = Metadata::new();
    metadata.insert(CLIENT_ADDRESS.to_string(), peer.to_string());

    let event = match ctx.factory.create(SourceType::Tcp, frame.topic, frame.payload, metadata) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(peer = %peer, topic = %frame.topic, error = %e, "event rejected");
            return;
        }
    };

    let id = event.id();
    tracing::debug!(peer = %peer, event_id = id, topic = %frame.topic, bytes = frame.payload.len(), "frame received");
    if let Err(e) = ctx.publisher.publish(event) {
        tracing::warn!(peer = %peer, event_id = id, error = %e, "event dropped");
    }
}
