pub mod error;
pub mod event;
pub mod factory;
pub mod util;

pub use block_pool::{BlockPool, PayloadAllocator, PooledBuf};
pub use error::{ErrorKind, StreamError};
pub use event::{Event, EventHeader, Metadata, SourceType};
pub use factory::{EventFactory, EventSequence};
pub use util::now_ms;

// ════════════════════════════════════════════════════════════════
//  Traits
// ════════════════════════════════════════════════════════════════

/// Entry point of the dispatch stage. Implemented by both bus variants so
/// that ingestion does not care which one is wired in.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: Event) -> Result<(), StreamError>;
}

/// Durable sink for events.
pub trait EventStore: Send + Sync {
    fn store(&self, event: &Event) -> Result<(), StreamError>;

    /// Look up a stored event by id. Metadata is not persisted, so the
    /// returned event carries an empty map.
    fn retrieve(&self, id: u32) -> Result<Option<Event>, StreamError>;
}

impl<T: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) -> Result<(), StreamError> {
        (**self).publish(event)
    }
}

impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    fn store(&self, event: &Event) -> Result<(), StreamError> {
        (**self).store(event)
    }

    fn retrieve(&self, id: u32) -> Result<Option<Event>, StreamError> {
        (**self).retrieve(id)
    }
}
