use stream_api::Event;

use crate::QueueId;

/// Returned by [`crate::PriorityBus::push`] when the target queue is at
/// capacity. Hands the rejected event back to the producer.
#[derive(Debug, thiserror::Error)]
#[error("{queue} queue full ({capacity} events)")]
pub struct QueueFull {
    pub queue: QueueId,
    pub capacity: usize,
    pub event: Event,
}
