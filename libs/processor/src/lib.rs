//! Bus → storage bridges.
//!
//! [`QueueProcessor`] pairs with the synchronous [`event_bus::EventBus`];
//! [`PriorityProcessor`] drains one queue of an [`event_bus::PriorityBus`].
//! Both store through an [`stream_api::EventStore`], optionally offloading
//! the write to a [`worker_pool::WorkerPool`].

mod priority;
mod queue;
mod sink;

pub use priority::{POLL_INTERVAL, PriorityProcessor};
pub use queue::QueueProcessor;
pub use sink::ProcessorStats;
