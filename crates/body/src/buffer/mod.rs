//! Byte queues backing body sources and sinks.

mod read_queue;
mod write_queue;

pub use read_queue::ReadQueue;
pub use write_queue::WriteQueue;
