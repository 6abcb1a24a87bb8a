//! The writable side of message bodies.

mod body_sink;
mod completion;

pub use body_sink::{BodySink, FlushMode};
