//! The readable side of message bodies.
//!
//! - [`NonBlockingBodySource`]: buffers received data, never blocks
//! - [`BlockingBodySource`]: waits for data, bounded by a receive timeout
//! - [`SourceBody`]: an [`http_body::Body`] over a non-blocking source

mod blocking;
mod body;
mod non_blocking;

pub use blocking::BlockingBodySource;
pub use body::SourceBody;
pub use non_blocking::{Available, NonBlockingBodySource};
