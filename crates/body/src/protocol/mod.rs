//! Core body protocol types.
//!
//! - [`BodyError`]: the error taxonomy of sources, sinks and forwarders
//! - [`PayloadItem`] / [`PayloadSize`]: framed body items and framing modes
//! - [`BodyHeader`]: read-only body metadata taken from a message header

mod error;
pub use error::BodyError;

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod header;
pub use header::BodyHeader;
