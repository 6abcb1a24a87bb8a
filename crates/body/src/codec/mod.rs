//! Body framing codecs.
//!
//! The encoders turn body data written to a sink into its wire form, the
//! decoders split a received byte stream into body chunks. Both are selected
//! by the [`PayloadSize`](crate::protocol::PayloadSize) of the message.

mod body;

pub use body::PayloadDecoder;
pub use body::PayloadEncoder;
