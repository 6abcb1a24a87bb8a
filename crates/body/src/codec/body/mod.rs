//! Encoders and decoders for the HTTP/1.x body framings.
//!
//! ## Decoders
//! - [`ChunkedDecoder`](chunked_decoder::ChunkedDecoder): `Transfer-Encoding: chunked`
//! - [`LengthDecoder`](length_decoder::LengthDecoder): `Content-Length`
//! - [`PayloadDecoder`]: selects one of the above, or reads until the connection closes
//!
//! ## Encoders
//! - [`ChunkedEncoder`](chunked_encoder::ChunkedEncoder): `Transfer-Encoding: chunked`
//! - [`LengthEncoder`](length_encoder::LengthEncoder): `Content-Length`, rejects overruns
//! - [`PayloadEncoder`]: selects one of the above, or passes data through

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
