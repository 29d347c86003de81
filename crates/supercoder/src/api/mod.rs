//! API interaction layer between the turn loop and the model endpoint.
//!
//! - [`transport`]: the object-safe [`ChatTransport`] trait, implemented by
//!   [`OpenAiClient`](crate::OpenAiClient) and by test doubles.
//! - [`streaming`]: SSE decoding into [`StreamChunk`] values, read lazily
//!   so a consumer can stop mid-response.
//! - [`retry`]: transient error detection (429, 5xx, network failures) with
//!   exponential backoff. Applied before the first byte of a response only;
//!   a stream that fails midway is not replayed.

pub mod retry;
pub mod streaming;
pub mod transport;

pub use retry::{RetryConfig, retry_with_backoff};
pub use streaming::{SseDecoder, StreamChunk};
pub use transport::{ChatFuture, ChatTransport, ChunkStream};
