//! The seam between the turn loop and a model endpoint.

use futures::{Stream, StreamExt, stream};
use std::future::Future;
use std::pin::Pin;

use crate::api::retry::retry_with_backoff;
use crate::api::streaming::{StreamChunk, chunk_stream};
use crate::error::LlmError;
use crate::{Message, OpenAiClient};

/// Boxed future returned by [`ChatTransport::chat`].
pub type ChatFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;

/// Boxed stream returned by [`ChatTransport::chat_stream`].
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send + 'a>>;

/// A source of assistant replies for a message history.
///
/// Object safe, so the agent can hold `&dyn ChatTransport` and tests can
/// substitute a scripted implementation.
pub trait ChatTransport: Send + Sync {
    /// Complete the conversation in one response.
    fn chat<'a>(&'a self, messages: &'a [Message]) -> ChatFuture<'a>;

    /// Complete the conversation as a stream of incremental chunks.
    ///
    /// The default wraps [`chat`](Self::chat) as a single text chunk
    /// followed by the terminal chunk.
    fn chat_stream<'a>(&'a self, messages: &'a [Message]) -> ChunkStream<'a> {
        Box::pin(
            stream::once(self.chat(messages))
                .map(|result| match result {
                    Ok(text) => vec![Ok(StreamChunk::text(text)), Ok(StreamChunk::done())],
                    Err(e) => vec![Err(e)],
                })
                .flat_map(stream::iter),
        )
    }
}

impl ChatTransport for OpenAiClient {
    fn chat<'a>(&'a self, messages: &'a [Message]) -> ChatFuture<'a> {
        Box::pin(async move {
            retry_with_backoff(&self.config.retry, "chat completion", || {
                self.complete(messages)
            })
            .await
        })
    }

    fn chat_stream<'a>(&'a self, messages: &'a [Message]) -> ChunkStream<'a> {
        let connect = async move {
            retry_with_backoff(&self.config.retry, "chat stream", || {
                self.open_stream(messages)
            })
            .await
        };
        Box::pin(
            stream::once(connect)
                .map(|result| -> ChunkStream<'static> {
                    match result {
                        Ok(response) => chunk_stream(response),
                        Err(e) => Box::pin(stream::iter([Err(e)])),
                    }
                })
                .flatten(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl ChatTransport for Fixed {
        fn chat<'a>(&'a self, _messages: &'a [Message]) -> ChatFuture<'a> {
            Box::pin(async move { Ok(self.0.to_string()) })
        }
    }

    struct Failing;

    impl ChatTransport for Failing {
        fn chat<'a>(&'a self, _messages: &'a [Message]) -> ChatFuture<'a> {
            Box::pin(async { Err(LlmError::Api("nope".into())) })
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_chat() {
        let transport = Fixed("hello");
        let chunks: Vec<_> = transport
            .chat_stream(&[])
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks, vec![StreamChunk::text("hello"), StreamChunk::done()]);
    }

    #[tokio::test]
    async fn default_stream_forwards_errors() {
        let items: Vec<_> = Failing.chat_stream(&[]).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn works_through_trait_object() {
        let transport: &dyn ChatTransport = &Fixed("hi");
        assert_eq!(transport.chat(&[Message::user("x")]).await.unwrap(), "hi");
    }
}
