//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! [`SseDecoder`] turns raw response bytes into [`StreamChunk`]s and is
//! independent of the HTTP client so it can be fed from tests.
//! [`chunk_stream`] wraps a live [`reqwest::Response`] in a lazy stream that
//! reads the body only as the consumer polls, which is what lets the turn
//! loop stop mid-response on abort.

use futures::stream;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use crate::api::transport::ChunkStream;
use crate::error::LlmError;
use crate::{ApiErrorResponse, Message, OpenAiClient};

/// One increment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    /// Visible text delta.
    pub content: String,
    /// Reasoning/thinking delta, for models that expose one.
    pub reasoning: String,
    /// Set on the final chunk only.
    pub is_done: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            is_done: true,
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawStreamChunk {
    choices: Option<Vec<RawStreamChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawStreamChoice {
    delta: Option<RawStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawStreamDelta {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
}

/// Incremental SSE line decoder.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network reads decode correctly. Exactly one `is_done` chunk
/// is produced, either on `data: [DONE]` or from [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal chunk has been produced.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns every chunk completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, LlmError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&String::from_utf8_lossy(&line), &mut out);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush a trailing unterminated line and close the stream.
    pub fn finish(&mut self) -> Vec<Result<StreamChunk, LlmError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&String::from_utf8_lossy(&rest), &mut out);
        if !self.done {
            self.done = true;
            out.push(Ok(StreamChunk::done()));
        }
        out
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<Result<StreamChunk, LlmError>>) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            trace!("Ignoring SSE field: {line}");
            return;
        };
        if data == "[DONE]" {
            self.done = true;
            out.push(Ok(StreamChunk::done()));
            return;
        }

        let chunk: RawStreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed to parse SSE chunk: {e} (data: {data})");
                return;
            }
        };
        if let Some(err) = chunk.error {
            out.push(Err(LlmError::Api(err.message)));
            return;
        }
        for choice in chunk.choices.unwrap_or_default() {
            if let Some(delta) = choice.delta {
                let reasoning = delta
                    .reasoning
                    .or(delta.reasoning_content)
                    .unwrap_or_default();
                let content = delta.content.unwrap_or_default();
                if !content.is_empty() || !reasoning.is_empty() {
                    out.push(Ok(StreamChunk {
                        content,
                        reasoning,
                        is_done: false,
                    }));
                }
            }
            if let Some(reason) = choice.finish_reason {
                trace!("Stream finish_reason: {reason}");
            }
        }
    }
}

struct SseState {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamChunk, LlmError>>,
    finished: bool,
}

/// Lazily decode an SSE response body.
pub fn chunk_stream(response: reqwest::Response) -> ChunkStream<'static> {
    let state = SseState {
        response,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.response.chunk().await {
                Ok(Some(bytes)) => {
                    st.pending.extend(st.decoder.push(&bytes));
                    st.finished = st.decoder.is_done();
                }
                Ok(None) => {
                    st.pending.extend(st.decoder.finish());
                    st.finished = true;
                }
                Err(e) => {
                    st.pending.push_back(Err(LlmError::Request(format!(
                        "failed to read streaming chunk: {e}"
                    ))));
                    st.finished = true;
                }
            }
        }
    }))
}

impl OpenAiClient {
    /// Send a streaming request and return the response once headers arrive.
    pub(crate) async fn open_stream(
        &self,
        messages: &[Message],
    ) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request(messages, true);
        debug!(
            "LLM stream request: model={}, messages={}",
            body.model,
            body.messages.len()
        );

        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(resp)
    }
}
