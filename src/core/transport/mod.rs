//! Vendor transports: turn a user turn plus history into a live stream of
//! [`StreamEvent`]s.

pub mod gemini;
pub mod openai;

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};

use crate::core::chat_stream::{error_message_from_body, parse_payload, SseDecoder, StreamEvent};
use crate::core::config::GenerationSettings;
use crate::core::message::{HistoryTurn, RequestParts};
use crate::core::providers::{ProviderKind, ProviderSession};

pub use gemini::GeminiTransport;
pub use openai::OpenAiTransport;

/// Failure of a single streamed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The upstream answered with a non-success status, or embedded an error
    /// object in the stream.
    Http { status: u16, message: String },
    /// The request could not be sent or the body could not be read.
    Network(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Network(_) => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Http { status, message } => write!(f, "{status} {message}"),
            TransportError::Network(message) => write!(f, "network error: {message}"),
        }
    }
}

impl Error for TransportError {}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Send one user turn with the prior history and return the reply stream.
    async fn stream_turn(
        &self,
        parts: &RequestParts,
        history: &[HistoryTurn],
        system_prompt: &str,
    ) -> Result<EventStream, TransportError>;
}

/// Pick the transport variant for the resolved provider.
pub fn build_transport(
    client: reqwest::Client,
    session: &ProviderSession,
    generation: &GenerationSettings,
) -> Arc<dyn ChatTransport> {
    match session.kind {
        ProviderKind::Gemini => Arc::new(GeminiTransport::new(
            client,
            session.clone(),
            generation.clone(),
        )),
        ProviderKind::OpenAi => Arc::new(OpenAiTransport::new(
            client,
            session.clone(),
            generation.clone(),
        )),
    }
}

/// Send a prepared request and hand back the decoded event stream, mapping a
/// non-success status into [`TransportError::Http`].
pub(crate) async fn send_streaming(
    kind: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<EventStream, TransportError> {
    let response = request
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|err| TransportError::Network(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = error_message_from_body(status, &body);
        tracing::debug!(status = status.as_u16(), %message, "upstream rejected chat request");
        return Err(TransportError::Http {
            status: status.as_u16(),
            message,
        });
    }

    Ok(decode_byte_stream(kind, response.bytes_stream()))
}

struct DecodeState<S> {
    kind: ProviderKind,
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, TransportError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match parse_payload(self.kind, &payload) {
                Ok(Some(event)) => self.pending.push_back(Ok(event)),
                Ok(None) => {}
                Err(err) => {
                    self.pending.push_back(Err(err));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Decode a raw SSE byte stream into events. The stream ends when the body
/// closes, on `[DONE]`, or after the first error.
pub fn decode_byte_stream<S, B, E>(kind: ProviderKind, bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DecodeState {
        kind,
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.decoder.push(chunk.as_ref());
                    state.enqueue(payloads);
                    if state.decoder.is_done() {
                        state.finished = true;
                    }
                }
                Some(Err(err)) => {
                    state
                        .pending
                        .push_back(Err(TransportError::Network(err.to_string())));
                    state.finished = true;
                }
                None => {
                    let payloads = state.decoder.finish();
                    state.enqueue(payloads);
                    state.finished = true;
                }
            }
        }
    }))
}
