use memchr::memchr;

use crate::api::gemini::GenerateContentResponse;
use crate::api::ChatResponse;
use crate::core::message::TokenUsage;
use crate::core::providers::ProviderKind;
use crate::core::transport::TransportError;

/// One decoded unit of a streamed reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub text: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            usage: None,
        }
    }

    pub fn usage(usage: TokenUsage) -> Self {
        Self {
            text: None,
            usage: Some(usage),
        }
    }
}

/// Incremental server-sent-event line splitter.
///
/// Bytes are buffered until a newline arrives, so multi-byte UTF-8 sequences
/// split across network chunks are decoded whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk and return the `data:` payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if self.accept_line(&line[..newline_pos], &mut payloads) {
                self.buffer.clear();
                break;
            }
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.accept_line(&line, &mut payloads);
        }
        payloads
    }

    fn accept_line(&mut self, raw: &[u8], payloads: &mut Vec<String>) -> bool {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(err) => {
                tracing::debug!("skipping stream line with invalid UTF-8: {err}");
                return false;
            }
        };

        let Some(payload) = extract_data_payload(line) else {
            return false;
        };
        if payload == "[DONE]" {
            self.done = true;
            return true;
        }
        if !payload.is_empty() {
            payloads.push(payload.to_string());
        }
        false
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Parse one `data:` payload into an event.
///
/// Returns `Ok(None)` for payloads that are not JSON or carry neither text nor
/// usage, and an error when the upstream embedded an error object in the
/// stream.
pub fn parse_payload(
    kind: ProviderKind,
    payload: &str,
) -> Result<Option<StreamEvent>, TransportError> {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };

    if value.get("error").is_some() {
        return Err(stream_error(&value));
    }

    let event = match kind {
        ProviderKind::Gemini => {
            let Ok(response) = serde_json::from_value::<GenerateContentResponse>(value) else {
                return Ok(None);
            };
            StreamEvent {
                text: response.text(),
                usage: response.usage_metadata.map(TokenUsage::from),
            }
        }
        ProviderKind::OpenAi => {
            let Ok(response) = serde_json::from_value::<ChatResponse>(value) else {
                return Ok(None);
            };
            let text = response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty());
            StreamEvent {
                text,
                usage: response.usage.map(TokenUsage::from),
            }
        }
    };

    if event.text.is_none() && event.usage.is_none() {
        Ok(None)
    } else {
        Ok(Some(event))
    }
}

fn stream_error(value: &serde_json::Value) -> TransportError {
    let status = value
        .pointer("/error/code")
        .and_then(|code| code.as_u64())
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(500);
    let message = extract_error_summary(value).unwrap_or_else(|| value.to_string());
    TransportError::Http { status, message }
}

/// Pull a one-line human summary out of a vendor error body.
pub fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Message for a non-success HTTP response: the vendor's error message when the
/// body carries one, otherwise the status reason.
pub fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_owned)
                .unwrap_or_else(|| status.as_str().to_owned())
        })
}
