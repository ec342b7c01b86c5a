use async_trait::async_trait;

use super::{send_streaming, ChatTransport, EventStream, TransportError};
use crate::api::{ChatContent, ChatContentPart, ChatMessage, ChatRequest, ImageUrl, StreamOptions};
use crate::core::config::GenerationSettings;
use crate::core::message::{HistoryTurn, RequestPart, RequestParts, Role};
use crate::core::providers::{ProviderKind, ProviderSession};
use crate::utils::url::construct_api_url;

/// Chat Completions streaming with `stream_options.include_usage`, so the final
/// chunk carries token counts.
pub struct OpenAiTransport {
    client: reqwest::Client,
    session: ProviderSession,
    generation: GenerationSettings,
}

impl OpenAiTransport {
    pub fn new(
        client: reqwest::Client,
        session: ProviderSession,
        generation: GenerationSettings,
    ) -> Self {
        Self {
            client,
            session,
            generation,
        }
    }

    pub fn build_request(
        &self,
        parts: &RequestParts,
        history: &[HistoryTurn],
        system_prompt: &str,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: ChatContent::Text(system_prompt.to_string()),
            });
        }
        messages.extend(history.iter().map(|turn| message(turn.role, &turn.parts)));
        messages.push(message(Role::User, parts.as_slice()));

        ChatRequest {
            model: self.session.model.clone(),
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            max_tokens: self.generation.max_output_tokens,
        }
    }
}

fn message(role: Role, parts: &[RequestPart]) -> ChatMessage {
    let text_only = parts.iter().all(|part| part.text().is_some());
    let content = if text_only {
        ChatContent::Text(
            parts
                .iter()
                .filter_map(RequestPart::text)
                .collect::<Vec<_>>()
                .join(" "),
        )
    } else {
        ChatContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    RequestPart::Text(text) => ChatContentPart::Text { text: text.clone() },
                    RequestPart::InlineData { mime_type, data } => ChatContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{mime_type};base64,{data}"),
                        },
                    },
                })
                .collect(),
        )
    };

    ChatMessage {
        role: role.as_str().to_string(),
        content,
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn stream_turn(
        &self,
        parts: &RequestParts,
        history: &[HistoryTurn],
        system_prompt: &str,
    ) -> Result<EventStream, TransportError> {
        let body = self.build_request(parts, history, system_prompt);
        tracing::debug!(
            model = %self.session.model,
            history = history.len(),
            "sending chat completions stream request"
        );
        let request = self
            .client
            .post(construct_api_url(&self.session.base_url, "chat/completions"))
            .header("Content-Type", "application/json")
            .header(
                "Authorization",
                format!("Bearer {}", self.session.api_key),
            )
            .json(&body);
        send_streaming(ProviderKind::OpenAi, request).await
    }
}
