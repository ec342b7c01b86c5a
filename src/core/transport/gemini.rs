use async_trait::async_trait;

use super::{send_streaming, ChatTransport, EventStream, TransportError};
use crate::api::gemini::{Content, GenerateContentRequest, GenerationConfig, InlineData, Part, SystemInstruction};
use crate::core::config::GenerationSettings;
use crate::core::message::{HistoryTurn, RequestPart, RequestParts, Role};
use crate::core::providers::{ProviderKind, ProviderSession};
use crate::utils::url::construct_api_url;

/// `streamGenerateContent` over server-sent events.
pub struct GeminiTransport {
    client: reqwest::Client,
    session: ProviderSession,
    generation: GenerationSettings,
}

impl GeminiTransport {
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

    fn endpoint(&self) -> String {
        construct_api_url(
            &self.session.base_url,
            &format!(
                "models/{}:streamGenerateContent?alt=sse",
                self.session.model
            ),
        )
    }

    pub fn build_request(
        &self,
        parts: &RequestParts,
        history: &[HistoryTurn],
        system_prompt: &str,
    ) -> GenerateContentRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| content(turn.role, &turn.parts))
            .collect();
        contents.push(content(Role::User, parts.as_slice()));

        GenerateContentRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part::Text {
                    text: system_prompt.to_string(),
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature: self.generation.temperature,
                top_p: self.generation.top_p,
                max_output_tokens: self.generation.max_output_tokens,
            },
        }
    }
}

pub(crate) fn part(part: &RequestPart) -> Part {
    match part {
        RequestPart::Text(text) => Part::Text { text: text.clone() },
        RequestPart::InlineData { mime_type, data } => Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.clone(),
                data: data.clone(),
            },
        },
    }
}

fn content(role: Role, parts: &[RequestPart]) -> Content {
    Content {
        role: role.gemini_label().to_string(),
        parts: parts.iter().map(part).collect(),
    }
}

#[async_trait]
impl ChatTransport for GeminiTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
            "sending gemini stream request"
        );
        let request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.session.api_key)
            .json(&body);
        send_streaming(ProviderKind::Gemini, request).await
    }
}
