//! The chat session: sequences one user turn through RAG, the vendor transport
//! and the retry controller, and keeps the visible transcript, the resent
//! history and the token counters consistent with each other.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::core::history::HistoryStore;
use crate::core::message::{
    Attachment, HistoryTurn, Message, MessageId, RequestParts, Role, TokenUsage,
};
use crate::core::persona::Persona;
use crate::core::retry::{wait_placeholder, RetryPolicy, RetryState, TerminalFailure};
use crate::core::transport::{ChatTransport, TransportError};

pub const RATE_LIMIT_EXHAUSTED_MESSAGE: &str =
    "The server is worn out today. Please come back later.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong while receiving the response.";
pub const MISSING_CREDENTIAL_MESSAGE: &str = "No API key is configured.";

/// Rewrites the outbound user text with retrieved reference material.
#[async_trait]
pub trait RagContextBuilder: Send + Sync {
    /// `None` keeps the original text.
    async fn build_context(&self, user_text: &str) -> Option<String>;
}

/// Receives every successfully finished turn, typically for persistence.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn on_message_complete(&self, user: &Message, assistant: &Message, usage: TokenUsage);
}

/// Forwards each completed turn to every sink in order.
#[derive(Default)]
pub struct CompletionSinks(Vec<Arc<dyn CompletionSink>>);

impl CompletionSinks {
    pub fn push(&mut self, sink: Arc<dyn CompletionSink>) {
        self.0.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl CompletionSink for CompletionSinks {
    async fn on_message_complete(&self, user: &Message, assistant: &Message, usage: TokenUsage) {
        for sink in &self.0 {
            sink.on_message_complete(user, assistant, usage).await;
        }
    }
}

/// Transcript mutations, emitted in the order they are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageAdded(Message),
    MessageUpdated { id: MessageId, content: String },
    MessageRemoved(MessageId),
    RetryScheduled { attempt: u32, delay: Duration },
    ErrorSet(String),
    Completed { usage: TokenUsage },
}

struct SessionState {
    messages: Vec<Message>,
    history: HistoryStore,
    usage: TokenUsage,
    loading: bool,
    error: Option<String>,
    persona: Persona,
    next_id: MessageId,
}

impl SessionState {
    fn issue_id(&mut self) -> MessageId {
        self.next_id += 1;
        self.next_id
    }

    /// Clears everything; returns the ids of the messages that were shown.
    fn reset(&mut self) -> Vec<MessageId> {
        self.history.clear();
        self.usage = TokenUsage::default();
        self.error = None;
        self.messages.drain(..).map(|m| m.id).collect()
    }

    fn seed_greeting(&mut self) -> Message {
        let id = self.issue_id();
        let greeting = Message::new(id, Role::Assistant, self.persona.pick_greeting());
        self.messages.push(greeting.clone());
        greeting
    }

    fn set_content(&mut self, id: MessageId, content: String) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.content = content;
        }
    }
}

struct Inner {
    transport: Option<Arc<dyn ChatTransport>>,
    policy: RetryPolicy,
    rag: Option<Arc<dyn RagContextBuilder>>,
    sink: Option<Arc<dyn CompletionSink>>,
    state: Mutex<SessionState>,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
}

pub struct ChatSessionBuilder {
    persona: Persona,
    transport: Option<Arc<dyn ChatTransport>>,
    policy: RetryPolicy,
    rag: Option<Arc<dyn RagContextBuilder>>,
    sink: Option<Arc<dyn CompletionSink>>,
}

impl ChatSessionBuilder {
    /// Without a transport the session cannot initialize.
    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rag(mut self, rag: Arc<dyn RagContextBuilder>) -> Self {
        self.rag = Some(rag);
        self
    }

    pub fn completion_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> ChatSession {
        ChatSession {
            inner: Arc::new(Inner {
                transport: self.transport,
                policy: self.policy,
                rag: self.rag,
                sink: self.sink,
                state: Mutex::new(SessionState {
                    messages: Vec::new(),
                    history: HistoryStore::new(),
                    usage: TokenUsage::default(),
                    loading: false,
                    error: None,
                    persona: self.persona,
                    next_id: 0,
                }),
                subscribers: StdMutex::new(Vec::new()),
            }),
        }
    }
}

/// Cloneable handle to one conversation. At most one `send_message` runs at a
/// time; the state lock is never held across a network await.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    pub fn builder(persona: Persona) -> ChatSessionBuilder {
        ChatSessionBuilder {
            persona,
            transport: None,
            policy: RetryPolicy::default(),
            rag: None,
            sink: None,
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn emit(&self, events: Vec<ChatEvent>) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Receivers that were dropped are pruned on the next send.
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    /// Start a fresh session. Returns false when no credential was resolved,
    /// leaving the transcript untouched.
    pub async fn initialize(&self) -> bool {
        if self.inner.transport.is_none() {
            tracing::warn!("chat session has no API key; set one with `parlor auth`");
            return false;
        }
        let (removed, greeting) = {
            let mut state = self.inner.state.lock().await;
            let removed = state.reset();
            (removed, state.seed_greeting())
        };
        self.emit(removal_events(removed, vec![greeting]));
        true
    }

    /// Send one user turn and stream the reply into a placeholder message.
    /// Ignored when there is nothing to send or a turn is already in flight.
    pub async fn send_message(&self, text: &str, attachment: Option<Attachment>) {
        let Some(parts) = RequestParts::from_input(text, attachment.as_ref()) else {
            return;
        };

        let (user_message, placeholder_id, history, persona) = {
            let mut state = self.inner.state.lock().await;
            if state.loading {
                tracing::debug!("send ignored while a reply is streaming");
                return;
            }
            state.loading = true;
            state.error = None;

            let user_id = state.issue_id();
            let user_message = Message::new(user_id, Role::User, text)
                .with_file(attachment.as_ref().map(Attachment::meta));
            let placeholder_id = state.issue_id();
            state.messages.push(user_message.clone());
            state
                .messages
                .push(Message::new(placeholder_id, Role::Assistant, ""));
            (
                user_message,
                placeholder_id,
                state.history.snapshot(),
                state.persona.clone(),
            )
        };
        self.emit(vec![
            ChatEvent::MessageAdded(user_message.clone()),
            ChatEvent::MessageAdded(Message::new(placeholder_id, Role::Assistant, "")),
        ]);

        let outbound = self.outbound_parts(text, &parts).await;
        let outcome = self
            .run_with_retries(&outbound, &history, &persona, placeholder_id)
            .await;

        match outcome {
            Ok((reply, usage)) => {
                self.finish_success(user_message, parts, placeholder_id, reply, usage)
                    .await
            }
            Err(failure) => self.finish_failure(placeholder_id, failure).await,
        }
    }

    async fn outbound_parts(&self, text: &str, parts: &RequestParts) -> RequestParts {
        let Some(rag) = &self.inner.rag else {
            return parts.clone();
        };
        if text.trim().is_empty() {
            return parts.clone();
        }
        match rag.build_context(text).await {
            Some(context) => {
                tracing::debug!(chars = context.chars().count(), "using knowledge context");
                parts.with_text(context)
            }
            None => parts.clone(),
        }
    }

    async fn run_with_retries(
        &self,
        parts: &RequestParts,
        history: &[HistoryTurn],
        persona: &Persona,
        placeholder_id: MessageId,
    ) -> Result<(String, Option<TokenUsage>), TerminalFailure> {
        let Some(transport) = self.inner.transport.clone() else {
            return Err(TerminalFailure::Upstream(TransportError::Network(
                MISSING_CREDENTIAL_MESSAGE.to_string(),
            )));
        };
        let policy = &self.inner.policy;

        let mut reply = String::new();
        let mut usage = None;
        let mut state = policy.start();
        loop {
            state = match state {
                RetryState::Attempting(attempt) => {
                    if attempt > 0 {
                        self.replace_content(placeholder_id, String::new()).await;
                    }
                    reply.clear();
                    usage = None;
                    match self
                        .attempt(
                            transport.as_ref(),
                            parts,
                            history,
                            &persona.system_prompt,
                            placeholder_id,
                            &mut reply,
                            &mut usage,
                        )
                        .await
                    {
                        Ok(()) => RetryState::Attempting(attempt).on_success(),
                        Err(err) => {
                            tracing::debug!(
                                attempt = attempt + 1,
                                max = policy.max_retries + 1,
                                error = %err,
                                "chat attempt failed"
                            );
                            policy.on_failure(attempt, &err)
                        }
                    }
                }
                RetryState::RetryWait(attempt) => {
                    let delay = policy.delay_for(attempt);
                    let notice = wait_placeholder(
                        &persona.pick_wait_message(),
                        delay,
                        attempt,
                        policy.max_retries,
                    );
                    self.emit(vec![ChatEvent::RetryScheduled {
                        attempt: attempt + 1,
                        delay,
                    }]);
                    self.replace_content(placeholder_id, notice).await;
                    tokio::time::sleep(delay).await;
                    RetryState::RetryWait(attempt).on_wait_elapsed()
                }
                RetryState::Success => return Ok((reply, usage)),
                RetryState::FailedTerminal(failure) => return Err(failure),
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        transport: &dyn ChatTransport,
        parts: &RequestParts,
        history: &[HistoryTurn],
        system_prompt: &str,
        placeholder_id: MessageId,
        reply: &mut String,
        usage: &mut Option<TokenUsage>,
    ) -> Result<(), TransportError> {
        let mut stream = transport.stream_turn(parts, history, system_prompt).await?;
        while let Some(event) = stream.next().await {
            let event = event?;
            if let Some(latest) = event.usage {
                *usage = Some(latest);
            }
            if let Some(fragment) = event.text.filter(|t| !t.is_empty()) {
                reply.push_str(&fragment);
                self.replace_content(placeholder_id, reply.clone()).await;
            }
        }
        Ok(())
    }

    async fn replace_content(&self, id: MessageId, content: String) {
        self.inner
            .state
            .lock()
            .await
            .set_content(id, content.clone());
        self.emit(vec![ChatEvent::MessageUpdated { id, content }]);
    }

    async fn finish_success(
        &self,
        user_message: Message,
        parts: RequestParts,
        placeholder_id: MessageId,
        reply: String,
        usage: Option<TokenUsage>,
    ) {
        let usage = usage.unwrap_or_default();
        let assistant_message = {
            let mut state = self.inner.state.lock().await;
            if !reply.is_empty() {
                state.history.append(HistoryTurn::user(parts.into_vec()));
                state
                    .history
                    .append(HistoryTurn::text(Role::Assistant, reply.clone()));
            }
            state.usage.accumulate(usage);
            state.loading = false;
            Message::new(placeholder_id, Role::Assistant, reply)
        };
        self.emit(vec![ChatEvent::Completed { usage }]);

        if let Some(sink) = &self.inner.sink {
            sink.on_message_complete(&user_message, &assistant_message, usage)
                .await;
        }
    }

    async fn finish_failure(&self, placeholder_id: MessageId, failure: TerminalFailure) {
        let message = match &failure {
            TerminalFailure::RateLimitExhausted => {
                tracing::error!("rate limited after every retry");
                RATE_LIMIT_EXHAUSTED_MESSAGE.to_string()
            }
            TerminalFailure::Upstream(err) => {
                tracing::error!(error = %err, "chat request failed");
                user_facing_error(err)
            }
        };
        {
            let mut state = self.inner.state.lock().await;
            state.messages.retain(|m| m.id != placeholder_id);
            state.error = Some(message.clone());
            state.loading = false;
        }
        self.emit(vec![
            ChatEvent::MessageRemoved(placeholder_id),
            ChatEvent::ErrorSet(message),
        ]);
    }

    /// Drop the transcript, history and counters without greeting again.
    pub async fn clear_messages(&self) {
        let removed = self.inner.state.lock().await.reset();
        self.emit(removal_events(removed, Vec::new()));
    }

    /// Reset and greet, optionally switching system prompt and greetings.
    pub async fn start_new_conversation(
        &self,
        system_prompt: Option<String>,
        greetings: Option<Vec<String>>,
    ) {
        let (removed, greeting) = {
            let mut state = self.inner.state.lock().await;
            if let Some(prompt) = system_prompt {
                state.persona.system_prompt = prompt;
            }
            if let Some(greetings) = greetings {
                state.persona.greetings = greetings;
            }
            let removed = state.reset();
            (removed, state.seed_greeting())
        };
        self.emit(removal_events(removed, vec![greeting]));
    }

    /// Show a persisted conversation and resend it as history from now on.
    pub async fn load_conversation(&self, messages: Vec<Message>, system_prompt: Option<String>) {
        let removed = {
            let mut state = self.inner.state.lock().await;
            if let Some(prompt) = system_prompt {
                state.persona.system_prompt = prompt;
            }
            let removed = state.reset();
            state
                .history
                .replace_all(HistoryStore::turns_from_messages(&messages));
            let highest = messages.iter().map(|m| m.id).max().unwrap_or(0);
            state.next_id = state.next_id.max(highest);
            state.messages = messages.clone();
            removed
        };
        self.emit(removal_events(removed, messages));
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.lock().await.loading
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.state.lock().await.error.clone()
    }

    pub async fn token_usage(&self) -> TokenUsage {
        self.inner.state.lock().await.usage
    }

    pub async fn history(&self) -> Vec<HistoryTurn> {
        self.inner.state.lock().await.history.snapshot()
    }

    pub async fn persona(&self) -> Persona {
        self.inner.state.lock().await.persona.clone()
    }
}

/// Removal of the old transcript followed by the new one, in display order.
fn removal_events(removed: Vec<MessageId>, added: Vec<Message>) -> Vec<ChatEvent> {
    removed
        .into_iter()
        .map(ChatEvent::MessageRemoved)
        .chain(added.into_iter().map(ChatEvent::MessageAdded))
        .collect()
}

/// Client-side rejections keep the upstream wording; server and network
/// failures get the generic line.
fn user_facing_error(err: &TransportError) -> String {
    match err.status() {
        Some(status) if (400..500).contains(&status) => err.to_string(),
        _ => GENERIC_FAILURE_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::StreamEvent;
    use crate::core::providers::ProviderKind;
    use crate::core::transport::EventStream;
    use futures_util::stream;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    type Script = Result<Vec<Result<StreamEvent, TransportError>>, TransportError>;

    #[derive(Default)]
    struct ScriptedTransport {
        script: StdMutex<VecDeque<Script>>,
        calls: StdMutex<Vec<(RequestParts, Vec<HistoryTurn>, String)>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                ..Self::default()
            }
        }

        fn gated(script: Vec<Script>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(script)
            }
        }

        fn calls(&self) -> Vec<(RequestParts, Vec<HistoryTurn>, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gemini
        }

        async fn stream_turn(
            &self,
            parts: &RequestParts,
            history: &[HistoryTurn],
            system_prompt: &str,
        ) -> Result<EventStream, TransportError> {
            self.calls.lock().unwrap().push((
                parts.clone(),
                history.to_vec(),
                system_prompt.to_string(),
            ));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more often than scripted");
            next.map(|events| Box::pin(stream::iter(events)) as EventStream)
        }
    }

    fn chunks(texts: &[&str]) -> Script {
        Ok(texts.iter().map(|t| Ok(StreamEvent::text(*t))).collect())
    }

    fn http(status: u16, message: &str) -> Script {
        Err(TransportError::Http {
            status,
            message: message.to_string(),
        })
    }

    fn session(transport: Arc<ScriptedTransport>) -> ChatSession {
        ChatSession::builder(Persona::builtin_default())
            .transport(transport)
            .build()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn hello_streams_into_assistant_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["Hi", " there"])]));
        let chat = session(transport.clone());

        chat.send_message("hello", None).await;

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].file, None);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert!(!chat.is_loading().await);
        assert_eq!(chat.error().await, None);

        assert_eq!(
            chat.history().await,
            vec![
                HistoryTurn::text(Role::User, "hello"),
                HistoryTurn::text(Role::Assistant, "Hi there"),
            ]
        );
        let calls = transport.calls();
        assert!(calls[0].1.is_empty());
        assert_eq!(calls[0].2, Persona::builtin_default().system_prompt);
    }

    #[tokio::test]
    async fn second_turn_resends_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            chunks(&["one"]),
            chunks(&["two"]),
        ]));
        let chat = session(transport.clone());

        chat.send_message("first", None).await;
        chat.send_message("second", None).await;

        let calls = transport.calls();
        assert_eq!(calls[1].1.len(), 2);
        assert_eq!(calls[1].1[1].joined_text(), "one");
        assert_eq!(calls[1].0.joined_text(), "second");
        assert_eq!(chat.history().await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success_shows_one_wait_placeholder() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            http(429, "Too Many Requests"),
            chunks(&["OK"]),
        ]));
        let chat = session(transport.clone());
        let mut rx = chat.subscribe();

        chat.send_message("ping", None).await;

        let messages = chat.messages().await;
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("OK"));
        assert_eq!(chat.error().await, None);
        assert_eq!(transport.calls().len(), 2);

        let events = drain(&mut rx);
        let retries: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::RetryScheduled { .. }))
            .collect();
        assert_eq!(
            retries,
            vec![&ChatEvent::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(5)
            }]
        );
        let placeholders = events
            .iter()
            .filter(|e| {
                matches!(e, ChatEvent::MessageUpdated { content, .. } if content.contains("(Retrying in 5s... 1/3)"))
            })
            .count();
        assert_eq!(placeholders, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_backs_off_and_resets_placeholder() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            http(429, "Too Many Requests"),
            http(429, "Too Many Requests"),
            http(429, "Too Many Requests"),
            http(429, "Too Many Requests"),
        ]));
        let chat = session(transport.clone());
        let mut rx = chat.subscribe();
        let started = tokio::time::Instant::now();

        chat.send_message("ping", None).await;

        assert_eq!(started.elapsed(), Duration::from_millis(35_000));
        assert_eq!(transport.calls().len(), 4);
        assert_eq!(
            chat.error().await.as_deref(),
            Some(RATE_LIMIT_EXHAUSTED_MESSAGE)
        );
        assert_eq!(chat.messages().await.len(), 1);

        let events = drain(&mut rx);
        let delays: Vec<u128> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::RetryScheduled { delay, .. } => Some(delay.as_millis()),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![5000, 10000, 20000]);

        // Every scheduled retry shows its notice, then empties the placeholder.
        for (index, event) in events.iter().enumerate() {
            if matches!(event, ChatEvent::RetryScheduled { .. }) {
                assert!(matches!(
                    events.get(index + 1),
                    Some(ChatEvent::MessageUpdated { content, .. }) if content.contains("Retrying in")
                ));
                assert!(matches!(
                    events.get(index + 2),
                    Some(ChatEvent::MessageUpdated { content, .. }) if content.is_empty()
                ));
            }
        }
        assert!(chat.history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_discards_partial_output_of_failed_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(vec![
                Ok(StreamEvent::text("partial ")),
                Err(TransportError::Http {
                    status: 429,
                    message: "Resource exhausted".into(),
                }),
            ]),
            chunks(&["fresh"]),
        ]));
        let chat = session(transport);

        chat.send_message("ping", None).await;

        assert_eq!(
            chat.messages().await.last().map(|m| m.content.clone()),
            Some("fresh".to_string())
        );
        assert_eq!(chat.history().await[1].joined_text(), "fresh");
    }

    #[tokio::test]
    async fn server_error_removes_placeholder_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(vec![http(
            500,
            "Internal Server Error",
        )]));
        let chat = session(transport.clone());
        let mut rx = chat.subscribe();

        chat.send_message("hello", None).await;

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(chat.error().await.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(chat.history().await.is_empty());
        assert_eq!(transport.calls().len(), 1);
        assert!(!chat.is_loading().await);

        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChatEvent::RetryScheduled { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::MessageRemoved(_))));
    }

    #[tokio::test]
    async fn client_error_keeps_upstream_wording() {
        let transport = Arc::new(ScriptedTransport::new(vec![http(
            400,
            "API key not valid",
        )]));
        let chat = session(transport);

        chat.send_message("hello", None).await;

        assert_eq!(
            chat.error().await.as_deref(),
            Some("400 API key not valid")
        );
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(
            TransportError::Network("connection refused".into()),
        )]));
        let chat = session(transport.clone());

        chat.send_message("hello", None).await;

        assert_eq!(transport.calls().len(), 1);
        assert_eq!(chat.error().await.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn send_while_loading_is_ignored() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::gated(
            vec![chunks(&["done"])],
            Arc::clone(&gate),
        ));
        let chat = session(transport.clone());

        let first = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send_message("first", None).await })
        };
        while !chat.is_loading().await {
            tokio::task::yield_now().await;
        }

        chat.send_message("second", None).await;
        assert_eq!(chat.messages().await.len(), 2);

        gate.notify_one();
        first.await.expect("first send");
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(chat.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn blank_input_without_file_is_ignored() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let chat = session(transport.clone());

        chat.send_message("   ", None).await;

        assert!(chat.messages().await.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn attachment_only_turn_is_sent_and_kept_in_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["a cat"])]));
        let chat = session(transport.clone());
        let file = Attachment::new("cat.png", "image/png", vec![1, 2, 3]);

        chat.send_message("", Some(file)).await;

        let messages = chat.messages().await;
        assert_eq!(
            messages[0].file.as_ref().map(|f| f.name.as_str()),
            Some("cat.png")
        );
        let sent = &transport.calls()[0].0;
        assert_eq!(sent.as_slice().len(), 1);
        assert!(sent.as_slice()[0].text().is_none());
        assert_eq!(chat.history().await[0].parts, sent.as_slice().to_vec());
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns_and_resets() {
        let usage_turn = |text: &str, usage: TokenUsage| -> Script {
            Ok(vec![
                Ok(StreamEvent::text(text)),
                Ok(StreamEvent::usage(usage)),
            ])
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            usage_turn("a", TokenUsage::new(10, 2, 12)),
            usage_turn("b", TokenUsage::new(20, 3, 23)),
        ]));
        let chat = session(transport);

        chat.send_message("one", None).await;
        chat.send_message("two", None).await;
        assert_eq!(chat.token_usage().await, TokenUsage::new(30, 5, 35));

        chat.clear_messages().await;
        assert!(chat.initialize().await);
        assert_eq!(chat.messages().await.len(), 1);
        assert_eq!(chat.messages().await[0].role, Role::Assistant);
        assert!(chat.token_usage().await.is_zero());
        assert!(chat.history().await.is_empty());
    }

    #[tokio::test]
    async fn stream_without_usage_counts_nothing() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["plain"])]));
        let chat = session(transport);

        chat.send_message("hi", None).await;
        assert!(chat.token_usage().await.is_zero());
    }

    #[tokio::test]
    async fn initialize_without_transport_returns_false() {
        let chat = ChatSession::builder(Persona::builtin_default()).build();
        assert!(!chat.initialize().await);
        assert!(chat.messages().await.is_empty());
    }

    #[tokio::test]
    async fn new_conversation_uses_supplied_greetings_and_prompt() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["ok"])]));
        let chat = session(transport.clone());

        chat.start_new_conversation(
            Some("Be terse.".to_string()),
            Some(vec!["Only greeting".to_string()]),
        )
        .await;
        let messages = chat.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Only greeting");

        chat.send_message("hi", None).await;
        assert_eq!(transport.calls()[0].2, "Be terse.");
    }

    #[tokio::test]
    async fn loaded_conversation_becomes_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["later"])]));
        let chat = session(transport.clone());

        chat.load_conversation(
            vec![
                Message::new(10, Role::User, "earlier question"),
                Message::new(11, Role::Assistant, "earlier answer"),
            ],
            None,
        )
        .await;
        chat.send_message("follow-up", None).await;

        let calls = transport.calls();
        assert_eq!(calls[0].1.len(), 2);
        assert_eq!(calls[0].1[1].role, Role::Assistant);
        let ids: Vec<_> = chat.messages().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 11, 12, 13]);
    }

    /// Rebuild the visible transcript from events alone.
    fn mirror(events: &[ChatEvent], shown: &mut Vec<Message>) {
        for event in events {
            match event {
                ChatEvent::MessageAdded(message) => shown.push(message.clone()),
                ChatEvent::MessageUpdated { id, content } => {
                    if let Some(message) = shown.iter_mut().find(|m| m.id == *id) {
                        message.content = content.clone();
                    }
                }
                ChatEvent::MessageRemoved(id) => shown.retain(|m| m.id != *id),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn subscribers_can_mirror_clear_and_load() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["Hi"])]));
        let chat = session(transport);
        let mut rx = chat.subscribe();
        let mut shown = Vec::new();

        assert!(chat.initialize().await);
        chat.send_message("hello", None).await;
        mirror(&drain(&mut rx), &mut shown);
        assert_eq!(shown, chat.messages().await);
        assert_eq!(shown.len(), 3);

        chat.clear_messages().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        mirror(&events, &mut shown);
        assert!(shown.is_empty());

        chat.load_conversation(
            vec![
                Message::new(20, Role::User, "stored question"),
                Message::new(21, Role::Assistant, "stored answer"),
            ],
            None,
        )
        .await;
        mirror(&drain(&mut rx), &mut shown);
        assert_eq!(shown, chat.messages().await);

        chat.start_new_conversation(None, None).await;
        mirror(&drain(&mut rx), &mut shown);
        assert_eq!(shown, chat.messages().await);
        assert_eq!(shown.len(), 1);
    }

    struct FixedRag(Option<String>);

    #[async_trait]
    impl RagContextBuilder for FixedRag {
        async fn build_context(&self, _user_text: &str) -> Option<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn rag_rewrites_outbound_text_but_not_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![chunks(&["answer"])]));
        let chat = ChatSession::builder(Persona::builtin_default())
            .transport(transport.clone())
            .rag(Arc::new(FixedRag(Some("context + question".to_string()))))
            .build();

        chat.send_message("question", None).await;

        assert_eq!(transport.calls()[0].0.joined_text(), "context + question");
        assert_eq!(chat.history().await[0].joined_text(), "question");
        assert_eq!(chat.messages().await[0].content, "question");
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: StdMutex<Vec<(String, String, TokenUsage)>>,
    }

    #[async_trait]
    impl CompletionSink for RecordingSink {
        async fn on_message_complete(
            &self,
            user: &Message,
            assistant: &Message,
            usage: TokenUsage,
        ) {
            self.seen.lock().unwrap().push((
                user.content.clone(),
                assistant.content.clone(),
                usage,
            ));
        }
    }

    #[tokio::test]
    async fn completion_sink_sees_only_successful_turns() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(vec![
                Ok(StreamEvent::text("Hi")),
                Ok(StreamEvent::usage(TokenUsage::new(1, 1, 2))),
            ]),
            http(500, "boom"),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let chat = ChatSession::builder(Persona::builtin_default())
            .transport(transport)
            .completion_sink(sink.clone())
            .build();

        chat.send_message("hello", None).await;
        chat.send_message("again", None).await;

        let seen = sink.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "hello".to_string(),
                "Hi".to_string(),
                TokenUsage::new(1, 1, 2)
            )]
        );
    }
}
