//! Interactive line-based chat.

use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use super::render::{format_usage, print_transcript, EventPrinter};
use super::setup::{self, GlobalOptions};
use crate::backend::store::ConversationStore;
use crate::core::chat::{ChatEvent, ChatSession, CompletionSinks};
use crate::core::message::Attachment;
use crate::core::retry::RetryPolicy;
use crate::core::transport::build_transport;

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    New,
    Clear,
    Attach(String),
    Resume(String),
    Usage,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(line.trim_end_matches(['\r', '\n']).to_string());
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    match name {
        "new" => Input::New,
        "clear" => Input::Clear,
        "attach" if !rest.is_empty() => Input::Attach(rest.to_string()),
        "resume" if !rest.is_empty() => Input::Resume(rest.to_string()),
        "usage" => Input::Usage,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(trimmed.to_string()),
    }
}

/// MIME type from the file extension; unknown types are sent as opaque bytes.
pub fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

pub fn load_attachment(path: &Path) -> Result<Attachment, Box<dyn Error>> {
    let data = std::fs::read(path)
        .map_err(|err| format!("Failed to read {}: {err}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::new(name, mime_for(path), data))
}

const HELP: &str = "Commands:\n\
  /new              Start a new conversation\n\
  /clear            Clear the screen history and greet again\n\
  /attach <path>    Attach a file to the next message\n\
  /resume <id>      Continue a stored conversation\n\
  /usage            Show token usage for this conversation\n\
  /quit             Leave";

pub async fn run_chat(options: &GlobalOptions) -> Result<(), Box<dyn Error>> {
    let config = options.load_config()?;
    let provider = setup::resolve_provider(options, &config)?;
    let client = reqwest::Client::new();

    let backend = setup::connect_backend(&client, &config);
    let chatbot_id = options.chatbot_id(&config).map(str::to_string);
    let persona = setup::resolve_persona(&config, backend.as_ref(), chatbot_id.as_deref()).await;
    let avatar = persona.avatar().to_string();

    let mut sinks = CompletionSinks::default();
    let store = backend.as_ref().map(|backend| {
        Arc::new(ConversationStore::new(
            backend.clone(),
            setup::stored_chatbot_id(&config, &persona),
        ))
    });
    if let Some(store) = &store {
        sinks.push(store.clone());
    }
    let log = setup::open_transcript(options)?;
    if let Some(log) = &log {
        sinks.push(log.clone());
    }

    let mut builder = ChatSession::builder(persona.clone())
        .transport(build_transport(client.clone(), &provider, &config.generation))
        .retry_policy(RetryPolicy::from_settings(&config.retry));
    if let Some(rag) = setup::build_rag(
        &client,
        options,
        &config,
        backend.as_ref(),
        chatbot_id.as_deref(),
    ) {
        builder = builder.rag(rag);
    }
    if !sinks.is_empty() {
        builder = builder.completion_sink(Arc::new(sinks));
    }
    let session = builder.build();
    let mut events = session.subscribe();
    let mut printer = EventPrinter::new(io::stdout(), io::stderr(), avatar.clone());

    eprintln!(
        "💬 {} via {} ({}). Type /help for commands.",
        persona.name,
        provider.kind.display_name(),
        provider.model
    );
    session.initialize().await;
    drain(&mut events, &mut printer)?;
    printer.end_line()?;

    let mut pending_attachment: Option<Attachment> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Usage => println!("{}", format_usage(&session.token_usage().await)),
            Input::Unknown(command) => eprintln!("⚠️  Unknown command: {command}"),
            Input::Attach(path) => match load_attachment(Path::new(&path)) {
                Ok(attachment) => {
                    println!("📎 {} ({}) will be sent with your next message", attachment.name, attachment.mime_type);
                    pending_attachment = Some(attachment);
                }
                Err(err) => eprintln!("❌ {err}"),
            },
            Input::New => {
                if let Some(store) = &store {
                    store.start_new().await;
                }
                if let Some(log) = &log {
                    if let Err(err) = log.log_note("new conversation") {
                        tracing::warn!(error = %err, "failed to write transcript note");
                    }
                }
                pending_attachment = None;
                session.start_new_conversation(None, None).await;
                drain(&mut events, &mut printer)?;
                printer.end_line()?;
            }
            Input::Clear => {
                session.clear_messages().await;
                session.initialize().await;
                drain(&mut events, &mut printer)?;
                printer.end_line()?;
            }
            Input::Resume(id) => {
                let Some(store) = &store else {
                    eprintln!("❌ No backend is configured; stored conversations are unavailable.");
                    continue;
                };
                match store.resume(&id).await {
                    Ok((conversation, messages)) => {
                        println!("📂 {}", conversation.title);
                        print_transcript(&mut io::stdout(), &messages, &avatar)?;
                        session.load_conversation(messages, None).await;
                        // Already printed in full above.
                        while events.try_recv().is_ok() {}
                    }
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
            Input::Message(text) => {
                let attachment = pending_attachment.take();
                send_and_render(&session, &text, attachment, &mut events, &mut printer).await?;
            }
        }
    }

    Ok(())
}

/// Run one turn while echoing its events as they arrive.
pub async fn send_and_render<W: Write, E: Write>(
    session: &ChatSession,
    text: &str,
    attachment: Option<Attachment>,
    events: &mut UnboundedReceiver<ChatEvent>,
    printer: &mut EventPrinter<W, E>,
) -> io::Result<()> {
    let turn = session.send_message(text, attachment);
    tokio::pin!(turn);
    loop {
        tokio::select! {
            _ = &mut turn => break,
            Some(event) = events.recv() => printer.handle(&event)?,
        }
    }
    drain(events, printer)
}

fn drain<W: Write, E: Write>(
    events: &mut UnboundedReceiver<ChatEvent>,
    printer: &mut EventPrinter<W, E>,
) -> io::Result<()> {
    while let Ok(event) = events.try_recv() {
        printer.handle(&event)?;
    }
    Ok(())
}
