//! One-shot "say" command: a single turn, streamed to stdout.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use super::chat::{load_attachment, send_and_render};
use super::render::EventPrinter;
use super::setup::{self, GlobalOptions};
use crate::core::chat::ChatSession;
use crate::core::config::Config;
use crate::core::message::Attachment;
use crate::core::providers::ProviderSession;
use crate::core::retry::RetryPolicy;
use crate::core::transport::build_transport;

pub async fn run_say(
    options: &GlobalOptions,
    prompt: Vec<String>,
    attach: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() && attach.is_none() {
        eprintln!("Usage: parlor say <prompt>");
        std::process::exit(1);
    }

    let config = options.load_config()?;
    let provider = setup::resolve_provider(options, &config)?;
    let attachment = attach.as_deref().map(load_attachment).transpose()?;
    // No avatar prefix and no retry notices: the reply alone goes to stdout.
    let mut printer = EventPrinter::new(io::stdout(), io::stderr(), "").with_notices_on_err();

    if !say(options, &config, &provider, &prompt, attachment, &mut printer).await? {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one turn against `provider`; false when it ended in an error.
async fn say<W: Write, E: Write>(
    options: &GlobalOptions,
    config: &Config,
    provider: &ProviderSession,
    prompt: &str,
    attachment: Option<Attachment>,
    printer: &mut EventPrinter<W, E>,
) -> Result<bool, Box<dyn Error>> {
    let client = reqwest::Client::new();
    let backend = setup::connect_backend(&client, config);
    let chatbot_id = options.chatbot_id(config);
    let persona = setup::resolve_persona(config, backend.as_ref(), chatbot_id).await;

    let mut builder = ChatSession::builder(persona)
        .transport(build_transport(client.clone(), provider, &config.generation))
        .retry_policy(RetryPolicy::from_settings(&config.retry));
    if let Some(rag) = setup::build_rag(&client, options, config, backend.as_ref(), chatbot_id) {
        builder = builder.rag(rag);
    }
    if let Some(log) = setup::open_transcript(options)? {
        builder = builder.completion_sink(log);
    }
    let session = builder.build();
    let mut events = session.subscribe();

    send_and_render(&session, prompt, attachment, &mut events, printer).await?;
    Ok(!printer.take_failed())
}
