//! Backend management commands: chatbot profiles, stored conversations and
//! knowledge ingestion.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;

use super::render::{format_usage, print_transcript};
use super::setup::{self, GlobalOptions};
use crate::backend::{Backend, ChatbotDraft, StoredMessage};
use crate::core::persona::DEFAULT_AVATAR;
use crate::rag::{ingest_documents, DocumentInput, GeminiEmbedder};

#[derive(Subcommand, Debug)]
pub enum ChatbotAction {
    /// List stored chatbot profiles
    List,
    /// Create a chatbot profile
    Create {
        name: String,
        /// System prompt sent with every request
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = DEFAULT_AVATAR)]
        avatar: String,
    },
    /// Replace a chatbot profile's fields
    Update {
        id: String,
        name: String,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = DEFAULT_AVATAR)]
        avatar: String,
    },
    /// Delete a chatbot profile
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConversationAction {
    /// List stored conversations, most recent first
    List,
    /// Print a stored conversation
    Show { id: String },
    /// Delete a stored conversation
    Delete { id: String },
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub async fn chatbots<W: Write>(
    backend: &dyn Backend,
    action: ChatbotAction,
    out: &mut W,
) -> Result<(), Box<dyn Error>> {
    match action {
        ChatbotAction::List => {
            let chatbots = backend.list_chatbots().await?;
            if chatbots.is_empty() {
                writeln!(out, "No chatbots yet. Create one with 'parlor chatbots create'.")?;
            }
            for chatbot in chatbots {
                let avatar = chatbot.avatar_emoji.as_deref().unwrap_or(DEFAULT_AVATAR);
                writeln!(out, "{avatar} {}  {}", chatbot.id, chatbot.name)?;
                if let Some(description) = chatbot.description.filter(|d| !d.is_empty()) {
                    writeln!(out, "    {description}")?;
                }
            }
        }
        ChatbotAction::Create {
            name,
            prompt,
            description,
            avatar,
        } => {
            let created = backend
                .create_chatbot(&ChatbotDraft {
                    name,
                    description,
                    system_prompt: prompt,
                    avatar_emoji: avatar,
                })
                .await?;
            writeln!(out, "✅ Created chatbot {} ({})", created.name, created.id)?;
        }
        ChatbotAction::Update {
            id,
            name,
            prompt,
            description,
            avatar,
        } => {
            backend
                .update_chatbot(
                    &id,
                    &ChatbotDraft {
                        name,
                        description,
                        system_prompt: prompt,
                        avatar_emoji: avatar,
                    },
                )
                .await?;
            writeln!(out, "✅ Updated chatbot {id}")?;
        }
        ChatbotAction::Delete { id } => {
            backend.delete_chatbot(&id).await?;
            writeln!(out, "✅ Deleted chatbot {id}")?;
        }
    }
    Ok(())
}

pub async fn conversations<W: Write>(
    backend: &dyn Backend,
    action: ConversationAction,
    out: &mut W,
) -> Result<(), Box<dyn Error>> {
    match action {
        ConversationAction::List => {
            let conversations = backend.list_conversations().await?;
            if conversations.is_empty() {
                writeln!(out, "No stored conversations.")?;
            }
            for conversation in conversations {
                writeln!(
                    out,
                    "{}  {}  {}  ({} tokens)",
                    conversation.id,
                    timestamp(conversation.updated_at),
                    conversation.title,
                    conversation.total_tokens
                )?;
            }
        }
        ConversationAction::Show { id } => {
            let conversation = backend
                .list_conversations()
                .await?
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| format!("No conversation with id {id}"))?;
            let messages = StoredMessage::into_messages(backend.load_messages(&id).await?);
            writeln!(out, "📂 {}", conversation.title)?;
            print_transcript(out, &messages, DEFAULT_AVATAR)?;
            writeln!(out, "{}", format_usage(&conversation.usage()))?;
        }
        ConversationAction::Delete { id } => {
            backend.delete_conversation(&id).await?;
            writeln!(out, "✅ Deleted conversation {id}")?;
        }
    }
    Ok(())
}

pub async fn run_chatbots(
    options: &GlobalOptions,
    action: ChatbotAction,
) -> Result<(), Box<dyn Error>> {
    let config = options.load_config()?;
    let backend = setup::require_backend(&reqwest::Client::new(), &config)?;
    chatbots(backend.as_ref(), action, &mut io::stdout()).await
}

pub async fn run_conversations(
    options: &GlobalOptions,
    action: ConversationAction,
) -> Result<(), Box<dyn Error>> {
    let config = options.load_config()?;
    let backend = setup::require_backend(&reqwest::Client::new(), &config)?;
    conversations(backend.as_ref(), action, &mut io::stdout()).await
}

/// Upload text files as knowledge documents for a chatbot.
pub async fn run_ingest(
    options: &GlobalOptions,
    title: Option<String>,
    files: Vec<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let config = options.load_config()?;
    let client = reqwest::Client::new();
    let backend: Arc<dyn Backend> = setup::require_backend(&client, &config)?;
    let Some(chatbot_id) = options.chatbot_id(&config).map(str::to_string) else {
        eprintln!("❌ No chatbot selected. Pass --chatbot <id>.");
        std::process::exit(1);
    };
    let Some(gemini) = setup::embedding_key(options, &config) else {
        eprintln!("❌ Knowledge ingestion needs a Gemini API key for embeddings.");
        eprintln!("   Run 'parlor auth gemini' or set GEMINI_API_KEY.");
        std::process::exit(2);
    };

    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let content = setup::read_text_file(path)?;
        let document_title = match (&title, files.len()) {
            (Some(title), 1) => title.clone(),
            _ => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };
        documents.push(DocumentInput {
            title: document_title,
            content,
        });
    }

    let embedder = GeminiEmbedder::new(client, gemini.base_url, gemini.api_key, &config.rag);
    let report = ingest_documents(backend.as_ref(), &embedder, &chatbot_id, &documents).await;
    println!(
        "✅ Stored {} document(s), {} chunk(s) indexed",
        report.documents, report.chunks
    );
    if !report.failed.is_empty() {
        eprintln!("⚠️  Failed: {}", report.failed.join(", "));
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::store::tests::MemoryBackend;
    use crate::backend::Conversation;

    fn output(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn chatbot_lifecycle() {
        let backend = MemoryBackend::default();
        let mut out = Vec::new();

        chatbots(
            &backend,
            ChatbotAction::Create {
                name: "Chef".into(),
                prompt: "You cook.".into(),
                description: "Kitchen help".into(),
                avatar: "🍳".into(),
            },
            &mut out,
        )
        .await
        .unwrap();
        chatbots(&backend, ChatbotAction::List, &mut out).await.unwrap();
        chatbots(&backend, ChatbotAction::Delete { id: "b1".into() }, &mut out)
            .await
            .unwrap();
        chatbots(&backend, ChatbotAction::List, &mut out).await.unwrap();

        assert_eq!(
            output(out),
            "✅ Created chatbot Chef (b1)\n🍳 b1  Chef\n    Kitchen help\n✅ Deleted chatbot b1\nNo chatbots yet. Create one with 'parlor chatbots create'.\n"
        );
    }

    #[tokio::test]
    async fn show_prints_transcript_and_totals() {
        let backend = MemoryBackend::default();
        let conversation = backend
            .create_conversation("Dinner", None)
            .await
            .unwrap();
        backend
            .insert_messages(&[
                crate::backend::NewMessage::user(&conversation.id, "What now?"),
                crate::backend::NewMessage::assistant(
                    &conversation.id,
                    "Soup.",
                    crate::core::message::TokenUsage::new(3, 1, 4),
                ),
            ])
            .await
            .unwrap();
        backend.conversations.lock().unwrap()[0] = Conversation {
            total_prompt_tokens: 3,
            total_completion_tokens: 1,
            total_tokens: 4,
            ..conversation.clone()
        };

        let mut out = Vec::new();
        conversations(
            &backend,
            ConversationAction::Show {
                id: conversation.id.clone(),
            },
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(
            output(out),
            "📂 Dinner\nYou: What now?\n🤖 Soup.\nTokens: 3 prompt + 1 completion = 4 total\n"
        );
    }

    #[tokio::test]
    async fn show_unknown_conversation_fails() {
        let backend = MemoryBackend::default();
        let mut out = Vec::new();
        let err = conversations(
            &backend,
            ConversationAction::Show { id: "zz".into() },
            &mut out,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "No conversation with id zz");
    }

    #[test]
    fn missing_timestamp_is_a_dash() {
        assert_eq!(timestamp(None), "-");
    }
}
