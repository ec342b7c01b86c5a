//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod auth;
pub mod chat;
pub mod manage;
pub mod render;
pub mod say;
pub mod setup;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cli::manage::{ChatbotAction, ConversationAction};
use crate::cli::setup::GlobalOptions;
use crate::core::config::Config;
use crate::core::providers::ProviderKind;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\nrustc: ",
    env!("VERGEN_RUSTC_SEMVER"),
);

#[derive(Parser)]
#[command(name = "parlor")]
#[command(version = env!("CARGO_PKG_VERSION"), long_version = LONG_VERSION)]
#[command(about = "A persona-driven streaming chat client")]
#[command(
    long_about = "Parlor is a line-based chat client that streams replies from Gemini or any \
OpenAI-compatible API. Each conversation runs as a persona with its own system prompt and \
greetings; rate-limited requests are retried with growing delays.\n\n\
Authentication:\n\
  Use 'parlor auth gemini' or 'parlor auth openai' to store a key in the system keyring.\n\n\
Environment Variables:\n\
  GEMINI_API_KEY / OPENAI_API_KEY   Vendor keys (take precedence over the keyring)\n\
  PARLOR_API_KEY                    Key for whichever vendor is selected\n\
  PARLOR_BACKEND_URL                Hosted backend project URL\n\
  PARLOR_BACKEND_KEY                Hosted backend API key\n\
  RUST_LOG                          Log filter (e.g. 'parlor=debug')\n\n\
Commands in chat:\n\
  /new              Start a new conversation\n\
  /clear            Clear and greet again\n\
  /attach <path>    Attach a file to the next message\n\
  /resume <id>      Continue a stored conversation\n\
  /usage            Show token usage\n\
  /quit             Leave"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Vendor to use ("gemini" or "openai")
    #[arg(short = 'p', long, global = true)]
    pub provider: Option<String>,

    /// Model to use for chat
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// Persona or stored chatbot id
    #[arg(short = 'c', long, global = true)]
    pub chatbot: Option<String>,

    /// Append a plain-text transcript to this file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only use API keys from the environment, never the keyring
    #[arg(long, global = true)]
    pub env: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat interface (default)
    Chat,
    /// Send one message and print the reply
    Say {
        /// Attach a file to the message
        #[arg(short = 'a', long)]
        attach: Option<PathBuf>,
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Store an API key in the system keyring
    Auth {
        /// "gemini" (default) or "openai"
        provider: Option<String>,
    },
    /// Remove a stored API key
    Deauth { provider: Option<String> },
    /// Manage chatbot profiles in the backend
    Chatbots {
        #[command(subcommand)]
        action: ChatbotAction,
    },
    /// Browse stored conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
    /// Add text files to a chatbot's knowledge documents
    Ingest {
        /// Title for the document (single file only; defaults to the file name)
        #[arg(short = 't', long)]
        title: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the current configuration
    Config,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

impl Args {
    fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            config_path: self.config.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            chatbot: self.chatbot.clone(),
            log: self.log.clone(),
            env_only: self.env,
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

/// Diagnostics go to stderr, quiet unless `RUST_LOG` asks for more.
fn init_tracing() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let options = args.global_options();

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat::run_chat(&options).await,
        Commands::Say { attach, prompt } => say::run_say(&options, prompt, attach).await,
        Commands::Auth { provider } => {
            if let Err(e) = auth::run_auth(provider) {
                eprintln!("❌ Authentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Deauth { provider } => {
            if let Err(e) = auth::run_deauth(provider) {
                eprintln!("❌ Deauthentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Chatbots { action } => manage::run_chatbots(&options, action).await,
        Commands::Conversations { action } => {
            manage::run_conversations(&options, action).await
        }
        Commands::Ingest { title, files } => {
            manage::run_ingest(&options, title, files).await
        }
        Commands::Config => {
            let config = options.load_config()?;
            println!("Config file: {}", crate::core::config::data::path_display(options.config_file()?));
            config.print_all();
            Ok(())
        }
        Commands::Set { key, value } => {
            let path = options.config_file()?;
            let mut config = Config::load_from_path(&path)?;
            let value = value.join(" ");
            if value.trim().is_empty() {
                config.print_all();
                return Ok(());
            }
            match apply_set(&mut config, &key, value.trim()) {
                Ok(message) => {
                    config.save_to_path(&path)?;
                    println!("✅ {message}");
                }
                Err(message) => {
                    eprintln!("❌ {message}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Unset { key } => {
            let path = options.config_file()?;
            let mut config = Config::load_from_path(&path)?;
            match apply_unset(&mut config, &key) {
                Ok(message) => {
                    config.save_to_path(&path)?;
                    println!("✅ {message}");
                }
                Err(message) => {
                    eprintln!("❌ {message}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}

const CONFIG_KEYS: &str = "provider, model, base-url, chatbot, backend-url, backend-key, rag";

fn apply_set(config: &mut Config, key: &str, value: &str) -> Result<String, String> {
    match key {
        "provider" => {
            let kind = value.parse::<ProviderKind>()?;
            config.provider = Some(kind);
            Ok(format!("Set provider to: {kind}"))
        }
        "model" => {
            config.model = Some(value.to_string());
            Ok(format!("Set model to: {value}"))
        }
        "base-url" => {
            config.base_url = Some(value.to_string());
            Ok(format!("Set base-url to: {value}"))
        }
        "chatbot" => {
            config.active_chatbot = Some(value.to_string());
            Ok(format!("Set chatbot to: {value}"))
        }
        "backend-url" => {
            config.backend.url = Some(value.to_string());
            Ok(format!("Set backend-url to: {value}"))
        }
        "backend-key" => {
            config.backend.anon_key = Some(value.to_string());
            Ok("Set backend-key".to_string())
        }
        "rag" => {
            config.rag.enabled = match value {
                "on" | "true" | "yes" => true,
                "off" | "false" | "no" => false,
                other => return Err(format!("Expected 'on' or 'off' for rag, got '{other}'")),
            };
            Ok(format!("Set rag to: {value}"))
        }
        _ => Err(format!("Unknown config key: {key} (expected one of: {CONFIG_KEYS})")),
    }
}

fn apply_unset(config: &mut Config, key: &str) -> Result<String, String> {
    match key {
        "provider" => config.provider = None,
        "model" => config.model = None,
        "base-url" => config.base_url = None,
        "chatbot" => config.active_chatbot = None,
        "backend-url" => config.backend.url = None,
        "backend-key" => config.backend.anon_key = None,
        "rag" => config.rag.enabled = true,
        _ => return Err(format!("Unknown config key: {key} (expected one of: {CONFIG_KEYS})")),
    }
    Ok(format!("Unset {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_is_the_default_command() {
        let args = Args::try_parse_from(["parlor"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let args =
            Args::try_parse_from(["parlor", "say", "-p", "openai", "-m", "gpt-4o", "hi", "there"])
                .unwrap();
        let options = args.global_options();
        assert_eq!(options.provider.as_deref(), Some("openai"));
        assert_eq!(options.model.as_deref(), Some("gpt-4o"));
        match args.command {
            Some(Commands::Say { prompt, attach }) => {
                assert_eq!(prompt, vec!["hi", "there"]);
                assert!(attach.is_none());
            }
            _ => panic!("expected say"),
        }
    }

    #[test]
    fn ingest_requires_files() {
        assert!(Args::try_parse_from(["parlor", "ingest"]).is_err());
        let args = Args::try_parse_from(["parlor", "ingest", "-c", "b1", "notes.md"]).unwrap();
        assert_eq!(args.chatbot.as_deref(), Some("b1"));
    }

    #[test]
    fn set_and_unset_known_keys() {
        let mut config = Config::default();
        assert_eq!(
            apply_set(&mut config, "provider", "openai").unwrap(),
            "Set provider to: openai"
        );
        assert_eq!(config.provider, Some(ProviderKind::OpenAi));

        apply_set(&mut config, "rag", "off").unwrap();
        assert!(!config.rag.enabled);
        assert!(apply_set(&mut config, "rag", "maybe").is_err());

        apply_set(&mut config, "chatbot", "b1").unwrap();
        apply_unset(&mut config, "chatbot").unwrap();
        assert_eq!(config.active_chatbot, None);

        assert!(apply_set(&mut config, "colour", "blue")
            .unwrap_err()
            .starts_with("Unknown config key: colour"));
        assert!(apply_unset(&mut config, "colour").is_err());
    }

    #[test]
    fn set_persists_through_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        apply_set(&mut config, "model", "gemini-2.5-pro").unwrap();
        config.save_to_path(&path).unwrap();

        let reloaded = Config::load_from_path(&path).unwrap();
        assert_eq!(reloaded.model.as_deref(), Some("gemini-2.5-pro"));
    }
}
