//! Shared startup for the commands that talk to a vendor or the backend.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::rest::RestBackend;
use crate::backend::{Backend, BackendError};
use crate::core::config::Config;
use crate::core::persona::{Persona, PersonaRegistry};
use crate::core::providers::{
    resolve_session, ProviderKind, ProviderResolutionError, ProviderSession, SystemCredentials,
};
use crate::rag::{GeminiEmbedder, KnowledgeRag};
use crate::utils::logging::TranscriptLog;

/// Values from the global command-line flags.
#[derive(Debug, Default, Clone)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub chatbot: Option<String>,
    pub log: Option<String>,
    pub env_only: bool,
}

impl GlobalOptions {
    pub fn config_file(&self) -> Result<PathBuf, Box<dyn Error>> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::config_path()?),
        }
    }

    pub fn load_config(&self) -> Result<Config, Box<dyn Error>> {
        Config::load_from_path(&self.config_file()?)
    }

    pub fn provider_kind(&self) -> Result<Option<ProviderKind>, Box<dyn Error>> {
        match self.provider.as_deref() {
            None => Ok(None),
            Some(raw) => Ok(Some(raw.parse::<ProviderKind>()?)),
        }
    }

    pub fn chatbot_id<'a>(&'a self, config: &'a Config) -> Option<&'a str> {
        self.chatbot
            .as_deref()
            .or(config.active_chatbot.as_deref())
    }
}

/// Print a resolution failure with its quick fixes and exit with its code.
pub fn exit_with_resolution_error(err: ProviderResolutionError) -> ! {
    eprintln!("{err}");
    let fixes = err.quick_fixes();
    if !fixes.is_empty() {
        eprintln!();
        eprintln!("💡 Quick fixes:");
        for fix in fixes {
            eprintln!("  • {fix}");
        }
    }
    std::process::exit(err.exit_code());
}

pub fn resolve_provider(
    options: &GlobalOptions,
    config: &Config,
) -> Result<ProviderSession, Box<dyn Error>> {
    let credentials = SystemCredentials::new(!options.env_only);
    match resolve_session(
        config,
        &credentials,
        options.provider_kind()?,
        options.model.as_deref(),
    ) {
        Ok(session) => Ok(session),
        Err(err) => exit_with_resolution_error(err),
    }
}

/// The hosted backend, or `None` when it is not configured.
pub fn connect_backend(client: &reqwest::Client, config: &Config) -> Option<Arc<dyn Backend>> {
    match RestBackend::from_settings(client.clone(), &config.backend) {
        Ok(backend) => Some(Arc::new(backend)),
        Err(BackendError::NotConfigured) => None,
        Err(err) => {
            tracing::warn!(error = %err, "backend unavailable");
            None
        }
    }
}

pub fn require_backend(
    client: &reqwest::Client,
    config: &Config,
) -> Result<Arc<dyn Backend>, Box<dyn Error>> {
    connect_backend(client, config).ok_or_else(|| Box::new(BackendError::NotConfigured) as Box<dyn Error>)
}

/// Resolve the persona for `id`: configured and built-in personas first, then
/// chatbot profiles stored in the backend.
pub async fn resolve_persona(
    config: &Config,
    backend: Option<&Arc<dyn Backend>>,
    id: Option<&str>,
) -> Persona {
    let registry = PersonaRegistry::new(&config.personas);
    let Some(id) = id else {
        return registry.resolve(None);
    };
    if let Some(persona) = registry.find(id) {
        return persona.clone();
    }
    if let Some(backend) = backend {
        match backend.list_chatbots().await {
            Ok(chatbots) => {
                if let Some(chatbot) = chatbots.into_iter().find(|c| c.id == id) {
                    return chatbot.to_persona();
                }
                tracing::warn!(chatbot = id, "no chatbot with this id; using the default persona");
            }
            Err(err) => tracing::warn!(error = %err, "could not load chatbot profiles"),
        }
    }
    registry.resolve(None)
}

/// The persona's id when it is a chatbot profile stored in the backend.
pub fn stored_chatbot_id(config: &Config, persona: &Persona) -> Option<String> {
    let registry = PersonaRegistry::new(&config.personas);
    registry
        .find(&persona.id)
        .is_none()
        .then(|| persona.id.clone())
}

/// A Gemini key for embeddings, regardless of the chat vendor.
pub fn embedding_key(options: &GlobalOptions, config: &Config) -> Option<ProviderSession> {
    let credentials = SystemCredentials::new(!options.env_only);
    resolve_session(config, &credentials, Some(ProviderKind::Gemini), None).ok()
}

/// Knowledge retrieval for a stored chatbot, when everything it needs is set up.
pub fn build_rag(
    client: &reqwest::Client,
    options: &GlobalOptions,
    config: &Config,
    backend: Option<&Arc<dyn Backend>>,
    chatbot_id: Option<&str>,
) -> Option<Arc<KnowledgeRag>> {
    if !config.rag.enabled {
        return None;
    }
    let backend = backend?;
    let chatbot_id = chatbot_id?;
    let Some(gemini) = embedding_key(options, config) else {
        tracing::info!("no Gemini key available; knowledge retrieval disabled");
        return None;
    };
    let embedder = GeminiEmbedder::new(client.clone(), gemini.base_url, gemini.api_key, &config.rag);
    Some(Arc::new(KnowledgeRag::new(
        backend.clone(),
        Arc::new(embedder),
        chatbot_id,
        &config.rag,
    )))
}

/// The `--log` transcript, opened up front so a bad path fails before chatting.
pub fn open_transcript(options: &GlobalOptions) -> Result<Option<Arc<TranscriptLog>>, Box<dyn Error>> {
    match &options.log {
        Some(path) => Ok(Some(Arc::new(TranscriptLog::open(path, "You")?))),
        None => Ok(None),
    }
}

pub fn read_text_file(path: &Path) -> Result<String, Box<dyn Error>> {
    std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {err}", path.display()).into())
}
