use crate::core::config::Config;
use crate::core::keyring::KeyringAccessError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

const PLACEHOLDER_API_KEY: &str = "your_api_key_here";
pub const GENERIC_API_KEY_ENV: &str = "PARLOR_API_KEY";
const QUICK_FIXES: &[&str] = &[
    "parlor auth gemini              # Store a key in the system keyring",
    "export GEMINI_API_KEY=...       # Use an environment variable",
    "parlor set provider openai      # Switch to an OpenAI-compatible API",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Google Gemini",
            ProviderKind::OpenAi => "OpenAI-compatible",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAi),
            other => Err(format!(
                "unknown provider '{other}' (expected 'gemini' or 'openai')"
            )),
        }
    }
}

/// Everything a transport needs to reach the vendor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSession {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug)]
pub struct ProviderResolutionError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ProviderResolutionError {
    pub fn missing_credential(kind: ProviderKind) -> Self {
        Self::new(
            format!(
                "❌ No API key configured for {}\n\nPlease either:\n1. Run 'parlor auth {}' to store a key, or\n2. Set {} (or {}) in the environment",
                kind.display_name(),
                kind.id(),
                kind.api_key_env(),
                GENERIC_API_KEY_ENV,
            ),
            QUICK_FIXES,
            2,
        )
    }

    pub fn keyring_unavailable(kind: ProviderKind, err: &KeyringAccessError) -> Self {
        Self::new(
            format!(
                "❌ Could not read the {} API key from the system keyring: {err}",
                kind.display_name()
            ),
            QUICK_FIXES,
            if err.is_recoverable() { 75 } else { 1 },
        )
    }

    fn new(
        message: impl Into<String>,
        quick_fixes: &'static [&'static str],
        exit_code: i32,
    ) -> Self {
        Self {
            message: message.into(),
            quick_fixes,
            exit_code,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ProviderResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProviderResolutionError {}

/// Where API keys come from. The real implementation reads the environment
/// and then the system keyring; tests substitute a fixed map.
pub trait CredentialSource {
    fn env_var(&self, name: &str) -> Option<String>;
    fn stored_key(&self, kind: ProviderKind) -> Result<Option<String>, KeyringAccessError>;
}

pub struct SystemCredentials {
    use_keyring: bool,
}

impl SystemCredentials {
    pub fn new(use_keyring: bool) -> Self {
        Self { use_keyring }
    }
}

impl CredentialSource for SystemCredentials {
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn stored_key(&self, kind: ProviderKind) -> Result<Option<String>, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(None);
        }
        crate::core::keyring::load_api_key(kind)
    }
}

fn usable(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY)
}

/// Resolve the vendor, model, base URL and credential for a chat session.
///
/// Precedence for the key: the vendor-specific environment variable, then
/// `PARLOR_API_KEY`, then the keyring. The placeholder key counts as missing.
pub fn resolve_session(
    config: &Config,
    credentials: &dyn CredentialSource,
    provider_override: Option<ProviderKind>,
    model_override: Option<&str>,
) -> Result<ProviderSession, ProviderResolutionError> {
    let kind = provider_override.or(config.provider).unwrap_or_default();

    let api_key = match usable(credentials.env_var(kind.api_key_env()))
        .or_else(|| usable(credentials.env_var(GENERIC_API_KEY_ENV)))
    {
        Some(key) => key,
        None => match credentials.stored_key(kind) {
            Ok(key) => usable(key).ok_or_else(|| ProviderResolutionError::missing_credential(kind))?,
            Err(err) => {
                tracing::warn!("keyring lookup failed: {err}");
                return Err(ProviderResolutionError::keyring_unavailable(kind, &err));
            }
        },
    };

    // A base URL or model configured for the other vendor would be wrong here.
    let configured_for_kind = provider_override.is_none() || config.provider == Some(kind);
    let base_url = config
        .base_url
        .clone()
        .filter(|_| configured_for_kind)
        .unwrap_or_else(|| kind.default_base_url().to_string());
    let model = model_override
        .map(str::to_string)
        .or_else(|| config.model.clone().filter(|_| configured_for_kind))
        .unwrap_or_else(|| kind.default_model().to_string());

    Ok(ProviderSession {
        kind,
        api_key,
        base_url,
        model,
    })
}
