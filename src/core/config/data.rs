use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::persona::Persona;
use crate::core::providers::ProviderKind;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    0.9
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_output_tokens() -> u32 {
    2048
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// HTTP statuses treated as rate limiting
    #[serde(default = "default_rate_limit_statuses")]
    pub rate_limit_statuses: Vec<u16>,
    /// Substrings of upstream error messages treated as rate limiting
    #[serde(default = "default_rate_limit_markers")]
    pub rate_limit_markers: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_statuses: default_rate_limit_statuses(),
            rate_limit_markers: default_rate_limit_markers(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5000
}

fn default_rate_limit_statuses() -> Vec<u16> {
    vec![429]
}

fn default_rate_limit_markers() -> Vec<String> {
    vec![
        "429".to_string(),
        "Too Many Requests".to_string(),
        "quota".to_string(),
    ]
}

/// Hosted backend (PostgREST-style) used for conversations, chatbot profiles
/// and knowledge documents.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BackendSettings {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RagSettings {
    #[serde(default = "default_rag_enabled")]
    pub enabled: bool,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: u32,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: u32,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            enabled: default_rag_enabled(),
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            embedding_model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

fn default_rag_enabled() -> bool {
    true
}

fn default_match_threshold() -> f32 {
    0.5
}

fn default_match_count() -> u32 {
    5
}

fn default_embedding_model() -> String {
    "gemini-embedding-001".to_string()
}

fn default_dimensions() -> u32 {
    768
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Chat vendor ("gemini" or "openai")
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    /// Override for the vendor's API base URL
    pub base_url: Option<String>,
    /// Persona id (built-in, from `personas`, or a backend chatbot id)
    pub active_chatbot: Option<String>,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub rag: RagSettings,
    /// User-defined personas
    #[serde(default)]
    pub personas: Vec<Persona>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
