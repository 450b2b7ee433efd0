use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use olive_core::retrieval::DEFAULT_TOP_K;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub typewriter: TypewriterSettings,
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_live_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_live_timeout")]
    pub timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_live_endpoint(),
            timeout_secs: default_live_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_live_endpoint() -> String {
    "https://api.duckduckgo.com/".to_string()
}
fn default_live_timeout() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_kind() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_provider_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_no_token_timeout_ms")]
    pub no_token_timeout_ms: u64,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_mood")]
    pub default_mood: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            no_token_timeout_ms: default_no_token_timeout_ms(),
            default_model: default_model(),
            default_mood: default_mood(),
            history_limit: default_history_limit(),
            persona: default_persona(),
        }
    }
}

impl ChatConfig {
    pub fn no_token_timeout(&self) -> Duration {
        Duration::from_millis(self.no_token_timeout_ms)
    }
}

fn default_no_token_timeout_ms() -> u64 {
    18_000
}
fn default_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_mood() -> String {
    "Netral".to_string()
}
fn default_history_limit() -> i64 {
    5
}
fn default_persona() -> String {
    "You are Olive, a friendly, cheerful and very helpful assistant. \
     Answer in the user's language and format responses as Markdown."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TypewriterSettings {
    #[serde(default = "default_slice_chars")]
    pub slice_chars: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for TypewriterSettings {
    fn default() -> Self {
        Self {
            slice_chars: default_slice_chars(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_slice_chars() -> usize {
    3
}
fn default_tick_ms() -> u64 {
    14
}

fn default_models() -> BTreeMap<String, String> {
    [
        ("gpt-4.1-nano", "Olive-4.1 Nano"),
        ("gpt-4o-mini", "Olive-4o Mini"),
        ("gpt-3.5-turbo", "Olive-3.5 Turbo"),
    ]
    .into_iter()
    .map(|(id, label)| (id.to_string(), label.to_string()))
    .collect()
}

impl Config {
    /// Configuration used when no config file is available.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/olive.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:3000".to_string(),
            },
            retrieval: RetrievalConfig::default(),
            live: LiveConfig::default(),
            provider: ProviderConfig::default(),
            chat: ChatConfig::default(),
            typewriter: TypewriterSettings::default(),
            models: default_models(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.chat.no_token_timeout_ms == 0 {
        anyhow::bail!("chat.no_token_timeout_ms must be > 0");
    }

    if config.typewriter.slice_chars == 0 {
        anyhow::bail!("typewriter.slice_chars must be >= 1");
    }
    if config.typewriter.tick_ms == 0 {
        anyhow::bail!("typewriter.tick_ms must be >= 1");
    }

    match config.provider.kind.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown provider kind: '{}'. Must be openai or ollama.",
            other
        ),
    }

    Ok(())
}
