use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const LLM_API_KEY_ENV: &str = "MONARCH_LLM_API_KEY";
pub const API_KEY_ENV: &str = "MONARCH_API_KEY";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub facts: FactsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Author id the host uses for the bot's own messages.
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_max_responses")]
    pub max_responses_per_day: u32,
    #[serde(default = "default_true")]
    pub random_responses: bool,
    #[serde(default)]
    pub auto_learn_facts: bool,
    /// IANA zone whose midnight starts the king's day.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            bot_id: default_bot_id(),
            channel_name: default_channel_name(),
            max_responses_per_day: default_max_responses(),
            random_responses: true,
            auto_learn_facts: false,
            timezone: default_timezone(),
        }
    }
}

impl BotConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid [bot] timezone '{}': {e}", self.timezone))
    }
}

fn default_bot_name() -> String {
    "King Maximilian VII".to_string()
}

fn default_bot_id() -> String {
    "monarch".to_string()
}

fn default_channel_name() -> String {
    "royal-court".to_string()
}

fn default_max_responses() -> u32 {
    3
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggersConfig {
    #[serde(default = "default_trigger_words")]
    pub words: Vec<String>,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            words: default_trigger_words(),
        }
    }
}

fn default_trigger_words() -> Vec<String> {
    [
        "king",
        "monarch",
        "royal",
        "crown",
        "throne",
        "government",
        "democracy",
        "monarchy",
        "president",
        "dictator",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Optional; each provider has a default base URL.
    pub base_url: Option<String>,
    pub model: String,
    /// Falls back to `MONARCH_LLM_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Replies longer than this many characters are cut and get "...".
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
    /// "low" | "medium" | "high"; omitted disables the web search hint.
    #[serde(default)]
    pub web_search_context_size: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_temperature() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_response_length() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactsConfig {
    /// JSON file backing the fact index. Omitted keeps facts in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Facts at or above this cosine distance are never returned.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embeddings use the `[llm]` endpoint and key unless these are set.
    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub embedding_base_url: Option<String>,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            path: None,
            relevance_threshold: default_relevance_threshold(),
            result_limit: default_result_limit(),
            embedding_model: default_embedding_model(),
            embedding_provider: None,
            embedding_base_url: None,
            embedding_api_key: None,
        }
    }
}

fn default_relevance_threshold() -> f32 {
    0.8
}

fn default_result_limit() -> usize {
    3
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    /// Directory with one JSON file per group. Omitted keeps state in memory only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
    #[serde(default = "default_rotation")]
    pub rotation: Rotation,
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_name: default_log_file_name(),
            rotation: default_rotation(),
            backup_count: default_backup_count(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    default_base_dir().join("logs")
}

fn default_log_file_name() -> String {
    "monarch".to_string()
}

fn default_rotation() -> Rotation {
    Rotation::Daily
}

fn default_backup_count() -> usize {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    /// Falls back to `MONARCH_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            api_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".monarch")
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut config = parse(&content)?;

    if config.llm.api_key.is_none() {
        config.llm.api_key = std::env::var(LLM_API_KEY_ENV).ok();
    }
    if config.api.api_key.is_none() {
        config.api.api_key = std::env::var(API_KEY_ENV).ok();
    }
    config.bot.tz()?;
    Ok(config)
}

/// Fill unset env vars from a `.env` file: the given one, else the nearest
/// one found from the working directory up. Existing vars win.
pub fn load_dotenv(path: Option<&Path>) {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p).map(|()| p.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    if let Ok(p) = loaded {
        tracing::debug!("Loaded environment from {}", p.display());
    }
}

/// Parse config text and expand `~` in every path it carries.
pub fn parse(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    config.facts.path = config.facts.path.as_deref().map(expand_path);
    config.state.dir = config.state.dir.as_deref().map(expand_path);
    config.logging.directory = expand_path(&config.logging.directory);
    Ok(config)
}

pub async fn init_config_dir() -> Result<PathBuf> {
    let base = default_base_dir();
    for d in ["logs", "state"] {
        tokio::fs::create_dir_all(base.join(d)).await?;
    }

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        tokio::fs::write(&config_path, DEFAULT_CONFIG).await?;
    }
    Ok(base)
}

const DEFAULT_CONFIG: &str = r#"[bot]
name = "King Maximilian VII"
bot_id = "monarch"
channel_name = "royal-court"
max_responses_per_day = 3
random_responses = true
auto_learn_facts = false
timezone = "America/New_York"

[triggers]
words = [
    "king", "monarch", "royal", "crown", "throne",
    "government", "democracy", "monarchy", "president", "dictator",
]

[llm]
provider = "openai"
# base_url = "https://api.openai.com/v1"  # optional, uses provider default
model = "gpt-4o-mini"
# api_key = "YOUR_API_KEY"                # or set MONARCH_LLM_API_KEY
temperature = 1.0
max_tokens = 1024
max_response_length = 1000
# web_search_context_size = "low"

# Other provider examples:
# provider = "google"
# model = "gemini-2.5-flash"
#
# provider = "openrouter"
# model = "google/gemini-2.5-flash"

[facts]
path = "~/.monarch/facts.json"
relevance_threshold = 0.8
result_limit = 3
embedding_model = "text-embedding-3-small"
# embedding_provider = "openai"          # defaults to the [llm] endpoint
# embedding_api_key = "YOUR_API_KEY"     # defaults to the [llm] key

[state]
dir = "~/.monarch/state"

[logging]
directory = "~/.monarch/logs"
file_name = "monarch"
rotation = "daily"
backup_count = 7

[api]
bind = "127.0.0.1:3000"
# api_key = "YOUR_API_KEY"                # or set MONARCH_API_KEY
"#;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_tilde(s),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg = parse("[llm]\nmodel = \"gpt-4o-mini\"\n").unwrap();
        assert_eq!(cfg.bot.max_responses_per_day, 3);
        assert_eq!(cfg.bot.channel_name, "royal-court");
        assert!(cfg.bot.random_responses);
        assert!(!cfg.bot.auto_learn_facts);
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.facts.result_limit, 3);
        assert!(cfg.facts.path.is_none());
        assert!(cfg.state.dir.is_none());
        assert_eq!(cfg.logging.rotation, Rotation::Daily);
        assert!(cfg.triggers.words.iter().any(|w| w == "throne"));
    }

    #[test]
    fn test_default_config_template_parses() {
        let cfg = parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(cfg.bot.name, "King Maximilian VII");
        assert_eq!(cfg.logging.backup_count, 7);
        assert!(cfg.facts.path.is_some());
        assert!(!cfg.facts.path.unwrap().starts_with("~"));
        assert_eq!(cfg.bot.timezone, "America/New_York");
        // only secrets something reads are offered
        assert!(!DEFAULT_CONFIG.to_lowercase().contains("bot_token"));
    }

    #[test]
    fn test_rotation_names() {
        let cfg = parse("[llm]\nmodel = \"m\"\n[logging]\nrotation = \"hourly\"\n").unwrap();
        assert_eq!(cfg.logging.rotation, Rotation::Hourly);
        assert!(parse("[llm]\nmodel = \"m\"\n[logging]\nrotation = \"weekly\"\n").is_err());
    }

    #[test]
    fn test_timezone_defaults_to_eastern() {
        let cfg = parse("[llm]\nmodel = \"m\"\n").unwrap();
        assert_eq!(cfg.bot.tz().unwrap(), chrono_tz::America::New_York);
        assert_eq!(cfg.facts.embedding_model, "text-embedding-3-small");

        let cfg = parse("[llm]\nmodel = \"m\"\n[bot]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        assert!(cfg.bot.tz().is_err());
    }

    #[test]
    fn test_dotenv_file_fills_unset_vars_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "MONARCH_DOTENV_TEST_NEW=from-file\nPATH=should-not-win\n",
        )
        .unwrap();
        let path_before = std::env::var("PATH").unwrap();

        load_dotenv(Some(&path));

        assert_eq!(std::env::var("MONARCH_DOTENV_TEST_NEW").unwrap(), "from-file");
        assert_eq!(std::env::var("PATH").unwrap(), path_before);
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/monarch.toml"), PathBuf::from("/etc/monarch.toml"));
        assert_eq!(expand_tilde("relative/x"), PathBuf::from("relative/x"));
    }
}
