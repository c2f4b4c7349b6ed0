use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::Url;
use serde::Deserialize;

use crate::chatbot::completion::{DEFAULT_API_BASE_URL, GenerationSettings, VoiceSettings};
use crate::chatbot::engine::{default_comparison_models, default_model_aliases};
use crate::chatbot::history::MAX_HISTORY_LENGTH;
use crate::chatbot::profile::ModeProfile;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An environment variable could not be parsed.
    InvalidEnv { name: String, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidEnv { name, value } => {
                write!(f, "invalid value for {}: '{}'", name, value)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidEnv { .. } | Self::Validation(_) => None,
        }
    }
}

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 45;
const MAX_COMPARISON_MODELS: usize = 26;

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    /// OpenAI-compatible endpoint, e.g. a proxy.
    api_base_url: Option<String>,
    port: Option<u16>,
    /// Externally reachable base URL. Setting it switches to webhook delivery.
    public_url: Option<String>,
    webhook_secret: Option<String>,
    default_model: Option<String>,
    /// `/model` aliases, alias -> model id.
    models: Option<BTreeMap<String, String>>,
    #[serde(default)]
    comparison_models: Vec<String>,
    /// Personal-mode users keyed by Telegram user id.
    #[serde(default)]
    personal_users: HashMap<i64, ModeProfile>,
    history_length: Option<usize>,
    completion_timeout_secs: Option<u64>,
    #[serde(default)]
    generation: GenerationSettings,
    #[serde(default)]
    voice: VoiceSettings,
    /// Directory for logs, reports and the history database.
    data_dir: Option<String>,
    #[serde(default)]
    persist_history: bool,
}

pub struct Config {
    /// Path to the config file, if one was used.
    pub config_path: Option<PathBuf>,
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub api_base_url: String,
    pub port: u16,
    /// Set in webhook mode.
    pub public_url: Option<Url>,
    pub webhook_secret: Option<String>,
    pub default_model: String,
    pub model_aliases: Vec<(String, String)>,
    pub comparison_models: Vec<String>,
    pub personal_users: HashMap<i64, ModeProfile>,
    pub history_length: usize,
    pub completion_timeout: Duration,
    pub generation: GenerationSettings,
    pub voice: VoiceSettings,
    pub data_dir: Option<PathBuf>,
    pub persist_history: bool,
}

impl Config {
    /// Load from a JSON file, with process environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(Some(path.as_ref()), |name| std::env::var(name).ok())
    }

    /// Configure from the process environment alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_with_env(None, |name| std::env::var(name).ok())
    }

    /// Load with an explicit environment lookup. Empty variables are ignored.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
                serde_json::from_str(&content)
                    .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })?
            }
            None => ConfigFile::default(),
        };

        let env = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = env("TELEGRAM_BOT_TOKEN") {
            file.telegram_bot_token = token;
        }
        if let Some(key) = env("OPENAI_API_KEY") {
            file.openai_api_key = key;
        }
        if let Some(port) = env("PORT") {
            let parsed = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidEnv { name: "PORT".into(), value: port.clone() })?;
            file.port = Some(parsed);
        }
        if let Some(url) = env("PUBLIC_URL").or_else(|| env("RENDER_EXTERNAL_URL")) {
            file.public_url = Some(url);
        }
        if let Some(secret) = env("WEBHOOK_SECRET") {
            file.webhook_secret = Some(secret);
        }

        Self::validate(file, path.map(Path::to_path_buf))
    }

    fn validate(file: ConfigFile, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token is required (or set TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.openai_api_key.is_empty() {
            return Err(ConfigError::Validation(
                "openai_api_key is required (or set OPENAI_API_KEY)".into(),
            ));
        }

        let comparison_models = if file.comparison_models.is_empty() {
            default_comparison_models()
        } else {
            file.comparison_models
        };
        if comparison_models.len() < 2 || comparison_models.len() > MAX_COMPARISON_MODELS {
            return Err(ConfigError::Validation(format!(
                "comparison_models must list between 2 and {} models",
                MAX_COMPARISON_MODELS
            )));
        }

        let history_length = file.history_length.unwrap_or(MAX_HISTORY_LENGTH);
        if history_length == 0 {
            return Err(ConfigError::Validation("history_length must be at least 1".into()));
        }

        let timeout_secs = file.completion_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Validation("completion_timeout_secs must be at least 1".into()));
        }

        let public_url = file.public_url.as_deref().map(parse_public_url).transpose()?;

        let webhook_secret = match (&public_url, file.webhook_secret) {
            (_, Some(secret)) => {
                validate_secret(&secret)?;
                Some(secret)
            }
            (Some(_), None) => Some(generate_secret()),
            (None, None) => None,
        };

        let model_aliases = match file.models {
            Some(models) if !models.is_empty() => models
                .into_iter()
                .map(|(alias, model)| (alias.to_lowercase(), model))
                .collect(),
            _ => default_model_aliases(),
        };

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            api_base_url: file.api_base_url.unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            port: file.port.unwrap_or(DEFAULT_PORT),
            public_url,
            webhook_secret,
            default_model: file.default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_aliases,
            comparison_models,
            personal_users: file.personal_users,
            history_length,
            completion_timeout: Duration::from_secs(timeout_secs),
            generation: file.generation,
            voice: file.voice,
            data_dir: file.data_dir.map(PathBuf::from),
            persist_history: file.persist_history,
        })
    }

    pub fn webhook_mode(&self) -> bool {
        self.public_url.is_some()
    }

    /// `<public_url>/webhook`, the address registered with Telegram.
    pub fn webhook_url(&self) -> Option<Url> {
        self.public_url.as_ref().and_then(|base| base.join("webhook").ok())
    }

    pub fn reports_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("reports"))
    }

    /// SQLite file backing history, when persistence is on.
    pub fn history_db_path(&self) -> Option<PathBuf> {
        if !self.persist_history {
            return None;
        }
        Some(
            self.data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("history.db"),
        )
    }
}

fn parse_public_url(raw: &str) -> Result<Url, ConfigError> {
    // A trailing slash makes `join` append instead of replacing the last segment.
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    let url = Url::parse(&normalized)
        .map_err(|e| ConfigError::Validation(format!("public_url '{}' is not a valid URL: {}", raw, e)))?;
    if url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "public_url '{}' must use https for Telegram webhooks",
            raw
        )));
    }
    Ok(url)
}

/// Telegram accepts 1-256 chars of `A-Z a-z 0-9 _ -`.
fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    let valid_chars = secret
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if secret.is_empty() || secret.len() > 256 || !valid_chars {
        return Err(ConfigError::Validation(
            "webhook_secret must be 1-256 characters of A-Z, a-z, 0-9, _ or -".into(),
        ));
    }
    Ok(())
}

fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn load(file: &NamedTempFile) -> Result<Config, ConfigError> {
        Config::load_with_env(Some(file.path()), no_env)
    }

    #[test]
    fn test_valid_config_defaults() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk-test" }}"#
        ));
        let config = load(&file).expect("should load valid config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.history_length, 10);
        assert_eq!(config.completion_timeout, Duration::from_secs(45));
        assert_eq!(config.comparison_models.len(), 3);
        assert_eq!(config.model_aliases.len(), 6);
        assert_eq!(config.generation, GenerationSettings::default());
        assert!(!config.webhook_mode());
        assert!(config.webhook_secret.is_none());
        assert!(config.history_db_path().is_none());
    }

    #[test]
    fn test_personal_users_and_overrides() {
        let file = write_config(&format!(
            r#"{{
                "telegram_bot_token": "{TOKEN}",
                "openai_api_key": "sk-test",
                "personal_users": {{
                    "339651126": {{ "name": "Sam", "context": "- Works nights", "model": "gpt-4.1" }}
                }},
                "models": {{ "Mini": "gpt-4o-mini", "big": "gpt-4.1" }},
                "comparison_models": ["a", "b"],
                "generation": {{ "temperature": 0.5 }},
                "data_dir": "/var/lib/mindmate",
                "persist_history": true
            }}"#
        ));
        let config = load(&file).unwrap();

        let profile = &config.personal_users[&339651126];
        assert_eq!(profile.model.as_deref(), Some("gpt-4.1"));
        // keys are lowercased after ordering, so "Mini" sorts first
        assert_eq!(config.model_aliases[0], ("mini".to_string(), "gpt-4o-mini".to_string()));
        assert_eq!(config.model_aliases[1].0, "big");
        assert_eq!(config.comparison_models, vec!["a", "b"]);
        assert_eq!(config.generation.temperature, 0.5);
        assert_eq!(config.generation.max_tokens, 600);
        assert_eq!(
            config.history_db_path(),
            Some(PathBuf::from("/var/lib/mindmate/history.db"))
        );
        assert_eq!(
            config.reports_dir(),
            Some(PathBuf::from("/var/lib/mindmate/reports"))
        );
    }

    #[test]
    fn test_env_only() {
        let env = |name: &str| match name {
            "TELEGRAM_BOT_TOKEN" => Some(TOKEN.to_string()),
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "PORT" => Some("8080".to_string()),
            "RENDER_EXTERNAL_URL" => Some("https://mindmate.example.com".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(None, env).unwrap();

        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.port, 8080);
        assert!(config.webhook_mode());
        assert_eq!(
            config.webhook_url().unwrap().as_str(),
            "https://mindmate.example.com/webhook"
        );
        // generated when webhook mode has no explicit secret
        assert_eq!(config.webhook_secret.as_ref().map(String::len), Some(32));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk-file", "port": 9000 }}"#
        ));
        let env = |name: &str| match name {
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "PORT" => Some("   ".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(Some(file.path()), env).unwrap();
        assert_eq!(config.openai_api_key, "sk-env");
        // blank variables are ignored
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_public_url_with_path() {
        let env = |name: &str| match name {
            "TELEGRAM_BOT_TOKEN" => Some(TOKEN.to_string()),
            "OPENAI_API_KEY" => Some("sk".to_string()),
            "PUBLIC_URL" => Some("https://example.com/bots/mindmate/".to_string()),
            "WEBHOOK_SECRET" => Some("s3cret_token-1".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(None, env).unwrap();
        assert_eq!(
            config.webhook_url().unwrap().as_str(),
            "https://example.com/bots/mindmate/webhook"
        );
        assert_eq!(config.webhook_secret.as_deref(), Some("s3cret_token-1"));
    }

    #[test]
    fn test_invalid_port_env() {
        let env = |name: &str| match name {
            "TELEGRAM_BOT_TOKEN" => Some(TOKEN.to_string()),
            "OPENAI_API_KEY" => Some("sk".to_string()),
            "PORT" => Some("eighty".to_string()),
            _ => None,
        };
        let err = assert_err(Config::load_with_env(None, env));
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_missing_token() {
        let err = assert_err(Config::load_with_env(None, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_missing_api_key() {
        let file = write_config(&format!(r#"{{ "telegram_bot_token": "{TOKEN}" }}"#));
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("openai_api_key"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{
            "telegram_bot_token": "invalid_token_no_colon",
            "openai_api_key": "sk"
        }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "openai_api_key": "sk"
        }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:",
            "openai_api_key": "sk"
        }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_single_comparison_model_rejected() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk", "comparison_models": ["only"] }}"#
        ));
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("comparison_models"));
    }

    #[test]
    fn test_zero_history_rejected() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk", "history_length": 0 }}"#
        ));
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("history_length"));
    }

    #[test]
    fn test_plain_http_public_url_rejected() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk", "public_url": "http://insecure.example" }}"#
        ));
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_bad_webhook_secret() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "openai_api_key": "sk", "webhook_secret": "has spaces" }}"#
        ));
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("webhook_secret"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load_with_env(
            Some(Path::new("/nonexistent/path/config.json")),
            no_env,
        ));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
