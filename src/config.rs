use std::env;
use std::path::PathBuf;
use tokio::time::Duration;

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Settings for the reader service that turns a URL into article text.
#[derive(Clone, Debug)]
pub struct ReaderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl ReaderSettings {
    pub fn from_env() -> Self {
        let api_key = env::var("READER_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        ReaderSettings {
            base_url: env_or("READER_BASE_URL", "https://r.jina.ai"),
            api_key,
            timeout: Duration::from_secs(env_parse("READER_TIMEOUT", 20)),
            max_retries: env_parse("READER_MAX_RETRIES", 3),
        }
    }
}

/// Settings for the chat-completions endpoint backing classification and extraction.
#[derive(Clone, Debug)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_env() -> Self {
        CompletionSettings {
            base_url: env_or("COMPLETIONS_BASE_URL", "https://openrouter.ai/api/v1"),
            api_key: env_or("COMPLETIONS_API_KEY", ""),
            model: env_or("COMPLETIONS_MODEL", "anthropic/claude-3.5-sonnet"),
            temperature: env_parse("COMPLETIONS_TEMPERATURE", 0.0),
            timeout: Duration::from_secs(env_parse("COMPLETIONS_TIMEOUT", 30)),
        }
    }
}

/// Aggregated application settings.
#[derive(Clone, Debug)]
pub struct AppSettings {
    pub reader: ReaderSettings,
    pub completions: CompletionSettings,
    pub output_dir: PathBuf,
    pub database_path: String,
}

impl AppSettings {
    pub fn from_env() -> Self {
        AppSettings {
            reader: ReaderSettings::from_env(),
            completions: CompletionSettings::from_env(),
            output_dir: PathBuf::from(env_or("CURATOR_OUTPUT_DIR", "./output")),
            database_path: env_or("DATABASE_PATH", "./data/curator_tasks.db"),
        }
    }
}
