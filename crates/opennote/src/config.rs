//! Process configuration, read from the environment (and `.env` when present).

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Default Pinecone (legacy, pod-based) host layout.
pub const DEFAULT_PINECONE_HOST_TEMPLATE: &str = "https://{index}-{project}.svc.{environment}.pinecone.io";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub pinecone_host_template: String,
    pub session_idle_seconds: u64,
    pub session_sweep_seconds: u64,
    pub transcript_char_budget: usize,
    pub provider_timeout_seconds: u64,
    pub profile_db_path: String,
    pub identity_directory_url: Option<String>,
    pub identity_allowlist: Vec<String>,
    pub cors_allowed_origins: Vec<String>,
}

/// Knobs consumed by the session store, the sweeper and the conversation engine.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_window: Duration,
    pub sweep_interval: Duration,
    pub transcript_char_budget: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            transcript_char_budget: 4097,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 3323,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            pinecone_host_template: DEFAULT_PINECONE_HOST_TEMPLATE.to_string(),
            session_idle_seconds: 300,
            session_sweep_seconds: 60,
            transcript_char_budget: 4097,
            provider_timeout_seconds: 120,
            profile_db_path: "./data/profiles.db".to_string(),
            identity_directory_url: None,
            identity_allowlist: Vec::new(),
            cors_allowed_origins: vec![
                "http://localhost:3323".to_string(),
                "https://chat.openai.com".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        let config = Self {
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_var("API_PORT", defaults.api_port)?,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            chat_model: env::var("CHAT_MODEL").unwrap_or(defaults.chat_model),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            pinecone_host_template: env::var("PINECONE_HOST_TEMPLATE")
                .unwrap_or(defaults.pinecone_host_template),
            session_idle_seconds: parse_var("SESSION_IDLE_SECONDS", defaults.session_idle_seconds)?,
            session_sweep_seconds: parse_var("SESSION_SWEEP_SECONDS", defaults.session_sweep_seconds)?,
            transcript_char_budget: parse_var("TRANSCRIPT_CHAR_BUDGET", defaults.transcript_char_budget)?,
            provider_timeout_seconds: parse_var(
                "PROVIDER_TIMEOUT_SECONDS",
                defaults.provider_timeout_seconds,
            )?,
            profile_db_path: env::var("PROFILE_DB_PATH").unwrap_or(defaults.profile_db_path),
            identity_directory_url: env::var("IDENTITY_DIRECTORY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            identity_allowlist: env::var("IDENTITY_ALLOWLIST")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.cors_allowed_origins),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_idle_seconds == 0 {
            anyhow::bail!("SESSION_IDLE_SECONDS must be greater than zero");
        }
        if self.session_sweep_seconds == 0 {
            anyhow::bail!("SESSION_SWEEP_SECONDS must be greater than zero");
        }
        if self.transcript_char_budget == 0 {
            anyhow::bail!("TRANSCRIPT_CHAR_BUDGET must be greater than zero");
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_window: Duration::from_secs(self.session_idle_seconds),
            sweep_interval: Duration::from_secs(self.session_sweep_seconds),
            transcript_char_budget: self.transcript_char_budget,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Chat Provider: {} (model: {})", self.openai_base_url, self.chat_model);
        info!("- Embedding Model: {}", self.embedding_model);
        info!("- Vector Host Template: {}", self.pinecone_host_template);
        info!("- Session Idle Window: {}s", self.session_idle_seconds);
        info!("- Session Sweep Interval: {}s", self.session_sweep_seconds);
        info!("- Transcript Budget: {} chars", self.transcript_char_budget);
        info!("- Profile DB: {}", self.profile_db_path);
        match &self.identity_directory_url {
            Some(url) => info!("- Identity Directory: {}", url),
            None => info!("- Identity Allow-list: {} entries", self.identity_allowlist.len()),
        }
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Defaults =====

    #[test]
    fn test_default_session_settings_match_config_defaults() {
        let config = Config::default();
        let settings = config.session_settings();

        assert_eq!(settings.idle_window, Duration::from_secs(300));
        assert_eq!(settings.sweep_interval, Duration::from_secs(60));
        assert_eq!(settings.transcript_char_budget, 4097);

        let standalone = SessionSettings::default();
        assert_eq!(standalone.idle_window, settings.idle_window);
        assert_eq!(standalone.transcript_char_budget, settings.transcript_char_budget);
    }

    #[test]
    fn test_sweep_runs_more_often_than_idle_window() {
        let settings = Config::default().session_settings();
        assert!(settings.sweep_interval < settings.idle_window);
    }

    // ===== API Address Tests =====

    #[test]
    fn test_api_addr_parsing() {
        let config = Config::default();
        let addr = config.api_addr().unwrap();

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3323);
    }

    #[test]
    fn test_api_addr_rejects_garbage_host() {
        let mut config = Config::default();
        config.api_host = "not an ip".to_string();
        assert!(config.api_addr().is_err());
    }

    // ===== Validation =====

    #[test]
    fn test_zero_budget_is_rejected() {
        let mut config = Config::default();
        config.transcript_char_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_window_is_rejected() {
        let mut config = Config::default();
        config.session_idle_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list_trims_and_skips_empty() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
