//! Environment-driven configuration
//!
//! Every setting has a default so the service starts with an empty environment;
//! collaborators whose URL is unset are simply not wired.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Known OpenAI-compatible chat-completion endpoints
const PROVIDER_BASE_URLS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
];

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub planner: Duration,
    pub generation: Duration,
    pub stream: Duration,
    pub doc_page: Duration,
    pub web_query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            planner: Duration::from_secs(35),
            generation: Duration::from_secs(90),
            stream: Duration::from_secs(12 * 60),
            doc_page: Duration::from_secs(12),
            web_query: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub port: u16,
    pub default_provider: String,
    /// Base URL for the `custom` provider
    pub custom_provider_base_url: Option<String>,
    pub assistant_name: String,
    pub wiki_repo: String,
    pub wiki_raw_base: String,
    pub readme_path: Option<PathBuf>,
    pub semantic_index_url: Option<String>,
    pub searxng_url: Option<String>,
    pub account_api_base_url: Option<String>,
    pub account_id: Option<String>,
    pub account_access_token: Option<String>,
    pub timeouts: Timeouts,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            default_provider: "openai".to_string(),
            custom_provider_base_url: None,
            assistant_name: "Station Advisor".to_string(),
            wiki_repo: "scan-station/scan-station".to_string(),
            wiki_raw_base: "https://raw.githubusercontent.com/wiki".to_string(),
            readme_path: None,
            semantic_index_url: None,
            searxng_url: None,
            account_api_base_url: None,
            account_id: None,
            account_access_token: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl AdvisorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.port);

        let timeouts = Timeouts {
            planner: secs_var("ADVISOR_PLANNER_TIMEOUT_SECS", defaults.timeouts.planner),
            generation: secs_var("ADVISOR_GENERATION_TIMEOUT_SECS", defaults.timeouts.generation),
            stream: secs_var("ADVISOR_STREAM_TIMEOUT_SECS", defaults.timeouts.stream),
            doc_page: secs_var("ADVISOR_DOC_TIMEOUT_SECS", defaults.timeouts.doc_page),
            web_query: secs_var("ADVISOR_WEB_TIMEOUT_SECS", defaults.timeouts.web_query),
        };

        Self {
            port,
            default_provider: string_var("ADVISOR_DEFAULT_PROVIDER")
                .unwrap_or(defaults.default_provider),
            custom_provider_base_url: string_var("ADVISOR_PROVIDER_BASE_URL"),
            assistant_name: string_var("ADVISOR_ASSISTANT_NAME")
                .unwrap_or(defaults.assistant_name),
            wiki_repo: string_var("ADVISOR_WIKI_REPO").unwrap_or(defaults.wiki_repo),
            wiki_raw_base: string_var("ADVISOR_WIKI_RAW_BASE").unwrap_or(defaults.wiki_raw_base),
            readme_path: string_var("ADVISOR_README_PATH").map(PathBuf::from),
            semantic_index_url: string_var("ADVISOR_SEMANTIC_INDEX_URL"),
            searxng_url: string_var("ADVISOR_SEARXNG_URL"),
            account_api_base_url: string_var("ACCOUNT_API_BASE_URL"),
            account_id: string_var("ACCOUNT_ID"),
            account_access_token: string_var("ACCOUNT_ACCESS_TOKEN"),
            timeouts,
        }
    }

    /// Resolve the chat-completion base URL for a provider name
    pub fn provider_base_url(&self, provider: &str) -> Option<String> {
        let provider = provider.trim().to_lowercase();
        if provider == "custom" {
            return self
                .custom_provider_base_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string());
        }
        PROVIDER_BASE_URLS
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, url)| url.to_string())
    }
}

fn string_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn secs_var(key: &str, fallback: Duration) -> Duration {
    string_var(key)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_registry() {
        let mut config = AdvisorConfig::default();
        assert_eq!(
            config.provider_base_url("OpenRouter").as_deref(),
            Some("https://openrouter.ai/api/v1")
        );
        assert!(config.provider_base_url("custom").is_none());
        assert!(config.provider_base_url("mystery").is_none());

        config.custom_provider_base_url = Some("http://localhost:11434/v1/".to_string());
        assert_eq!(
            config.provider_base_url("custom").as_deref(),
            Some("http://localhost:11434/v1")
        );
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.planner, Duration::from_secs(35));
        assert_eq!(timeouts.generation, Duration::from_secs(90));
        assert_eq!(timeouts.stream, Duration::from_secs(720));
        assert_eq!(timeouts.doc_page, Duration::from_secs(12));
        assert_eq!(timeouts.web_query, Duration::from_secs(10));
    }
}
