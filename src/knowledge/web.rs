//! Web retriever
//!
//! Up to three query variants run in parallel against the search
//! collaborator; results are merged by (variant priority, rank).

use super::keywords::extract_keywords;
use super::RetrievalOutcome;
use crate::error::{clip_body, AdvisorError};
use crate::models::{Intent, KnowledgeSnippet, Locale, SourceLabel};
use crate::text::{clip, normalize_text, truncate_runes};
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MAX_WEB_SNIPPETS: usize = 4;
const MAX_QUERIES: usize = 3;
const QUERY_KEYWORDS: usize = 8;
const MAX_QUERY_RUNES: usize = 300;
const DEDUPE_PREFIX_RUNES: usize = 80;
const MAX_SNIPPET_RUNES: usize = 1800;

const DOMAIN_HINT: &str = "skin marketplace trading";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Trait for the external search engine
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, locale: Locale) -> Result<Vec<WebResult>>;
}

/// SearXNG instance queried through its JSON API
pub struct SearxngSearch {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl SearxngSearch {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[derive(Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[async_trait]
impl WebSearch for SearxngSearch {
    async fn search(&self, query: &str, locale: Locale) -> Result<Vec<WebResult>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("language", locale.as_str()),
                ("safesearch", "1"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AdvisorError::WebSearch(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdvisorError::WebSearch(format!("failed to read body: {}", e)))?;
        if !status.is_success() {
            return Err(AdvisorError::WebSearch(format!(
                "search returned {}: {}",
                status,
                clip_body(&body)
            )));
        }

        let parsed: SearxngResponse = serde_json::from_str(&body)
            .map_err(|e| AdvisorError::WebSearch(format!("malformed results: {}", e)))?;
        Ok(parsed.results)
    }
}

/// Query variants in priority order, deduplicated by normalized text
pub fn query_variants(message: &str, intent: Intent, locale: Locale) -> Vec<String> {
    let raw = truncate_runes(message.trim(), MAX_QUERY_RUNES);
    let keywords = extract_keywords(&raw);

    let mut candidates = vec![raw.clone()];
    if !keywords.is_empty() {
        let top: Vec<&str> = keywords
            .iter()
            .take(QUERY_KEYWORDS)
            .map(String::as_str)
            .collect();
        candidates.push(format!("{} {}", top.join(" "), DOMAIN_HINT));
    }
    let subject = if keywords.is_empty() {
        raw.clone()
    } else {
        keywords.join(" ")
    };
    candidates.push(rephrase(&subject, intent, locale));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .filter(|q| seen.insert(normalize_text(q)))
        .take(MAX_QUERIES)
        .collect()
}

fn rephrase(subject: &str, intent: Intent, locale: Locale) -> String {
    match (intent, locale) {
        (Intent::TradingAnalysis, Locale::En) => format!("{} price trend analysis", subject),
        (Intent::TradingAnalysis, Locale::Ru) => format!("{} анализ динамики цены", subject),
        (Intent::DebugSupport, Locale::En) => format!("{} error fix", subject),
        (Intent::DebugSupport, Locale::Ru) => format!("{} ошибка решение", subject),
        (_, Locale::En) => format!("{} latest news", subject),
        (_, Locale::Ru) => format!("{} последние новости", subject),
    }
}

pub struct WebRetriever {
    search: Option<Arc<dyn WebSearch>>,
    timeout: Duration,
}

impl WebRetriever {
    pub fn new(search: Option<Arc<dyn WebSearch>>, timeout: Duration) -> Self {
        Self { search, timeout }
    }

    pub async fn retrieve(&self, message: &str, intent: Intent, locale: Locale) -> RetrievalOutcome {
        let Some(search) = &self.search else {
            return RetrievalOutcome {
                snippets: Vec::new(),
                warnings: vec!["web search unavailable: no search backend configured".to_string()],
            };
        };

        let queries = query_variants(message, intent, locale);
        let results = join_all(queries.iter().map(|q| async move {
            match tokio::time::timeout(self.timeout, search.search(q, locale)).await {
                Ok(result) => result,
                Err(_) => Err(AdvisorError::Timeout(self.timeout.as_secs())),
            }
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        for (query, result) in queries.iter().zip(&results) {
            if let Err(e) = result {
                warn!(query = %query, "Web query failed: {}", e);
            }
        }

        // join_all preserves input order, so iteration order is query priority
        let ranked = results.into_iter().flatten().flatten();
        let snippets = merge_results(ranked, locale);

        info!(
            queries = queries.len(),
            failed,
            snippets = snippets.len(),
            "Web retrieval completed"
        );

        let mut warnings = Vec::new();
        if failed == queries.len() {
            warnings.push("web search unavailable: all queries failed".to_string());
        } else if failed > 0 {
            let mut warning = format!(
                "web search partial: {} of {} queries failed",
                failed,
                queries.len()
            );
            if snippets.is_empty() {
                warning.push_str(", no results");
            }
            warnings.push(warning);
        } else if snippets.is_empty() {
            warnings.push("web search returned no data".to_string());
        }

        RetrievalOutcome { snippets, warnings }
    }
}

/// Dedupe by URL (or title+content prefix without one) and cap at 4
fn merge_results(results: impl Iterator<Item = WebResult>, locale: Locale) -> Vec<KnowledgeSnippet> {
    let mut seen = HashSet::new();
    let mut snippets = Vec::new();

    for result in results {
        let key = if result.url.trim().is_empty() {
            let prefix = truncate_runes(&normalize_text(&result.content), DEDUPE_PREFIX_RUNES);
            format!("text:{}|{}", normalize_text(&result.title), prefix)
        } else {
            format!("url:{}", result.url.trim().trim_end_matches('/'))
        };
        if !seen.insert(key) {
            continue;
        }
        if result.title.trim().is_empty() && result.content.trim().is_empty() {
            continue;
        }

        let score = (MAX_WEB_SNIPPETS - snippets.len()) as f64;
        snippets.push(KnowledgeSnippet {
            source_label: SourceLabel::Web,
            title: result.title.trim().to_string(),
            page: String::new(),
            section: String::new(),
            locale: locale.as_str().to_string(),
            url: result.url.trim().to_string(),
            content: clip(&result.content, MAX_SNIPPET_RUNES),
            score,
        });
        if snippets.len() == MAX_WEB_SNIPPETS {
            break;
        }
    }
    snippets
}
