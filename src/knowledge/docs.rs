//! Documentation retriever
//!
//! Semantic index first; when it fails or comes back empty, fall back to a
//! fixed set of wiki pages plus the local overview, scored by keyword hits.

use super::keywords::extract_keywords;
use super::RetrievalOutcome;
use crate::cache::{page_key, CachedPage, PageCache};
use crate::error::{clip_body, AdvisorError};
use crate::models::{Intent, KnowledgeSnippet, Locale, SourceLabel};
use crate::text::clip;
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const TOP_K: usize = 4;
pub const MAX_SNIPPET_RUNES: usize = 1800;

/// Wiki pages consulted when the semantic index has nothing
pub const DOC_PAGES: &[&str] = &[
    "Home",
    "Getting-Started",
    "Scan-Settings",
    "Filters",
    "Decision-Matrix",
    "Risk-Management",
    "Account-Connection",
    "Troubleshooting",
    "FAQ",
];

/// Page slug used for the local overview document
const OVERVIEW_PAGE: &str = "README";

/// Trait for raw documentation pages
#[async_trait]
pub trait DocSource: Send + Sync {
    /// Markdown source of one wiki page
    async fn fetch_page(&self, repo: &str, slug: &str) -> Result<String>;

    /// Local overview document, if the deployment ships one
    async fn local_overview(&self) -> Result<Option<String>>;
}

/// Trait for the semantic documentation index
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn retrieve(
        &self,
        repo: &str,
        locale: Locale,
        query: &str,
        intent: Intent,
        k: usize,
    ) -> Result<(Vec<KnowledgeSnippet>, Vec<String>)>;
}

/// GitHub wiki pages over raw.githubusercontent plus a README on disk
pub struct GithubWikiSource {
    client: Client,
    raw_base: String,
    readme_path: Option<PathBuf>,
    timeout: Duration,
}

impl GithubWikiSource {
    pub fn new(
        client: Client,
        raw_base: &str,
        readme_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            raw_base: raw_base.trim_end_matches('/').to_string(),
            readme_path,
            timeout,
        }
    }
}

#[async_trait]
impl DocSource for GithubWikiSource {
    async fn fetch_page(&self, repo: &str, slug: &str) -> Result<String> {
        let url = format!("{}/{}/{}.md", self.raw_base, repo.trim(), slug);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AdvisorError::Documentation(format!("{}: {}", slug, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdvisorError::Documentation(format!(
                "{} returned {}",
                slug, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AdvisorError::Documentation(format!("{}: {}", slug, e)))
    }

    async fn local_overview(&self) -> Result<Option<String>> {
        match &self.readme_path {
            Some(path) => Ok(Some(tokio::fs::read_to_string(path).await?)),
            None => Ok(None),
        }
    }
}

/// Semantic index reached over HTTP (`POST {base}/retrieve`)
pub struct HttpSemanticIndex {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSemanticIndex {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    repo: &'a str,
    locale: &'a str,
    query: &'a str,
    intent: &'a str,
    k: usize,
}

#[derive(Deserialize, Default)]
struct RetrieveResponse {
    #[serde(default)]
    snippets: Vec<KnowledgeSnippet>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[async_trait]
impl SemanticIndex for HttpSemanticIndex {
    async fn retrieve(
        &self,
        repo: &str,
        locale: Locale,
        query: &str,
        intent: Intent,
        k: usize,
    ) -> Result<(Vec<KnowledgeSnippet>, Vec<String>)> {
        let url = format!("{}/retrieve", self.base_url);
        let request = RetrieveRequest {
            repo,
            locale: locale.as_str(),
            query,
            intent: intent.as_str(),
            k,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AdvisorError::Documentation(format!("semantic index: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdvisorError::Documentation(format!("semantic index: {}", e)))?;
        if !status.is_success() {
            return Err(AdvisorError::Documentation(format!(
                "semantic index returned {}: {}",
                status,
                clip_body(&body)
            )));
        }

        let parsed: RetrieveResponse = serde_json::from_str(&body)?;
        Ok((parsed.snippets, parsed.warnings))
    }
}

/// A fetched page, before scoring
struct Page {
    slug: String,
    label: SourceLabel,
    content: String,
}

pub struct DocsRetriever {
    source: Arc<dyn DocSource>,
    index: Option<Arc<dyn SemanticIndex>>,
    cache: Arc<dyn PageCache>,
}

impl DocsRetriever {
    pub fn new(
        source: Arc<dyn DocSource>,
        index: Option<Arc<dyn SemanticIndex>>,
        cache: Arc<dyn PageCache>,
    ) -> Self {
        Self {
            source,
            index,
            cache,
        }
    }

    pub async fn retrieve(
        &self,
        repo: &str,
        locale: Locale,
        query: &str,
        intent: Intent,
    ) -> RetrievalOutcome {
        let mut warnings = Vec::new();

        if let Some(index) = &self.index {
            match index.retrieve(repo, locale, query, intent, TOP_K).await {
                Ok((snippets, index_warnings)) if !snippets.is_empty() => {
                    info!(repo, hits = snippets.len(), "Semantic index hit");
                    let snippets = snippets
                        .into_iter()
                        .take(TOP_K)
                        .map(|mut s| {
                            s.content = clip(&s.content, MAX_SNIPPET_RUNES);
                            s
                        })
                        .collect();
                    return RetrievalOutcome {
                        snippets,
                        warnings: index_warnings,
                    };
                }
                Ok((_, index_warnings)) => {
                    info!(repo, "Semantic index empty, falling back to wiki pages");
                    warnings.extend(index_warnings);
                }
                Err(e) => {
                    warn!(repo, "Semantic index failed: {}", e);
                    warnings.push(format!("documentation index unavailable: {}", e));
                }
            }
        }

        let pages = self.load_pages(repo).await;
        if pages.is_empty() {
            warnings.push("documentation unavailable".to_string());
            return RetrievalOutcome {
                snippets: Vec::new(),
                warnings,
            };
        }

        RetrievalOutcome {
            snippets: rank_pages(pages, repo, locale, query),
            warnings,
        }
    }

    /// Fixed pages plus the overview, fetched in parallel through the cache
    async fn load_pages(&self, repo: &str) -> Vec<Page> {
        let wiki = DOC_PAGES.iter().map(|slug| async move {
            let content = self
                .cached(repo, slug, || self.source.fetch_page(repo, slug))
                .await?;
            Some(Page {
                slug: slug.to_string(),
                label: SourceLabel::Wiki,
                content,
            })
        });

        let overview = async {
            let content = self
                .cached(repo, OVERVIEW_PAGE, || async {
                    self.source.local_overview().await?.ok_or_else(|| {
                        AdvisorError::Documentation("no local overview".to_string())
                    })
                })
                .await?;
            Some(Page {
                slug: OVERVIEW_PAGE.to_string(),
                label: SourceLabel::Readme,
                content,
            })
        };

        let (mut pages, overview) = tokio::join!(join_all(wiki), overview);
        pages.push(overview);
        pages.into_iter().flatten().collect()
    }

    async fn cached<F, Fut>(&self, repo: &str, slug: &str, fetch: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let key = page_key(repo, slug);
        if let Some(page) = self.cache.get(&key).await {
            return match page {
                CachedPage::Content(content) => Some(content),
                CachedPage::Failed(_) => None,
            };
        }

        let page = match fetch().await {
            Ok(content) if !content.trim().is_empty() => CachedPage::Content(content),
            Ok(_) => CachedPage::Failed("empty page".to_string()),
            Err(e) => {
                warn!(repo, slug, "Documentation page fetch failed: {}", e);
                CachedPage::Failed(e.to_string())
            }
        };
        self.cache.set(&key, page.clone(), page.ttl()).await;

        match page {
            CachedPage::Content(content) => Some(content),
            CachedPage::Failed(_) => None,
        }
    }
}

/// Markdown sections as (heading, body)
fn sections(markdown: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut heading = String::new();
    let mut body = String::new();

    for line in markdown.lines() {
        if line.trim_start().starts_with('#') {
            if !body.trim().is_empty() {
                out.push((heading.clone(), body.trim().to_string()));
            }
            heading = line.trim_start_matches(['#', ' ']).trim().to_string();
            body.clear();
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !body.trim().is_empty() {
        out.push((heading, body.trim().to_string()));
    }
    out
}

/// Number of distinct keywords present in `text`; repeats do not count
fn keyword_hits(text: &str, keywords: &[String]) -> usize {
    let lower = text.to_lowercase();
    keywords.iter().filter(|k| lower.contains(k.as_str())).count()
}

/// Score pages by distinct keyword hits and keep the best 4 (or the first 4 when nothing hits)
fn rank_pages(pages: Vec<Page>, repo: &str, locale: Locale, query: &str) -> Vec<KnowledgeSnippet> {
    let keywords = extract_keywords(query);

    let mut scored: Vec<KnowledgeSnippet> = pages
        .iter()
        .map(|page| {
            let best = sections(&page.content)
                .into_iter()
                .map(|(heading, body)| {
                    let score = keyword_hits(&format!("{}\n{}", heading, body), &keywords);
                    // heading hits only break ties between equally matching sections
                    let heading_hits = keyword_hits(&heading, &keywords);
                    ((score, heading_hits), heading, body)
                })
                .max_by_key(|(key, _, _)| *key);

            let (score, section, content) = match best {
                Some(((score, _), heading, body)) if score > 0 => (score, heading, body),
                _ => (0, String::new(), page.content.clone()),
            };

            KnowledgeSnippet {
                source_label: page.label,
                title: page.slug.replace('-', " "),
                page: page.slug.clone(),
                section,
                locale: locale.as_str().to_string(),
                url: page_url(repo, page),
                content: clip(&content, MAX_SNIPPET_RUNES),
                score: score as f64,
            }
        })
        .collect();

    if scored.iter().any(|s| s.score > 0.0) {
        // stable sort keeps page order for ties
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.retain(|s| s.score > 0.0);
    }
    scored.truncate(TOP_K);
    scored
}

fn page_url(repo: &str, page: &Page) -> String {
    match page.label {
        SourceLabel::Readme => format!("https://github.com/{}#readme", repo.trim()),
        _ => format!("https://github.com/{}/wiki/{}", repo.trim(), page.slug),
    }
}
