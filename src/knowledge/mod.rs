//! Knowledge Retriever
//!
//! Documentation and web retrieval are independent and best-effort: each
//! one runs only when the plan asks for it, and neither can fail the turn.

pub mod docs;
pub mod keywords;
pub mod web;

pub use docs::{DocSource, DocsRetriever, GithubWikiSource, HttpSemanticIndex, SemanticIndex};
pub use web::{SearxngSearch, WebResult, WebRetriever, WebSearch};

use crate::models::{Intent, KnowledgeSnippet, PlannerPlan};
use crate::request::ChatTurn;
use tracing::info;

/// Snippets plus the warnings produced while getting them
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub snippets: Vec<KnowledgeSnippet>,
    pub warnings: Vec<String>,
}

/// Everything retrieved for one turn
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBundle {
    pub wiki: Vec<KnowledgeSnippet>,
    pub web: Vec<KnowledgeSnippet>,
    pub warnings: Vec<String>,
}

impl KnowledgeBundle {
    pub fn is_empty(&self) -> bool {
        self.wiki.is_empty() && self.web.is_empty()
    }
}

pub struct KnowledgeRetriever {
    docs: DocsRetriever,
    web: WebRetriever,
}

impl KnowledgeRetriever {
    pub fn new(docs: DocsRetriever, web: WebRetriever) -> Self {
        Self { docs, web }
    }

    pub async fn retrieve(&self, plan: &PlannerPlan, turn: &ChatTurn) -> KnowledgeBundle {
        if plan.intent == Intent::Smalltalk {
            return KnowledgeBundle::default();
        }

        let docs = async {
            if plan.need_wiki {
                self.docs
                    .retrieve(&turn.wiki_repo, turn.locale, &turn.user_message, plan.intent)
                    .await
            } else {
                RetrievalOutcome::default()
            }
        };
        let web = async {
            if plan.need_web {
                self.web
                    .retrieve(&turn.user_message, plan.intent, turn.locale)
                    .await
            } else {
                RetrievalOutcome::default()
            }
        };

        let (docs, web) = tokio::join!(docs, web);

        info!(
            request_id = %turn.request_id,
            wiki = docs.snippets.len(),
            web = web.snippets.len(),
            "Knowledge retrieval completed"
        );

        let mut warnings = docs.warnings;
        warnings.extend(web.warnings);
        KnowledgeBundle {
            wiki: docs.snippets,
            web: web.snippets,
            warnings,
        }
    }
}
