//! Test doubles for the pipeline's collaborators

use crate::config::AdvisorConfig;
use crate::error::AdvisorError;
use crate::knowledge::{DocSource, SemanticIndex, WebResult, WebSearch};
use crate::models::{
    Intent, KnowledgeSnippet, Locale, Order, ProviderReply, SourceLabel, TradeSide, Transaction,
    WalletBalance,
};
use crate::provider::{ChatProvider, LineStream, ProviderCall};
use crate::request::{ChatRequest, ChatTurn};
use crate::runtime::{AccountDataProvider, AccountSession, SessionProvider};
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn reply(answer: &str) -> ProviderReply {
    ProviderReply {
        answer: answer.to_string(),
        model: "scripted-model".to_string(),
        provider_message_id: "msg-1".to_string(),
        usage: Default::default(),
    }
}

/// A validated turn with defaults for everything but the message
pub fn turn(message: &str) -> ChatTurn {
    let request = ChatRequest {
        api_key: "sk-test".to_string(),
        model: "gpt-4o".to_string(),
        user_message: message.to_string(),
        ..Default::default()
    };
    match request.validate(&AdvisorConfig::default()) {
        Ok(turn) => turn,
        Err(e) => panic!("test turn rejected: {}", e),
    }
}

/// Provider that replays scripted replies and streams in order
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderReply>>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    calls: AtomicUsize,
    last: Mutex<Option<ProviderCall>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ProviderReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    /// Queue the raw SSE lines of one streamed completion
    pub fn with_stream(self, lines: Vec<String>) -> Self {
        self.streams.lock().unwrap().push_back(lines);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<ProviderCall> {
        self.last.lock().unwrap().clone()
    }

    fn record(&self, call: &ProviderCall) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(call.clone());
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, call: &ProviderCall) -> Result<ProviderReply> {
        self.record(call);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AdvisorError::Provider("no scripted reply left".to_string())))
    }

    async fn stream(&self, call: &ProviderCall) -> Result<LineStream> {
        self.record(call);
        let lines = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AdvisorError::Provider("no scripted stream left".to_string()))?;
        Ok(Box::pin(stream::iter(
            lines.into_iter().map(Ok::<String, AdvisorError>),
        )))
    }
}

pub struct MockSessions {
    session: Option<AccountSession>,
    refresh_fails: bool,
}

impl MockSessions {
    pub fn none() -> Self {
        Self {
            session: None,
            refresh_fails: false,
        }
    }

    pub fn active() -> Self {
        Self {
            session: Some(AccountSession {
                account_id: "acc-1".to_string(),
                refresh_token: "refresh".to_string(),
            }),
            refresh_fails: false,
        }
    }

    pub fn failing_refresh() -> Self {
        Self {
            refresh_fails: true,
            ..Self::active()
        }
    }
}

#[async_trait]
impl SessionProvider for MockSessions {
    async fn active_session(&self) -> Result<Option<AccountSession>> {
        Ok(self.session.clone())
    }

    async fn refresh_access_token(&self, _session: &AccountSession) -> Result<String> {
        if self.refresh_fails {
            return Err(AdvisorError::Session("refresh rejected".to_string()));
        }
        Ok("access".to_string())
    }
}

#[derive(Default)]
pub struct MockAccounts {
    pub fail_wallet: bool,
    pub fail_orders: bool,
    pub fail_transactions: bool,
    pub wallet_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
}

impl MockAccounts {
    pub fn healthy() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountDataProvider for MockAccounts {
    async fn wallet_balance(&self, _account_id: &str, _token: &str) -> Result<WalletBalance> {
        self.wallet_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_wallet {
            return Err(AdvisorError::Account("wallet down".to_string()));
        }
        Ok(WalletBalance {
            amount: 250.0,
            currency: "USD".to_string(),
        })
    }

    async fn active_orders(&self, _account_id: &str, _token: &str) -> Result<Vec<Order>> {
        if self.fail_orders {
            return Err(AdvisorError::Account("orders down".to_string()));
        }
        Ok(vec![Order {
            item: "Case".to_string(),
            side: TradeSide::Buy,
            price: 2.0,
            quantity: 10.0,
        }])
    }

    async fn wallet_transactions(
        &self,
        _account_id: &str,
        _token: &str,
    ) -> Result<Vec<Transaction>> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transactions {
            return Err(AdvisorError::Account("ledger down".to_string()));
        }
        let at = Utc::now() - Duration::days(1);
        let tx = |id: &str, item: &str, side, price| Transaction {
            id: id.to_string(),
            item: item.to_string(),
            side,
            price,
            quantity: 1.0,
            timestamp: at,
        };
        Ok(vec![
            tx("t1", "Knife", TradeSide::Buy, 100.0),
            tx("t1", "Knife", TradeSide::Buy, 100.0),
            tx("t2", "Gloves", TradeSide::Sell, 60.0),
        ])
    }
}

/// Documentation source backed by a fixed page map
#[derive(Default)]
pub struct MockDocs {
    pages: HashMap<String, String>,
    overview: Option<String>,
    pub fetches: AtomicUsize,
}

impl MockDocs {
    pub fn page(mut self, slug: &str, content: &str) -> Self {
        self.pages.insert(slug.to_string(), content.to_string());
        self
    }

    pub fn overview(mut self, content: &str) -> Self {
        self.overview = Some(content.to_string());
        self
    }
}

#[async_trait]
impl DocSource for MockDocs {
    async fn fetch_page(&self, _repo: &str, slug: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(slug)
            .cloned()
            .ok_or_else(|| AdvisorError::Documentation(format!("{} returned 404", slug)))
    }

    async fn local_overview(&self) -> Result<Option<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.overview.clone())
    }
}

pub struct MockIndex {
    hits: usize,
    fails: bool,
}

impl MockIndex {
    pub fn with_hits(hits: usize) -> Self {
        Self { hits, fails: false }
    }

    pub fn failing() -> Self {
        Self {
            hits: 0,
            fails: true,
        }
    }
}

#[async_trait]
impl SemanticIndex for MockIndex {
    async fn retrieve(
        &self,
        _repo: &str,
        locale: Locale,
        _query: &str,
        _intent: Intent,
        _k: usize,
    ) -> Result<(Vec<KnowledgeSnippet>, Vec<String>)> {
        if self.fails {
            return Err(AdvisorError::Documentation("index offline".to_string()));
        }
        let snippets = (0..self.hits)
            .map(|i| KnowledgeSnippet {
                source_label: SourceLabel::Wiki,
                title: format!("Chunk {}", i),
                page: "Decision-Matrix".to_string(),
                section: format!("Part {}", i),
                locale: locale.as_str().to_string(),
                url: String::new(),
                content: "x".repeat(2500),
                score: 1.0 / (i as f64 + 1.0),
            })
            .collect();
        Ok((snippets, Vec::new()))
    }
}

/// Search backend answering each query with the next scripted result
#[derive(Default)]
pub struct MockSearch {
    responses: Mutex<VecDeque<Result<Vec<WebResult>>>>,
    pub calls: AtomicUsize,
}

impl MockSearch {
    pub fn by_position(responses: Vec<Result<Vec<WebResult>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WebSearch for MockSearch {
    async fn search(&self, _query: &str, _locale: Locale) -> Result<Vec<WebResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
