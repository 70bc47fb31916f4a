//! Request-spanning caches
//!
//! Reads take the shared lock, refreshes take the exclusive lock, and no lock
//! is ever held across a network call: callers fetch first, then `insert`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Documentation pages stay fresh for 30 minutes
pub const PAGE_CONTENT_TTL: Duration = Duration::from_secs(30 * 60);
/// Failed page fetches are remembered for 90 seconds
pub const PAGE_ERROR_TTL: Duration = Duration::from_secs(90);
/// Account transactions are reused for 2 minutes
pub const TRANSACTIONS_TTL: Duration = Duration::from_secs(2 * 60);

/// Last-writer-wins map with per-entry expiry
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(expires_at, _)| Instant::now() < *expires_at)
            .map(|(_, value)| value.clone())
    }

    pub async fn insert(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (expires_at, _)| now < *expires_at);
        entries.insert(key, (now + ttl, value));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a documentation page fetch, cached either way
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPage {
    Content(String),
    Failed(String),
}

impl CachedPage {
    pub fn ttl(&self) -> Duration {
        match self {
            CachedPage::Content(_) => PAGE_CONTENT_TTL,
            CachedPage::Failed(_) => PAGE_ERROR_TTL,
        }
    }
}

/// Injected documentation-page cache
#[async_trait]
pub trait PageCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedPage>;

    async fn set(&self, key: &str, page: CachedPage, ttl: Duration);
}

/// In-process page cache
#[derive(Default)]
pub struct MemoryPageCache {
    inner: TtlCache<String, CachedPage>,
}

impl MemoryPageCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageCache for MemoryPageCache {
    async fn get(&self, key: &str) -> Option<CachedPage> {
        self.inner.get(&key.to_string()).await
    }

    async fn set(&self, key: &str, page: CachedPage, ttl: Duration) {
        self.inner.insert(key.to_string(), page, ttl).await;
    }
}

/// Cache key for a documentation page
pub fn page_key(repo: &str, page: &str) -> String {
    format!("{}::{}", repo.trim().to_lowercase(), page.trim())
}
