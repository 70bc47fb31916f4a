//! Runtime Context Builder
//!
//! Live account data for the turn. The client never supplies this: it is
//! rebuilt server-side on every request that asks about the user's own
//! account, from three concurrent fetches that fail independently.

pub mod account;
pub mod summary;

pub use account::{
    AccountDataProvider, AccountSession, HttpAccountClient, SessionProvider,
    StaticSessionProvider, UnconfiguredAccounts,
};

use crate::cache::{TtlCache, TRANSACTIONS_TTL};
use crate::models::{Intent, Locale, RuntimeContext, Transaction};
use crate::text::{contains_any, normalize_text};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Terms that always mean "look at my account"
const HARD_TERMS: &[&str] = &[
    "wallet",
    "balance",
    "portfolio",
    "ledger",
    "transaction",
    "кошел",
    "баланс",
    "портфел",
    "транзакц",
];

/// Terms that mean the account only when the user says it is theirs
const SOFT_TERMS: &[&str] = &[
    "order", "history", "risk", "formula", "trades", "ордер", "заявк", "истори", "риск",
    "формул", "сделк",
];

const POSSESSIVE_WORDS: &[&str] = &[
    "my", "mine", "our", "мой", "моя", "мои", "моё", "мое", "моих", "моей", "мою", "наш",
    "наши", "наших",
];

/// Should this turn pull live account data?
pub fn should_build_runtime(intent: Intent, message: &str) -> bool {
    if matches!(intent, Intent::Smalltalk | Intent::ProductHelp) {
        return false;
    }

    let text = normalize_text(message);
    if contains_any(&text, HARD_TERMS) {
        return true;
    }

    let possessive = text.contains("у меня")
        || text
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| POSSESSIVE_WORDS.contains(&word));

    possessive && contains_any(&text, SOFT_TERMS)
}

/// Assembles [`RuntimeContext`] from the session and account collaborators
pub struct RuntimeContextBuilder {
    sessions: Arc<dyn SessionProvider>,
    accounts: Arc<dyn AccountDataProvider>,
    transactions: TtlCache<String, Vec<Transaction>>,
}

impl RuntimeContextBuilder {
    pub fn new(sessions: Arc<dyn SessionProvider>, accounts: Arc<dyn AccountDataProvider>) -> Self {
        Self {
            sessions,
            accounts,
            transactions: TtlCache::new(),
        }
    }

    pub async fn build(&self, locale: Locale) -> RuntimeContext {
        let session = match self.sessions.active_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return unavailable(locale.pick(
                    "No connected marketplace account.",
                    "Аккаунт маркетплейса не подключён.",
                ))
            }
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                return unavailable(locale.pick(
                    "Account session could not be resolved.",
                    "Не удалось определить сессию аккаунта.",
                ));
            }
        };

        let token = match self.sessions.refresh_access_token(&session).await {
            Ok(token) => token,
            Err(e) => {
                warn!(account_id = %session.account_id, "Token refresh failed: {}", e);
                let mut runtime = unavailable(locale.pick(
                    "Account authorization expired; reconnect the account.",
                    "Авторизация аккаунта истекла; переподключите аккаунт.",
                ));
                runtime.account_id = Some(session.account_id);
                return runtime;
            }
        };

        let account_id = session.account_id.as_str();
        let shared = Mutex::new(RuntimeContext {
            account_id: Some(session.account_id.clone()),
            ..Default::default()
        });

        let wallet_branch = async {
            match self.accounts.wallet_balance(account_id, &token).await {
                Ok(wallet) => {
                    shared.lock().await.wallet = Some(wallet);
                    true
                }
                Err(e) => {
                    warn!(account_id, "Wallet fetch failed: {}", e);
                    shared.lock().await.notes.push(
                        locale
                            .pick("Wallet balance unavailable.", "Баланс кошелька недоступен.")
                            .to_string(),
                    );
                    false
                }
            }
        };

        let orders_branch = async {
            match self.accounts.active_orders(account_id, &token).await {
                Ok(orders) => {
                    shared.lock().await.orders = Some(summary::summarize_orders(&orders));
                    true
                }
                Err(e) => {
                    warn!(account_id, "Orders fetch failed: {}", e);
                    shared.lock().await.notes.push(
                        locale
                            .pick("Active orders unavailable.", "Активные ордера недоступны.")
                            .to_string(),
                    );
                    false
                }
            }
        };

        let transactions_branch = async {
            match self.transactions(account_id, &token).await {
                Ok(transactions) => {
                    let now = Utc::now();
                    let flow = summary::summarize_trade_flow(&transactions, now);
                    let risk = summary::summarize_risk(&transactions, now);
                    let mut runtime = shared.lock().await;
                    runtime.trade_flow = Some(flow);
                    runtime.risk = Some(risk);
                    true
                }
                Err(e) => {
                    warn!(account_id, "Transactions fetch failed: {}", e);
                    shared.lock().await.notes.push(
                        locale
                            .pick(
                                "Transaction history unavailable.",
                                "История транзакций недоступна.",
                            )
                            .to_string(),
                    );
                    false
                }
            }
        };

        let (wallet_ok, orders_ok, transactions_ok) =
            tokio::join!(wallet_branch, orders_branch, transactions_branch);

        let mut runtime = shared.into_inner();
        runtime.available = wallet_ok || orders_ok || transactions_ok;

        info!(
            account_id,
            wallet_ok,
            orders_ok,
            transactions_ok,
            "Runtime context built"
        );

        runtime
    }

    /// Deduplicated transactions, served from the 2-minute cache when fresh
    async fn transactions(&self, account_id: &str, token: &str) -> crate::Result<Vec<Transaction>> {
        let key = account_id.to_string();
        if let Some(cached) = self.transactions.get(&key).await {
            return Ok(cached);
        }

        let fetched = self.accounts.wallet_transactions(account_id, token).await?;
        let deduped = summary::dedupe_transactions(fetched);
        self.transactions
            .insert(key, deduped.clone(), TRANSACTIONS_TTL)
            .await;
        Ok(deduped)
    }
}

fn unavailable(note: &str) -> RuntimeContext {
    RuntimeContext {
        available: false,
        notes: vec![note.to_string()],
        ..Default::default()
    }
}
