//! Session and account-data collaborators
//!
//! HTTP-backed account data; the session side is a trait so the OAuth
//! subsystem can be plugged in without this crate knowing its wire format.

use crate::error::{clip_body, AdvisorError};
use crate::models::{Order, Transaction, WalletBalance};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// An authenticated marketplace session
#[derive(Debug, Clone)]
pub struct AccountSession {
    pub account_id: String,
    pub refresh_token: String,
}

/// Trait for resolving the caller's session
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn active_session(&self) -> Result<Option<AccountSession>>;

    /// Exchange the session for a fresh access token
    async fn refresh_access_token(&self, session: &AccountSession) -> Result<String>;
}

/// Trait for the account-data service
#[async_trait]
pub trait AccountDataProvider: Send + Sync {
    async fn wallet_balance(&self, account_id: &str, token: &str) -> Result<WalletBalance>;

    async fn active_orders(&self, account_id: &str, token: &str) -> Result<Vec<Order>>;

    async fn wallet_transactions(&self, account_id: &str, token: &str)
        -> Result<Vec<Transaction>>;
}

/// Session configured out of band (single-account deployments)
pub struct StaticSessionProvider {
    account_id: Option<String>,
    access_token: Option<String>,
}

impl StaticSessionProvider {
    pub fn new(account_id: Option<String>, access_token: Option<String>) -> Self {
        Self {
            account_id,
            access_token,
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn active_session(&self) -> Result<Option<AccountSession>> {
        Ok(match (&self.account_id, &self.access_token) {
            (Some(account_id), Some(token)) => Some(AccountSession {
                account_id: account_id.clone(),
                refresh_token: token.clone(),
            }),
            _ => None,
        })
    }

    async fn refresh_access_token(&self, session: &AccountSession) -> Result<String> {
        if session.refresh_token.trim().is_empty() {
            return Err(AdvisorError::Session("empty access token".to_string()));
        }
        Ok(session.refresh_token.clone())
    }
}

#[derive(Clone)]
pub struct HttpAccountClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAccountClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn get_json(&self, path: &str, account_id: &str, token: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&[("account", account_id)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AdvisorError::Account(format!("request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdvisorError::Account(format!("failed to read {}: {}", path, e)))?;

        if !status.is_success() {
            return Err(AdvisorError::Account(format!(
                "account API returned {} for {}: {}",
                status,
                path,
                clip_body(&body)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AdvisorError::Account(format!("invalid JSON from {}: {}", path, e)))
    }
}

/// Accept both a bare array and `{ "<key>": [...] }`
fn listing<T: DeserializeOwned>(value: Value, key: &str) -> Result<Vec<T>> {
    let items = match value {
        Value::Object(mut map) => map.remove(key).unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(items)
        .map_err(|e| AdvisorError::Account(format!("unexpected {} payload: {}", key, e)))
}

#[async_trait]
impl AccountDataProvider for HttpAccountClient {
    async fn wallet_balance(&self, account_id: &str, token: &str) -> Result<WalletBalance> {
        let value = self.get_json("/wallet", account_id, token).await?;
        serde_json::from_value(value)
            .map_err(|e| AdvisorError::Account(format!("unexpected wallet payload: {}", e)))
    }

    async fn active_orders(&self, account_id: &str, token: &str) -> Result<Vec<Order>> {
        let value = self.get_json("/orders", account_id, token).await?;
        listing(value, "orders")
    }

    async fn wallet_transactions(
        &self,
        account_id: &str,
        token: &str,
    ) -> Result<Vec<Transaction>> {
        let value = self.get_json("/transactions", account_id, token).await?;
        listing(value, "transactions")
    }
}

/// Account provider for deployments without an account API
pub struct UnconfiguredAccounts;

#[async_trait]
impl AccountDataProvider for UnconfiguredAccounts {
    async fn wallet_balance(&self, _account_id: &str, _token: &str) -> Result<WalletBalance> {
        Err(AdvisorError::Account("account API not configured".to_string()))
    }

    async fn active_orders(&self, _account_id: &str, _token: &str) -> Result<Vec<Order>> {
        Err(AdvisorError::Account("account API not configured".to_string()))
    }

    async fn wallet_transactions(
        &self,
        _account_id: &str,
        _token: &str,
    ) -> Result<Vec<Transaction>> {
        Err(AdvisorError::Account("account API not configured".to_string()))
    }
}
