//! Usage: Persisted key-value storage for session tokens and small client flags.
//!
//! Values are opaque strings. Backends:
//! - [`SqliteTokenStore`]: durable, survives restarts.
//! - [`MemoryTokenStore`]: process-local, for tests and throwaway sessions.

mod memory;
mod sqlite;

pub use memory::MemoryTokenStore;
pub use sqlite::{SqliteStoreConfig, SqliteTokenStore};

use crate::auth::types::TokenPair;
use crate::shared::error::AppResult;
use std::future::Future;
use std::pin::Pin;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const GOOGLE_CODE_VERIFIER_KEY: &str = "google_code_verifier";
pub const USER_LANGUAGE_KEY: &str = "user-language";
pub const USER_ID_KEY: &str = "userId";

pub const TOKEN_PAIR_KEYS: [&str; 2] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY];

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'a>>;

/// Async key-value contract shared by the pipeline, the coordinator and the login flows.
///
/// Writes are last-writer-wins.
pub trait TokenStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

    /// Removes every listed key; absent keys are not an error.
    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()>;
}

/// Both tokens, or `None` when the access token is missing.
pub async fn load_token_pair(store: &dyn TokenStore) -> AppResult<Option<TokenPair>> {
    let Some(access_token) = store.get(ACCESS_TOKEN_KEY).await? else {
        return Ok(None);
    };
    let refresh_token = store.get(REFRESH_TOKEN_KEY).await?.unwrap_or_default();
    Ok(Some(TokenPair {
        access_token,
        refresh_token,
    }))
}

/// An empty refresh token removes the stored one instead of writing "".
pub async fn save_token_pair(store: &dyn TokenStore, tokens: &TokenPair) -> AppResult<()> {
    store.set(ACCESS_TOKEN_KEY, &tokens.access_token).await?;
    if tokens.refresh_token.is_empty() {
        store.remove(&[REFRESH_TOKEN_KEY]).await
    } else {
        store.set(REFRESH_TOKEN_KEY, &tokens.refresh_token).await
    }
}

pub async fn clear_token_pair(store: &dyn TokenStore) -> AppResult<()> {
    store.remove(&TOKEN_PAIR_KEYS).await
}

/// Reads a key, logging and swallowing storage failures (absence and failure mean the same).
pub(crate) async fn get_or_none(store: &dyn TokenStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key, "token store read failed; treating as absent: {}", err);
            None
        }
    }
}
