//! Key pattern expansion for cache warming.
//!
//! A pattern such as `"user:{userId}:profile"` is turned into one concrete key
//! per candidate id. The set of placeholders is closed: `{userId}` and
//! `{productId}`. Anything else in the pattern is left untouched.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BoxError;

pub const USER_ID_PLACEHOLDER: &str = "{userId}";
pub const PRODUCT_ID_PLACEHOLDER: &str = "{productId}";

/// Upper bound on active users fetched per `{userId}` expansion.
pub const ACTIVE_USER_LIMIT: usize = 100;
/// Upper bound on popular products fetched per `{productId}` expansion.
pub const POPULAR_PRODUCT_LIMIT: usize = 50;

/// Turns a templated key pattern into concrete cache keys.
#[async_trait]
pub trait KeyPatternExpander: Send + Sync {
    async fn expand(&self, pattern: &str) -> Result<Vec<String>, BoxError>;
}

/// Candidate ids for placeholder substitution, usually backed by the primary
/// data store.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Ids of active users, at most `limit`.
    async fn active_user_ids(&self, limit: usize) -> Result<Vec<String>, BoxError>;

    /// Ids of the most ordered products, best sellers first, at most `limit`.
    async fn popular_product_ids(&self, limit: usize) -> Result<Vec<String>, BoxError>;
}

/// Fixed candidate lists. Useful for tests and for processes that already
/// hold the ids in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidates {
    pub user_ids: Vec<String>,
    pub product_ids: Vec<String>,
}

impl StaticCandidates {
    pub fn new<U, P>(user_ids: U, product_ids: P) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        StaticCandidates {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            product_ids: product_ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn active_user_ids(&self, limit: usize) -> Result<Vec<String>, BoxError> {
        Ok(self.user_ids.iter().take(limit).cloned().collect())
    }

    async fn popular_product_ids(&self, limit: usize) -> Result<Vec<String>, BoxError> {
        Ok(self.product_ids.iter().take(limit).cloned().collect())
    }
}

/// Expands `{userId}` and `{productId}` against a [`CandidateSource`].
///
/// Every occurrence of a placeholder is replaced by the same candidate. A
/// pattern carrying both placeholders expands to every user/product pair.
/// Patterns without a placeholder come back unchanged as a single key.
#[derive(Clone)]
pub struct PlaceholderExpander {
    source: Arc<dyn CandidateSource>,
}

impl PlaceholderExpander {
    pub fn new(source: Arc<dyn CandidateSource>) -> Self {
        PlaceholderExpander { source }
    }
}

#[async_trait]
impl KeyPatternExpander for PlaceholderExpander {
    async fn expand(&self, pattern: &str) -> Result<Vec<String>, BoxError> {
        let mut keys = vec![pattern.to_string()];

        if pattern.contains(USER_ID_PLACEHOLDER) {
            let ids = self.source.active_user_ids(ACTIVE_USER_LIMIT).await?;
            keys = substitute(&keys, USER_ID_PLACEHOLDER, &ids);
        }

        if pattern.contains(PRODUCT_ID_PLACEHOLDER) {
            let ids = self.source.popular_product_ids(POPULAR_PRODUCT_LIMIT).await?;
            keys = substitute(&keys, PRODUCT_ID_PLACEHOLDER, &ids);
        }

        tracing::debug!("Expanded key pattern {} into {} keys", pattern, keys.len());
        Ok(keys)
    }
}

fn substitute(keys: &[String], placeholder: &str, ids: &[String]) -> Vec<String> {
    keys.iter()
        .flat_map(|key| ids.iter().map(move |id| key.replace(placeholder, id)))
        .collect()
}
