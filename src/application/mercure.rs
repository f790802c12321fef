use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::cache::{KeyPart, KeySpace, Namespace, ReadThroughCache, token_digest};
use crate::upstream::{RequestOptions, UpstreamClient};

use super::error::AppError;

const TOKEN_PATH: &str = "mercure/token";

/// Mercure hub subscriber tokens, one per session.
pub struct MercureTokenCache {
    cache: ReadThroughCache,
    upstream: UpstreamClient,
    keys: KeySpace,
    ttl: Duration,
}

impl MercureTokenCache {
    pub fn new(cache: ReadThroughCache, upstream: UpstreamClient, keys: KeySpace, ttl: Duration) -> Self {
        Self {
            cache,
            upstream,
            keys,
            ttl,
        }
    }

    pub fn key_for(&self, session_token: &str) -> String {
        self.keys.key(
            Namespace::Mercure,
            [KeyPart::from("token"), KeyPart::from(token_digest(session_token))],
        )
    }

    pub async fn token(&self, session_token: Option<&str>) -> Result<Value, AppError> {
        let session_token = session_token.ok_or(AppError::Unauthorized)?;
        let key = self.key_for(session_token);

        let token = self
            .cache
            .read_through(&key, self.ttl, || {
                self.upstream.request_with_retry::<Value>(
                    Method::GET,
                    TOKEN_PATH,
                    RequestOptions::new().bearer(Some(session_token)),
                )
            })
            .await?;
        Ok(token)
    }

    /// Drop the cached hub token, e.g. on logout.
    pub async fn forget(&self, session_token: Option<&str>) -> Result<(), AppError> {
        let session_token = session_token.ok_or(AppError::Unauthorized)?;
        self.cache.invalidate(&self.key_for(session_token)).await;
        Ok(())
    }
}
