use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::cache::{KeyPart, KeySpace, Namespace, ReadThroughCache, token_digest};
use crate::upstream::{RequestOptions, UpstreamClient};

use super::collection::validate_body;
use super::error::AppError;

const PROFILE_PATH: &str = "profile";

/// Per-session profile, keyed by a digest of the session token.
pub struct ProfileCache {
    cache: ReadThroughCache,
    upstream: UpstreamClient,
    keys: KeySpace,
    ttl: Duration,
}

impl ProfileCache {
    pub fn new(cache: ReadThroughCache, upstream: UpstreamClient, keys: KeySpace, ttl: Duration) -> Self {
        Self {
            cache,
            upstream,
            keys,
            ttl,
        }
    }

    /// `user:profile:<sha256(token)>`; the raw token never appears in a key.
    pub fn key_for(&self, token: &str) -> String {
        self.keys.key(
            Namespace::User,
            [KeyPart::from("profile"), KeyPart::from(token_digest(token))],
        )
    }

    pub async fn get(&self, token: Option<&str>) -> Result<Value, AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        let key = self.key_for(token);

        let profile = self
            .cache
            .read_through(&key, self.ttl, || {
                self.upstream.request_with_retry::<Value>(
                    Method::GET,
                    PROFILE_PATH,
                    RequestOptions::new().bearer(Some(token)),
                )
            })
            .await?;
        Ok(profile)
    }

    pub async fn update(&self, token: Option<&str>, body: Value) -> Result<Value, AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        validate_body(&body, &[])?;

        let updated = self
            .upstream
            .request_with_retry::<Value>(
                Method::PATCH,
                PROFILE_PATH,
                RequestOptions::new().bearer(Some(token)).json(body),
            )
            .await?;

        self.invalidate(token).await;
        Ok(updated)
    }

    pub async fn invalidate(&self, token: &str) {
        let key = self.key_for(token);
        debug!(key = %key, "profile cache evicted");
        self.cache.invalidate(&key).await;
    }
}
