use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::info;

use crate::cache::{Cached, KeyPart, KeySpace, ListKeyIndex, Namespace, ReadThroughCache};
use crate::upstream::{RequestOptions, UpstreamClient};

use super::collection::validate_body;
use super::error::AppError;

const LANDING_PATH: &str = "quiz/landing";
const QUIZ_PATH: &str = "quiz";

/// Public quiz landing data, keyed by locale.
pub struct QuizCache {
    cache: ReadThroughCache,
    upstream: UpstreamClient,
    keys: KeySpace,
    ttl: Duration,
    issued: ListKeyIndex,
}

impl QuizCache {
    pub fn new(
        cache: ReadThroughCache,
        upstream: UpstreamClient,
        keys: KeySpace,
        ttl: Duration,
        issued: ListKeyIndex,
    ) -> Self {
        Self {
            cache,
            upstream,
            keys,
            ttl,
            issued,
        }
    }

    pub fn landing_key(&self, locale: Option<&str>) -> String {
        let locale = normalize_locale(locale);
        self.keys
            .key(Namespace::Quiz, [KeyPart::from("landing"), KeyPart::from(locale)])
    }

    pub async fn landing(&self, locale: Option<&str>) -> Result<Cached<Value>, AppError> {
        let locale = normalize_locale(locale);
        let key = self.landing_key(locale.as_deref());
        self.issued.record(&key);

        let upstream = self.upstream.clone();
        let cached = self
            .cache
            .read_through_stale(&key, self.ttl, move || {
                let upstream = upstream.clone();
                let options = RequestOptions::new().query(
                    locale
                        .clone()
                        .map(|locale| ("locale".to_string(), locale)),
                );
                async move {
                    upstream
                        .request_with_retry::<Value>(Method::GET, LANDING_PATH, options)
                        .await
                }
            })
            .await?;
        Ok(cached)
    }

    /// Create a quiz upstream, then evict every landing variant.
    pub async fn create(&self, token: Option<&str>, body: Value) -> Result<Value, AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        validate_body(&body, &[])?;

        let created = self
            .upstream
            .request_with_retry::<Value>(
                Method::POST,
                QUIZ_PATH,
                RequestOptions::new().bearer(Some(token)).json(body),
            )
            .await?;

        let evicted = self.invalidate_landing().await;
        info!(resource = "quiz", evicted, "quiz created; landing caches evicted");
        Ok(created)
    }

    pub async fn invalidate_landing(&self) -> usize {
        let mut keys: BTreeSet<String> = self.issued.drain().into_iter().collect();
        keys.insert(self.landing_key(None));
        for key in &keys {
            self.cache.invalidate(key).await;
        }
        keys.len()
    }
}

fn normalize_locale(locale: Option<&str>) -> Option<String> {
    locale
        .map(|value| value.trim().to_ascii_lowercase().replace('_', "-"))
        .filter(|value| !value.is_empty())
}
