//! Shared adapter for list/item resources (posts, jobs).
//!
//! Reads go through stale-while-revalidate. Mutations require a bearer
//! token, are validated before any I/O, and on upstream success evict the
//! item plus every list variant this adapter knows about.

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{
    CanonicalQuery, Cached, KeyPart, KeySpace, ListKeyIndex, Namespace, PRESET_LIST_LIMITS,
    ReadThroughCache, normalize_list_query,
};
use crate::upstream::{RequestOptions, UpstreamClient};

use super::error::AppError;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;

const LIST_SEGMENT: &str = "list";
const ITEM_SEGMENT: &str = "item";

/// Static description of one collection resource.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub label: &'static str,
    pub namespace: Namespace,
    pub upstream_path: &'static str,
    /// Fields that must be non-empty strings on create and full replace.
    pub required_fields: &'static [&'static str],
}

/// Runtime knobs shared by every collection adapter.
#[derive(Clone)]
pub struct CollectionDeps {
    pub cache: ReadThroughCache,
    pub upstream: UpstreamClient,
    pub keys: KeySpace,
    pub eviction_pages: u32,
}

pub struct CollectionCache {
    spec: CollectionSpec,
    deps: CollectionDeps,
    ttl: Duration,
    index: ListKeyIndex,
}

impl CollectionCache {
    pub fn new(spec: CollectionSpec, deps: CollectionDeps, ttl: Duration, index: ListKeyIndex) -> Self {
        Self {
            spec,
            deps,
            ttl,
            index,
        }
    }

    /// Canonical list query with pagination defaults applied.
    pub fn list_query<I, K, V>(pairs: I) -> CanonicalQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        normalize_list_query(pairs)
            .with_default("page", DEFAULT_PAGE)
            .with_default("limit", DEFAULT_LIMIT)
    }

    pub fn list_key(&self, query: &CanonicalQuery) -> String {
        self.deps.keys.key(
            self.spec.namespace,
            [KeyPart::from(LIST_SEGMENT), KeyPart::from(query)],
        )
    }

    pub fn item_key(&self, id: &str) -> String {
        self.deps
            .keys
            .key(self.spec.namespace, [ITEM_SEGMENT, id])
    }

    pub async fn list<I, K, V>(&self, pairs: I) -> Result<Cached<Value>, AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = Self::list_query(pairs);
        let key = self.list_key(&query);
        self.index.record(&key);

        let upstream = self.deps.upstream.clone();
        let path = self.spec.upstream_path;
        let params: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let cached = self
            .deps
            .cache
            .read_through_stale(&key, self.ttl, move || {
                let upstream = upstream.clone();
                let options = RequestOptions::new().query(params.clone());
                async move {
                    upstream
                        .request_with_retry::<Value>(Method::GET, path, options)
                        .await
                }
            })
            .await?;
        Ok(cached)
    }

    pub async fn get(&self, id: &str) -> Result<Cached<Value>, AppError> {
        let id = validate_id(id)?;
        let key = self.item_key(id);

        let upstream = self.deps.upstream.clone();
        let path = format!("{}/{id}", self.spec.upstream_path);

        let cached = self
            .deps
            .cache
            .read_through_stale(&key, self.ttl, move || {
                let upstream = upstream.clone();
                let path = path.clone();
                async move {
                    upstream
                        .request_with_retry::<Value>(Method::GET, &path, RequestOptions::new())
                        .await
                }
            })
            .await?;
        Ok(cached)
    }

    pub async fn create(&self, token: Option<&str>, body: Value) -> Result<Value, AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        validate_body(&body, self.spec.required_fields)?;

        let created = self
            .deps
            .upstream
            .request_with_retry::<Value>(
                Method::POST,
                self.spec.upstream_path,
                RequestOptions::new().bearer(Some(token)).json(body),
            )
            .await?;

        let evicted = self.invalidate_lists().await;
        info!(resource = self.spec.label, evicted, "created; list caches evicted");
        Ok(created)
    }

    /// `PATCH` accepts partial bodies; `PUT` must carry every required field.
    pub async fn update(
        &self,
        token: Option<&str>,
        id: &str,
        method: Method,
        body: Value,
    ) -> Result<Value, AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        let id = validate_id(id)?;
        let required: &[&str] = if method == Method::PUT {
            self.spec.required_fields
        } else {
            &[]
        };
        validate_body(&body, required)?;

        let updated = self
            .deps
            .upstream
            .request_with_retry::<Value>(
                method,
                &format!("{}/{id}", self.spec.upstream_path),
                RequestOptions::new().bearer(Some(token)).json(body),
            )
            .await?;

        self.invalidate_item(id).await;
        Ok(updated)
    }

    pub async fn delete(&self, token: Option<&str>, id: &str) -> Result<(), AppError> {
        let token = token.ok_or(AppError::Unauthorized)?;
        let id = validate_id(id)?;

        self.deps
            .upstream
            .request_with_retry::<Value>(
                Method::DELETE,
                &format!("{}/{id}", self.spec.upstream_path),
                RequestOptions::new().bearer(Some(token)),
            )
            .await?;

        self.invalidate_item(id).await;
        Ok(())
    }

    /// Evict one item and every list variant.
    pub async fn invalidate_item(&self, id: &str) -> usize {
        self.deps.cache.invalidate(&self.item_key(id)).await;
        let evicted = self.invalidate_lists().await + 1;
        info!(resource = self.spec.label, id = %id, evicted, "item caches evicted");
        evicted
    }

    /// Evict preset pages plus every list key recorded by this process.
    ///
    /// Filtered variants issued only by other processes converge by TTL.
    pub async fn invalidate_lists(&self) -> usize {
        let keys = self.list_keys_to_evict();
        for key in &keys {
            self.deps.cache.invalidate(key).await;
        }
        debug!(resource = self.spec.label, count = keys.len(), "list keys evicted");
        keys.len()
    }

    fn list_keys_to_evict(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = preset_list_queries(self.deps.eviction_pages)
            .iter()
            .map(|query| self.list_key(query))
            .collect();
        keys.extend(self.index.drain());
        keys
    }
}

/// Unfiltered list queries for pages `1..=pages` at each preset page size.
pub fn preset_list_queries(pages: u32) -> Vec<CanonicalQuery> {
    (1..=pages.max(1))
        .flat_map(|page| {
            PRESET_LIST_LIMITS.iter().map(move |limit| {
                CollectionCache::list_query([
                    ("page", page.to_string()),
                    ("limit", limit.to_string()),
                ])
            })
        })
        .collect()
}

pub(crate) fn validate_id(id: &str) -> Result<&str, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::validation("identifier is required"));
    }
    if id.chars().all(|c| c == '.') {
        return Err(AppError::validation("identifier contains invalid characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::validation("identifier contains invalid characters"));
    }
    Ok(id)
}

pub(crate) fn validate_body(body: &Value, required: &[&str]) -> Result<(), AppError> {
    let Some(object) = body.as_object() else {
        return Err(AppError::validation("request body must be a JSON object"));
    };
    for field in required {
        let present = object
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            return Err(AppError::validation(format!("`{field}` is required")));
        }
    }
    Ok(())
}
