//! Domain cache adapters and the services bundle handed to HTTP handlers.

pub mod collection;
pub mod error;
pub mod mercure;
pub mod profile;
pub mod quiz;
pub mod session;

use std::sync::Arc;

use crate::cache::{CacheConfig, ListKeyIndex, Namespace, ReadThroughCache};
use crate::upstream::UpstreamClient;

use collection::{CollectionCache, CollectionDeps, CollectionSpec};
use mercure::MercureTokenCache;
use profile::ProfileCache;
use quiz::QuizCache;
use session::SessionProvider;

pub const POSTS: CollectionSpec = CollectionSpec {
    label: "posts",
    namespace: Namespace::Blog,
    upstream_path: "posts",
    required_fields: &["title"],
};

pub const JOBS: CollectionSpec = CollectionSpec {
    label: "jobs",
    namespace: Namespace::Jobs,
    upstream_path: "jobs",
    required_fields: &["title"],
};

#[derive(Clone)]
pub struct Services {
    pub posts: Arc<CollectionCache>,
    pub jobs: Arc<CollectionCache>,
    pub quiz: Arc<QuizCache>,
    pub profile: Arc<ProfileCache>,
    pub mercure: Arc<MercureTokenCache>,
    pub session: Arc<dyn SessionProvider>,
    pub cache: ReadThroughCache,
}

impl Services {
    pub fn new(
        config: &CacheConfig,
        cache: ReadThroughCache,
        upstream: UpstreamClient,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let keys = config.key_space();
        let index_limit = config.list_key_index_limit_non_zero();
        let deps = CollectionDeps {
            cache: cache.clone(),
            upstream: upstream.clone(),
            keys: keys.clone(),
            eviction_pages: config.list_eviction_pages,
        };

        let posts = CollectionCache::new(
            POSTS,
            deps.clone(),
            config.ttl.posts(),
            ListKeyIndex::new(index_limit),
        );
        let jobs = CollectionCache::new(
            JOBS,
            deps,
            config.ttl.jobs(),
            ListKeyIndex::new(index_limit),
        );
        let quiz = QuizCache::new(
            cache.clone(),
            upstream.clone(),
            keys.clone(),
            config.ttl.quiz(),
            ListKeyIndex::new(index_limit),
        );
        let profile = ProfileCache::new(
            cache.clone(),
            upstream.clone(),
            keys.clone(),
            config.ttl.profile(),
        );
        let mercure = MercureTokenCache::new(cache.clone(), upstream, keys, config.ttl.mercure_token());

        Self {
            posts: Arc::new(posts),
            jobs: Arc::new(jobs),
            quiz: Arc::new(quiz),
            profile: Arc::new(profile),
            mercure: Arc::new(mercure),
            session,
            cache,
        }
    }
}
