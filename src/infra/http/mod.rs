pub mod handlers;
mod middleware;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::Services;

#[derive(Clone)]
pub struct HttpState {
    pub services: Services,
}

impl HttpState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Full HTTP surface: cached `/api` routes plus `/health`.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/{id}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .put(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route(
            "/api/jobs",
            get(handlers::list_jobs).post(handlers::create_job),
        )
        .route(
            "/api/jobs/{id}",
            get(handlers::get_job)
                .patch(handlers::update_job)
                .put(handlers::update_job)
                .delete(handlers::delete_job),
        )
        .route("/api/quiz/landing", get(handlers::quiz_landing))
        .route("/api/quiz", post(handlers::create_quiz))
        .route(
            "/api/profile",
            get(handlers::get_profile).patch(handlers::update_profile),
        )
        .route(
            "/api/mercure/token",
            get(handlers::mercure_token).delete(handlers::forget_mercure_token),
        )
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
