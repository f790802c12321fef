//! Route handlers. Each one resolves the session token (where needed) and
//! delegates to a domain cache adapter; errors render through `AppError`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::collection::CollectionCache;
use crate::application::error::AppError;
use crate::cache::{Cached, RemoteStatus};

use super::HttpState;

#[derive(Debug, Serialize)]
pub struct SuccessBody {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    pub status: &'static str,
    pub distributed_cache: RemoteStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct LandingQuery {
    pub locale: Option<String>,
}

type QueryPairs = Query<Vec<(String, String)>>;
type JsonBody = Result<Json<Value>, JsonRejection>;

pub async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let distributed_cache = state.services.cache.store().remote_status().await;
    Json(HealthBody {
        status: "ok",
        distributed_cache,
    })
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}

pub async fn list_posts(
    State(state): State<HttpState>,
    Query(pairs): QueryPairs,
) -> Result<impl IntoResponse, AppError> {
    list(&state.services.posts, pairs).await
}

pub async fn get_post(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    get(&state.services.posts, &id).await
}

pub async fn create_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    create(&state.services.posts, token, body).await
}

pub async fn update_post(
    State(state): State<HttpState>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    update(&state.services.posts, token, &id, method, body).await
}

pub async fn delete_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    delete(&state.services.posts, token, &id).await
}

pub async fn list_jobs(
    State(state): State<HttpState>,
    Query(pairs): QueryPairs,
) -> Result<impl IntoResponse, AppError> {
    list(&state.services.jobs, pairs).await
}

pub async fn get_job(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    get(&state.services.jobs, &id).await
}

pub async fn create_job(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    create(&state.services.jobs, token, body).await
}

pub async fn update_job(
    State(state): State<HttpState>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    update(&state.services.jobs, token, &id, method, body).await
}

pub async fn delete_job(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    delete(&state.services.jobs, token, &id).await
}

pub async fn quiz_landing(
    State(state): State<HttpState>,
    Query(query): Query<LandingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let cached = state.services.quiz.landing(query.locale.as_deref()).await?;
    Ok(Json(cached))
}

pub async fn create_quiz(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    let token = token.ok_or(AppError::Unauthorized)?;
    let body = json_body(body)?;
    let created = state.services.quiz.create(Some(&token), body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_profile(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    let profile = state.services.profile.get(token.as_deref()).await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.require(&headers)?;
    let body = json_body(body)?;
    let profile = state.services.profile.update(Some(&token), body).await?;
    Ok(Json(profile))
}

pub async fn mercure_token(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    let hub_token = state.services.mercure.token(token.as_deref()).await?;
    Ok(Json(hub_token))
}

pub async fn forget_mercure_token(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = state.services.session.bearer_token(&headers);
    state.services.mercure.forget(token.as_deref()).await?;
    Ok(Json(SuccessBody { success: true }))
}

async fn list(
    collection: &CollectionCache,
    pairs: Vec<(String, String)>,
) -> Result<Json<Cached<Value>>, AppError> {
    let cached = collection.list(pairs).await?;
    Ok(Json(cached))
}

async fn get(collection: &CollectionCache, id: &str) -> Result<Json<Cached<Value>>, AppError> {
    let cached = collection.get(id).await?;
    Ok(Json(cached))
}

async fn create(
    collection: &CollectionCache,
    token: Option<String>,
    body: JsonBody,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    let body = json_body(body)?;
    let created = collection.create(Some(&token), body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update(
    collection: &CollectionCache,
    token: Option<String>,
    id: &str,
    method: Method,
    body: JsonBody,
) -> Result<Json<Value>, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    let body = json_body(body)?;
    let updated = collection.update(Some(&token), id, method, body).await?;
    Ok(Json(updated))
}

async fn delete(
    collection: &CollectionCache,
    token: Option<String>,
    id: &str,
) -> Result<Json<SuccessBody>, AppError> {
    collection.delete(token.as_deref(), id).await?;
    Ok(Json(SuccessBody { success: true }))
}

/// Malformed bodies are reported only after the session check.
fn json_body(body: JsonBody) -> Result<Value, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}
