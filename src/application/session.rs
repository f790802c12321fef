//! Session collaborator: where bearer tokens come from.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::CookieJar;

use super::error::AppError;

pub const DEFAULT_SESSION_COOKIE: &str = "auth_token";

pub trait SessionProvider: Send + Sync {
    /// Current bearer token, if the request carries one.
    fn bearer_token(&self, headers: &HeaderMap) -> Option<String>;

    /// Bearer token or [`AppError::Unauthorized`].
    fn require(&self, headers: &HeaderMap) -> Result<String, AppError> {
        self.bearer_token(headers).ok_or(AppError::Unauthorized)
    }
}

/// Reads `Authorization: Bearer ...`, falling back to the session cookie.
#[derive(Debug, Clone)]
pub struct HeaderSession {
    cookie_name: String,
}

impl HeaderSession {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }
}

impl Default for HeaderSession {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE)
    }
}

impl SessionProvider for HeaderSession {
    fn bearer_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                let (scheme, token) = value.trim().split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
            })
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        if from_header.is_some() {
            return from_header;
        }

        CookieJar::from_headers(headers)
            .get(&self.cookie_name)
            .map(|cookie| cookie.value().trim().to_string())
            .filter(|token| !token.is_empty())
    }
}
