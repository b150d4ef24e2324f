//! `session_id` cookie handling.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};

use crate::session::{is_valid_session_id, new_session_id};

pub const SESSION_COOKIE: &str = "session_id";

fn value_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// `Set-Cookie` value for a session id.
pub fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
}

/// The browser's session id.
///
/// A missing or malformed cookie yields a fresh id with `issued` set; the
/// handler must then send [`SessionCookie::headers`] back.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub id: String,
    pub issued: bool,
}

impl SessionCookie {
    pub fn fresh() -> Self {
        Self {
            id: new_session_id(),
            issued: true,
        }
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| value_from_cookie_header(header, SESSION_COOKIE))
            .filter(|id| is_valid_session_id(id))
            .map(|id| Self {
                id: id.to_string(),
                issued: false,
            })
            .unwrap_or_else(Self::fresh)
    }

    /// Headers to attach to the response. Empty unless a new id was issued.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.issued {
            return headers;
        }
        if let Ok(value) = HeaderValue::from_str(&session_cookie(&self.id)) {
            headers.insert(SET_COOKIE, value);
        }
        headers
    }
}

impl<S> FromRequestParts<S> for SessionCookie
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
