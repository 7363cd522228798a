//! HTTP transport types and per-call request options.
//!
//! # Design
//! `HttpRequest` and `HttpResponse` describe a single round-trip as plain
//! data. The dispatcher builds an `HttpRequest`, hands it to a `Transport`
//! and gets an `HttpResponse` back with a fully buffered body, so the
//! normalizer never has to care where the bytes came from.
//!
//! `RequestOptions` is what callers pass to `ApiClient::dispatch`. It is kept
//! around after the first send so a queued request can be re-issued once the
//! credential has been renewed.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data.
///
/// Built by the dispatcher for every send (and every replay). `url` is
/// always absolute.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The bearer token carried by this request, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }
}

/// An HTTP response described as plain data.
///
/// The body is buffered in full, which is what makes normalization
/// repeatable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Request body attached to `RequestOptions`.
///
/// `Text` is buffered and can be sent any number of times. `OneShot` is
/// consumed by the first send and therefore cannot be replayed after a
/// credential renewal.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Text(String),
    OneShot(OneShotBody),
}

impl RequestBody {
    pub fn is_replayable(&self) -> bool {
        matches!(self, RequestBody::Text(_))
    }

    /// Materialize the body for one send.
    pub(crate) fn take_for_send(&self) -> Option<String> {
        match self {
            RequestBody::Text(text) => Some(text.clone()),
            RequestBody::OneShot(body) => body.take(),
        }
    }
}

/// A body that yields its contents exactly once, like a stream that has
/// been read.
#[derive(Debug, Clone, Default)]
pub struct OneShotBody(Arc<Mutex<Option<String>>>);

impl OneShotBody {
    pub fn new(contents: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(Some(contents.into()))))
    }

    pub fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Per-call options, the fetch-style counterpart of `HttpRequest`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Return 401/403 responses as-is instead of renewing the credential.
    pub skip_auth_refresh: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(HttpMethod::Get)
    }
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: None,
            skip_auth_refresh: false,
        }
    }

    /// Options carrying `body` serialized as JSON.
    pub fn json<B: Serialize + ?Sized>(method: HttpMethod, body: &B) -> Result<Self, ApiError> {
        let encoded = serde_json::to_string(body).map_err(|e| ApiError::serialization(e.to_string()))?;
        Ok(Self::new(method)
            .header("content-type", "application/json")
            .body(RequestBody::Text(encoded)))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn skip_auth_refresh(mut self) -> Self {
        self.skip_auth_refresh = true;
        self
    }

    /// Whether the request can be sent again after its first attempt.
    pub fn is_replayable(&self) -> bool {
        self.body.as_ref().map_or(true, RequestBody::is_replayable)
    }

    pub(crate) fn has_header(&self, name: &str) -> bool {
        find_header(&self.headers, name).is_some()
    }
}
