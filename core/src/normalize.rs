//! Response normalization.
//!
//! # Design
//! Every response, whatever its status or content type, becomes a
//! `NormalizedResult`. JSON bodies go through fixed field-precedence tables
//! (RFC 7807 Problem Details first), anything else is treated as text.
//! `normalize` is a pure function of the buffered response.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::http::HttpResponse;

/// Message candidates for failed JSON responses, highest priority first.
const MESSAGE_FIELDS: [&str; 4] = ["detail", "message", "error", "title"];

/// Code candidates for failed JSON responses, highest priority first.
const CODE_FIELDS: [&str; 2] = ["type", "code"];

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }
}

/// Uniform outcome of a dispatched request.
///
/// Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResult<T = Payload> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub status: u16,
    pub ok: bool,
}

impl<T> NormalizedResult<T> {
    pub fn success(data: T, status: u16) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status,
            ok: true,
        }
    }

    /// A failed result; status comes from the error.
    pub fn failure(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            status: error.status,
            error: Some(error),
            ok: false,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(ApiError::parse("result carries neither data nor error", self.status)),
        }
    }
}

impl NormalizedResult<Payload> {
    /// Deserialize the payload into `T`. Text payloads decode as JSON
    /// strings. A payload that does not fit `T` becomes `PARSE_ERROR`.
    pub fn decode<T: DeserializeOwned>(self) -> NormalizedResult<T> {
        let status = self.status;
        match (self.data, self.error) {
            (_, Some(error)) => NormalizedResult::failure(error),
            (Some(payload), None) => {
                let value = match payload {
                    Payload::Json(value) => value,
                    Payload::Text(text) => Value::String(text),
                };
                match serde_json::from_value(value) {
                    Ok(data) => NormalizedResult::success(data, status),
                    Err(e) => NormalizedResult::failure(ApiError::parse(e.to_string(), status)),
                }
            }
            (None, None) => NormalizedResult::failure(ApiError::parse("empty result", status)),
        }
    }
}

/// Convert a raw response into a `NormalizedResult`.
pub fn normalize(response: &HttpResponse) -> NormalizedResult {
    let status = response.status;
    let is_success = (200..300).contains(&status);

    if !is_json(response.content_type()) {
        return if is_success {
            NormalizedResult::success(Payload::Text(response.body.clone()), status)
        } else {
            let message = if response.body.trim().is_empty() {
                fallback_message(status)
            } else {
                response.body.clone()
            };
            NormalizedResult::failure(ApiError::new(ApiError::http_code(status), message, status))
        };
    }

    if response.body.trim().is_empty() {
        return if is_success {
            NormalizedResult::success(Payload::Json(Value::Null), status)
        } else {
            NormalizedResult::failure(ApiError::new(ApiError::http_code(status), fallback_message(status), status))
        };
    }

    let body: Value = match serde_json::from_str(&response.body) {
        Ok(body) => body,
        Err(e) => return NormalizedResult::failure(ApiError::parse(e.to_string(), status)),
    };

    if is_success {
        let data = match body {
            Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
            other => other,
        };
        return NormalizedResult::success(Payload::Json(data), status);
    }

    let message = first_text(&body, &MESSAGE_FIELDS).unwrap_or_else(|| fallback_message(status));
    let code = first_text(&body, &CODE_FIELDS).unwrap_or_else(|| ApiError::http_code(status));
    NormalizedResult::failure(ApiError::new(code, message, status).with_details(body))
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("application/json") || ct.contains("+json")
    })
}

/// First field of `fields` holding a string or number.
fn first_text(body: &Value, fields: &[&str]) -> Option<String> {
    let map = body.as_object()?;
    fields.iter().find_map(|field| match map.get(*field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn fallback_message(status: u16) -> String {
    let reason = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return format!("HTTP {status}"),
    };
    reason.to_string()
}
