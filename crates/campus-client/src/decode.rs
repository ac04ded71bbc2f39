//! Response body decoding at the API boundary
//!
//! The content API answers in several shapes: a full `{success, data, ...}`
//! envelope, a bare resource `{data, meta, links}`, or plain JSON. Paginated
//! lists sometimes arrive one level deeper as `data.data`, either as a
//! resource collection or as a raw paginator object. All of that is
//! normalized here, once, into a `Payload` or a `ClientError`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::envelope::{PageLinks, PageMeta, Payload};
use crate::error::ClientError;

/// Messages that mean "your session is missing or invalid".
pub const DEFAULT_AUTH_SENTINELS: &[&str] = &[
    "Unauthenticated.",
    "Unauthorized",
    "Token not provided",
    "Token has expired",
];

/// Body messages the server uses instead of a 401 status.
///
/// Compared case-insensitively, ignoring surrounding whitespace and a
/// trailing period.
#[derive(Debug, Clone)]
pub struct AuthSentinels {
    normalized: Vec<String>,
}

impl AuthSentinels {
    pub fn new<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            normalized: messages
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        let message = normalize(message);
        self.normalized.iter().any(|s| *s == message)
    }
}

impl Default for AuthSentinels {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_SENTINELS)
    }
}

fn normalize(message: &str) -> String {
    message.trim().trim_end_matches('.').trim_end().to_lowercase()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBody {
    Envelope {
        success: bool,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        message: Option<Value>,
        #[serde(default)]
        meta: Option<Value>,
        #[serde(default)]
        links: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    Resource {
        data: Value,
        #[serde(default)]
        message: Option<Value>,
        #[serde(default)]
        meta: Option<Value>,
        #[serde(default)]
        links: Option<Value>,
    },
    Bare(Value),
}

/// Decode a 2xx response body.
///
/// A body that reports `success: false` becomes a non-retryable
/// `Application` error carrying the 2xx status, or `AuthRequired` when its
/// message is a sentinel.
pub fn decode_success(
    status: u16,
    body: &[u8],
    sentinels: &AuthSentinels,
) -> Result<Payload, ClientError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload {
            data: Value::Null,
            message: None,
            meta: None,
            links: None,
        });
    }

    let wire: WireBody =
        serde_json::from_slice(body).map_err(|e| ClientError::Decode(e.to_string()))?;

    match wire {
        WireBody::Envelope {
            success: false,
            message,
            error,
            ..
        } => {
            let message = message
                .as_ref()
                .and_then(text)
                .or_else(|| error.as_ref().and_then(text))
                .unwrap_or_else(|| "request failed".to_string());
            Err(classify(status, message, sentinels))
        }
        WireBody::Envelope {
            success: true,
            data,
            message,
            meta,
            links,
            ..
        }
        | WireBody::Resource {
            data,
            message,
            meta,
            links,
        } => Ok(normalize_payload(
            data,
            message.as_ref().and_then(text),
            meta,
            links,
        )),
        WireBody::Bare(value) => {
            // `{"message": "Unauthenticated."}` with a 200
            if let Some(message) = value.get("message").and_then(text)
                && sentinels.matches(&message)
            {
                return Err(ClientError::AuthRequired(message));
            }
            Ok(Payload {
                data: value,
                message: None,
                meta: None,
                links: None,
            })
        }
    }
}

/// Turn a non-2xx response body into an error.
pub fn decode_failure(status: u16, body: &[u8], sentinels: &AuthSentinels) -> ClientError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.get("message")
                .and_then(text)
                .or_else(|| v.get("error").and_then(text))
        })
        .or_else(|| {
            let raw = String::from_utf8_lossy(body);
            let raw = raw.trim();
            (!raw.is_empty() && parsed.is_none() && raw.len() <= 200).then(|| raw.to_string())
        })
        .unwrap_or_else(|| format!("request failed with status {status}"));
    classify(status, message, sentinels)
}

fn classify(status: u16, message: String, sentinels: &AuthSentinels) -> ClientError {
    if sentinels.matches(&message) {
        ClientError::AuthRequired(message)
    } else {
        ClientError::Application { status, message }
    }
}

/// Human-readable text from a message or error field.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(obj) => obj.get("message").and_then(text),
        _ => None,
    }
}

fn normalize_payload(
    data: Value,
    message: Option<String>,
    meta: Option<Value>,
    links: Option<Value>,
) -> Payload {
    let mut meta = meta.and_then(page_meta);
    let mut links = links.and_then(page_links);

    let data = match data {
        Value::Object(inner) if is_nested_page(&inner) => {
            let (lifted, inner_meta, inner_links) = lift(inner);
            meta = meta.or(inner_meta);
            links = links.or(inner_links);
            lifted
        }
        other => other,
    };

    Payload {
        data,
        message,
        meta,
        links,
    }
}

/// Whether `data` is itself a page wrapper rather than a record that happens
/// to contain a `data` field.
fn is_nested_page(inner: &Map<String, Value>) -> bool {
    if !inner.contains_key("data") {
        return false;
    }
    inner.contains_key("current_page")
        || inner
            .keys()
            .all(|k| matches!(k.as_str(), "data" | "meta" | "links" | "message" | "success"))
}

fn lift(mut inner: Map<String, Value>) -> (Value, Option<PageMeta>, Option<PageLinks>) {
    let data = inner.remove("data").unwrap_or(Value::Null);

    if inner.contains_key("current_page") {
        // Raw paginator: meta fields and `*_page_url` links inline
        let links = PageLinks {
            first: url_field(&inner, "first_page_url"),
            last: url_field(&inner, "last_page_url"),
            prev: url_field(&inner, "prev_page_url"),
            next: url_field(&inner, "next_page_url"),
        };
        let meta = page_meta(Value::Object(inner));
        return (data, meta, Some(links));
    }

    let meta = inner.remove("meta").and_then(page_meta);
    let links = inner.remove("links").and_then(page_links);
    (data, meta, links)
}

fn url_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

// Both helpers are lenient: a paginator's `links` is sometimes an array of
// page buttons, which is not navigation links and is dropped.
fn page_meta(value: Value) -> Option<PageMeta> {
    match value {
        Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

fn page_links(value: Value) -> Option<PageLinks> {
    match value {
        Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    }
}
