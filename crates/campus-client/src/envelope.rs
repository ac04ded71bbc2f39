//! The normalized outcome of one logical call
//!
//! `Envelope` is the only shape consumers depend on: transport success,
//! transport failure and degraded cache reads all arrive as one value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Pagination details returned alongside list data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMeta {
    pub current_page: u64,
    pub last_page: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
}

/// Navigation links for paginated lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLinks {
    pub first: Option<String>,
    pub last: Option<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// A decoded successful response body, as cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
}

/// Outcome of a logical API call.
///
/// `error` is for programmatic matching and is not serialized; `message`
/// carries the human-readable form.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    #[serde(skip)]
    pub error: Option<ClientError>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: None,
            links: None,
            stale: false,
            error: None,
        }
    }

    pub fn failure(error: ClientError) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(error.to_string()),
            meta: None,
            links: None,
            stale: false,
            error: Some(error),
        }
    }

    pub fn is_auth_required(&self) -> bool {
        self.error.as_ref().is_some_and(ClientError::is_auth_required)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            success: self.success,
            data: self.data.map(f),
            message: self.message,
            meta: self.meta,
            links: self.links,
            stale: self.stale,
            error: self.error,
        }
    }
}

impl Envelope<serde_json::Value> {
    pub fn from_payload(payload: Payload) -> Self {
        Self {
            success: true,
            data: Some(payload.data),
            message: payload.message,
            meta: payload.meta,
            links: payload.links,
            stale: false,
            error: None,
        }
    }

    /// A payload served from an expired cache entry after a failed call.
    pub fn stale(payload: Payload) -> Self {
        Self {
            stale: true,
            ..Self::from_payload(payload)
        }
    }

    /// Deserialize `data` into `T`; a mismatch becomes a failure envelope.
    pub fn decode<T: DeserializeOwned>(self) -> Envelope<T> {
        let data = match self.data {
            Some(value) => match serde_json::from_value::<T>(value) {
                Ok(data) => Some(data),
                Err(e) => return Envelope::failure(ClientError::Decode(e.to_string())),
            },
            None => None,
        };
        Envelope {
            success: self.success,
            data,
            message: self.message,
            meta: self.meta,
            links: self.links,
            stale: self.stale,
            error: self.error,
        }
    }
}
