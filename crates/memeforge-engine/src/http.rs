use std::sync::OnceLock;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Desktop Firefox identity presented to services that fingerprint clients.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:138.0) Gecko/20100101 Firefox/138.0";

pub const BROWSER_ACCEPT: &str = "application/json, text/plain, */*";

/// Blocking HTTP client built on first use.
///
/// Construction is deferred so engines can be assembled on an async
/// runtime thread and only touch the blocking client from worker threads.
#[derive(Debug, Default)]
pub struct LazyClient {
    client: OnceLock<HttpClient>,
}

impl LazyClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> EngineResult<&HttpClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = HttpClient::builder()
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|err| EngineError::transport("http client", &err))?;
        Ok(self.client.get_or_init(|| built))
    }
}

/// Headers a browser tab on `origin` would send along with an XHR.
pub fn browser_headers(origin: &str, referer_path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(ORIGIN, value);
    }
    let referer = format!("{}{}", origin.trim_end_matches('/'), referer_path);
    if let Ok(value) = HeaderValue::from_str(&referer) {
        headers.insert(REFERER, value);
    }
    headers
}

/// Status and raw body of a finished exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub status: u16,
    pub body: String,
}

impl ServiceReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn read(endpoint: &str, response: HttpResponse) -> EngineResult<Self> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| EngineError::transport(endpoint, &err))?;
        Ok(Self { status, body })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    pub fn body_excerpt(&self) -> String {
        truncate_text(self.body.trim(), 256)
    }
}

/// Members of a collection response, either a bare array or a hydra
/// `{"hydra:member": [...]}` envelope.
pub fn collection_members(payload: &Value) -> Vec<Value> {
    payload
        .as_array()
        .or_else(|| payload.get("hydra:member").and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
