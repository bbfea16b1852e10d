use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http::{browser_headers, LazyClient, ServiceReply};

/// Body of a text-to-meme call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemeRequest {
    pub text: String,
    pub max_dimension: u32,
    pub input_language: String,
    pub output_language: String,
}

impl MemeRequest {
    pub fn new(
        text: impl Into<String>,
        max_dimension: u32,
        input_language: impl Into<String>,
        output_language: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            max_dimension,
            input_language: input_language.into(),
            output_language: output_language.into(),
        }
    }

    /// Minimal request used to test whether a token is still accepted.
    pub fn probe() -> Self {
        Self::new("test", 500, "en", "en")
    }
}

/// How the meme service answered, as far as token handling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    Success,
    QuotaExceeded,
    AuthRejected,
    Failed(u16),
}

impl ReplyClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            429 => Self::QuotaExceeded,
            401 | 403 => Self::AuthRejected,
            other => Self::Failed(other),
        }
    }

    /// Whether the token used for the call must be replaced.
    pub fn burns_token(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::AuthRejected)
    }
}

pub trait MemeService: Send + Sync {
    fn text_to_meme(
        &self,
        token: &str,
        request: &MemeRequest,
        timeout: Duration,
    ) -> EngineResult<ServiceReply>;
}

pub struct HttpMemeService {
    api_url: String,
    site_origin: String,
    http: LazyClient,
}

impl HttpMemeService {
    pub fn new(api_url: impl Into<String>, site_origin: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            site_origin: site_origin.into(),
            http: LazyClient::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.meme_api_url.clone(), config.site_origin.clone())
    }
}

impl MemeService for HttpMemeService {
    fn text_to_meme(
        &self,
        token: &str,
        request: &MemeRequest,
        timeout: Duration,
    ) -> EngineResult<ServiceReply> {
        let mut headers = browser_headers(&self.site_origin, "/text-to-meme");
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let token_value = HeaderValue::from_str(token).map_err(|_| EngineError::Transport {
            endpoint: self.api_url.clone(),
            message: "token contains characters not allowed in a header".to_string(),
        })?;
        headers.insert("token", token_value);
        let response = self
            .http
            .get()?
            .post(&self.api_url)
            .headers(headers)
            .json(request)
            .timeout(timeout)
            .send()
            .map_err(|err| EngineError::transport(&self.api_url, &err))?;
        ServiceReply::read(&self.api_url, response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{HttpMemeService, MemeRequest, MemeService, ReplyClass};
    use crate::testing::CannedServer;

    #[test]
    fn request_serializes_camel_case() -> anyhow::Result<()> {
        let value = serde_json::to_value(MemeRequest::new("cats", 500, "en", "de"))?;
        assert_eq!(
            value,
            json!({"text": "cats", "maxDimension": 500, "inputLanguage": "en", "outputLanguage": "de"})
        );
        Ok(())
    }

    #[test]
    fn classification_of_statuses() {
        assert_eq!(ReplyClass::of(200), ReplyClass::Success);
        assert_eq!(ReplyClass::of(429), ReplyClass::QuotaExceeded);
        assert_eq!(ReplyClass::of(401), ReplyClass::AuthRejected);
        assert_eq!(ReplyClass::of(403), ReplyClass::AuthRejected);
        assert_eq!(ReplyClass::of(500), ReplyClass::Failed(500));
        assert!(ReplyClass::of(429).burns_token());
        assert!(!ReplyClass::of(500).burns_token());
    }

    #[test]
    fn call_sends_token_header_and_browser_identity() -> anyhow::Result<()> {
        let server = CannedServer::json(vec![(200, json!({"response": {"results": []}}))]);
        let service = HttpMemeService::new(
            format!("{}/api/meme/text-to-meme-2", server.base_url()),
            "https://supermeme.ai",
        );
        let reply = service.text_to_meme("tok-1", &MemeRequest::probe(), Duration::from_secs(5))?;
        assert_eq!(reply.status, 200);

        let request = &server.requests()[0];
        assert_eq!(request.path, "/api/meme/text-to-meme-2");
        assert_eq!(request.header("token"), Some("tok-1"));
        assert_eq!(request.header("origin"), Some("https://supermeme.ai"));
        assert!(request
            .header("user-agent")
            .is_some_and(|agent| agent.contains("Firefox")));
        assert_eq!(request.json()["text"], "test");
        Ok(())
    }
}
