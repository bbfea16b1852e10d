//! Passwordless email sign-in against the identity provider.

use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AcquisitionStep, EngineError, EngineResult};
use crate::http::{browser_headers, LazyClient, ServiceReply};

/// Exchange of an email address for a bearer token via a one-time code.
pub trait IdentityExchange: Send + Sync {
    /// Asks the provider to mail a one-time code to `email`.
    fn request_otp(&self, email: &str) -> EngineResult<()>;

    /// Trades `code` for the provider's access token.
    fn verify_otp(&self, email: &str, code: &str) -> EngineResult<String>;
}

pub struct HttpIdentityClient {
    base_url: String,
    api_key: Option<String>,
    site_origin: String,
    timeout: Duration,
    http: LazyClient,
}

impl HttpIdentityClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        site_origin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if api_key.is_none() {
            warn!("No identity API key configured; OTP requests will likely be rejected");
        }
        Self {
            base_url,
            api_key,
            site_origin: site_origin.into(),
            timeout,
            http: LazyClient::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.identity_url.clone(),
            config.identity_api_key.clone(),
            config.site_origin.clone(),
            config.timeouts.identity,
        )
    }

    fn post(&self, path: &str, payload: &Value) -> EngineResult<ServiceReply> {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut headers = browser_headers(&self.site_origin, "/");
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert("x-client-info", HeaderValue::from_static("supabase-ssr/0.1.0"));
        headers.insert(
            "x-supabase-api-version",
            HeaderValue::from_static("2024-01-01"),
        );
        if let Some(key) = self.api_key.as_deref() {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("apikey", value);
            }
        }
        let response = self
            .http
            .get()?
            .post(&endpoint)
            .headers(headers)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .map_err(|err| EngineError::transport(&endpoint, &err))?;
        ServiceReply::read(&endpoint, response)
    }
}

impl IdentityExchange for HttpIdentityClient {
    fn request_otp(&self, email: &str) -> EngineResult<()> {
        let payload = json!({
            "email": email,
            "data": {},
            "create_user": true,
            "gotrue_meta_security": {},
        });
        let reply = self
            .post("/otp", &payload)
            .map_err(|err| err.during(AcquisitionStep::RequestOtp))?;
        if reply.status == 200 || reply.status == 201 {
            info!("OTP requested for {email}");
            return Ok(());
        }
        Err(EngineError::acquisition(
            AcquisitionStep::RequestOtp,
            format!("identity provider answered {}: {}", reply.status, reply.body_excerpt()),
        ))
    }

    fn verify_otp(&self, email: &str, code: &str) -> EngineResult<String> {
        let payload = json!({
            "email": email,
            "token": code,
            "type": "email",
            "gotrue_meta_security": {},
        });
        let reply = self
            .post("/verify", &payload)
            .map_err(|err| err.during(AcquisitionStep::VerifyOtp))?;
        if reply.status != 200 {
            return Err(EngineError::acquisition(
                AcquisitionStep::VerifyOtp,
                format!("identity provider answered {}: {}", reply.status, reply.body_excerpt()),
            ));
        }
        let token = reply
            .json()
            .and_then(|body| body.get("access_token").and_then(Value::as_str).map(str::to_string))
            .filter(|token| !token.is_empty());
        match token {
            Some(token) => {
                debug!("OTP verified for {email}");
                Ok(token)
            }
            None => Err(EngineError::acquisition(
                AcquisitionStep::VerifyOtp,
                "verification succeeded without an access_token",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{HttpIdentityClient, IdentityExchange};
    use crate::config::{EngineConfig, DEFAULT_IDENTITY_API_KEY};
    use crate::error::{AcquisitionStep, EngineError};
    use crate::testing::CannedServer;

    fn client(server: &CannedServer, api_key: Option<&str>) -> HttpIdentityClient {
        HttpIdentityClient::new(
            server.base_url(),
            api_key.map(str::to_string),
            "https://supermeme.ai",
            Duration::from_secs(5),
        )
    }

    #[test]
    fn request_otp_posts_signup_payload() -> anyhow::Result<()> {
        let server = CannedServer::json(vec![(200, json!({}))]);
        client(&server, Some("anon-key")).request_otp("abc@example.test")?;

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/otp");
        assert_eq!(request.header("apikey"), Some("anon-key"));
        assert_eq!(request.header("x-supabase-api-version"), Some("2024-01-01"));
        assert_eq!(request.header("referer"), Some("https://supermeme.ai/"));
        let body = request.json();
        assert_eq!(body["email"], "abc@example.test");
        assert_eq!(body["create_user"], true);
        Ok(())
    }

    #[test]
    fn request_otp_rejection_is_an_acquisition_error() {
        let server = CannedServer::json(vec![(422, json!({"msg": "bad email"}))]);
        let err = client(&server, None)
            .request_otp("abc@example.test")
            .err()
            .map(|err| err.to_string());
        let message = err.unwrap_or_default();
        assert!(message.contains("otp request"), "{message}");
        assert!(message.contains("422"), "{message}");
    }

    #[test]
    fn verify_otp_returns_access_token() -> anyhow::Result<()> {
        let server = CannedServer::json(vec![(
            200,
            json!({"access_token": "bearer-xyz", "token_type": "bearer"}),
        )]);
        let token = client(&server, None).verify_otp("abc@example.test", "123456")?;
        assert_eq!(token, "bearer-xyz");
        let body = server.requests()[0].json();
        assert_eq!(body["token"], "123456");
        assert_eq!(body["type"], "email");
        Ok(())
    }

    #[test]
    fn verify_without_token_fails() {
        let server = CannedServer::json(vec![(200, json!({"user": {}}))]);
        let result = client(&server, None).verify_otp("abc@example.test", "123456");
        assert!(matches!(
            result,
            Err(EngineError::Acquisition {
                step: AcquisitionStep::VerifyOtp,
                ..
            })
        ));
    }

    #[test]
    fn default_config_sends_anon_key() -> anyhow::Result<()> {
        let server = CannedServer::json(vec![(200, json!({}))]);
        let mut config = EngineConfig::default();
        config.identity_url = server.base_url().to_string();
        HttpIdentityClient::from_config(&config).request_otp("abc@example.test")?;
        assert_eq!(
            server.requests()[0].header("apikey"),
            Some(DEFAULT_IDENTITY_API_KEY)
        );
        Ok(())
    }
}
