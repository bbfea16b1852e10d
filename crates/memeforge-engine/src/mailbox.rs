//! Disposable inboxes on a mail.tm compatible service.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AcquisitionStep, EngineError, EngineResult};
use crate::http::{collection_members, LazyClient, ServiceReply};

const LOCAL_PART_LEN: usize = 10;
const PASSWORD_LEN: usize = 12;

/// Inbox created for a single acquisition and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposableMailAccount {
    pub address: String,
    pub password: String,
    pub id: String,
    pub session_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub id: String,
    pub subject: Option<String>,
}

pub trait MailboxProvider: Send + Sync {
    fn create_account(&self) -> EngineResult<DisposableMailAccount>;

    /// Messages currently in the inbox. Failures read as an empty inbox.
    fn list_messages(&self, account: &DisposableMailAccount) -> Vec<EmailMessage>;

    /// Plain-text body of one message, if it could be fetched.
    fn fetch_message_body(&self, account: &DisposableMailAccount, message_id: &str)
        -> Option<String>;
}

pub struct MailTmClient {
    base_url: String,
    timeout: Duration,
    http: LazyClient,
}

impl MailTmClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http: LazyClient::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.mail_api_url.clone(), config.timeouts.mailbox)
    }

    fn get(&self, path: &str, bearer: Option<&str>) -> EngineResult<ServiceReply> {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut request = self.http.get()?.get(&endpoint).timeout(self.timeout);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| EngineError::transport(&endpoint, &err))?;
        ServiceReply::read(&endpoint, response)
    }

    fn post(&self, path: &str, payload: &Value) -> EngineResult<ServiceReply> {
        let endpoint = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get()?
            .post(&endpoint)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .map_err(|err| EngineError::transport(&endpoint, &err))?;
        ServiceReply::read(&endpoint, response)
    }

    fn active_domain(&self) -> EngineResult<String> {
        let reply = self.get("/domains", None)?;
        if reply.status != 200 {
            return Err(mailbox_error(format!(
                "domain listing answered {}: {}",
                reply.status,
                reply.body_excerpt()
            )));
        }
        let payload = reply
            .json()
            .ok_or_else(|| mailbox_error("domain listing was not JSON"))?;
        collection_members(&payload)
            .iter()
            .filter(|domain| domain.get("isActive").and_then(Value::as_bool).unwrap_or(false))
            .find_map(|domain| domain.get("domain").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| mailbox_error("no active domains available"))
    }
}

impl MailboxProvider for MailTmClient {
    fn create_account(&self) -> EngineResult<DisposableMailAccount> {
        let create = || -> EngineResult<DisposableMailAccount> {
            let domain = self.active_domain()?;
            let address = format!("{}@{}", random_local_part(LOCAL_PART_LEN), domain);
            let password = random_password(PASSWORD_LEN);
            let credentials = json!({"address": address, "password": password});

            let created = self.post("/accounts", &credentials)?;
            if created.status != 201 {
                return Err(mailbox_error(format!(
                    "account creation answered {}: {}",
                    created.status,
                    created.body_excerpt()
                )));
            }
            let id = created
                .json()
                .and_then(|body| body.get("id").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| mailbox_error("account creation returned no id"))?;

            let session = self.post("/token", &credentials)?;
            if session.status != 200 {
                return Err(mailbox_error(format!(
                    "mailbox login answered {}: {}",
                    session.status,
                    session.body_excerpt()
                )));
            }
            let session_token = session
                .json()
                .and_then(|body| body.get("token").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| mailbox_error("mailbox login returned no token"))?;

            Ok(DisposableMailAccount {
                address,
                password,
                id,
                session_token,
            })
        };
        let account = create().map_err(|err| err.during(AcquisitionStep::Mailbox))?;
        info!("Created disposable mailbox {}", account.address);
        Ok(account)
    }

    fn list_messages(&self, account: &DisposableMailAccount) -> Vec<EmailMessage> {
        let reply = match self.get("/messages", Some(&account.session_token)) {
            Ok(reply) if reply.status == 200 => reply,
            Ok(reply) => {
                debug!("Message listing answered {}", reply.status);
                return Vec::new();
            }
            Err(err) => {
                warn!("Message listing failed: {err}");
                return Vec::new();
            }
        };
        let Some(payload) = reply.json() else {
            return Vec::new();
        };
        collection_members(&payload)
            .iter()
            .filter_map(|message| {
                let id = message.get("id").and_then(Value::as_str)?;
                Some(EmailMessage {
                    id: id.to_string(),
                    subject: message
                        .get("subject")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect()
    }

    fn fetch_message_body(
        &self,
        account: &DisposableMailAccount,
        message_id: &str,
    ) -> Option<String> {
        let path = format!("/messages/{message_id}");
        match self.get(&path, Some(&account.session_token)) {
            Ok(reply) if reply.status == 200 => reply
                .json()
                .and_then(|body| body.get("text").and_then(Value::as_str).map(str::to_string)),
            Ok(reply) => {
                debug!("Message {message_id} answered {}", reply.status);
                None
            }
            Err(err) => {
                warn!("Fetching message {message_id} failed: {err}");
                None
            }
        }
    }
}

fn mailbox_error(reason: impl Into<String>) -> EngineError {
    EngineError::acquisition(AcquisitionStep::Mailbox, reason)
}

fn random_local_part(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
