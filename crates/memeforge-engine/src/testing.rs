//! Test doubles: an in-process HTTP responder for the blocking clients and
//! scripted fakes for the engine's service seams.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::{AcquisitionStep, EngineError, EngineResult};
use crate::http::ServiceReply;
use crate::identity::IdentityExchange;
use crate::mailbox::{DisposableMailAccount, EmailMessage, MailboxProvider};
use crate::service::{MemeRequest, MemeService};

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Serves `responses` in order, one connection each, then stops accepting.
pub(crate) struct CannedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl CannedServer {
    pub fn start(responses: Vec<(u16, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind canned server");
        let addr = listener.local_addr().expect("canned server address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                // Record before answering so the client never observes a
                // response whose request is not yet captured.
                let Some(request) = read_request(&stream) else {
                    continue;
                };
                captured.lock().expect("captured requests").push(request);
                write_response(stream, status, &body);
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn json(responses: Vec<(u16, serde_json::Value)>) -> Self {
        Self::start(
            responses
                .into_iter()
                .map(|(status, body)| (status, body.to_string().into_bytes()))
                .collect(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("captured requests").clone()
    }
}

fn read_request(stream: &TcpStream) -> Option<CapturedRequest> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }
    let mut raw_body = vec![0u8; content_length];
    reader.read_exact(&mut raw_body).ok()?;

    Some(CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&raw_body).to_string(),
    })
}

fn write_response(mut stream: TcpStream, status: u16, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream
        .write_all(head.as_bytes())
        .and_then(|_| stream.write_all(body))
        .and_then(|_| stream.flush());
}

/// Meme service answering from a script, then with an empty success.
pub(crate) struct ScriptedMemeService {
    replies: Mutex<VecDeque<Result<ServiceReply, String>>>,
    exhausted: Result<ServiceReply, String>,
    calls: Mutex<Vec<(String, MemeRequest)>>,
}

impl ScriptedMemeService {
    pub fn new(replies: Vec<Result<ServiceReply, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            exhausted: Ok(ServiceReply::new(200, EMPTY_RESULTS)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn statuses(statuses: &[u16]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|status| Ok(ServiceReply::new(*status, EMPTY_RESULTS)))
                .collect(),
        )
    }

    pub fn bodies(replies: Vec<(u16, serde_json::Value)>) -> Self {
        Self::new(
            replies
                .into_iter()
                .map(|(status, body)| Ok(ServiceReply::new(status, body.to_string())))
                .collect(),
        )
    }

    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            exhausted: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, MemeRequest)> {
        self.calls.lock().expect("calls").clone()
    }
}

const EMPTY_RESULTS: &str = r#"{"response":{"results":[]}}"#;

impl MemeService for ScriptedMemeService {
    fn text_to_meme(
        &self,
        token: &str,
        request: &MemeRequest,
        _timeout: Duration,
    ) -> EngineResult<ServiceReply> {
        self.calls
            .lock()
            .expect("calls")
            .push((token.to_string(), request.clone()));
        let next = self
            .replies
            .lock()
            .expect("replies")
            .pop_front()
            .unwrap_or_else(|| self.exhausted.clone());
        next.map_err(|message| EngineError::Transport {
            endpoint: "scripted".to_string(),
            message,
        })
    }
}

/// Inbox that serves one scripted batch per listing, then stays empty.
pub(crate) struct FakeMailbox {
    batches: Mutex<VecDeque<Vec<(String, Option<String>)>>>,
    repeat: Option<Vec<(String, Option<String>)>>,
    last: Mutex<Vec<(String, Option<String>)>>,
    list_calls: AtomicUsize,
}

impl FakeMailbox {
    pub fn with_batches(batches: Vec<Vec<(&str, Option<&str>)>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().map(owned_batch).collect()),
            repeat: None,
            last: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn always_code(body: &str) -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            repeat: Some(owned_batch(vec![("m1", Some(body))])),
            last: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> String {
        "fake01@inbox.test".to_string()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn current_batch(&self) -> Vec<(String, Option<String>)> {
        let scripted = self.batches.lock().expect("batches").pop_front();
        scripted
            .or_else(|| self.repeat.clone())
            .unwrap_or_default()
    }
}

fn owned_batch(batch: Vec<(&str, Option<&str>)>) -> Vec<(String, Option<String>)> {
    batch
        .into_iter()
        .map(|(id, body)| (id.to_string(), body.map(str::to_string)))
        .collect()
}

impl MailboxProvider for FakeMailbox {
    fn create_account(&self) -> EngineResult<DisposableMailAccount> {
        Ok(DisposableMailAccount {
            address: self.address(),
            password: "password1234".to_string(),
            id: "acct".to_string(),
            session_token: "session".to_string(),
        })
    }

    fn list_messages(&self, _account: &DisposableMailAccount) -> Vec<EmailMessage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let batch = self.current_batch();
        let messages = batch
            .iter()
            .map(|(id, _)| EmailMessage {
                id: id.clone(),
                subject: None,
            })
            .collect();
        *self.last.lock().expect("last batch") = batch;
        messages
    }

    fn fetch_message_body(
        &self,
        _account: &DisposableMailAccount,
        message_id: &str,
    ) -> Option<String> {
        self.last
            .lock()
            .expect("last batch")
            .iter()
            .find(|(id, _)| id == message_id)
            .and_then(|(_, body)| body.clone())
    }
}

/// Identity provider that issues `issued-N` tokens for any code.
pub(crate) struct FakeIdentity {
    reject_verify: bool,
    issued: AtomicUsize,
    requested: Mutex<Vec<String>>,
    verified: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self {
            reject_verify: false,
            issued: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_verify() -> Self {
        Self {
            reject_verify: true,
            ..Self::new()
        }
    }

    pub fn requested_emails(&self) -> Vec<String> {
        self.requested.lock().expect("requested").clone()
    }

    pub fn verified_codes(&self) -> Vec<String> {
        self.verified.lock().expect("verified").clone()
    }
}

impl IdentityExchange for FakeIdentity {
    fn request_otp(&self, email: &str) -> EngineResult<()> {
        self.requested
            .lock()
            .expect("requested")
            .push(email.to_string());
        Ok(())
    }

    fn verify_otp(&self, _email: &str, code: &str) -> EngineResult<String> {
        if self.reject_verify {
            return Err(EngineError::acquisition(
                AcquisitionStep::VerifyOtp,
                "identity provider answered 403: Token has expired or is invalid",
            ));
        }
        self.verified.lock().expect("verified").push(code.to_string());
        let issued = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("issued-{issued}"))
    }
}
