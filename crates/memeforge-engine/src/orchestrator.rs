use std::sync::Arc;
use std::time::Duration;

use memeforge_contracts::memes::{value_as_text, MemeDescriptor};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::http::ServiceReply;
use crate::service::{MemeRequest, MemeService, ReplyClass};
use crate::token::TokenLifecycleManager;

/// A token given up on mid-request, with the status that burned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRenewal {
    pub attempt: usize,
    pub status: u16,
}

#[derive(Debug, Clone, Default)]
pub struct MemeBatch {
    pub descriptors: Vec<MemeDescriptor>,
    pub upstream_run_id: Option<String>,
    pub renewals: Vec<TokenRenewal>,
}

/// Issues text-to-meme calls, renewing the token when the service refuses it.
pub struct MemeRequestOrchestrator {
    tokens: Arc<TokenLifecycleManager>,
    service: Arc<dyn MemeService>,
    timeout: Duration,
    max_attempts: usize,
}

impl MemeRequestOrchestrator {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        service: Arc<dyn MemeService>,
        timeout: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            tokens,
            service,
            timeout,
            max_attempts,
        }
    }

    pub fn generate(&self, request: &MemeRequest, cancel: &CancelToken) -> EngineResult<MemeBatch> {
        let mut renewals = Vec::new();
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let token = self.tokens.ensure_valid_token(cancel)?;
            info!(
                "Requesting memes (attempt {attempt}/{})",
                self.max_attempts
            );
            let reply =
                self.service
                    .text_to_meme(&token, request, cancel.clamp_timeout(self.timeout))?;
            match ReplyClass::of(reply.status) {
                class if class.burns_token() => {
                    warn!("Meme service answered {}; renewing token", reply.status);
                    self.tokens.invalidate(&token);
                    renewals.push(TokenRenewal {
                        attempt,
                        status: reply.status,
                    });
                }
                ReplyClass::Success => {
                    let mut batch = parse_batch(&reply, &request.text)?;
                    info!("Received {} meme descriptor(s)", batch.descriptors.len());
                    batch.renewals = renewals;
                    return Ok(batch);
                }
                _ => return Err(EngineError::upstream(reply.status, reply.body_excerpt())),
            }
        }
        Err(EngineError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }
}

fn parse_batch(reply: &ServiceReply, prompt: &str) -> EngineResult<MemeBatch> {
    let payload = reply
        .json()
        .ok_or_else(|| EngineError::upstream(reply.status, "response body is not JSON"))?;
    if let Some(error) = payload.get("error").filter(|value| is_truthy(value)) {
        let message = value_as_text(Some(error)).unwrap_or_else(|| error.to_string());
        return Err(EngineError::upstream(reply.status, message));
    }
    let response = payload.get("response");
    let descriptors = response
        .and_then(|response| response.get("results"))
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .enumerate()
                .filter(|(_, result)| result.is_object())
                .map(|(index, result)| {
                    MemeDescriptor::from_value(result, || short_id(prompt, index))
                })
                .collect()
        })
        .unwrap_or_default();
    let upstream_run_id = response.and_then(|response| {
        value_as_text(response.get("runId").or_else(|| response.get("run_id")))
    });
    Ok(MemeBatch {
        descriptors,
        upstream_run_id,
        renewals: Vec::new(),
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Stable id for a descriptor the service sent without one.
pub fn short_id(prompt: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    format!("gen{}", hex::encode(&digest[..4]))
}
