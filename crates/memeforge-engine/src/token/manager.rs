use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::service::{MemeRequest, MemeService, ReplyClass};

use super::acquire::TokenAcquirer;
use super::store::TokenStore;

/// Outcome of testing a stored token against the meme service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Valid,
    Rejected(u16),
    Unreachable(String),
}

/// Owns the single current bearer token.
///
/// The load, probe, acquire, and persist sequence runs under one lock, so
/// concurrent callers never start two acquisitions and never observe a half
/// replaced token.
pub struct TokenLifecycleManager {
    store: TokenStore,
    service: Arc<dyn MemeService>,
    acquirer: TokenAcquirer,
    probe_timeout: Duration,
    current: Mutex<Option<String>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: TokenStore,
        service: Arc<dyn MemeService>,
        acquirer: TokenAcquirer,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            service,
            acquirer,
            probe_timeout,
            current: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Returns a token the service should accept, acquiring one if needed.
    pub fn ensure_valid_token(&self, cancel: &CancelToken) -> EngineResult<String> {
        let mut current = self.lock_current();
        if let Some(token) = current.as_ref() {
            return Ok(token.clone());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if let Some(candidate) = self.store.load() {
            match self.probe(&candidate, cancel) {
                ProbeVerdict::Valid => {
                    info!("Saved token is still valid");
                    *current = Some(candidate.clone());
                    return Ok(candidate);
                }
                ProbeVerdict::Rejected(status) => {
                    info!("Saved token rejected ({status}); discarding it");
                    self.store.clear();
                }
                ProbeVerdict::Unreachable(reason) => {
                    warn!("Could not validate saved token: {reason}");
                }
            }
        }

        let token = self.acquirer.acquire(cancel)?;
        if !self.store.save(&token) {
            warn!("Keeping the new token in memory only");
        }
        *current = Some(token.clone());
        Ok(token)
    }

    /// Tests `token` with a minimal meme request. Only 401 and 403 reject
    /// it; a quota reply still proves the token authenticates.
    pub fn probe(&self, token: &str, cancel: &CancelToken) -> ProbeVerdict {
        let timeout = cancel.clamp_timeout(self.probe_timeout);
        match self.service.text_to_meme(token, &MemeRequest::probe(), timeout) {
            Ok(reply) => match ReplyClass::of(reply.status) {
                ReplyClass::AuthRejected => ProbeVerdict::Rejected(reply.status),
                _ => ProbeVerdict::Valid,
            },
            Err(err) => ProbeVerdict::Unreachable(err.to_string()),
        }
    }

    /// Drops `token` if it is still the current one. A token that was
    /// already replaced by another caller is left alone.
    pub fn invalidate(&self, token: &str) -> bool {
        let mut current = self.lock_current();
        if current.as_deref() != Some(token) {
            debug!("Token already replaced; nothing to invalidate");
            return false;
        }
        *current = None;
        self.store.clear();
        info!("Token invalidated");
        true
    }

    /// Forgets the token in memory and on disk.
    pub fn clear(&self) -> bool {
        let mut current = self.lock_current();
        *current = None;
        self.store.clear()
    }

    pub fn has_token(&self) -> bool {
        self.lock_current().is_some()
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
