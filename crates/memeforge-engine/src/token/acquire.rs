use std::sync::Arc;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::PollPolicy;
use crate::error::{AcquisitionStep, EngineError, EngineResult};
use crate::identity::IdentityExchange;
use crate::mailbox::{DisposableMailAccount, MailboxProvider};
use crate::otp::extract_otp;

/// Mints a fresh bearer token: disposable inbox, OTP request, inbox poll,
/// OTP verification.
pub struct TokenAcquirer {
    mailbox: Arc<dyn MailboxProvider>,
    identity: Arc<dyn IdentityExchange>,
    poll: PollPolicy,
}

impl TokenAcquirer {
    pub fn new(
        mailbox: Arc<dyn MailboxProvider>,
        identity: Arc<dyn IdentityExchange>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            mailbox,
            identity,
            poll,
        }
    }

    pub fn acquire(&self, cancel: &CancelToken) -> EngineResult<String> {
        info!("Starting token acquisition");
        let account = self
            .mailbox
            .create_account()
            .map_err(|err| err.during(AcquisitionStep::Mailbox))?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.identity
            .request_otp(&account.address)
            .map_err(|err| err.during(AcquisitionStep::RequestOtp))?;
        let code = self.await_otp(&account, cancel)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let token = self
            .identity
            .verify_otp(&account.address, &code)
            .map_err(|err| err.during(AcquisitionStep::VerifyOtp))?;
        info!("Acquired a new token via {}", account.address);
        Ok(token)
    }

    /// Polls the inbox until the first non-empty batch arrives and returns
    /// the first code found in it.
    ///
    /// Later messages are not awaited once a batch has been inspected.
    fn await_otp(
        &self,
        account: &DisposableMailAccount,
        cancel: &CancelToken,
    ) -> EngineResult<String> {
        for attempt in 1..=self.poll.attempts {
            if !cancel.sleep(self.poll.interval) {
                return Err(EngineError::Cancelled);
            }
            let messages = self.mailbox.list_messages(account);
            if messages.is_empty() {
                debug!("Inbox empty (poll {attempt}/{})", self.poll.attempts);
                continue;
            }
            info!("Inspecting {} message(s) on poll {attempt}", messages.len());
            for message in &messages {
                let Some(body) = self.mailbox.fetch_message_body(account, &message.id) else {
                    continue;
                };
                if let Some(code) = extract_otp(&body) {
                    debug!("Found OTP in message {}", message.id);
                    return Ok(code);
                }
            }
            return Err(EngineError::acquisition(
                AcquisitionStep::AwaitOtp,
                format!("no code in the {} delivered message(s)", messages.len()),
            ));
        }
        Err(EngineError::acquisition(
            AcquisitionStep::AwaitOtp,
            format!("no message arrived after {} polls", self.poll.attempts),
        ))
    }
}
