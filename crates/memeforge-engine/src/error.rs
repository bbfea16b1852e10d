//! Error taxonomy of the engine.
//!
//! Every remote call returns one of these instead of panicking; callers
//! branch on the variant. Transient auth replies (401/403/429) never show up
//! here because the orchestrator absorbs them by renewing the token.

use std::fmt;

use thiserror::Error;

/// Step of the token acquisition flow that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStep {
    Mailbox,
    RequestOtp,
    AwaitOtp,
    VerifyOtp,
}

impl fmt::Display for AcquisitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Mailbox => "mailbox provisioning",
            Self::RequestOtp => "otp request",
            Self::AwaitOtp => "otp delivery",
            Self::VerifyOtp => "otp verification",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("token acquisition failed during {step}: {reason}")]
    Acquisition {
        step: AcquisitionStep,
        reason: String,
    },

    #[error("meme service error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("meme service kept rejecting the token after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to render meme {meme_id}: {reason}")]
    Render { meme_id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn acquisition(step: AcquisitionStep, reason: impl Into<String>) -> Self {
        Self::Acquisition {
            step,
            reason: reason.into(),
        }
    }

    pub fn transport(endpoint: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: error_chain_text(err),
        }
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Attributes a failure to an acquisition step. Cancellation and errors
    /// already tagged with a step pass through unchanged.
    pub fn during(self, step: AcquisitionStep) -> Self {
        match self {
            Self::Acquisition { .. } | Self::Cancelled => self,
            other => Self::acquisition(step, other.to_string()),
        }
    }

    /// Whether the caller should surface this as "service unavailable".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Acquisition { .. }
                | Self::RetriesExhausted { .. }
                | Self::Transport { .. }
                | Self::Upstream { .. }
                | Self::Cancelled
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    parts.join(" | caused by: ")
}
