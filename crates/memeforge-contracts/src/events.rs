use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Lifecycle events of a single generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        prompt: String,
        out_dir: String,
    },
    TokenInvalidated {
        attempt: usize,
        status: u16,
    },
    MemesReceived {
        count: usize,
        upstream_run_id: Option<String>,
    },
    MemeRendered {
        meme_id: String,
        path: String,
    },
    MemeFailed {
        meme_id: String,
        reason: String,
    },
    RunFinished {
        rendered: usize,
        elapsed_s: f64,
    },
}

impl RunEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::TokenInvalidated { .. } => "token_invalidated",
            Self::MemesReceived { .. } => "memes_received",
            Self::MemeRendered { .. } => "meme_rendered",
            Self::MemeFailed { .. } => "meme_failed",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// Append-only writer for a run's `events.jsonl`.
///
/// Every line carries `type`, `run_id` and `ts` followed by the event's own
/// fields. Clones share one lock so render threads can emit concurrently.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit(&self, event: &RunEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert("run_id".to_string(), Value::String(self.inner.run_id.clone()));
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Value::Object(fields) = serde_json::to_value(event)? {
            for (key, value) in fields {
                line.insert(key, value);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
