pub mod cancel;
pub mod compose;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod mailbox;
pub mod orchestrator;
pub mod otp;
pub mod service;
pub mod token;

#[cfg(test)]
mod testing;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use memeforge_contracts::events::{EventWriter, RunEvent};
use memeforge_contracts::memes::MemeDescriptor;
use memeforge_contracts::runs::summary::{now_utc_iso, write_summary, RunSummary};
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::compose::{FontBook, HttpImageFetcher, ImageFetcher, MemeRenderer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::identity::{HttpIdentityClient, IdentityExchange};
use crate::mailbox::{MailTmClient, MailboxProvider};
use crate::orchestrator::MemeRequestOrchestrator;
use crate::service::{HttpMemeService, MemeRequest, MemeService};
use crate::token::{TokenAcquirer, TokenLifecycleManager, TokenStore};

/// Implementations behind each outbound seam of the engine.
pub struct EngineParts {
    pub service: Arc<dyn MemeService>,
    pub mailbox: Arc<dyn MailboxProvider>,
    pub identity: Arc<dyn IdentityExchange>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub fonts: FontBook,
}

impl EngineParts {
    pub fn http(config: &EngineConfig) -> Self {
        Self {
            service: Arc::new(HttpMemeService::from_config(config)),
            mailbox: Arc::new(MailTmClient::from_config(config)),
            identity: Arc::new(HttpIdentityClient::from_config(config)),
            fetcher: Arc::new(HttpImageFetcher::new(config.timeouts.download)),
            fonts: FontBook::probe(&config.font_paths),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedMeme {
    pub descriptor: MemeDescriptor,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Name of the run directory, unique per output root.
    pub run_id: String,
    pub upstream_run_id: Option<String>,
    pub run_dir: PathBuf,
    pub descriptors: Vec<MemeDescriptor>,
    pub rendered: Vec<RenderedMeme>,
    pub elapsed: Duration,
}

pub struct MemeEngine {
    tokens: Arc<TokenLifecycleManager>,
    orchestrator: MemeRequestOrchestrator,
    renderer: MemeRenderer,
    output_root: PathBuf,
}

impl MemeEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_parts(config, EngineParts::http(config))
    }

    pub fn with_parts(config: &EngineConfig, parts: EngineParts) -> Self {
        let acquirer = TokenAcquirer::new(parts.mailbox, parts.identity, config.poll);
        let tokens = Arc::new(TokenLifecycleManager::new(
            TokenStore::new(&config.token_path),
            parts.service.clone(),
            acquirer,
            config.timeouts.probe,
        ));
        let orchestrator = MemeRequestOrchestrator::new(
            tokens.clone(),
            parts.service,
            config.timeouts.meme,
            config.max_retries,
        );
        let renderer = MemeRenderer::new(parts.fonts, parts.fetcher, config.caption_style);
        Self {
            tokens,
            orchestrator,
            renderer,
            output_root: config.output_dir.clone(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    /// Forgets the current token in memory and on disk.
    pub fn clear_token(&self) -> bool {
        self.tokens.clear()
    }

    /// Requests memes for `request.text` and renders each into a fresh run
    /// directory below the output root.
    ///
    /// Individual render failures are logged and recorded in the run's event
    /// log; the outcome lists only the files that were written.
    pub fn generate(
        &self,
        request: &MemeRequest,
        cancel: &CancelToken,
    ) -> EngineResult<GenerationOutcome> {
        let started = Instant::now();
        let started_at = now_utc_iso();
        info!("Generating memes for prompt: {}", request.text);

        let batch = self.orchestrator.generate(request, cancel)?;
        if batch.descriptors.is_empty() {
            return Err(EngineError::upstream(200, "meme service returned no memes"));
        }

        let (run_id, run_dir) = reserve_run_dir(&self.output_root)?;
        let events = EventWriter::new(run_dir.join("events.jsonl"), run_id.clone());
        record(
            &events,
            RunEvent::RunStarted {
                prompt: request.text.clone(),
                out_dir: run_dir.to_string_lossy().to_string(),
            },
        );
        for renewal in &batch.renewals {
            record(
                &events,
                RunEvent::TokenInvalidated {
                    attempt: renewal.attempt,
                    status: renewal.status,
                },
            );
        }
        record(
            &events,
            RunEvent::MemesReceived {
                count: batch.descriptors.len(),
                upstream_run_id: batch.upstream_run_id.clone(),
            },
        );

        let results = self.render_all(&batch.descriptors, &run_dir, cancel);
        let mut rendered = Vec::new();
        for (descriptor, result) in batch.descriptors.iter().zip(results) {
            match result {
                Ok(path) => {
                    info!("Created meme {}", path.display());
                    record(
                        &events,
                        RunEvent::MemeRendered {
                            meme_id: descriptor.id.clone(),
                            path: path.to_string_lossy().to_string(),
                        },
                    );
                    rendered.push(RenderedMeme {
                        descriptor: descriptor.clone(),
                        path,
                    });
                }
                Err(err) => {
                    error!("Meme {} failed: {err}", descriptor.id);
                    record(
                        &events,
                        RunEvent::MemeFailed {
                            meme_id: descriptor.id.clone(),
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }

        let elapsed = started.elapsed();
        let summary = RunSummary {
            run_id: run_id.clone(),
            upstream_run_id: batch.upstream_run_id.clone(),
            prompt: request.text.clone(),
            started_at,
            finished_at: now_utc_iso(),
            total_memes: batch.descriptors.len() as u64,
            total_rendered: rendered.len() as u64,
            files: rendered
                .iter()
                .map(|meme| meme.path.to_string_lossy().to_string())
                .collect(),
        };
        if let Err(err) = write_summary(&run_dir.join("summary.json"), &summary, None) {
            warn!("Could not write run summary: {err:#}");
        }
        record(
            &events,
            RunEvent::RunFinished {
                rendered: rendered.len(),
                elapsed_s: elapsed.as_secs_f64(),
            },
        );

        Ok(GenerationOutcome {
            run_id,
            upstream_run_id: batch.upstream_run_id,
            run_dir,
            descriptors: batch.descriptors,
            rendered,
            elapsed,
        })
    }

    /// Renders descriptors concurrently; results keep descriptor order.
    fn render_all(
        &self,
        descriptors: &[MemeDescriptor],
        run_dir: &Path,
        cancel: &CancelToken,
    ) -> Vec<EngineResult<PathBuf>> {
        thread::scope(|scope| {
            let handles: Vec<_> = descriptors
                .iter()
                .map(|descriptor| {
                    let handle =
                        scope.spawn(move || self.renderer.render(descriptor, run_dir, cancel));
                    (descriptor, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(descriptor, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(EngineError::Render {
                            meme_id: descriptor.id.clone(),
                            reason: "renderer panicked".to_string(),
                        })
                    })
                })
                .collect()
        })
    }
}

fn record(events: &EventWriter, event: RunEvent) {
    if let Err(err) = events.emit(&event) {
        warn!("Could not record {} event: {err:#}", event.kind());
    }
}

/// Creates `memes_<unix seconds>` under `root`, suffixed when a run in the
/// same second already claimed it.
fn reserve_run_dir(root: &Path) -> EngineResult<(String, PathBuf)> {
    fs::create_dir_all(root)?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    for suffix in 0..1000u32 {
        let name = match suffix {
            0 => format!("memes_{secs}"),
            n => format!("memes_{secs}_{n}"),
        };
        let dir = root.join(&name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((name, dir)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free run directory for second {secs}"),
    )
    .into())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::{reserve_run_dir, EngineParts, MemeEngine};
    use crate::cancel::CancelToken;
    use crate::compose::{FontBook, ImageFetcher};
    use crate::config::{EngineConfig, PollPolicy};
    use crate::error::{EngineError, EngineResult};
    use crate::service::MemeRequest;
    use crate::testing::{FakeIdentity, FakeMailbox, ScriptedMemeService};

    struct NoImages;

    impl ImageFetcher for NoImages {
        fn fetch(&self, url: &str) -> EngineResult<Vec<u8>> {
            Err(EngineError::Transport {
                endpoint: url.to_string(),
                message: "offline".to_string(),
            })
        }
    }

    fn engine(temp: &tempfile::TempDir, service: Arc<ScriptedMemeService>) -> MemeEngine {
        let mut config = EngineConfig::default().with_output_dir(temp.path().join("out"));
        config.token_path = temp.path().join("home").join(".meme_token");
        config.poll = PollPolicy {
            attempts: 2,
            interval: Duration::from_millis(1),
        };
        MemeEngine::with_parts(
            &config,
            EngineParts {
                service,
                mailbox: Arc::new(FakeMailbox::always_code("Your code is 314159")),
                identity: Arc::new(FakeIdentity::new()),
                fetcher: Arc::new(NoImages),
                fonts: FontBook::builtin(),
            },
        )
    }

    fn read_events(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let raw = fs::read_to_string(path)?;
        raw.lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn end_to_end_single_placeholder_meme() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(ScriptedMemeService::bodies(vec![(
            200,
            json!({"response": {
                "runId": "run-1",
                "results": [{
                    "id": "m1",
                    "width": 476,
                    "height": 500,
                    "captions": [
                        {"text": "Me", "x": 20, "y": 30, "width": 200},
                        {"text": "My cat", "x": 20, "y": 300, "width": 200}
                    ]
                }]
            }}),
        )]));
        let engine = engine(&temp, service.clone());
        let request = MemeRequest::new("cats being dramatic", 500, "en", "en");
        let outcome = engine.generate(&request, &CancelToken::new())?;

        assert_eq!(outcome.rendered.len(), 1);
        assert_eq!(outcome.upstream_run_id.as_deref(), Some("run-1"));
        assert!(outcome.run_id.starts_with("memes_"));
        let image = image::open(&outcome.rendered[0].path)?;
        assert_eq!((image.width(), image.height()), (476, 500));

        let pngs: Vec<_> = fs::read_dir(&outcome.run_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "png"))
            .collect();
        assert_eq!(pngs.len(), 1);

        let events = read_events(&outcome.run_dir.join("events.jsonl"))?;
        let kinds: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
        assert_eq!(
            kinds,
            vec!["run_started", "memes_received", "meme_rendered", "run_finished"]
        );
        let summary: Value =
            serde_json::from_str(&fs::read_to_string(outcome.run_dir.join("summary.json"))?)?;
        assert_eq!(summary["total_rendered"], 1);
        assert_eq!(summary["total_failed"], 0);

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.max_dimension, 500);
        Ok(())
    }

    #[test]
    fn renewal_is_recorded_in_event_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(ScriptedMemeService::bodies(vec![
            (429, json!({"message": "quota"})),
            (200, json!({"response": {"results": [{"id": "a"}, {"id": "b"}]}})),
        ]));
        let engine = engine(&temp, service);
        let outcome = engine.generate(
            &MemeRequest::new("monday mornings", 500, "en", "en"),
            &CancelToken::new(),
        )?;
        assert_eq!(outcome.rendered.len(), 2);
        assert_eq!(outcome.rendered[0].descriptor.id, "a");
        assert_eq!(outcome.rendered[1].descriptor.id, "b");

        let events = read_events(&outcome.run_dir.join("events.jsonl"))?;
        let invalidated: Vec<&Value> = events
            .iter()
            .filter(|event| event["type"] == "token_invalidated")
            .collect();
        assert_eq!(invalidated.len(), 1);
        assert_eq!(invalidated[0]["status"], 429);
        Ok(())
    }

    #[test]
    fn empty_batch_is_unavailable_and_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = engine(&temp, Arc::new(ScriptedMemeService::statuses(&[200])));
        let result = engine.generate(
            &MemeRequest::new("nothing", 500, "en", "en"),
            &CancelToken::new(),
        );
        assert!(result.as_ref().is_err_and(|err| err.is_unavailable()));
        assert!(!temp.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn failed_renders_are_excluded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(ScriptedMemeService::bodies(vec![(
            200,
            json!({"response": {"results": [
                {"id": "ok"},
                {"id": "huge", "width": 50000, "height": 50000}
            ]}}),
        )]));
        let engine = engine(&temp, service);
        let outcome = engine.generate(
            &MemeRequest::new("mixed", 500, "en", "en"),
            &CancelToken::new(),
        )?;
        assert_eq!(outcome.descriptors.len(), 2);
        assert_eq!(outcome.rendered.len(), 1);
        let events = read_events(&outcome.run_dir.join("events.jsonl"))?;
        assert!(events.iter().any(|event| event["type"] == "meme_failed"
            && event["meme_id"] == "huge"));
        Ok(())
    }

    #[test]
    fn huge_caption_font_does_not_fail_the_meme() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(ScriptedMemeService::bodies(vec![(
            200,
            json!({"response": {"results": [{
                "id": "loud",
                "captions": [
                    {"text": "ok caption"},
                    {"text": "boom", "fontSize": 4294967295u64}
                ]
            }]}}),
        )]));
        let engine = engine(&temp, service);
        let outcome = engine.generate(
            &MemeRequest::new("shouting", 500, "en", "en"),
            &CancelToken::new(),
        )?;
        assert_eq!(outcome.rendered.len(), 1);
        assert!(outcome.rendered[0].path.is_file());
        Ok(())
    }

    #[test]
    fn clear_token_removes_saved_token() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = engine(&temp, Arc::new(ScriptedMemeService::statuses(&[])));
        engine.tokens().ensure_valid_token(&CancelToken::new())?;
        assert!(engine.tokens().store().load().is_some());
        assert!(engine.clear_token());
        assert!(engine.tokens().store().load().is_none());
        Ok(())
    }

    #[test]
    fn run_dirs_never_collide() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (first, first_dir) = reserve_run_dir(temp.path())?;
        let (second, second_dir) = reserve_run_dir(temp.path())?;
        assert_ne!(first, second);
        assert!(first_dir.is_dir() && second_dir.is_dir());
        Ok(())
    }
}
