mod api;
mod server;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use memeforge_engine::cancel::CancelToken;
use memeforge_engine::config::EngineConfig;
use memeforge_engine::token::TokenStore;
use memeforge_engine::MemeEngine;
use tracing::info;

use crate::api::GenerateMemeBody;
use crate::server::AppState;

#[derive(Debug, Parser)]
#[command(name = "memeforge", version, about = "Generate captioned memes from a text prompt")]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG).
    #[arg(long, global = true, env = "MEMEFORGE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Generate memes once and print the written files.
    Run(RunArgs),
    /// Delete the cached bearer token.
    ClearToken,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "MEMEFORGE_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "MEMEFORGE_PORT", default_value_t = 8000)]
    port: u16,
    /// Output root; also served under /static/memes.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, env = "MEMEFORGE_REQUEST_TIMEOUT_SECS", default_value_t = 180)]
    request_timeout_secs: u64,
    /// Origin used in image URLs instead of the request's Host header.
    #[arg(long, env = "MEMEFORGE_PUBLIC_URL")]
    public_url: Option<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = 500)]
    max_dimension: i64,
    #[arg(long, default_value = "en")]
    input_language: String,
    #[arg(long, default_value = "en")]
    output_language: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    let _ = dotenvy::dotenv();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("memeforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.debug)?;
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Run(args) => run_once(args),
        Command::ClearToken => run_clear_token(),
    }
}

fn engine_config(out: Option<PathBuf>) -> EngineConfig {
    let config = EngineConfig::from_env();
    match out {
        Some(dir) => config.with_output_dir(dir),
        None => config,
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let config = engine_config(args.out);
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("failed to create output directory {}", config.output_dir.display())
    })?;
    let engine = Arc::new(MemeEngine::from_config(&config));
    let state = AppState::new(
        Arc::clone(&engine),
        Duration::from_secs(args.request_timeout_secs.max(1)),
        args.public_url,
    );
    let addr = format!("{}:{}", args.host, args.port);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let served = runtime.block_on(server::serve(&addr, state));
    // The engine owns blocking HTTP clients, which must not drop on the runtime.
    drop(runtime);
    drop(engine);
    served?;
    Ok(0)
}

fn run_once(args: RunArgs) -> Result<i32> {
    let request = GenerateMemeBody {
        text_prompt: args.prompt,
        max_dimension: args.max_dimension,
        input_language: args.input_language,
        output_language: args.output_language,
    }
    .validate()
    .map_err(anyhow::Error::msg)?;

    let config = engine_config(args.out);
    let engine = MemeEngine::from_config(&config);
    let outcome = engine.generate(&request, &CancelToken::new())?;
    info!(
        "Run {} finished in {:.2}s",
        outcome.run_id,
        outcome.elapsed.as_secs_f64()
    );
    for meme in &outcome.rendered {
        println!("{}", meme.path.display());
    }
    if outcome.rendered.is_empty() {
        bail!(
            "no memes were rendered; see {}",
            outcome.run_dir.join("events.jsonl").display()
        );
    }
    Ok(0)
}

fn run_clear_token() -> Result<i32> {
    let config = EngineConfig::from_env();
    let store = TokenStore::new(&config.token_path);
    if !store.clear() {
        bail!("failed to remove {}", store.path().display());
    }
    println!("token cleared");
    Ok(0)
}
