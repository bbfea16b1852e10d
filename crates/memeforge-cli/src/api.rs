//! Wire types of the HTTP surface.

use memeforge_contracts::memes::{GeneratedFile, MemeDescriptor};
use memeforge_contracts::runs::summary::now_utc_iso;
use memeforge_engine::service::MemeRequest;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "Meme Generator API";
pub const APP_DESCRIPTION: &str = "AI-powered meme generation API";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const MAX_PROMPT_CHARS: usize = 500;
pub const MIN_DIMENSION: i64 = 100;
pub const MAX_DIMENSION: i64 = 1000;
pub const DEFAULT_DIMENSION: i64 = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateMemeBody {
    pub text_prompt: String,
    #[serde(default = "default_dimension")]
    pub max_dimension: i64,
    #[serde(default = "default_language")]
    pub input_language: String,
    #[serde(default = "default_language")]
    pub output_language: String,
}

fn default_dimension() -> i64 {
    DEFAULT_DIMENSION
}

fn default_language() -> String {
    "en".to_string()
}

impl GenerateMemeBody {
    /// Checks the documented bounds and yields the engine request.
    pub fn validate(self) -> Result<MemeRequest, String> {
        let prompt_chars = self.text_prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > MAX_PROMPT_CHARS {
            return Err(format!(
                "text_prompt must be between 1 and {MAX_PROMPT_CHARS} characters"
            ));
        }
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&self.max_dimension) {
            return Err(format!(
                "max_dimension must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
            ));
        }
        for (field, value) in [
            ("input_language", &self.input_language),
            ("output_language", &self.output_language),
        ] {
            if !is_language_code(value) {
                return Err(format!("{field} must be a two-letter lowercase code"));
            }
        }
        Ok(MemeRequest::new(
            self.text_prompt,
            self.max_dimension as u32,
            self.input_language,
            self.output_language,
        ))
    }
}

pub fn is_language_code(value: &str) -> bool {
    value.len() == 2 && value.chars().all(|ch| ch.is_ascii_lowercase())
}

#[derive(Debug, Serialize)]
pub struct GenerateMemeResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub meme_list: Vec<String>,
    pub run_id: Option<String>,
    pub meme_count: usize,
    pub memes: Vec<MemeDescriptor>,
    pub generated_files: Vec<GeneratedFile>,
    pub output_directory: String,
    pub generation_time: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            version: APP_VERSION,
            timestamp: now_utc_iso(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub health: &'static str,
    pub static_memes: &'static str,
    pub timestamp: String,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            name: APP_NAME,
            version: APP_VERSION,
            description: APP_DESCRIPTION,
            health: "/health",
            static_memes: "/static/memes",
            timestamp: now_utc_iso(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearTokenResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub error_code: &'static str,
    pub timestamp: String,
}
