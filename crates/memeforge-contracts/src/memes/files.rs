use std::path::Path;

use serde::{Deserialize, Serialize};

/// A rendered meme image as exposed to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub filename: String,
    pub file_path: String,
    pub image_url: String,
    pub meme_id: String,
}

impl GeneratedFile {
    /// Describes `path` (a file below `output_root`) as served from
    /// `{base_url}/static/memes/...`.
    pub fn new(meme_id: &str, path: &Path, output_root: &Path, base_url: &str) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative = path
            .strip_prefix(output_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let relative = relative.trim_start_matches('/').to_string();
        let image_url = format!(
            "{}/static/memes/{}",
            base_url.trim_end_matches('/'),
            relative
        );
        let file_path = path.to_string_lossy().replace('\\', "/");

        Self {
            filename,
            file_path,
            image_url,
            meme_id: meme_id.to_string(),
        }
    }
}
