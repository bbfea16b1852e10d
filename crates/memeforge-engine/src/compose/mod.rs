//! Turns meme descriptors into PNG files.

mod canvas;
mod font;
mod layout;

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use memeforge_contracts::memes::MemeDescriptor;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
    use crate::config::CaptionStyle;
use crate::error::{EngineError, EngineResult};
use crate::http::LazyClient;

pub use canvas::{caption_visible, draw_caption, draw_stroked_text, placeholder};
pub use font::{CaptionFont, FontBook, MAX_FONT_SIZE};
pub use layout::{centered_x, wrap_text};

/// Largest side accepted for a canvas.
pub const MAX_CANVAS_SIDE: u32 = 4096;

pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>>;
}

pub struct HttpImageFetcher {
    timeout: Duration,
    http: LazyClient,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            http: LazyClient::new(),
        }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>> {
        let response = self
            .http
            .get()?
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|err| EngineError::transport(url, &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport {
                endpoint: url.to_string(),
                message: format!("image download answered {}", status.as_u16()),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| EngineError::transport(url, &err))?;
        Ok(bytes.to_vec())
    }
}

pub struct MemeRenderer {
    fonts: FontBook,
    fetcher: Arc<dyn ImageFetcher>,
    style: CaptionStyle,
}

impl MemeRenderer {
    pub fn new(fonts: FontBook, fetcher: Arc<dyn ImageFetcher>, style: CaptionStyle) -> Self {
        Self {
            fonts,
            fetcher,
            style,
        }
    }

    /// Composes one meme and writes it as `meme_<id>.png` under `out_dir`.
    ///
    /// A caption that cannot be drawn is logged and skipped; cancellation is
    /// checked between captions.
    pub fn render(
        &self,
        descriptor: &MemeDescriptor,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> EngineResult<PathBuf> {
        let render_error = |reason: String| EngineError::Render {
            meme_id: descriptor.id.clone(),
            reason,
        };
        if descriptor.width > MAX_CANVAS_SIDE || descriptor.height > MAX_CANVAS_SIDE {
            return Err(render_error(format!(
                "canvas {}x{} exceeds {MAX_CANVAS_SIDE}px",
                descriptor.width, descriptor.height
            )));
        }

        let mut canvas = self.base_image(descriptor);
        for caption in descriptor.layout_captions() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if caption.text.trim().is_empty() {
                continue;
            }
            if !caption_visible(&canvas, &caption) {
                warn!(
                    "Caption of meme {} at ({}, {}) lies outside the canvas; skipped",
                    descriptor.id, caption.x, caption.y
                );
                continue;
            }
            let drawn = panic::catch_unwind(AssertUnwindSafe(|| {
                draw_caption(&mut canvas, &caption, &self.fonts, &self.style)
            }));
            match drawn {
                Ok(lines) => debug!("Meme {}: drew caption in {lines} line(s)", descriptor.id),
                Err(_) => warn!(
                    "Caption {:?} of meme {} could not be drawn; skipped",
                    caption.text, descriptor.id
                ),
            }
        }

        let path = out_dir.join(descriptor.file_name());
        canvas
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|err| render_error(err.to_string()))?;
        Ok(path)
    }

    /// Downloaded base image scaled to the descriptor size, or the
    /// placeholder when there is none or it cannot be used.
    fn base_image(&self, descriptor: &MemeDescriptor) -> RgbaImage {
        if let Some(url) = descriptor.remote_image_url() {
            match self.download(url, descriptor.width, descriptor.height) {
                Ok(image) => return image,
                Err(err) => warn!(
                    "Base image for meme {} unavailable ({err}); using placeholder",
                    descriptor.id
                ),
            }
        }
        placeholder(descriptor.width, descriptor.height, &self.fonts)
    }

    fn download(&self, url: &str, width: u32, height: u32) -> EngineResult<RgbaImage> {
        let bytes = self.fetcher.fetch(url)?;
        let decoded = image::load_from_memory(&bytes).map_err(|err| EngineError::Transport {
            endpoint: url.to_string(),
            message: format!("undecodable image: {err}"),
        })?;
        Ok(imageops::resize(
            &decoded.to_rgba8(),
            width,
            height,
            FilterType::Lanczos3,
        ))
    }
}
