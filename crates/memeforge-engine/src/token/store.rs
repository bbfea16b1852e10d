//! On-disk persistence of the current bearer token.
//!
//! The value is base64 encoded before it is written. This is obfuscation
//! only, not encryption: anyone who can read the file can decode it, so the
//! file and its directory are restricted to the owner where supported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `token`; `false` when the write failed.
    pub fn save(&self, token: &str) -> bool {
        match self.write_token(token) {
            Ok(()) => {
                info!("Token saved to {}", self.path.display());
                true
            }
            Err(err) => {
                warn!("Could not save token to {}: {err}", self.path.display());
                false
            }
        }
    }

    /// Reads the persisted token. Missing, empty, or undecodable files all
    /// read as absent.
    pub fn load(&self) -> Option<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Could not read saved token: {err}");
                return None;
            }
        };
        let encoded = raw.trim();
        if encoded.is_empty() {
            return None;
        }
        let decoded = match BASE64.decode(encoded) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Saved token is not valid base64: {err}");
                return None;
            }
        };
        match String::from_utf8(decoded) {
            Ok(token) if !token.is_empty() => {
                info!("Token loaded from {}", self.path.display());
                Some(token)
            }
            Ok(_) => None,
            Err(err) => {
                warn!("Saved token is not valid UTF-8: {err}");
                None
            }
        }
    }

    /// Removes the persisted token; clearing an absent file succeeds.
    pub fn clear(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Token cleared");
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!("Could not clear token: {err}");
                false
            }
        }
    }

    fn write_token(&self, token: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            create_private_dir(dir)?;
        }
        fs::write(&self.path, BASE64.encode(token.as_bytes()))?;
        restrict_to_owner(&self.path, 0o600)
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
