//! Last reconciled address, persisted between runs.
//!
//! The cache is a plain-text file holding a single address. Deleting it forces
//! the next run to check the record with Cloudflare again.

use crate::config::write_private;
use crate::error::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Suffix appended to the configuration file name.
pub const CACHE_SUFFIX: &str = ".lastip";

/// File-backed store for the last reconciled address.
#[derive(Debug, Clone)]
pub struct LastIpCache {
    path: PathBuf,
}

impl LastIpCache {
    /// Cache stored at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache for the configuration at `config_path`, optionally relocated to `work_dir`.
    pub fn for_config(config_path: &Path, work_dir: Option<&str>) -> Self {
        Self::new(cache_path(config_path, work_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached address.
    ///
    /// A missing or blank file yields an empty string.
    pub fn load(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let ip = content.trim().to_string();
                if ip.is_empty() {
                    tracing::warn!("IP cache file {} exists but is empty", self.path.display());
                } else {
                    tracing::debug!("Read last known IP {} from {}", ip, self.path.display());
                }
                Ok(ip)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    "IP cache file {} not found (first run or cache cleared)",
                    self.path.display()
                );
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `ip`, creating the cache directory if needed.
    pub fn save(&self, ip: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                tracing::info!("Creating cache directory {}", dir.display());
                create_dir(dir)?;
            }
        }

        write_private(&self.path, format!("{}\n", ip).as_bytes())?;
        tracing::debug!("Wrote {} to {}", ip, self.path.display());
        Ok(())
    }
}

/// Location of the cache file for a configuration path.
///
/// `<config name>.lastip` next to the configuration, or inside `work_dir` when
/// one is given.
pub fn cache_path(config_path: &Path, work_dir: Option<&str>) -> PathBuf {
    match work_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(dir) => {
            let mut name = config_path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_default();
            name.push(CACHE_SUFFIX);

            let dir = Path::new(dir);
            let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
            dir.join(name)
        }
        None => {
            let mut path = config_path.as_os_str().to_os_string();
            path.push(CACHE_SUFFIX);
            PathBuf::from(path)
        }
    }
}

fn create_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir)
}
