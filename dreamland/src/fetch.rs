//! HTTP fetching: small metadata GETs to memory, large payload GETs to
//! disk. Synchronous, with per-request timeouts.

use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP fetcher shared by sync, resolution and install.
pub struct Fetcher {
    metadata: reqwest::blocking::Client,
    payload: reqwest::blocking::Client,
}

impl Fetcher {
    pub fn new(verify_tls: bool) -> Result<Self> {
        let metadata = reqwest::blocking::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        let payload = reqwest::blocking::Client::builder()
            .timeout(PAYLOAD_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self { metadata, payload })
    }

    /// Fetch a small text resource into memory.
    pub fn get_string(&self, url: &str) -> Result<String> {
        debug!(url = url, "fetching");
        let response = self.metadata.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        Ok(response.text()?)
    }

    /// Download a large resource to a file. An existing non-empty file at
    /// `dest` is reused. Failures and empty bodies leave nothing behind.
    pub fn get_file(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.exists() && file_size(dest) > 0 {
            debug!(path = %dest.display(), "using cached file");
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!(url = url, dest = %dest.display(), "downloading");
        let result = self.download(url, dest);
        if result.is_err() {
            let _ = std::fs::remove_file(dest);
        }
        result
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.payload.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        let mut file = std::fs::File::create(dest)?;
        response.copy_to(&mut file)?;

        if file_size(dest) == 0 {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                message: "empty response body".to_string(),
            });
        }
        debug!(bytes = file_size(dest), "downloaded");
        Ok(())
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
