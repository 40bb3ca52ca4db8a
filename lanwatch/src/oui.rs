use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use vendor_lookup::{VendorResolver, VendorTable};

use crate::config::Settings;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(45);

/// Fetch the IEEE table into `dest`. The file only appears once the whole
/// body has been received; a failed transfer leaves nothing behind.
pub async fn download(url: &str, dest: &Path) -> Result<u64> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(format!("lanwatch/{}", env!("CARGO_PKG_VERSION")))
        .build()?;
    info!(%url, dest = %dest.display(), "downloading OUI table");
    let resp = client.get(url).send().await.with_context(|| format!("GET {url}"))?;
    if !resp.status().is_success() {
        bail!("GET {url}: HTTP {}", resp.status());
    }
    let body = resp.bytes().await.with_context(|| format!("read body from {url}"))?;

    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir).with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).with_context(|| format!("replace {}", dest.display()))?;
    info!(bytes = body.len(), "OUI table saved");
    Ok(body.len() as u64)
}

/// Build the resolver for this run. Missing or unreadable tables degrade to
/// empty ones; a missing standard file triggers one download attempt.
pub async fn load_resolver(settings: &Settings) -> VendorResolver {
    if !settings.oui_file.exists() && !settings.oui_url.is_empty() {
        if let Err(e) = download(&settings.oui_url, &settings.oui_file).await {
            warn!(error = %format!("{e:#}"), "OUI download failed");
        }
    }
    let standard = VendorTable::load_standard(&settings.oui_file).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "standard OUI table unavailable");
        VendorTable::default()
    });
    let custom = VendorTable::load_custom(&settings.custom_oui_file).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "custom OUI table unavailable");
        VendorTable::default()
    });
    VendorResolver::new(standard, custom)
}
