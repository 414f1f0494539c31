use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

/// Form fields the directory endpoint expects for the church listing.
const DIRECTORY_FORM: &[(&str, &str)] = &[("buscar", "anu_igrejas"), ("tipo", "1")];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch directory page: {0}")]
    Request(#[from] reqwest::Error),
    #[error("directory endpoint answered HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to read cached page {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where the directory HTML comes from.
pub enum HtmlSource {
    Remote { url: String, timeout: Duration },
    Cache(PathBuf),
}

impl HtmlSource {
    pub async fn provide_html(&self) -> Result<String, SourceError> {
        match self {
            HtmlSource::Remote { url, timeout } => fetch_directory(url, *timeout).await,
            HtmlSource::Cache(path) => read_cache(path),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HtmlSource::Remote { url, .. } => url.clone(),
            HtmlSource::Cache(path) => path.display().to_string(),
        }
    }
}

async fn fetch_directory(url: &str, timeout: Duration) -> Result<String, SourceError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    info!("Fetching directory page: {}", url);
    let response = client.post(url).form(DIRECTORY_FORM).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let html = response.text().await?;
    info!("Directory page: {} bytes", html.len());
    Ok(html)
}

fn read_cache(path: &Path) -> Result<String, SourceError> {
    std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Keep a copy of a fetched page so later runs can use `--cache`.
pub fn save_cache(path: &Path, html: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
}
