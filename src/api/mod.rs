use crate::params::MaterialInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub mod llm;
pub mod pexels;
pub mod pixabay;
pub mod tts;

/// Stock-footage search capability. Implementations resolve each hit to a
/// single downloadable rendition URL.
#[async_trait]
pub trait SearchFootage: Send + Sync {
    async fn search(
        &self,
        term: &str,
        min_duration: u32,
        orientation: &str,
        target: (u32, u32),
    ) -> Result<Vec<MaterialInfo>>;
}

/// Media download capability, separated from search so cache logic can sit
/// in front of it.
#[async_trait]
pub trait DownloadMedia: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

pub struct HttpDownloader {
    pub client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(20))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DownloadMedia for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self.client.get(url).send().await.context("download request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("download HTTP {} for {url}", status.as_u16()));
        }
        let bytes = resp.bytes().await.context("download body read failed")?;
        if bytes.is_empty() {
            return Err(anyhow::anyhow!("download produced empty body for {url}"));
        }
        crate::storage::write_atomic(dest, bytes.to_vec()).await
    }
}
