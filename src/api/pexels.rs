use crate::api::SearchFootage;
use crate::config::Config;
use crate::params::MaterialInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const PEXELS_BASE: &str = "https://api.pexels.com";
const PER_PAGE: u32 = 50;

pub struct PexelsClient {
    pub client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    video_files: Vec<PexelsVideoFile>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideoFile {
    link: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

impl PexelsClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            api_key: cfg.pexels_key.clone(),
        })
    }
}

#[async_trait]
impl SearchFootage for PexelsClient {
    async fn search(
        &self,
        term: &str,
        min_duration: u32,
        orientation: &str,
        target: (u32, u32),
    ) -> Result<Vec<MaterialInfo>> {
        let url = format!("{PEXELS_BASE}/videos/search");
        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", term),
                ("per_page", &PER_PAGE.to_string()),
                ("orientation", orientation),
            ])
            .send()
            .await
            .context("Pexels request failed")?;

        let status = resp.status();
        if !status.is_success() {
            warn!("Pexels HTTP {} for term '{term}'", status.as_u16());
            return Ok(Vec::new());
        }

        let parsed: SearchResponse = resp.json().await.context("Pexels response parse failed")?;
        Ok(select_renditions(parsed, min_duration, target))
    }
}

/// Keeps clips long enough to slice and picks the rendition whose
/// dimensions match the target resolution exactly.
fn select_renditions(resp: SearchResponse, min_duration: u32, target: (u32, u32)) -> Vec<MaterialInfo> {
    let (tw, th) = target;
    let mut out = Vec::new();
    for video in resp.videos {
        if video.duration < min_duration as f64 {
            continue;
        }
        let hit = video
            .video_files
            .iter()
            .find(|f| f.width == tw && f.height == th);
        if let Some(file) = hit {
            out.push(MaterialInfo {
                provider: "pexels".to_string(),
                url: file.link.clone(),
                duration_seconds: video.duration,
            });
        }
    }
    out
}
