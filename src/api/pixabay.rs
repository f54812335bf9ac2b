use crate::api::SearchFootage;
use crate::config::Config;
use crate::params::MaterialInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const PIXABAY_BASE: &str = "https://pixabay.com";
const PER_PAGE: u32 = 50;

pub struct PixabayClient {
    pub client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<PixabayHit>,
}

#[derive(Debug, Deserialize)]
struct PixabayHit {
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    videos: PixabayRenditions,
}

/// Pixabay publishes fixed rendition tiers rather than an open list.
#[derive(Debug, Default, Deserialize)]
struct PixabayRenditions {
    large: Option<PixabayFile>,
    medium: Option<PixabayFile>,
    small: Option<PixabayFile>,
    tiny: Option<PixabayFile>,
}

#[derive(Debug, Deserialize)]
struct PixabayFile {
    url: String,
    #[serde(default)]
    width: u32,
}

impl PixabayClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            api_key: cfg.pixabay_key.clone(),
        })
    }
}

#[async_trait]
impl SearchFootage for PixabayClient {
    async fn search(
        &self,
        term: &str,
        min_duration: u32,
        _orientation: &str,
        target: (u32, u32),
    ) -> Result<Vec<MaterialInfo>> {
        let url = format!("{PIXABAY_BASE}/api/videos/");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", term),
                ("video_type", "all"),
                ("per_page", &PER_PAGE.to_string()),
            ])
            .send()
            .await
            .context("Pixabay request failed")?;

        let status = resp.status();
        if !status.is_success() {
            warn!("Pixabay HTTP {} for term '{term}'", status.as_u16());
            return Ok(Vec::new());
        }

        let parsed: SearchResponse = resp.json().await.context("Pixabay response parse failed")?;
        Ok(select_renditions(parsed, min_duration, target))
    }
}

/// Largest-first tier walk; the first rendition at least as wide as the
/// target wins. Pixabay has no exact-resolution guarantee.
fn select_renditions(resp: SearchResponse, min_duration: u32, target: (u32, u32)) -> Vec<MaterialInfo> {
    let (tw, _th) = target;
    let mut out = Vec::new();
    for hit in resp.hits {
        if hit.duration < min_duration as f64 {
            continue;
        }
        let tiers = [
            hit.videos.large.as_ref(),
            hit.videos.medium.as_ref(),
            hit.videos.small.as_ref(),
            hit.videos.tiny.as_ref(),
        ];
        let file = tiers.into_iter().flatten().find(|f| f.width >= tw);
        if let Some(file) = file {
            out.push(MaterialInfo {
                provider: "pixabay".to_string(),
                url: file.url.clone(),
                duration_seconds: hit.duration,
            });
        }
    }
    out
}
