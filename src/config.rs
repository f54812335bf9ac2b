use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(rename = "pexels_api_key")]
    #[serde(default)]
    pub pexels_key: String,
    #[serde(rename = "pixabay_api_key")]
    #[serde(default)]
    pub pixabay_key: String,

    #[serde(rename = "llm_api_key")]
    #[serde(default)]
    pub llm_key: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(rename = "tts_api_key")]
    #[serde(default)]
    pub tts_key: String,
    #[serde(default = "default_tts_base_url")]
    pub tts_base_url: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Directory scanned when the material source is `local`.
    #[serde(default)]
    pub local_material_dir: Option<PathBuf>,

    #[serde(default)]
    pub font_path: Option<PathBuf>,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    #[serde(default = "default_download_workers")]
    pub max_download_workers: usize,

    /// Hard ceiling for a single multiplexer invocation, in seconds.
    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout_secs: u64,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tts_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_tts_voice() -> String {
    "JBFqnCBsd6RMkjVDRZzb".to_string()
}

fn default_tts_model() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_download_workers() -> usize {
    5
}

fn default_subprocess_timeout() -> u64 {
    300
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn songs_dir(&self) -> PathBuf {
        self.storage_root.join("songs")
    }
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config object deserializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str(r#"{"pexels_api_key":"k"}"#).unwrap();
        assert_eq!(cfg.pexels_key, "k");
        assert_eq!(cfg.max_download_workers, 5);
        assert_eq!(cfg.subprocess_timeout_secs, 300);
        assert_eq!(cfg.ffmpeg_path, "ffmpeg");
        assert_eq!(cfg.storage_root, PathBuf::from("storage"));
    }

    #[test]
    fn default_is_usable() {
        let cfg = Config::default();
        assert_eq!(cfg.songs_dir(), PathBuf::from("storage").join("songs"));
    }
}
