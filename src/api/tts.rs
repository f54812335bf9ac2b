use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

/// One spoken fragment with its time span, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechFragment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Word/phrase boundaries emitted by the speech engine. Opaque to every
/// stage except the subtitle builder.
#[derive(Debug, Clone, Default)]
pub struct SubMaker {
    pub fragments: Vec<SpeechFragment>,
}

impl SubMaker {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Speech synthesis capability: must write a valid MP3 to `output_path`
/// and may return word boundaries for subtitle alignment.
#[async_trait]
pub trait SynthesizeSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_name: &str,
        rate: f64,
        volume: f64,
        output_path: &Path,
    ) -> Result<Option<SubMaker>>;
}

pub struct SpeechClient {
    pub client: Client,
    base_url: String,
    api_key: String,
    model: String,
    default_voice: String,
}

#[derive(Debug, Deserialize)]
struct TimestampResponse {
    audio_base64: String,
    alignment: Option<CharAlignment>,
}

#[derive(Debug, Deserialize)]
struct CharAlignment {
    characters: Vec<String>,
    character_start_times_seconds: Vec<f64>,
    character_end_times_seconds: Vec<f64>,
}

impl SpeechClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            base_url: cfg.tts_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.tts_key.clone(),
            model: cfg.tts_model.clone(),
            default_voice: cfg.tts_voice.clone(),
        })
    }
}

#[async_trait]
impl SynthesizeSpeech for SpeechClient {
    async fn synthesize(
        &self,
        text: &str,
        voice_name: &str,
        rate: f64,
        volume: f64,
        output_path: &Path,
    ) -> Result<Option<SubMaker>> {
        let voice = if voice_name.is_empty() {
            self.default_voice.as_str()
        } else {
            voice_name
        };
        let url = format!(
            "{}/v1/text-to-speech/{voice}/with-timestamps?output_format=mp3_44100_128",
            self.base_url
        );

        let body = json!({
            "text": text,
            "model_id": self.model,
            "voice_settings": {
                "speed": rate,
                "volume": volume,
            },
        });

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("TTS request failed")?;

        let status = resp.status();
        if !status.is_success() {
            warn!("TTS failed HTTP {}", status.as_u16());
            return Err(anyhow::anyhow!("TTS HTTP {}", status.as_u16()));
        }

        let parsed: TimestampResponse = resp.json().await.context("TTS response parse failed")?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_base64.as_bytes())
            .context("TTS audio decode failed")?;
        if audio.is_empty() {
            return Err(anyhow::anyhow!("TTS returned empty audio"));
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(output_path, &audio).await?;

        let sub_maker = parsed.alignment.map(fragments_from_alignment);
        Ok(sub_maker.filter(|m| !m.is_empty()))
    }
}

/// Folds per-character timings into whitespace-delimited word fragments.
fn fragments_from_alignment(alignment: CharAlignment) -> SubMaker {
    let mut fragments = Vec::new();
    let mut word = String::new();
    let mut word_start = 0.0_f64;
    let mut word_end = 0.0_f64;

    let count = alignment
        .characters
        .len()
        .min(alignment.character_start_times_seconds.len())
        .min(alignment.character_end_times_seconds.len());

    for i in 0..count {
        let ch = alignment.characters[i].as_str();
        let start = alignment.character_start_times_seconds[i];
        let end = alignment.character_end_times_seconds[i];

        if ch.trim().is_empty() {
            if !word.is_empty() {
                fragments.push(SpeechFragment {
                    text: std::mem::take(&mut word),
                    start: word_start,
                    end: word_end,
                });
            }
            continue;
        }

        if word.is_empty() {
            word_start = start;
        }
        word_end = end;
        word.push_str(ch);
    }

    if !word.is_empty() {
        fragments.push(SpeechFragment {
            text: word,
            start: word_start,
            end: word_end,
        });
    }

    SubMaker { fragments }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment(chars: &str, step: f64) -> CharAlignment {
        let characters: Vec<String> = chars.chars().map(|c| c.to_string()).collect();
        let starts: Vec<f64> = (0..characters.len()).map(|i| i as f64 * step).collect();
        let ends: Vec<f64> = (0..characters.len()).map(|i| (i + 1) as f64 * step).collect();
        CharAlignment {
            characters,
            character_start_times_seconds: starts,
            character_end_times_seconds: ends,
        }
    }

    #[test]
    fn words_split_on_whitespace() {
        let maker = fragments_from_alignment(alignment("hi you", 0.1));
        assert_eq!(maker.fragments.len(), 2);
        assert_eq!(maker.fragments[0].text, "hi");
        assert!((maker.fragments[0].start - 0.0).abs() < 1e-9);
        assert!((maker.fragments[0].end - 0.2).abs() < 1e-9);
        assert_eq!(maker.fragments[1].text, "you");
        assert!((maker.fragments[1].start - 0.3).abs() < 1e-9);
        assert!((maker.fragments[1].end - 0.6).abs() < 1e-9);
    }

    #[test]
    fn trailing_word_is_flushed() {
        let maker = fragments_from_alignment(alignment("end", 0.05));
        assert_eq!(maker.fragments.len(), 1);
        assert_eq!(maker.fragments[0].text, "end");
    }

    #[test]
    fn empty_alignment_is_empty() {
        let maker = fragments_from_alignment(alignment("", 0.1));
        assert!(maker.is_empty());
    }
}
