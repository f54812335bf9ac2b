use crate::api::tts::{SubMaker, SynthesizeSpeech};
use crate::error::PipelineError;
use crate::ffmpeg;
use crate::params::VideoParams;
use crate::storage;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// Narration for one run: either the user-supplied file verbatim or a TTS
/// synthesis. Returns the subtitle timing carrier (when the engine gave
/// one) and the narration duration rounded up to whole seconds.
pub async fn synthesize(
    tts: &dyn SynthesizeSpeech,
    params: &VideoParams,
    script: &str,
    output_path: &Path,
) -> Result<(Option<SubMaker>, u64)> {
    if let Some(voice_file) = params.voice_file.as_deref() {
        let source = Path::new(voice_file);
        if !storage::file_nonempty(source).await {
            return Err(PipelineError::resource(format!("voice file missing: {voice_file}")).into());
        }
        fs::copy(source, output_path)
            .await
            .with_context(|| format!("copy narration: {voice_file}"))?;
        let duration = probe_ceil(output_path).await?;
        info!("using supplied narration ({duration}s): {voice_file}");
        return Ok((None, duration));
    }

    let sub_maker = tts
        .synthesize(
            script,
            &params.voice_name,
            params.voice_rate,
            params.voice_volume,
            output_path,
        )
        .await
        .map_err(|err| PipelineError::provider(format!("speech synthesis failed: {err}")))?;

    if !storage::file_nonempty(output_path).await {
        return Err(PipelineError::provider("speech synthesis wrote no audio").into());
    }

    let duration = probe_ceil(output_path).await?;
    if sub_maker.is_none() {
        warn!("speech engine returned no word boundaries; subtitles may be skipped");
    }
    info!("narration synthesized ({duration}s)");
    Ok((sub_maker, duration))
}

async fn probe_ceil(path: &Path) -> Result<u64> {
    let measured = ffmpeg::probe_duration_seconds(path)
        .await
        .map_err(|err| PipelineError::encoding(format!("narration probe failed: {err}")))?;
    if measured <= 0.0 {
        return Err(PipelineError::encoding("narration has zero duration").into());
    }
    Ok(measured.ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tts::SpeechFragment;
    use async_trait::async_trait;

    struct NoopTts;

    #[async_trait]
    impl SynthesizeSpeech for NoopTts {
        async fn synthesize(
            &self,
            _text: &str,
            _voice_name: &str,
            _rate: f64,
            _volume: f64,
            _output_path: &Path,
        ) -> Result<Option<SubMaker>> {
            Ok(Some(SubMaker {
                fragments: vec![SpeechFragment {
                    text: "hi".to_string(),
                    start: 0.0,
                    end: 0.4,
                }],
            }))
        }
    }

    #[tokio::test]
    async fn missing_voice_file_is_a_resource_error() {
        let params: VideoParams = serde_json::from_str(
            r#"{"video_subject":"x","voice_file":"/nonexistent/narration.mp3"}"#,
        )
        .unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("audio.mp3");
        let err = synthesize(&NoopTts, &params, "script", &out).await.unwrap_err();
        assert!(err.to_string().contains("voice file missing"));
    }

    #[tokio::test]
    async fn empty_tts_output_is_a_provider_error() {
        struct EmptyTts;

        #[async_trait]
        impl SynthesizeSpeech for EmptyTts {
            async fn synthesize(
                &self,
                _text: &str,
                _voice_name: &str,
                _rate: f64,
                _volume: f64,
                _output_path: &Path,
            ) -> Result<Option<SubMaker>> {
                Ok(None)
            }
        }

        let params: VideoParams = serde_json::from_str(r#"{"video_subject":"x"}"#).unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("audio.mp3");
        let err = synthesize(&EmptyTts, &params, "script", &out).await.unwrap_err();
        assert!(err.to_string().contains("wrote no audio"));
    }
}
