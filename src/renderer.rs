use crate::api::{DownloadMedia, HttpDownloader};
use crate::config::Config;
use crate::error::PipelineError;
use crate::ffmpeg;
use crate::params::{BgmType, SubtitlePosition, VideoAspect, VideoParams};
use crate::storage::{self, TaskDirs};
use crate::title;
use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{info, warn};

// libass renders SRT against a 288-line script grid.
const ASS_PLAY_RES_Y: f64 = 288.0;

/// Muxes the composed video with narration, optional BGM, burned-in
/// subtitles and the title overlay into the deliverable.
pub async fn render(
    dirs: &TaskDirs,
    video_path: &Path,
    audio_path: &Path,
    subtitle_path: &str,
    output_file: &Path,
    params: &VideoParams,
    cfg: &Config,
) -> Result<PathBuf> {
    let (width, height) = params.video_aspect.resolution();
    let bgm = resolve_bgm(dirs, params, cfg).await?;

    let font_bytes = match &cfg.font_path {
        Some(path) => match fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("font unreadable ({}): {err}", path.display());
                None
            }
        },
        None => None,
    };

    // Burn-in reads fonts from the working directory, so the font travels
    // into the task dir under a fixed name.
    let mut burn_subtitles = !subtitle_path.is_empty();
    if burn_subtitles {
        match &font_bytes {
            Some(bytes) => fs::write(dirs.font_ttf(), bytes)
                .await
                .context("copy font into task dir")?,
            None => {
                warn!("no font configured; skipping subtitle burn-in");
                burn_subtitles = false;
            }
        }
    }

    let mut draw_title = !params.video_subject.trim().is_empty();
    if draw_title {
        match font_bytes.clone() {
            Some(bytes) => {
                title::render_title(&dirs.title_png(), &params.video_subject, (width, height), bytes)?;
            }
            None => {
                warn!("no font configured; skipping title overlay");
                draw_title = false;
            }
        }
    }

    let mut args: Vec<String> = vec![
        "-i".to_string(),
        video_path.display().to_string(),
        "-i".to_string(),
        audio_path.display().to_string(),
    ];

    let mut next_input = 2usize;
    let bgm_input = bgm.as_ref().map(|path| {
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
        args.push("-i".to_string());
        args.push(path.display().to_string());
        let idx = next_input;
        next_input += 1;
        idx
    });
    let title_input = if draw_title {
        args.push("-i".to_string());
        args.push("title.png".to_string());
        let idx = next_input;
        next_input += 1;
        Some(idx)
    } else {
        None
    };

    let graph = build_filter_graph(params, burn_subtitles, bgm_input, title_input);

    args.push("-filter_complex".to_string());
    args.push(graph);
    args.push("-map".to_string());
    args.push("[vout]".to_string());
    args.push("-map".to_string());
    args.push("[aout]".to_string());
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push("ultrafast".to_string());
    args.push("-crf".to_string());
    args.push("23".to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push("192k".to_string());
    args.push("-shortest".to_string());
    args.push(output_file.display().to_string());

    ffmpeg::run_ffmpeg(&args, Some(dirs.task_dir()))
        .await
        .map_err(|err| PipelineError::encoding(format!("final render failed: {err}")))?;

    if !storage::file_nonempty(output_file).await {
        return Err(PipelineError::encoding("final render produced no output").into());
    }

    info!("final render written: {}", output_file.display());
    Ok(output_file.to_path_buf())
}

/// Full `-filter_complex` string: subtitle burn-in, then title overlay,
/// then the narration/BGM mix.
fn build_filter_graph(
    params: &VideoParams,
    burn_subtitles: bool,
    bgm_input: Option<usize>,
    title_input: Option<usize>,
) -> String {
    let voice_volume = params.voice_volume;
    let bgm_volume = params.bgm_volume;
    let mut chains = Vec::new();
    let mut video_label = "0:v".to_string();

    if burn_subtitles {
        let style = subtitle_style(
            params.video_aspect,
            params.subtitle_position,
            params.custom_position,
            &params.font_name,
        );
        chains.push(format!(
            "[{video_label}]subtitles=subtitle.srt:fontsdir='.':force_style='{style}'[vsub]"
        ));
        video_label = "vsub".to_string();
    }

    if let Some(idx) = title_input {
        chains.push(format!("[{video_label}][{idx}:v]overlay=0:0[vtitle]"));
        video_label = "vtitle".to_string();
    }

    chains.push(format!("[{video_label}]null[vout]"));

    match bgm_input {
        Some(idx) => {
            chains.push(format!("[1:a]volume={voice_volume:.2}[na]"));
            chains.push(format!("[{idx}:a]volume={bgm_volume:.2}[ba]"));
            chains.push("[na][ba]amix=inputs=2:duration=first:dropout_transition=2[aout]".to_string());
        }
        None => {
            chains.push(format!("[1:a]volume={voice_volume:.2}[aout]"));
        }
    }

    chains.join(";")
}

/// ASS style override for the burn-in filter. Sizes and margins follow the
/// frame orientation; position maps onto numpad alignment.
pub fn subtitle_style(
    aspect: VideoAspect,
    position: SubtitlePosition,
    custom_position: f64,
    font_name: &str,
) -> String {
    let (font_size, margin_v) = match aspect {
        VideoAspect::Portrait => (16, 70),
        VideoAspect::Landscape | VideoAspect::Square => (20, 20),
    };

    let (alignment, margin_v) = match position {
        SubtitlePosition::Top => (8, margin_v),
        SubtitlePosition::Center => (5, margin_v),
        SubtitlePosition::Bottom => (2, margin_v),
        SubtitlePosition::Custom => {
            let pct = custom_position.clamp(0.0, 100.0);
            (2, (((100.0 - pct) / 100.0) * ASS_PLAY_RES_Y).round() as i32)
        }
    };

    let mut style = String::new();
    if !font_name.is_empty() {
        style.push_str(&format!("FontName={font_name},"));
    }
    style.push_str(&format!(
        "FontSize={font_size},PrimaryColour=&HFFFFFF&,OutlineColour=&H000000&,Outline=2,Alignment={alignment},MarginV={margin_v}"
    ));
    style
}

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Picks the background track for this render, if any. Random mode draws
/// from the shared songs directory; custom accepts a local path or URL.
async fn resolve_bgm(dirs: &TaskDirs, params: &VideoParams, cfg: &Config) -> Result<Option<PathBuf>> {
    match params.bgm_type {
        BgmType::None => Ok(None),
        BgmType::Random => {
            let songs = list_songs(&cfg.songs_dir());
            if songs.is_empty() {
                return Err(PipelineError::resource(format!(
                    "no BGM files under {}",
                    cfg.songs_dir().display()
                ))
                .into());
            }
            let mut rng = rand::rngs::StdRng::seed_from_u64(now_seed());
            let pick = songs[rng.gen_range(0..songs.len())].clone();
            info!("random BGM: {}", pick.display());
            Ok(Some(pick))
        }
        BgmType::Custom => {
            let file = params.bgm_file.trim();
            if file.starts_with("http://") || file.starts_with("https://") {
                let dest = dirs.cached_music(file);
                if !storage::file_nonempty(&dest).await {
                    let downloader = HttpDownloader::new()?;
                    downloader
                        .download(file, &dest)
                        .await
                        .map_err(|err| PipelineError::provider(format!("BGM download failed: {err}")))?;
                }
                return Ok(Some(dest));
            }
            let path = PathBuf::from(file);
            if !storage::file_nonempty(&path).await {
                return Err(PipelineError::resource(format!("bgm_file missing: {file}")).into());
            }
            Ok(Some(path))
        }
    }
}

fn list_songs(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if ext.eq_ignore_ascii_case("mp3") || ext.eq_ignore_ascii_case("m4a") {
            out.push(path.to_path_buf());
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: &str) -> VideoParams {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn style_portrait_bottom() {
        let style = subtitle_style(VideoAspect::Portrait, SubtitlePosition::Bottom, 70.0, "");
        assert!(style.contains("FontSize=16"));
        assert!(style.contains("MarginV=70"));
        assert!(style.contains("Alignment=2"));
        assert!(!style.contains("FontName"));
    }

    #[test]
    fn style_landscape_top_with_font() {
        let style = subtitle_style(VideoAspect::Landscape, SubtitlePosition::Top, 0.0, "Inter");
        assert!(style.starts_with("FontName=Inter,"));
        assert!(style.contains("FontSize=20"));
        assert!(style.contains("Alignment=8"));
        assert!(style.contains("MarginV=20"));
    }

    #[test]
    fn style_custom_position_scales_margin() {
        let style = subtitle_style(VideoAspect::Portrait, SubtitlePosition::Custom, 75.0, "");
        // 25% of frame height from the bottom on the 288-line grid.
        assert!(style.contains("MarginV=72"));
        assert!(style.contains("Alignment=2"));
    }

    #[test]
    fn graph_without_extras_is_passthrough_plus_voice() {
        let p = params(r#"{"video_subject":"x","subtitle_enabled":false}"#);
        let graph = build_filter_graph(&p, false, None, None);
        assert_eq!(graph, "[0:v]null[vout];[1:a]volume=1.00[aout]");
    }

    #[test]
    fn graph_with_subtitles_title_and_bgm() {
        let p = params(r#"{"video_subject":"Morning","video_aspect":"portrait"}"#);
        let graph = build_filter_graph(&p, true, Some(2), Some(3));
        assert!(graph.contains("subtitles=subtitle.srt:fontsdir='.'"));
        assert!(graph.contains("[vsub][3:v]overlay=0:0[vtitle]"));
        assert!(graph.contains("[vtitle]null[vout]"));
        assert!(graph.contains("[2:a]volume=0.20[ba]"));
        assert!(graph.contains("amix=inputs=2:duration=first"));
    }

    #[test]
    fn song_listing_is_flat_and_filtered() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(scratch.path().join("b.M4A"), b"x").unwrap();
        std::fs::write(scratch.path().join("cover.jpg"), b"x").unwrap();
        std::fs::create_dir(scratch.path().join("deep")).unwrap();
        std::fs::write(scratch.path().join("deep").join("c.mp3"), b"x").unwrap();

        let songs = list_songs(scratch.path());
        assert_eq!(songs.len(), 2);
    }
}
