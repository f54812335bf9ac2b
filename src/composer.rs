use crate::error::PipelineError;
use crate::ffmpeg;
use crate::params::{ConcatMode, SubClippedVideoClip, TransitionMode, VideoAspect};
use crate::storage::TaskDirs;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const TRANSITION_SECONDS: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub aspect: VideoAspect,
    pub concat_mode: ConcatMode,
    pub transition_mode: TransitionMode,
    pub max_clip_duration: u32,
    pub threads: u32,
}

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Concatenates processed slices of the input clips into a muted video at
/// the target resolution, at least as long as the narration. Reports
/// slice-encode completion through `progress` in [0, 1].
pub async fn compose(
    dirs: &TaskDirs,
    output_path: &Path,
    input_paths: &[PathBuf],
    audio_path: &Path,
    req: &ComposeRequest,
    progress: &(dyn Fn(f32) + Send + Sync),
) -> Result<PathBuf> {
    let (target_w, target_h) = req.aspect.resolution();
    let audio_duration = ffmpeg::probe_duration_seconds(audio_path)
        .await
        .map_err(|err| PipelineError::encoding(format!("audio probe failed: {err}")))?;

    if input_paths.is_empty() {
        info!("no materials; writing {audio_duration:.1}s solid-color video");
        if !ffmpeg::make_color_video(output_path, target_w, target_h, audio_duration).await? {
            return Err(PipelineError::encoding("solid-color render failed").into());
        }
        return Ok(output_path.to_path_buf());
    }

    let mut sources = Vec::new();
    for path in input_paths {
        let duration = match ffmpeg::probe_duration_seconds(path).await {
            Ok(d) => d,
            Err(err) => {
                warn!("skipping unreadable input {}: {err}", path.display());
                continue;
            }
        };
        let (w, h) = match ffmpeg::probe_video_dimensions(path).await {
            Ok(dims) => dims,
            Err(err) => {
                warn!("skipping input without video stream {}: {err}", path.display());
                continue;
            }
        };
        sources.push((path.clone(), duration, w, h));
    }

    let mut slices = plan_slices(&sources, req.max_clip_duration, req.concat_mode);
    if slices.is_empty() {
        return Err(PipelineError::encoding("no usable slices in input materials").into());
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(now_seed());
    if req.concat_mode == ConcatMode::Random {
        slices.shuffle(&mut rng);
    }

    // Per-slice transform: rescale to target, apply the transition, strip
    // audio, re-encode. Failures are skipped, not fatal.
    let total = slices.len();
    let mut rendered: Vec<(PathBuf, f64)> = Vec::new();
    for (i, slice) in slices.iter().enumerate() {
        let temp_path = dirs.temp_clip(i);
        let scale_chain = scale_crop_filter((slice.width, slice.height), (target_w, target_h), req.aspect);
        let transition = resolve_transition(req.transition_mode, &mut rng);
        let graph = filter_graph(&scale_chain, transition, target_w, target_h, slice.duration());

        let ok = ffmpeg::encode_subclip(
            &slice.source_path,
            slice.start_time,
            slice.end_time,
            &graph,
            req.threads,
            &temp_path,
        )
        .await?;

        if ok {
            rendered.push((temp_path, slice.duration()));
        } else {
            warn!("slice {i} failed to encode; skipping");
        }
        progress((i + 1) as f32 / total as f32);
    }

    if rendered.is_empty() {
        return Err(PipelineError::encoding("every slice failed to encode").into());
    }

    // Cycle the rendered clips until they cover the narration.
    let playlist = build_playlist(&rendered, audio_duration);

    if req.transition_mode == TransitionMode::None {
        let manifest_path = dirs.concat_list();
        let mut manifest = fs::File::create(&manifest_path)
            .await
            .with_context(|| format!("create manifest: {}", manifest_path.display()))?;
        for path in &playlist {
            manifest.write_all(manifest_line(path).as_bytes()).await?;
        }
        manifest.flush().await?;

        if playlist.is_empty() {
            return Err(PipelineError::encoding("concat manifest is empty").into());
        }
        if !ffmpeg::concat_demux(&manifest_path, output_path).await? {
            return Err(PipelineError::encoding("concat failed").into());
        }
    } else {
        // Filter-graph concatenation re-renders the streams so per-clip
        // transition effects survive.
        if !ffmpeg::concat_filter(&playlist, req.threads, output_path).await? {
            return Err(PipelineError::encoding("transition concat failed").into());
        }
    }

    for (path, _) in &rendered {
        let _ = fs::remove_file(path).await;
    }
    let _ = fs::remove_file(dirs.concat_list()).await;

    info!("composed video written: {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// Cuts fixed-length sub-clips from each source, front to back. A slice is
/// emitted only when a full `max_clip_duration` remains; sequential mode
/// keeps just the first slice per source.
pub fn plan_slices(
    sources: &[(PathBuf, f64, u32, u32)],
    max_clip_duration: u32,
    mode: ConcatMode,
) -> Vec<SubClippedVideoClip> {
    let clip_len = max_clip_duration as f64;
    let mut out = Vec::new();
    for (path, duration, w, h) in sources {
        let mut start = 0.0_f64;
        while start + clip_len <= *duration {
            out.push(SubClippedVideoClip {
                source_path: path.clone(),
                start_time: start,
                end_time: start + clip_len,
                width: *w,
                height: *h,
            });
            if mode == ConcatMode::Sequential {
                break;
            }
            start += clip_len;
        }
    }
    out
}

/// Repeats rendered clips in order until their total duration passes the
/// narration duration.
pub fn build_playlist(rendered: &[(PathBuf, f64)], audio_duration: f64) -> Vec<PathBuf> {
    let mut playlist = Vec::new();
    let mut covered = 0.0_f64;
    let mut i = 0usize;
    while covered < audio_duration {
        let (path, duration) = &rendered[i % rendered.len()];
        playlist.push(path.clone());
        covered += *duration;
        i += 1;
    }
    playlist
}

/// One demuxer-safe manifest line: forward slashes, single quotes, any
/// embedded quote closed-escaped-reopened.
pub fn manifest_line(path: &Path) -> String {
    let text = path.display().to_string().replace('\\', "/");
    let quoted = text.replace('\'', "'\\''");
    format!("file '{quoted}'\n")
}

/// Scale/crop/pad chain that maps a source geometry onto the target.
/// Portrait targets crop to fill; other targets letterbox to fit.
pub fn scale_crop_filter(src: (u32, u32), target: (u32, u32), aspect: VideoAspect) -> String {
    let (sw, sh) = src;
    let (tw, th) = target;
    let src_ratio = sw as f64 / sh as f64;
    let target_ratio = tw as f64 / th as f64;

    if (src_ratio - target_ratio).abs() < 1e-6 {
        return format!("scale={tw}:{th},setsar=1");
    }

    if aspect == VideoAspect::Portrait {
        if src_ratio > target_ratio {
            // Wider than the frame: match height, crop the sides.
            let scaled_w = even((sw as f64 * th as f64 / sh as f64).round() as u32);
            let x = (scaled_w - tw) / 2;
            format!("scale={scaled_w}:{th},crop={tw}:{th}:{x}:0,setsar=1")
        } else {
            // Taller than the frame: match width, crop top and bottom.
            let scaled_h = even((sh as f64 * tw as f64 / sw as f64).round() as u32);
            let y = (scaled_h - th) / 2;
            format!("scale={tw}:{scaled_h},crop={tw}:{th}:0:{y},setsar=1")
        }
    } else {
        let factor = (tw as f64 / sw as f64).min(th as f64 / sh as f64);
        let fit_w = even((sw as f64 * factor).round() as u32).min(tw);
        let fit_h = even((sh as f64 * factor).round() as u32).min(th);
        let x = (tw - fit_w) / 2;
        let y = (th - fit_h) / 2;
        format!("scale={fit_w}:{fit_h},pad={tw}:{th}:{x}:{y}:black,setsar=1")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    FadeIn,
    FadeOut,
    Slide { side: Side, inward: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

const SIDES: [Side; 4] = [Side::Left, Side::Right, Side::Top, Side::Bottom];

/// Per-slice effect resolution; `shuffle` draws uniformly, slides get a
/// random side.
pub fn resolve_transition(mode: TransitionMode, rng: &mut impl Rng) -> Transition {
    match mode {
        TransitionMode::None => Transition::None,
        TransitionMode::FadeIn => Transition::FadeIn,
        TransitionMode::FadeOut => Transition::FadeOut,
        TransitionMode::SlideIn => Transition::Slide {
            side: SIDES[rng.gen_range(0..SIDES.len())],
            inward: true,
        },
        TransitionMode::SlideOut => Transition::Slide {
            side: SIDES[rng.gen_range(0..SIDES.len())],
            inward: false,
        },
        TransitionMode::Shuffle => match rng.gen_range(0..4) {
            0 => Transition::FadeIn,
            1 => Transition::FadeOut,
            2 => Transition::Slide {
                side: SIDES[rng.gen_range(0..SIDES.len())],
                inward: true,
            },
            _ => Transition::Slide {
                side: SIDES[rng.gen_range(0..SIDES.len())],
                inward: false,
            },
        },
    }
}

/// Full `-filter_complex` graph for one slice, always emitting a `[v]` pad.
pub fn filter_graph(scale_chain: &str, transition: Transition, w: u32, h: u32, duration: f64) -> String {
    match transition {
        Transition::None => format!("[0:v]{scale_chain}[v]"),
        Transition::FadeIn => format!(
            "[0:v]{scale_chain},fade=t=in:st=0:d={TRANSITION_SECONDS}[v]"
        ),
        Transition::FadeOut => {
            let start = (duration - TRANSITION_SECONDS).max(0.0);
            format!("[0:v]{scale_chain},fade=t=out:st={start:.3}:d={TRANSITION_SECONDS}[v]")
        }
        Transition::Slide { side, inward } => {
            let (x, y) = slide_expressions(side, inward, duration);
            format!(
                "color=c=black:s={w}x{h}:r=30:d={duration:.3}[bg];\
                 [0:v]{scale_chain}[fg];\
                 [bg][fg]overlay=x={x}:y={y}:shortest=1,format=yuv420p[v]"
            )
        }
    }
}

/// Overlay x/y expressions moving the slice over the frame in its first
/// (inward) or last (outward) transition second.
fn slide_expressions(side: Side, inward: bool, duration: f64) -> (String, String) {
    if inward {
        match side {
            Side::Left => ("'-W+W*min(t,1)'".to_string(), "0".to_string()),
            Side::Right => ("'W-W*min(t,1)'".to_string(), "0".to_string()),
            Side::Top => ("0".to_string(), "'-H+H*min(t,1)'".to_string()),
            Side::Bottom => ("0".to_string(), "'H-H*min(t,1)'".to_string()),
        }
    } else {
        let leave = (duration - TRANSITION_SECONDS).max(0.0);
        match side {
            Side::Left => (format!("'-W*min(max(t-{leave:.3},0),1)'"), "0".to_string()),
            Side::Right => (format!("'W*min(max(t-{leave:.3},0),1)'"), "0".to_string()),
            Side::Top => ("0".to_string(), format!("'-H*min(max(t-{leave:.3},0),1)'")),
            Side::Bottom => ("0".to_string(), format!("'H*min(max(t-{leave:.3},0),1)'")),
        }
    }
}

fn even(value: u32) -> u32 {
    value & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(path: &str, duration: f64) -> (PathBuf, f64, u32, u32) {
        (PathBuf::from(path), duration, 1920, 1080)
    }

    #[test]
    fn slices_need_a_full_clip_length() {
        let sources = vec![src("a.mp4", 10.0)];
        let slices = plan_slices(&sources, 3, ConcatMode::Random);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].start_time, 0.0);
        assert_eq!(slices[2].end_time, 9.0);
        for slice in &slices {
            assert!((slice.duration() - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn short_source_yields_no_slices() {
        let sources = vec![src("a.mp4", 2.0)];
        assert!(plan_slices(&sources, 3, ConcatMode::Random).is_empty());
    }

    #[test]
    fn sequential_keeps_first_slice_per_source() {
        let sources = vec![src("a.mp4", 10.0), src("b.mp4", 7.0)];
        let slices = plan_slices(&sources, 3, ConcatMode::Sequential);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].source_path, PathBuf::from("a.mp4"));
        assert_eq!(slices[1].source_path, PathBuf::from("b.mp4"));
        assert_eq!(slices[1].start_time, 0.0);
    }

    #[test]
    fn playlist_cycles_until_covered() {
        let rendered = vec![
            (PathBuf::from("temp-clip-0.mp4"), 3.0),
            (PathBuf::from("temp-clip-1.mp4"), 3.0),
        ];
        let playlist = build_playlist(&rendered, 10.0);
        assert_eq!(playlist.len(), 4);
        assert_eq!(playlist[2], PathBuf::from("temp-clip-0.mp4"));
        let covered: f64 = playlist.len() as f64 * 3.0;
        assert!(covered >= 10.0);
    }

    #[test]
    fn playlist_single_clip_repeats() {
        let rendered = vec![(PathBuf::from("temp-clip-0.mp4"), 4.0)];
        let playlist = build_playlist(&rendered, 9.0);
        assert_eq!(playlist.len(), 3);
    }

    #[test]
    fn manifest_line_quotes_and_forward_slashes() {
        let line = manifest_line(Path::new("tasks/t1/temp-clip-0.mp4"));
        assert_eq!(line, "file 'tasks/t1/temp-clip-0.mp4'\n");
        let tricky = manifest_line(Path::new("tasks/it's/clip.mp4"));
        assert_eq!(tricky, "file 'tasks/it'\\''s/clip.mp4'\n");
    }

    #[test]
    fn equal_ratio_is_plain_scale() {
        let chain = scale_crop_filter((540, 960), (1080, 1920), VideoAspect::Portrait);
        assert_eq!(chain, "scale=1080:1920,setsar=1");
    }

    #[test]
    fn portrait_crops_wide_sources() {
        let chain = scale_crop_filter((1920, 1080), (1080, 1920), VideoAspect::Portrait);
        // Height matched, sides cropped symmetrically.
        assert_eq!(chain, "scale=3412:1920,crop=1080:1920:1166:0,setsar=1");
    }

    #[test]
    fn portrait_crops_tall_sources() {
        let chain = scale_crop_filter((1080, 2400), (1080, 1920), VideoAspect::Portrait);
        assert_eq!(chain, "scale=1080:2400,crop=1080:1920:0:240,setsar=1");
    }

    #[test]
    fn landscape_letterboxes() {
        let chain = scale_crop_filter((1080, 1920), (1920, 1080), VideoAspect::Landscape);
        assert_eq!(chain, "scale=608:1080,pad=1920:1080:656:0:black,setsar=1");
    }

    #[test]
    fn fade_out_starts_before_clip_end() {
        let graph = filter_graph("scale=1080:1920,setsar=1", Transition::FadeOut, 1080, 1920, 3.0);
        assert!(graph.contains("fade=t=out:st=2.000:d=1"));
        assert!(graph.ends_with("[v]"));
    }

    #[test]
    fn slide_graph_has_background_source() {
        let graph = filter_graph(
            "scale=1080:1920,setsar=1",
            Transition::Slide {
                side: Side::Left,
                inward: true,
            },
            1080,
            1920,
            3.0,
        );
        assert!(graph.starts_with("color=c=black:s=1080x1920"));
        assert!(graph.contains("overlay=x='-W+W*min(t,1)':y=0"));
        assert!(graph.ends_with("[v]"));
    }

    #[test]
    fn shuffle_resolves_to_a_concrete_transition() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let t = resolve_transition(TransitionMode::Shuffle, &mut rng);
            assert_ne!(t, Transition::None);
        }
    }

    #[test]
    fn none_mode_stays_identity() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(resolve_transition(TransitionMode::None, &mut rng), Transition::None);
        let graph = filter_graph("scale=1080:1920,setsar=1", Transition::None, 1080, 1920, 3.0);
        assert_eq!(graph, "[0:v]scale=1080:1920,setsar=1[v]");
    }
}
