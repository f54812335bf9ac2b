use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

static FFMPEG_BIN: OnceCell<String> = OnceCell::new();
static FFPROBE_BIN: OnceCell<String> = OnceCell::new();
static SUBPROCESS_TIMEOUT: OnceCell<Duration> = OnceCell::new();

/// Pins binary paths and the per-invocation timeout for the process.
/// Later calls are ignored; the first configuration wins.
pub fn configure(ffmpeg_path: &str, ffprobe_path: &str, timeout_secs: u64) {
    let _ = FFMPEG_BIN.set(ffmpeg_path.to_string());
    let _ = FFPROBE_BIN.set(ffprobe_path.to_string());
    let _ = SUBPROCESS_TIMEOUT.set(Duration::from_secs(timeout_secs));
}

fn ffmpeg_bin() -> &'static str {
    FFMPEG_BIN.get().map(String::as_str).unwrap_or("ffmpeg")
}

fn ffprobe_bin() -> &'static str {
    FFPROBE_BIN.get().map(String::as_str).unwrap_or("ffprobe")
}

fn subprocess_timeout() -> Duration {
    SUBPROCESS_TIMEOUT.get().copied().unwrap_or(Duration::from_secs(300))
}

/// Runs the multiplexer with the given arguments, optionally from `cwd`.
/// A hung process is killed at the configured timeout.
pub async fn run_ffmpeg(args: &[String], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new(ffmpeg_bin());
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.kill_on_drop(true);

    let status = tokio::time::timeout(subprocess_timeout(), cmd.status())
        .await
        .map_err(|_| anyhow::anyhow!("ffmpeg timed out after {:?}", subprocess_timeout()))?
        .context("ffmpeg execution failed")?;

    if !status.success() {
        return Err(anyhow::anyhow!("ffmpeg failed ({}): {:?}", status, args));
    }
    Ok(())
}

async fn ffprobe_entry(path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(ffprobe_bin())
        .args(["-v", "error"])
        .args(args)
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn probe_video_dimensions(path: &Path) -> Result<(u32, u32)> {
    let text = ffprobe_entry(
        path,
        &[
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ],
    )
    .await?;

    let mut parts = text.split('x');
    let w = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let h = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);

    if w == 0 || h == 0 {
        return Err(anyhow::anyhow!("invalid dimensions for {}", path.display()));
    }
    Ok((w, h))
}

pub async fn probe_duration_seconds(path: &Path) -> Result<f64> {
    let text = ffprobe_entry(
        path,
        &[
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
    )
    .await?;

    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.0 {
        return Err(anyhow::anyhow!("invalid duration for {}", path.display()));
    }
    Ok(duration)
}

pub async fn probe_fps(path: &Path) -> Result<f64> {
    let text = ffprobe_entry(
        path,
        &[
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
    )
    .await?;

    let fps = parse_frame_rate(&text);
    if fps <= 0.0 {
        return Err(anyhow::anyhow!("invalid frame rate for {}", path.display()));
    }
    Ok(fps)
}

pub fn parse_frame_rate(text: &str) -> f64 {
    let mut parts = text.trim().split('/');
    let num = parts.next().and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    match parts.next() {
        Some(den) => {
            let den = den.parse::<f64>().unwrap_or(0.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => num,
    }
}

/// Cuts `[start, end)` out of `input`, runs it through `filter_graph`
/// (which must emit a `[v]` pad), drops audio and re-encodes.
pub async fn encode_subclip(
    input: &Path,
    start: f64,
    end: f64,
    filter_graph: &str,
    threads: u32,
    out: &Path,
) -> Result<bool> {
    let args = vec![
        "-ss".to_string(),
        format!("{start:.3}"),
        "-to".to_string(),
        format!("{end:.3}"),
        "-i".to_string(),
        input.display().to_string(),
        "-filter_complex".to_string(),
        filter_graph.to_string(),
        "-map".to_string(),
        "[v]".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-threads".to_string(),
        threads.to_string(),
        out.display().to_string(),
    ];

    if let Err(err) = run_ffmpeg(&args, None).await {
        warn!("subclip encode failed: {err}");
        return Ok(false);
    }
    Ok(out.exists())
}

/// Writes a solid-black video of exactly `duration` seconds at `w`x`h`.
pub async fn make_color_video(out: &Path, w: u32, h: u32, duration: f64) -> Result<bool> {
    let args = vec![
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("color=c=black:s={w}x{h}:r=30:d={duration:.3}"),
        "-t".to_string(),
        format!("{duration:.3}"),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        out.display().to_string(),
    ];
    run_ffmpeg(&args, None).await?;
    Ok(out.exists())
}

/// Demuxer-level concatenation of a manifest written by the composer.
pub async fn concat_demux(list_txt: &Path, out: &Path) -> Result<bool> {
    let args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        out.display().to_string(),
    ];
    run_ffmpeg(&args, None).await?;
    Ok(out.exists())
}

/// Stream-copy concatenation for same-codec audio parts.
pub async fn concat_audio(list_txt: &Path, out: &Path) -> Result<bool> {
    let args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        out.display().to_string(),
    ];
    run_ffmpeg(&args, None).await?;
    Ok(out.exists())
}

/// Filter-graph concatenation. Re-renders every input so per-clip
/// transition effects survive stream-parameter differences.
pub async fn concat_filter(inputs: &[std::path::PathBuf], threads: u32, out: &Path) -> Result<bool> {
    if inputs.is_empty() {
        return Err(anyhow::anyhow!("concat_filter called with no inputs"));
    }

    let mut args = Vec::new();
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }

    let mut graph = String::new();
    for i in 0..inputs.len() {
        graph.push_str(&format!("[{i}:v]"));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=0[v]", inputs.len()));

    args.push("-filter_complex".to_string());
    args.push(graph);
    args.push("-map".to_string());
    args.push("[v]".to_string());
    args.push("-an".to_string());
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-preset".to_string());
    args.push("ultrafast".to_string());
    args.push("-crf".to_string());
    args.push("23".to_string());
    args.push("-threads".to_string());
    args.push(threads.to_string());
    args.push(out.display().to_string());

    run_ffmpeg(&args, None).await?;
    Ok(out.exists())
}
