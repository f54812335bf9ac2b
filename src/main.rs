use anyhow::{Context, Result};
use reelsmith::config::Config;
use reelsmith::params::VideoParams;
use reelsmith::pipeline::{self, Providers, StopAt};
use reelsmith::{ffmpeg, storage, task_state};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let params_path = args
        .next()
        .context("usage: reelsmith <params.json> [stop_at] [--longform]")?;
    let mut stop_at = StopAt::Video;
    let mut longform = false;
    for arg in args {
        if arg == "--longform" {
            longform = true;
        } else {
            stop_at = serde_json::from_value(serde_json::Value::String(arg.clone()))
                .with_context(|| format!("unknown stop_at: {arg}"))?;
        }
    }

    let cfg = Config::load("config.json").await.unwrap_or_default();
    ffmpeg::configure(&cfg.ffmpeg_path, &cfg.ffprobe_path, cfg.subprocess_timeout_secs);

    storage::ensure_layout(&cfg.storage_root).await?;
    if !storage::check_ffmpeg(&cfg.ffmpeg_path).await {
        eprintln!("[WARNING] FFmpeg not found in PATH. Please install FFmpeg.");
    }

    let raw = tokio::fs::read_to_string(&params_path)
        .await
        .with_context(|| format!("read params: {params_path}"))?;
    let params: VideoParams = serde_json::from_str(&raw).context("parse params JSON")?;

    let task_id = uuid::Uuid::new_v4().simple().to_string();
    let providers = Providers::from_config(&cfg, params.video_source)?;

    println!("task {task_id} started");
    let outcome = if longform {
        pipeline::start_longform(&cfg, &providers, &task_id, &params).await
    } else {
        pipeline::start(&cfg, &providers, &task_id, &params, stop_at).await
    };

    let entry = task_state::get(&task_id);
    match (&outcome, entry) {
        (Ok(()), Some(entry)) => {
            println!("task {task_id} finished: progress={}", entry.progress);
            if let Some(videos) = entry.artifacts.get("videos") {
                println!("videos: {videos}");
            }
        }
        (Err(err), Some(entry)) => {
            eprintln!("task {task_id} failed at '{}': {err:#}", entry.message);
        }
        (_, None) => eprintln!("task {task_id} left no registry entry"),
    }

    outcome.map(|_| ())
}
