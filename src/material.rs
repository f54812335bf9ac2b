use crate::api::llm::GenerateText;
use crate::api::{DownloadMedia, SearchFootage};
use crate::ffmpeg;
use crate::params::{ConcatMode, MaterialInfo, VideoAspect};
use crate::storage::{self, TaskDirs};
use anyhow::Result;
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use walkdir::WalkDir;

const LOCAL_EXTENSIONS: &[&str] = &["mp4", "mov"];

#[derive(Debug, Clone)]
pub struct MaterialRequest {
    pub terms: Vec<String>,
    pub aspect: VideoAspect,
    pub concat_mode: ConcatMode,
    pub audio_duration: u64,
    pub max_clip_duration: u32,
}

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Rough count of clips needed to cover the narration, assuming ~3s of
/// usable footage per clip, with headroom for validation failures.
pub fn estimate_needed(audio_duration: u64) -> usize {
    (audio_duration / 3 + 3) as usize
}

/// Drops candidates whose URL was already seen earlier in this call,
/// preserving discovery order.
pub fn dedup_candidates(candidates: Vec<MaterialInfo>) -> Vec<MaterialInfo> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

/// Searches, downloads and validates stock footage until the accumulated
/// sliceable duration exceeds the narration. Returns local paths in the
/// order they should be consumed; empty when nothing validated.
pub async fn acquire(
    dirs: &TaskDirs,
    search: &dyn SearchFootage,
    downloader: &dyn DownloadMedia,
    llm: &dyn GenerateText,
    req: &MaterialRequest,
    max_workers: usize,
) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    let target = req.aspect.resolution();
    let orientation = req.aspect.orientation();

    for term in &req.terms {
        let mut hits = search
            .search(term, req.max_clip_duration, orientation, target)
            .await
            .unwrap_or_else(|err| {
                warn!("search failed for '{term}': {err}");
                Vec::new()
            });

        // A non-English term often finds nothing; translate and retry once.
        if hits.is_empty() {
            if let Some(english) = crate::script::translate_term(llm, term).await {
                info!("retrying search with translation: '{term}' -> '{english}'");
                hits = search
                    .search(&english, req.max_clip_duration, orientation, target)
                    .await
                    .unwrap_or_default();
            }
        }

        candidates.extend(hits);
    }

    let mut candidates = dedup_candidates(candidates);
    if candidates.is_empty() {
        warn!("no footage candidates found for terms: {:?}", req.terms);
        return Ok(Vec::new());
    }
    info!("{} footage candidates after dedup", candidates.len());

    if req.concat_mode == ConcatMode::Random {
        let mut rng = rand::rngs::StdRng::seed_from_u64(now_seed());
        candidates.shuffle(&mut rng);
    }

    let needed = estimate_needed(req.audio_duration).min(candidates.len());
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));

    let batch_futures = candidates[..needed].iter().map(|candidate| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            fetch_validated(dirs, downloader, candidate).await
        }
    });
    let batch: Vec<Option<(PathBuf, f64)>> = join_all(batch_futures).await;

    let mut total_duration = 0.0_f64;
    let mut paths = Vec::new();
    for item in batch.into_iter().flatten() {
        let (path, duration) = item;
        total_duration += duration.min(req.max_clip_duration as f64);
        paths.push(path);
        if total_duration > req.audio_duration as f64 {
            break;
        }
    }

    // Parallel batch came up short; keep going one candidate at a time.
    let mut cursor = needed;
    while total_duration <= req.audio_duration as f64 && cursor < candidates.len() {
        if let Some((path, duration)) = fetch_validated(dirs, downloader, &candidates[cursor]).await {
            total_duration += duration.min(req.max_clip_duration as f64);
            paths.push(path);
        }
        cursor += 1;
    }

    info!(
        "materials acquired: {} clips, {:.1}s sliceable vs {}s narration",
        paths.len(),
        total_duration,
        req.audio_duration
    );
    Ok(paths)
}

/// Cache-first download with decode validation. Invalid files are deleted
/// and reported as absent so the caller moves on to the next candidate.
async fn fetch_validated(
    dirs: &TaskDirs,
    downloader: &dyn DownloadMedia,
    candidate: &MaterialInfo,
) -> Option<(PathBuf, f64)> {
    let dest = dirs.cached_video(&candidate.url);

    if storage::file_nonempty(&dest).await {
        if let Some(duration) = validate_clip(&dest).await {
            info!("cache hit: {}", dest.display());
            return Some((dest, duration));
        }
        let _ = fs::remove_file(&dest).await;
    }

    if let Err(err) = downloader.download(&candidate.url, &dest).await {
        warn!("download failed for {}: {err}", candidate.url);
        return None;
    }

    match validate_clip(&dest).await {
        Some(duration) => Some((dest, duration)),
        None => {
            warn!("downloaded file failed validation, deleting: {}", dest.display());
            let _ = fs::remove_file(&dest).await;
            None
        }
    }
}

async fn validate_clip(path: &Path) -> Option<f64> {
    let duration = ffmpeg::probe_duration_seconds(path).await.ok()?;
    let fps = ffmpeg::probe_fps(path).await.ok()?;
    if duration > 0.0 && fps > 0.0 {
        Some(duration)
    } else {
        None
    }
}

/// Local-source variant: walks a directory for video files and validates
/// them the same way downloaded footage is validated.
pub async fn acquire_local(
    material_dir: &Path,
    audio_duration: u64,
    max_clip_duration: u32,
    concat_mode: ConcatMode,
) -> Result<Vec<PathBuf>> {
    let mut files = list_local_videos(material_dir);
    if files.is_empty() {
        warn!("no local materials under {}", material_dir.display());
        return Ok(Vec::new());
    }

    if concat_mode == ConcatMode::Random {
        let mut rng = rand::rngs::StdRng::seed_from_u64(now_seed());
        files.shuffle(&mut rng);
    }

    let mut total_duration = 0.0_f64;
    let mut paths = Vec::new();
    for file in files {
        let Some(duration) = validate_clip(&file).await else {
            warn!("skipping unreadable local clip: {}", file.display());
            continue;
        };
        total_duration += duration.min(max_clip_duration as f64);
        paths.push(file);
        if total_duration > audio_duration as f64 {
            break;
        }
    }
    Ok(paths)
}

pub fn list_local_videos(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).into_iter().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if LOCAL_EXTENSIONS.iter().any(|want| ext.eq_ignore_ascii_case(want)) {
            out.push(path.to_path_buf());
        }
    }
    out.sort();
    out
}
