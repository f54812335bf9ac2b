use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Resolves every artifact path for one task under the storage root.
/// Temp files live inside the task directory, never the system temp.
#[derive(Debug, Clone)]
pub struct TaskDirs {
    root: PathBuf,
    task_dir: PathBuf,
}

impl TaskDirs {
    pub fn new(storage_root: &Path, task_id: &str) -> Self {
        let task_dir = storage_root.join("tasks").join(task_id);
        Self {
            root: storage_root.to_path_buf(),
            task_dir,
        }
    }

    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.task_dir)
            .await
            .with_context(|| format!("create task dir: {}", self.task_dir.display()))?;
        Ok(())
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    pub fn script_json(&self) -> PathBuf {
        self.task_dir.join("script.json")
    }

    pub fn audio_mp3(&self) -> PathBuf {
        self.task_dir.join("audio.mp3")
    }

    pub fn subtitle_srt(&self) -> PathBuf {
        self.task_dir.join("subtitle.srt")
    }

    pub fn combined_mp4(&self, k: u32) -> PathBuf {
        self.task_dir.join(format!("combined-{k}.mp4"))
    }

    pub fn final_mp4(&self, k: u32) -> PathBuf {
        self.task_dir.join(format!("final-{k}.mp4"))
    }

    pub fn temp_clip(&self, i: usize) -> PathBuf {
        self.task_dir.join(format!("temp-clip-{i}.mp4"))
    }

    pub fn concat_list(&self) -> PathBuf {
        self.task_dir.join("concat_list.txt")
    }

    pub fn title_png(&self) -> PathBuf {
        self.task_dir.join("title.png")
    }

    pub fn font_ttf(&self) -> PathBuf {
        self.task_dir.join("font.ttf")
    }

    pub fn video_cache_dir(&self) -> PathBuf {
        self.root.join("cache_videos")
    }

    pub fn music_cache_dir(&self) -> PathBuf {
        self.root.join("cache_music")
    }

    /// Content-addressed cache slot for a footage URL. The query string is
    /// stripped first so signed links for the same rendition share a slot.
    pub fn cached_video(&self, url: &str) -> PathBuf {
        let key = md5_hex(strip_query(url));
        self.video_cache_dir().join(format!("vid-{key}.mp4"))
    }

    pub fn cached_music(&self, url: &str) -> PathBuf {
        let key = md5_hex(url);
        self.music_cache_dir().join(format!("music-{key}.mp3"))
    }
}

pub fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

const LAYOUT_DIRS: &[&str] = &["tasks", "cache_videos", "cache_music", "songs"];

pub async fn ensure_layout(storage_root: &Path) -> Result<()> {
    for dir in LAYOUT_DIRS {
        let path = storage_root.join(dir);
        if fs::metadata(&path).await.is_err() {
            fs::create_dir_all(&path)
                .await
                .with_context(|| format!("create storage dir: {}", path.display()))?;
            tracing::info!("Created directory: {}", path.display());
        }
    }
    Ok(())
}

pub async fn check_ffmpeg(ffmpeg_bin: &str) -> bool {
    match tokio::process::Command::new(ffmpeg_bin)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Writes `bytes` into `dest` via a sibling temp file and an atomic rename,
/// so a concurrent reader never observes a half-written cache entry.
pub async fn write_atomic(dest: &Path, bytes: Vec<u8>) -> Result<()> {
    let dest = dest.to_path_buf();
    let dir = dest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir).await.ok();

    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(&bytes)?;
        tmp.persist(&dest)
            .map_err(|e| e.error)
            .with_context(|| format!("persist {}", dest.display()))?;
        Ok(())
    })
    .await?
}

pub async fn file_nonempty(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
