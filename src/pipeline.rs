use crate::api::llm::{GenerateText, LlmClient};
use crate::api::pexels::PexelsClient;
use crate::api::pixabay::PixabayClient;
use crate::api::tts::{SpeechClient, SubMaker, SynthesizeSpeech};
use crate::api::{DownloadMedia, HttpDownloader, SearchFootage};
use crate::audio;
use crate::composer::{self, ComposeRequest};
use crate::config::Config;
use crate::error::PipelineError;
use crate::material::{self, MaterialRequest};
use crate::params::{VideoParams, VideoSource};
use crate::renderer;
use crate::script;
use crate::storage::TaskDirs;
use crate::subtitle;
use crate::task_state::{self, TaskStatus, TaskUpdate};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

const SEARCH_TERM_COUNT: usize = 5;

/// Checkpoint after which the run stops early but still completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAt {
    Script,
    Terms,
    Audio,
    Subtitle,
    Materials,
    Video,
}

/// Provider bundle the stage driver runs against. Concrete clients in
/// production; stubs in tests.
pub struct Providers {
    pub llm: Arc<dyn GenerateText>,
    pub tts: Arc<dyn SynthesizeSpeech>,
    pub search: Arc<dyn SearchFootage>,
    pub downloader: Arc<dyn DownloadMedia>,
}

impl Providers {
    pub fn from_config(cfg: &Config, source: VideoSource) -> Result<Self> {
        let search: Arc<dyn SearchFootage> = match source {
            VideoSource::Pixabay => Arc::new(PixabayClient::new(cfg)?),
            VideoSource::Pexels | VideoSource::Local => Arc::new(PexelsClient::new(cfg)?),
        };
        Ok(Self {
            llm: Arc::new(LlmClient::new(cfg)?),
            tts: Arc::new(SpeechClient::new(cfg)?),
            search,
            downloader: Arc::new(HttpDownloader::new()?),
        })
    }
}

/// Progress checkpoint inside one S6 iteration: the first half of the
/// iteration band belongs to composition, the second to rendering.
pub fn iteration_progress(iteration: u32, count: u32, fraction: f64) -> u8 {
    let count = count.max(1) as f64;
    let band = 50.0 / count;
    let base = 50.0 + iteration as f64 * band;
    (base + fraction.clamp(0.0, 1.0) * band).round().min(100.0) as u8
}

fn set_progress(task_id: &str, progress: u8) {
    task_state::update(task_id, TaskUpdate::default().progress(progress));
}

fn fail(task_id: &str, stage: &str, err: anyhow::Error) -> anyhow::Error {
    error!("task {task_id} failed at {stage}: {err:#}");
    task_state::update(
        task_id,
        TaskUpdate::default()
            .state(TaskStatus::Failed)
            .message(stage),
    );
    err
}

fn complete(task_id: &str) {
    task_state::update(
        task_id,
        TaskUpdate::default()
            .state(TaskStatus::Complete)
            .progress(100),
    );
}

/// Drives one task through script, terms, audio, subtitle, materials and
/// composition/render, honoring `stop_at` and recording progress bands.
pub async fn start(
    cfg: &Config,
    providers: &Providers,
    task_id: &str,
    params: &VideoParams,
    stop_at: StopAt,
) -> Result<()> {
    task_state::create(task_id);
    task_state::update(task_id, TaskUpdate::default().state(TaskStatus::Processing));

    if let Err(err) = params.validate() {
        return Err(fail(task_id, "script", err));
    }

    let dirs = TaskDirs::new(&cfg.storage_root, task_id);
    dirs.ensure()
        .await
        .map_err(|err| fail(task_id, "script", err))?;

    // S1: narration script.
    set_progress(task_id, 5);
    let video_script = if params.video_script.trim().is_empty() {
        script::generate_script(
            providers.llm.as_ref(),
            &params.video_subject,
            &params.video_language,
            params.paragraph_number,
        )
        .await
    } else {
        params.video_script.trim().to_string()
    };
    if video_script.is_empty() {
        return Err(fail(
            task_id,
            "script",
            PipelineError::provider("no narration script").into(),
        ));
    }
    task_state::update(
        task_id,
        TaskUpdate::default().progress(10).artifact("script", video_script.clone()),
    );
    if stop_at == StopAt::Script {
        complete(task_id);
        return Ok(());
    }

    // S2: search terms, never fatal.
    set_progress(task_id, 12);
    let search_terms = if params.video_terms.is_empty() {
        script::generate_terms(
            providers.llm.as_ref(),
            &params.video_subject,
            &video_script,
            SEARCH_TERM_COUNT,
        )
        .await
    } else {
        params.video_terms.clone()
    };
    persist_script_json(&dirs, &video_script, &search_terms, params)
        .await
        .map_err(|err| fail(task_id, "script", err))?;
    task_state::update(
        task_id,
        TaskUpdate::default()
            .progress(15)
            .artifact("search_terms", json!(search_terms))
            .artifact("script_file", dirs.script_json().display().to_string()),
    );
    if stop_at == StopAt::Terms {
        complete(task_id);
        return Ok(());
    }

    // S3: narration audio.
    set_progress(task_id, 20);
    let audio_path = dirs.audio_mp3();
    let (sub_maker, audio_duration) =
        audio::synthesize(providers.tts.as_ref(), params, &video_script, &audio_path)
            .await
            .map_err(|err| fail(task_id, "audio", err))?;
    task_state::update(
        task_id,
        TaskUpdate::default()
            .progress(30)
            .artifact("audio_file", audio_path.display().to_string())
            .artifact("audio_duration", audio_duration),
    );
    if stop_at == StopAt::Audio {
        complete(task_id);
        return Ok(());
    }

    // S4: subtitles, soft-fail.
    let subtitle_path = subtitle::build(
        &video_script,
        sub_maker.as_ref(),
        &dirs.subtitle_srt(),
        params.subtitle_enabled,
    )
    .await
    .unwrap_or_default();
    task_state::update(
        task_id,
        TaskUpdate::default()
            .progress(40)
            .artifact("subtitle_path", subtitle_path.clone()),
    );
    if stop_at == StopAt::Subtitle {
        complete(task_id);
        return Ok(());
    }

    // S5: stock or local materials.
    let materials = acquire_materials(cfg, providers, &dirs, params, &search_terms, audio_duration)
        .await
        .map_err(|err| fail(task_id, "materials", err))?;
    if materials.is_empty() {
        return Err(fail(
            task_id,
            "materials",
            PipelineError::resource("no usable materials").into(),
        ));
    }
    task_state::update(
        task_id,
        TaskUpdate::default()
            .progress(50)
            .artifact("materials", json!(materials.iter().map(|p| p.display().to_string()).collect::<Vec<_>>())),
    );
    if stop_at == StopAt::Materials {
        complete(task_id);
        return Ok(());
    }

    // S6: compose and render, once per requested video.
    let compose_req = ComposeRequest {
        aspect: params.video_aspect,
        concat_mode: params.video_concat_mode,
        transition_mode: params.video_transition_mode,
        max_clip_duration: params.video_clip_duration,
        threads: params.n_threads,
    };

    let mut combined_files = Vec::new();
    let mut final_files = Vec::new();
    for k in 0..params.video_count {
        let combined = dirs.combined_mp4(k + 1);
        let final_file = dirs.final_mp4(k + 1);

        let count = params.video_count;
        let task_for_progress = task_id.to_string();
        let on_compose_progress = move |fraction: f32| {
            let progress = iteration_progress(k, count, fraction as f64 * 0.5);
            set_progress(&task_for_progress, progress);
        };

        composer::compose(
            &dirs,
            &combined,
            &materials,
            &audio_path,
            &compose_req,
            &on_compose_progress,
        )
        .await
        .map_err(|err| fail(task_id, "video", err))?;
        set_progress(task_id, iteration_progress(k, count, 0.5));

        renderer::render(
            &dirs,
            &combined,
            &audio_path,
            &subtitle_path,
            &final_file,
            params,
            cfg,
        )
        .await
        .map_err(|err| fail(task_id, "video", err))?;
        set_progress(task_id, iteration_progress(k, count, 1.0));

        combined_files.push(combined.display().to_string());
        final_files.push(final_file.display().to_string());
    }

    task_state::update(
        task_id,
        TaskUpdate::default()
            .artifact("combined_videos", json!(combined_files))
            .artifact("videos", json!(final_files)),
    );
    complete(task_id);
    info!("task {task_id} complete: {} video(s)", final_files.len());
    Ok(())
}

async fn acquire_materials(
    cfg: &Config,
    providers: &Providers,
    dirs: &TaskDirs,
    params: &VideoParams,
    search_terms: &[String],
    audio_duration: u64,
) -> Result<Vec<PathBuf>> {
    if params.video_source == VideoSource::Local {
        let dir = cfg
            .local_material_dir
            .as_deref()
            .ok_or_else(|| PipelineError::resource("local_material_dir not configured"))?;
        return material::acquire_local(
            dir,
            audio_duration,
            params.video_clip_duration,
            params.video_concat_mode,
        )
        .await;
    }

    let request = MaterialRequest {
        terms: search_terms.to_vec(),
        aspect: params.video_aspect,
        concat_mode: params.video_concat_mode,
        audio_duration,
        max_clip_duration: params.video_clip_duration,
    };
    material::acquire(
        dirs,
        providers.search.as_ref(),
        providers.downloader.as_ref(),
        providers.llm.as_ref(),
        &request,
        cfg.max_download_workers,
    )
    .await
}

async fn persist_script_json(
    dirs: &TaskDirs,
    video_script: &str,
    search_terms: &[String],
    params: &VideoParams,
) -> Result<()> {
    let payload = json!({
        "script": video_script,
        "search_terms": search_terms,
        "params": params,
    });
    let path = dirs.script_json();
    fs::write(&path, serde_json::to_vec_pretty(&payload)?)
        .await
        .with_context(|| format!("write script.json: {}", path.display()))?;
    Ok(())
}

/// Long-form entry: the script is cut into paragraph segments, each
/// narrated and composed on its own, then the pieces are merged and
/// rendered once. All intermediates stay inside the task directory.
pub async fn start_longform(
    cfg: &Config,
    providers: &Providers,
    task_id: &str,
    params: &VideoParams,
) -> Result<()> {
    task_state::create(task_id);
    task_state::update(task_id, TaskUpdate::default().state(TaskStatus::Processing));

    if let Err(err) = params.validate() {
        return Err(fail(task_id, "script", err));
    }

    let dirs = TaskDirs::new(&cfg.storage_root, task_id);
    dirs.ensure()
        .await
        .map_err(|err| fail(task_id, "script", err))?;

    set_progress(task_id, 5);
    let video_script = if params.video_script.trim().is_empty() {
        script::generate_script(
            providers.llm.as_ref(),
            &params.video_subject,
            &params.video_language,
            params.paragraph_number,
        )
        .await
    } else {
        params.video_script.trim().to_string()
    };
    if video_script.is_empty() {
        return Err(fail(
            task_id,
            "script",
            PipelineError::provider("no narration script").into(),
        ));
    }
    let segments = split_segments(&video_script, params.paragraph_number as usize);
    task_state::update(
        task_id,
        TaskUpdate::default().progress(10).artifact("script", video_script.clone()),
    );

    set_progress(task_id, 12);
    let search_terms = if params.video_terms.is_empty() {
        script::generate_terms(
            providers.llm.as_ref(),
            &params.video_subject,
            &video_script,
            SEARCH_TERM_COUNT,
        )
        .await
    } else {
        params.video_terms.clone()
    };
    persist_script_json(&dirs, &video_script, &search_terms, params)
        .await
        .map_err(|err| fail(task_id, "script", err))?;
    set_progress(task_id, 15);

    // Narrate each segment; fold the per-segment word timings into one
    // shifted timeline for the subtitle builder.
    set_progress(task_id, 20);
    let mut segment_audio = Vec::new();
    let mut merged_maker = SubMaker::default();
    let mut offset = 0.0_f64;
    let mut total_duration = 0u64;
    for (i, segment) in segments.iter().enumerate() {
        let seg_path = dirs.task_dir().join(format!("temp-audio-{i}.mp3"));
        let (maker, duration) =
            audio::synthesize(providers.tts.as_ref(), params, segment, &seg_path)
                .await
                .map_err(|err| fail(task_id, "audio", err))?;
        if let Some(maker) = maker {
            for fragment in maker.fragments {
                merged_maker.fragments.push(crate::api::tts::SpeechFragment {
                    text: fragment.text,
                    start: fragment.start + offset,
                    end: fragment.end + offset,
                });
            }
        }
        let measured = crate::ffmpeg::probe_duration_seconds(&seg_path)
            .await
            .map_err(|err| fail(task_id, "audio", err.context("segment probe")))?;
        offset += measured;
        total_duration += duration;
        segment_audio.push(seg_path);
    }

    let audio_path = dirs.audio_mp3();
    let audio_list = dirs.task_dir().join("temp-audio-list.txt");
    let mut listing = fs::File::create(&audio_list)
        .await
        .map_err(|err| fail(task_id, "audio", err.into()))?;
    for path in &segment_audio {
        listing
            .write_all(composer::manifest_line(path).as_bytes())
            .await
            .map_err(|err| fail(task_id, "audio", err.into()))?;
    }
    listing.flush().await.ok();
    let merged = crate::ffmpeg::concat_audio(&audio_list, &audio_path)
        .await
        .map_err(|err| fail(task_id, "audio", err))?;
    if !merged {
        return Err(fail(
            task_id,
            "audio",
            PipelineError::encoding("narration merge failed").into(),
        ));
    }
    task_state::update(
        task_id,
        TaskUpdate::default()
            .progress(30)
            .artifact("audio_file", audio_path.display().to_string())
            .artifact("audio_duration", total_duration),
    );

    let sub_maker = if merged_maker.is_empty() {
        None
    } else {
        Some(merged_maker)
    };
    let subtitle_path = subtitle::build(
        &video_script,
        sub_maker.as_ref(),
        &dirs.subtitle_srt(),
        params.subtitle_enabled,
    )
    .await
    .unwrap_or_default();
    set_progress(task_id, 40);

    let materials = acquire_materials(cfg, providers, &dirs, params, &search_terms, total_duration)
        .await
        .map_err(|err| fail(task_id, "materials", err))?;
    if materials.is_empty() {
        return Err(fail(
            task_id,
            "materials",
            PipelineError::resource("no usable materials").into(),
        ));
    }
    set_progress(task_id, 50);

    // One composed segment per narration segment, then a single merge and
    // final render over the combined narration.
    let compose_req = ComposeRequest {
        aspect: params.video_aspect,
        concat_mode: params.video_concat_mode,
        transition_mode: params.video_transition_mode,
        max_clip_duration: params.video_clip_duration,
        threads: params.n_threads,
    };

    let segment_count = segment_audio.len().max(1);
    let mut segment_videos = Vec::new();
    for (i, seg_audio) in segment_audio.iter().enumerate() {
        let seg_video = dirs.task_dir().join(format!("temp-seg-{i}.mp4"));
        let noop = |_fraction: f32| {};
        composer::compose(&dirs, &seg_video, &materials, seg_audio, &compose_req, &noop)
            .await
            .map_err(|err| fail(task_id, "video", err))?;
        segment_videos.push(seg_video);
        let fraction = (i + 1) as f64 / segment_count as f64;
        set_progress(task_id, (50.0 + fraction * 40.0).round() as u8);
    }

    let combined = dirs.combined_mp4(1);
    if !crate::ffmpeg::concat_filter(&segment_videos, params.n_threads, &combined)
        .await
        .map_err(|err| fail(task_id, "video", err))?
    {
        return Err(fail(
            task_id,
            "video",
            PipelineError::encoding("segment merge failed").into(),
        ));
    }

    let final_file = dirs.final_mp4(1);
    renderer::render(
        &dirs,
        &combined,
        &audio_path,
        &subtitle_path,
        &final_file,
        params,
        cfg,
    )
    .await
    .map_err(|err| fail(task_id, "video", err))?;

    for path in segment_audio.iter().chain(segment_videos.iter()) {
        let _ = fs::remove_file(path).await;
    }
    let _ = fs::remove_file(&audio_list).await;

    task_state::update(
        task_id,
        TaskUpdate::default()
            .artifact("combined_videos", json!([combined.display().to_string()]))
            .artifact("videos", json!([final_file.display().to_string()])),
    );
    complete(task_id);
    info!("long-form task {task_id} complete");
    Ok(())
}

/// Paragraph-first segmentation, topping up by sentence groups when the
/// script has fewer paragraphs than requested.
pub fn split_segments(script: &str, want: usize) -> Vec<String> {
    let paragraphs: Vec<String> = script
        .split('\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if paragraphs.len() >= want || paragraphs.len() != 1 {
        return paragraphs;
    }

    // One long paragraph: cut on sentence ends into roughly equal groups.
    let text = &paragraphs[0];
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    if sentences.len() <= 1 {
        return paragraphs;
    }

    let want = want.clamp(1, sentences.len());
    let per_chunk = sentences.len().div_ceil(want);
    sentences
        .chunks(per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}
