use anyhow::Result;
use async_trait::async_trait;
use reelsmith::api::llm::GenerateText;
use reelsmith::api::tts::{SubMaker, SynthesizeSpeech};
use reelsmith::api::{DownloadMedia, SearchFootage};
use reelsmith::config::Config;
use reelsmith::params::{MaterialInfo, VideoParams};
use reelsmith::pipeline::{self, Providers, StopAt};
use reelsmith::task_state::{self, TaskStatus};
use std::path::Path;
use std::sync::Arc;

struct StubLlm {
    terms: String,
}

#[async_trait]
impl GenerateText for StubLlm {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Search Terms") {
            Ok(self.terms.clone())
        } else {
            Ok("Stub narration about the subject.".to_string())
        }
    }
}

struct StubTts;

#[async_trait]
impl SynthesizeSpeech for StubTts {
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

struct StubSearch;

#[async_trait]
impl SearchFootage for StubSearch {
    async fn search(
        &self,
        _term: &str,
        _min_duration: u32,
        _orientation: &str,
        _target: (u32, u32),
    ) -> Result<Vec<MaterialInfo>> {
        Ok(Vec::new())
    }
}

struct StubDownloader;

#[async_trait]
impl DownloadMedia for StubDownloader {
    async fn download(&self, _url: &str, _dest: &Path) -> Result<()> {
        Ok(())
    }
}

fn stub_providers() -> Providers {
    Providers {
        llm: Arc::new(StubLlm {
            terms: r#"["sunrise", "coffee"]"#.to_string(),
        }),
        tts: Arc::new(StubTts),
        search: Arc::new(StubSearch),
        downloader: Arc::new(StubDownloader),
    }
}

fn config_in(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.storage_root = root.to_path_buf();
    cfg
}

fn params(json: &str) -> VideoParams {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn empty_subject_and_script_fails_before_artifacts() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config_in(scratch.path());
    let providers = stub_providers();
    let task_id = "test-empty-input";

    let p = params(r#"{"video_subject":"","video_script":""}"#);
    let outcome = pipeline::start(&cfg, &providers, task_id, &p, StopAt::Video).await;
    assert!(outcome.is_err());

    let entry = task_state::get(task_id).unwrap();
    assert_eq!(entry.state, TaskStatus::Failed);
    assert_eq!(entry.message, "script");
    assert!(!scratch.path().join("tasks").join(task_id).exists());
}

#[tokio::test]
async fn stop_at_script_completes_with_script_artifact() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config_in(scratch.path());
    let providers = stub_providers();
    let task_id = "test-stop-script";

    let p = params(r#"{"video_subject":"X","video_script":"X"}"#);
    pipeline::start(&cfg, &providers, task_id, &p, StopAt::Script)
        .await
        .unwrap();

    let entry = task_state::get(task_id).unwrap();
    assert_eq!(entry.state, TaskStatus::Complete);
    assert_eq!(entry.progress, 100);
    assert_eq!(entry.artifacts["script"], "X");

    // Nothing past the checkpoint was written.
    let task_dir = scratch.path().join("tasks").join(task_id);
    assert!(!task_dir.join("script.json").exists());
    assert!(!task_dir.join("audio.mp3").exists());
    assert!(!task_dir.join("final-1.mp4").exists());
}

#[tokio::test]
async fn stop_at_terms_persists_script_json() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config_in(scratch.path());
    let providers = stub_providers();
    let task_id = "test-stop-terms";

    let p = params(r#"{"video_subject":"Morning routines","video_script":"Wake early."}"#);
    pipeline::start(&cfg, &providers, task_id, &p, StopAt::Terms)
        .await
        .unwrap();

    let entry = task_state::get(task_id).unwrap();
    assert_eq!(entry.state, TaskStatus::Complete);
    assert_eq!(entry.progress, 100);

    let script_json = scratch
        .path()
        .join("tasks")
        .join(task_id)
        .join("script.json");
    let raw = std::fs::read_to_string(&script_json).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["script"], "Wake early.");
    assert_eq!(parsed["search_terms"][0], "sunrise");
    assert_eq!(parsed["params"]["video_subject"], "Morning routines");

    let task_dir = scratch.path().join("tasks").join(task_id);
    assert!(!task_dir.join("audio.mp3").exists());
    assert!(!task_dir.join("subtitle.srt").exists());
}

#[tokio::test]
async fn generated_script_failure_is_fatal_at_script_stage() {
    struct DeadLlm;

    #[async_trait]
    impl GenerateText for DeadLlm {
        async fn generate_text(&self, _prompt: &str) -> Result<String> {
            Err(anyhow::anyhow!("provider offline"))
        }
    }

    let scratch = tempfile::tempdir().unwrap();
    let cfg = config_in(scratch.path());
    let providers = Providers {
        llm: Arc::new(DeadLlm),
        tts: Arc::new(StubTts),
        search: Arc::new(StubSearch),
        downloader: Arc::new(StubDownloader),
    };
    let task_id = "test-dead-llm";

    // No script supplied, so generation must succeed; it cannot.
    let p = params(r#"{"video_subject":"anything"}"#);
    let outcome = pipeline::start(&cfg, &providers, task_id, &p, StopAt::Script).await;
    assert!(outcome.is_err());

    let entry = task_state::get(task_id).unwrap();
    assert_eq!(entry.state, TaskStatus::Failed);
    assert_eq!(entry.message, "script");
}

#[tokio::test]
async fn restart_resets_registry_entry() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config_in(scratch.path());
    let providers = stub_providers();
    let task_id = "test-restart";

    let p = params(r#"{"video_subject":"X","video_script":"X"}"#);
    pipeline::start(&cfg, &providers, task_id, &p, StopAt::Script)
        .await
        .unwrap();
    assert_eq!(task_state::get(task_id).unwrap().progress, 100);

    pipeline::start(&cfg, &providers, task_id, &p, StopAt::Script)
        .await
        .unwrap();
    let entry = task_state::get(task_id).unwrap();
    assert_eq!(entry.state, TaskStatus::Complete);
    assert_eq!(entry.progress, 100);
}
