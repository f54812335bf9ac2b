use crate::error::PipelineError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoAspect {
    Portrait,
    Landscape,
    Square,
}

impl VideoAspect {
    pub fn resolution(self) -> (u32, u32) {
        match self {
            VideoAspect::Portrait => (1080, 1920),
            VideoAspect::Landscape => (1920, 1080),
            VideoAspect::Square => (1080, 1080),
        }
    }

    /// Orientation keyword the stock-footage search APIs expect.
    pub fn orientation(self) -> &'static str {
        match self {
            VideoAspect::Portrait => "portrait",
            VideoAspect::Landscape => "landscape",
            VideoAspect::Square => "square",
        }
    }

    pub fn ratio(self) -> f64 {
        let (w, h) = self.resolution();
        w as f64 / h as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    Pexels,
    Pixabay,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatMode {
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    None,
    FadeIn,
    FadeOut,
    SlideIn,
    SlideOut,
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BgmType {
    None,
    Random,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    Top,
    Center,
    Bottom,
    Custom,
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoParams {
    pub video_subject: String,
    #[serde(default)]
    pub video_script: String,
    #[serde(default)]
    pub video_terms: Vec<String>,
    #[serde(default = "default_language")]
    pub video_language: String,

    #[serde(default = "default_aspect")]
    pub video_aspect: VideoAspect,
    #[serde(default = "default_source")]
    pub video_source: VideoSource,
    #[serde(default = "default_concat_mode")]
    pub video_concat_mode: ConcatMode,
    #[serde(default = "default_transition_mode")]
    pub video_transition_mode: TransitionMode,

    /// Upper bound for a single slice, in seconds.
    #[serde(default = "default_clip_duration")]
    pub video_clip_duration: u32,
    /// Number of distinct final renders.
    #[serde(default = "default_video_count")]
    pub video_count: u32,

    #[serde(default)]
    pub voice_name: String,
    #[serde(default = "default_voice_rate")]
    pub voice_rate: f64,
    #[serde(default = "default_voice_volume")]
    pub voice_volume: f64,
    /// Pre-recorded narration; when set, TTS is bypassed.
    #[serde(default)]
    pub voice_file: Option<String>,

    #[serde(default = "default_bgm_type")]
    pub bgm_type: BgmType,
    #[serde(default)]
    pub bgm_file: String,
    #[serde(default = "default_bgm_volume")]
    pub bgm_volume: f64,

    #[serde(default = "default_subtitle_enabled")]
    pub subtitle_enabled: bool,
    #[serde(default = "default_subtitle_position")]
    pub subtitle_position: SubtitlePosition,
    /// Percent of frame height from the top, used with `Custom`.
    #[serde(default = "default_custom_position")]
    pub custom_position: f64,

    #[serde(default)]
    pub font_name: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_text_fore_color")]
    pub text_fore_color: String,
    #[serde(default = "default_stroke_color")]
    pub stroke_color: String,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,

    #[serde(default = "default_n_threads")]
    pub n_threads: u32,
    #[serde(default = "default_paragraph_number")]
    pub paragraph_number: u32,
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_aspect() -> VideoAspect {
    VideoAspect::Portrait
}

fn default_source() -> VideoSource {
    VideoSource::Pexels
}

fn default_concat_mode() -> ConcatMode {
    ConcatMode::Random
}

fn default_transition_mode() -> TransitionMode {
    TransitionMode::None
}

fn default_clip_duration() -> u32 {
    5
}

fn default_video_count() -> u32 {
    1
}

fn default_voice_rate() -> f64 {
    1.0
}

fn default_voice_volume() -> f64 {
    1.0
}

fn default_bgm_type() -> BgmType {
    BgmType::Random
}

fn default_bgm_volume() -> f64 {
    0.2
}

fn default_subtitle_enabled() -> bool {
    true
}

fn default_subtitle_position() -> SubtitlePosition {
    SubtitlePosition::Bottom
}

fn default_custom_position() -> f64 {
    70.0
}

fn default_font_size() -> u32 {
    60
}

fn default_text_fore_color() -> String {
    "#FFFFFF".to_string()
}

fn default_stroke_color() -> String {
    "#000000".to_string()
}

fn default_stroke_width() -> f64 {
    1.5
}

fn default_n_threads() -> u32 {
    2
}

fn default_paragraph_number() -> u32 {
    1
}

impl VideoParams {
    /// Range and enum checks for one run. A missing subject is allowed as
    /// long as a script was supplied directly.
    pub fn validate(&self) -> Result<()> {
        if self.video_subject.trim().is_empty() && self.video_script.trim().is_empty() {
            return Err(PipelineError::input("video_subject and video_script are both empty").into());
        }
        if self.video_clip_duration == 0 {
            return Err(PipelineError::input("video_clip_duration must be positive").into());
        }
        if self.video_count == 0 {
            return Err(PipelineError::input("video_count must be positive").into());
        }
        if !(0.5..=2.0).contains(&self.voice_rate) {
            return Err(PipelineError::input("voice_rate out of range [0.5, 2.0]").into());
        }
        if !(0.1..=3.0).contains(&self.voice_volume) {
            return Err(PipelineError::input("voice_volume out of range [0.1, 3.0]").into());
        }
        if !(0.0..=1.0).contains(&self.bgm_volume) {
            return Err(PipelineError::input("bgm_volume out of range [0, 1]").into());
        }
        if self.bgm_type == BgmType::Custom && self.bgm_file.trim().is_empty() {
            return Err(PipelineError::input("bgm_file required when bgm_type=custom").into());
        }
        if !(0.0..=100.0).contains(&self.custom_position) {
            return Err(PipelineError::input("custom_position out of range [0, 100]").into());
        }
        if self.n_threads == 0 {
            return Err(PipelineError::input("n_threads must be positive").into());
        }
        if self.paragraph_number == 0 {
            return Err(PipelineError::input("paragraph_number must be positive").into());
        }
        Ok(())
    }
}

/// A `[start, end)` cut of a source video after slicing.
#[derive(Debug, Clone, PartialEq)]
pub struct SubClippedVideoClip {
    pub source_path: std::path::PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub width: u32,
    pub height: u32,
}

impl SubClippedVideoClip {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// One search hit from a stock-footage provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialInfo {
    pub provider: String,
    pub url: String,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> VideoParams {
        serde_json::from_str(r#"{"video_subject":"seven habits"}"#).unwrap()
    }

    #[test]
    fn defaults_deserialize() {
        let p = base_params();
        assert_eq!(p.video_aspect, VideoAspect::Portrait);
        assert_eq!(p.video_source, VideoSource::Pexels);
        assert_eq!(p.video_clip_duration, 5);
        assert_eq!(p.video_count, 1);
        assert!(p.subtitle_enabled);
        p.validate().unwrap();
    }

    #[test]
    fn empty_subject_and_script_rejected() {
        let mut p = base_params();
        p.video_subject = String::new();
        assert!(p.validate().is_err());

        p.video_script = "hand-written narration".to_string();
        p.validate().unwrap();
    }

    #[test]
    fn voice_rate_bounds() {
        let mut p = base_params();
        p.voice_rate = 2.5;
        assert!(p.validate().is_err());
        p.voice_rate = 0.5;
        p.validate().unwrap();
    }

    #[test]
    fn custom_bgm_requires_file() {
        let mut p = base_params();
        p.bgm_type = BgmType::Custom;
        assert!(p.validate().is_err());
        p.bgm_file = "songs/theme.mp3".to_string();
        p.validate().unwrap();
    }

    #[test]
    fn aspect_resolutions() {
        assert_eq!(VideoAspect::Portrait.resolution(), (1080, 1920));
        assert_eq!(VideoAspect::Landscape.resolution(), (1920, 1080));
        assert_eq!(VideoAspect::Square.resolution(), (1080, 1080));
    }

    #[test]
    fn enums_use_snake_case_wire_names() {
        let p: VideoParams = serde_json::from_str(
            r#"{"video_subject":"x","video_aspect":"landscape","video_transition_mode":"fade_in","video_source":"pixabay"}"#,
        )
        .unwrap();
        assert_eq!(p.video_aspect, VideoAspect::Landscape);
        assert_eq!(p.video_transition_mode, TransitionMode::FadeIn);
        assert_eq!(p.video_source, VideoSource::Pixabay);
    }

    #[test]
    fn subclip_duration() {
        let clip = SubClippedVideoClip {
            source_path: "a.mp4".into(),
            start_time: 2.0,
            end_time: 7.0,
            width: 1080,
            height: 1920,
        };
        assert!((clip.duration() - 5.0).abs() < f64::EPSILON);
    }
}
