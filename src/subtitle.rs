use crate::api::tts::SubMaker;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

const MAX_PHRASE_CHARS: usize = 42;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Builds `subtitle.srt` for the task. Returns the written path, or an
/// empty string when subtitles are disabled or cannot be produced; the
/// caller continues without them either way.
pub async fn build(
    script: &str,
    sub_maker: Option<&SubMaker>,
    output_path: &Path,
    enabled: bool,
) -> Result<String> {
    if !enabled {
        return Ok(String::new());
    }

    let Some(maker) = sub_maker else {
        // No word boundaries from the speech engine and no recognition
        // fallback; the pipeline carries on without subtitles.
        warn!("no speech timings available; skipping subtitles");
        return Ok(String::new());
    };

    let entries = align(script, maker);
    if entries.is_empty() {
        warn!("subtitle alignment produced no entries; skipping subtitles");
        return Ok(String::new());
    }

    let serialized = serialize(&entries);
    fs::write(output_path, serialized.as_bytes())
        .await
        .with_context(|| format!("write srt: {}", output_path.display()))?;

    // Validate by reparsing what actually landed on disk.
    let reread = fs::read_to_string(output_path).await.unwrap_or_default();
    let parsed = parse(&reread);
    if parsed.is_empty() {
        warn!("subtitle file failed validation; removing it");
        let _ = fs::remove_file(output_path).await;
        return Ok(String::new());
    }

    info!("subtitles written: {} entries", parsed.len());
    Ok(output_path.display().to_string())
}

/// Splits narration into display phrases at sentence punctuation and
/// commas, further breaking anything longer than the line budget.
pub fn split_phrases(script: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut current = String::new();

    for ch in script.chars() {
        match ch {
            '.' | '!' | '?' | ';' | '\n' | ',' => {
                let phrase = current.trim();
                if !phrase.is_empty() {
                    phrases.push(phrase.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let phrase = current.trim();
    if !phrase.is_empty() {
        phrases.push(phrase.to_string());
    }

    phrases
        .into_iter()
        .flat_map(|p| break_long_phrase(&p))
        .collect()
}

fn break_long_phrase(phrase: &str) -> Vec<String> {
    if phrase.chars().count() <= MAX_PHRASE_CHARS {
        return vec![phrase.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for word in phrase.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > MAX_PHRASE_CHARS {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Assigns each phrase the time span of the fragments that voice it.
/// Fragment consumption is word-count driven; a fragment surplus at the
/// end stretches the final phrase.
fn align(script: &str, maker: &SubMaker) -> Vec<SubtitleEntry> {
    let phrases = split_phrases(script);
    if phrases.is_empty() || maker.is_empty() {
        return Vec::new();
    }

    let fragments = &maker.fragments;
    let mut entries = Vec::new();
    let mut cursor = 0usize;

    for (idx, phrase) in phrases.iter().enumerate() {
        if cursor >= fragments.len() {
            break;
        }
        let words = phrase.split_whitespace().count().max(1);
        let last_phrase = idx + 1 == phrases.len();
        let take = if last_phrase {
            fragments.len() - cursor
        } else {
            words.min(fragments.len() - cursor)
        };

        let start = fragments[cursor].start;
        let end = fragments[cursor + take - 1].end;
        cursor += take;

        if end > start {
            entries.push(SubtitleEntry {
                start,
                end,
                text: phrase.clone(),
            });
        }
    }

    entries
}

pub fn serialize(entries: &[SubtitleEntry]) -> String {
    let mut out = String::new();
    for (idx, entry) in entries.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n",
            idx + 1,
            format_timestamp(entry.start),
            format_timestamp(entry.end),
            entry.text
        ));
    }
    out
}

/// Accepts comma or dot millisecond separators and a missing blank-line
/// terminator at EOF. Malformed blocks are dropped, not fatal.
pub fn parse(srt: &str) -> Vec<SubtitleEntry> {
    let mut entries = Vec::new();

    for block in srt.replace("\r\n", "\n").split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else { continue };

        // The index line is optional in the wild; a timing line may come first.
        let timing_line = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) if line.contains("-->") => line,
                _ => continue,
            }
        };

        let mut parts = timing_line.split("-->");
        let (Some(start_raw), Some(end_raw)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_timestamp(start_raw), parse_timestamp(end_raw)) else {
            continue;
        };
        if end <= start {
            continue;
        }

        let text = lines.collect::<Vec<_>>().join("\n");
        if text.is_empty() {
            continue;
        }
        entries.push(SubtitleEntry { start, end, text });
    }

    entries.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    entries
}

pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let ss = total_secs % 60;
    let mm = (total_secs / 60) % 60;
    let hh = total_secs / 3600;
    format!("{hh:02}:{mm:02}:{ss:02},{ms:03}")
}

pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let normalized = ts.trim().replace('.', ",");
    let mut parts = normalized.split([':', ',']);
    let hh: u64 = parts.next()?.trim().parse().ok()?;
    let mm: u64 = parts.next()?.trim().parse().ok()?;
    let ss: u64 = parts.next()?.trim().parse().ok()?;
    let ms: u64 = match parts.next() {
        Some(raw) => raw.trim().parse().ok()?,
        None => 0,
    };
    Some(hh as f64 * 3600.0 + mm as f64 * 60.0 + ss as f64 + ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tts::SpeechFragment;

    fn maker_for(words: &[(&str, f64, f64)]) -> SubMaker {
        SubMaker {
            fragments: words
                .iter()
                .map(|(text, start, end)| SpeechFragment {
                    text: text.to_string(),
                    start: *start,
                    end: *end,
                })
                .collect(),
        }
    }

    #[test]
    fn timestamp_round_trip() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(3661.25), "01:01:01,250");
        assert_eq!(parse_timestamp("01:01:01,250"), Some(3661.25));
        assert_eq!(parse_timestamp("00:00:05.500"), Some(5.5));
        assert_eq!(parse_timestamp("00:01:00"), Some(60.0));
        assert_eq!(parse_timestamp("bogus"), None);
    }

    #[test]
    fn parse_accepts_missing_trailing_blank_line() {
        let srt = "1\n00:00:00,000 --> 00:00:02,000\nhello there\n\n2\n00:00:02,000 --> 00:00:04,000\nsecond line";
        let entries = parse(srt);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text, "second line");
    }

    #[test]
    fn parse_drops_invalid_blocks() {
        let srt = "1\n00:00:02,000 --> 00:00:01,000\nbackwards\n\n2\n00:00:02,000 --> 00:00:04,000\nvalid";
        let entries = parse(srt);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "valid");
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let entries = vec![
            SubtitleEntry {
                start: 0.0,
                end: 1.5,
                text: "first phrase".to_string(),
            },
            SubtitleEntry {
                start: 1.5,
                end: 3.0,
                text: "second phrase".to_string(),
            },
        ];
        let text = serialize(&entries);
        let reparsed = parse(&text);
        assert_eq!(reparsed, entries);
        // Byte-stable modulo the trailing newline.
        assert_eq!(serialize(&reparsed), text);
    }

    #[test]
    fn entries_sorted_by_start() {
        let srt = "1\n00:00:05,000 --> 00:00:06,000\nlater\n\n2\n00:00:01,000 --> 00:00:02,000\nearlier\n";
        let entries = parse(srt);
        assert!(entries[0].start < entries[1].start);
        assert_eq!(entries[0].text, "earlier");
    }

    #[test]
    fn phrases_split_on_sentences_and_commas() {
        let phrases = split_phrases("Wake early, move your body. Rest well!");
        assert_eq!(phrases, vec!["Wake early", "move your body", "Rest well"]);
    }

    #[test]
    fn long_phrases_break_at_word_boundaries() {
        let long = "a very long unbroken phrase that keeps going well past the line budget for display";
        let phrases = split_phrases(long);
        assert!(phrases.len() > 1);
        for phrase in &phrases {
            assert!(phrase.chars().count() <= MAX_PHRASE_CHARS);
        }
    }

    #[test]
    fn align_maps_words_to_phrases() {
        let maker = maker_for(&[
            ("Wake", 0.0, 0.3),
            ("early", 0.3, 0.7),
            ("rest", 1.0, 1.4),
            ("well", 1.4, 1.9),
        ]);
        let entries = align("Wake early. Rest well.", &maker);
        assert_eq!(entries.len(), 2);
        assert!((entries[0].start - 0.0).abs() < 1e-9);
        assert!((entries[0].end - 0.7).abs() < 1e-9);
        assert_eq!(entries[0].text, "Wake early");
        assert!((entries[1].start - 1.0).abs() < 1e-9);
        assert!((entries[1].end - 1.9).abs() < 1e-9);
    }

    #[test]
    fn align_entries_are_ordered_and_positive() {
        let maker = maker_for(&[
            ("one", 0.0, 0.2),
            ("two", 0.2, 0.4),
            ("three", 0.4, 0.6),
        ]);
        let entries = align("one two. three.", &maker);
        for entry in &entries {
            assert!(entry.start < entry.end);
        }
        for pair in entries.windows(2) {
            assert!(pair[0].start <= pair[1].start);
        }
    }

    #[tokio::test]
    async fn disabled_subtitles_return_empty() {
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("subtitle.srt");
        let path = build("script", None, &out, false).await.unwrap();
        assert!(path.is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn missing_sub_maker_is_soft_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("subtitle.srt");
        let path = build("script", None, &out, true).await.unwrap();
        assert!(path.is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn build_writes_and_validates() {
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("subtitle.srt");
        let maker = maker_for(&[("Wake", 0.0, 0.3), ("early", 0.3, 0.7)]);
        let path = build("Wake early.", Some(&maker), &out, true).await.unwrap();
        assert_eq!(path, out.display().to_string());
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(parse(&written).len(), 1);
    }
}
