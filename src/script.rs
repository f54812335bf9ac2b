use crate::api::llm::GenerateText;
use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{info, warn};

const GENERATE_RETRIES: u32 = 3;

/// Filler terms appended when extraction fails or comes back short.
/// Deliberately generic so any stock library can satisfy them.
const FALLBACK_TERMS: &[&str] = &[
    "nature",
    "city skyline",
    "people walking",
    "sunrise",
    "technology",
    "ocean waves",
];

fn script_prompt(subject: &str, language: &str, paragraph_number: u32) -> String {
    format!(
        "# Role: Video Script Generator\n\n\
         ## Goals:\n\
         Generate a narration script for a video about the subject below.\n\n\
         ## Constraints:\n\
         - The script will be read aloud; return plain narration text only.\n\
         - Do NOT include titles, headings, stage directions, markdown, or quotes around the text.\n\
         - Do NOT mention the word count or these instructions.\n\
         - Write exactly {paragraph_number} paragraph(s).\n\
         - Respond in the language of this tag: {language}.\n\n\
         ## Subject:\n{subject}\n"
    )
}

fn terms_prompt(subject: &str, script: &str, amount: usize) -> String {
    format!(
        "# Role: Video Search Terms Generator\n\n\
         ## Goals:\n\
         Generate {amount} search terms for finding stock footage for a video.\n\n\
         ## Constraints:\n\
         - Return a JSON array of strings ONLY, e.g. [\"term one\", \"term two\"].\n\
         - Each term must be 1-3 English words naming something visual: an object, a location, an action.\n\
         - Terms must relate to the video subject.\n\n\
         ## Subject:\n{subject}\n\n\
         ## Script:\n{script}\n"
    )
}

/// Cleans an LLM reply down to plain narration: no markdown fences, no
/// wrapping quotes, no leading list markers.
pub fn sanitize_script(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    if text.starts_with("```") {
        text = text
            .trim_start_matches("```")
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_end_matches("```")
            .trim()
            .to_string();
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = text[1..text.len() - 1].to_string();
    }

    let cleaned: Vec<&str> = text
        .lines()
        .map(|line| line.trim_start_matches(['*', '-', '#']).trim())
        .filter(|line| !line.is_empty())
        .collect();
    cleaned.join("\n")
}

/// Narration text for `subject`. Empty subject yields empty output; an
/// exhausted retry budget also yields empty, which the caller treats as
/// fatal.
pub async fn generate_script(
    llm: &dyn GenerateText,
    subject: &str,
    language: &str,
    paragraph_number: u32,
) -> String {
    if subject.trim().is_empty() {
        return String::new();
    }

    let prompt = script_prompt(subject, language, paragraph_number);
    for attempt in 1..=GENERATE_RETRIES {
        match llm.generate_text(&prompt).await {
            Ok(raw) if !raw.trim().is_empty() => {
                let script = sanitize_script(&raw);
                if !script.is_empty() {
                    info!("script generated ({} chars)", script.len());
                    return script;
                }
            }
            Ok(_) => warn!("script attempt {attempt}/{GENERATE_RETRIES} returned empty"),
            Err(err) => warn!("script attempt {attempt}/{GENERATE_RETRIES} failed: {err}"),
        }
    }
    String::new()
}

/// Exactly `amount` English search terms for `subject`, falling back to the
/// subject itself padded with generic visual terms.
pub async fn generate_terms(
    llm: &dyn GenerateText,
    subject: &str,
    script: &str,
    amount: usize,
) -> Vec<String> {
    let prompt = terms_prompt(subject, script, amount);
    for attempt in 1..=GENERATE_RETRIES {
        match llm.generate_text(&prompt).await {
            Ok(raw) if !raw.trim().is_empty() => {
                let terms = parse_terms(&raw, amount);
                if !terms.is_empty() {
                    return pad_terms(terms, subject, amount);
                }
                warn!("terms attempt {attempt}/{GENERATE_RETRIES} parsed to nothing");
            }
            Ok(_) => warn!("terms attempt {attempt}/{GENERATE_RETRIES} returned empty"),
            Err(err) => warn!("terms attempt {attempt}/{GENERATE_RETRIES} failed: {err}"),
        }
    }
    pad_terms(Vec::new(), subject, amount)
}

/// One-shot translation used when a non-English term finds no footage.
pub async fn translate_term(llm: &dyn GenerateText, term: &str) -> Option<String> {
    let prompt = format!(
        "Translate the following video search term to English. \
         Reply with the translation only, no quotes, no explanation.\n\n{term}"
    );
    match llm.generate_text(&prompt).await {
        Ok(raw) => {
            let translated = raw.trim().trim_matches('"').to_string();
            if translated.is_empty() || translated.eq_ignore_ascii_case(term) {
                None
            } else {
                Some(translated)
            }
        }
        Err(err) => {
            warn!("translate failed for '{term}': {err}");
            None
        }
    }
}

/// Parses a term reply: strict JSON array first, then comma/newline
/// tokenization of whatever came back. Deduplicates case-insensitively.
pub fn parse_terms(raw: &str, amount: usize) -> Vec<String> {
    let trimmed = strip_code_fence(raw);

    let mut terms: Vec<String> = Vec::new();
    if let Some(json_terms) = parse_json_array(trimmed) {
        terms = json_terms;
    } else if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end > start {
                if let Some(json_terms) = parse_json_array(&trimmed[start..=end]) {
                    terms = json_terms;
                }
            }
        }
    }

    if terms.is_empty() {
        terms = trimmed
            .split([',', '\n'])
            .map(|t| t.trim().trim_matches(['"', '\'', '[', ']']).trim().to_string())
            .collect();
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for term in terms {
        let cleaned = clean_term(&term);
        if cleaned.is_empty() {
            continue;
        }
        let key = cleaned.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(cleaned);
        if out.len() == amount {
            break;
        }
    }
    out
}

fn parse_json_array(text: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = value.as_array()?;
    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    inner.trim_end_matches("```").trim()
}

/// Search APIs want plain English; strip everything but letters, digits,
/// spaces and hyphens, then collapse whitespace.
fn clean_term(term: &str) -> String {
    let kept: String = term
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .collect();
    let collapsed = whitespace_regex().replace_all(kept.trim(), " ");
    collapsed.to_string()
}

fn whitespace_regex() -> &'static Regex {
    static WS_RE: OnceCell<Regex> = OnceCell::new();
    WS_RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex compiles"))
}

fn pad_terms(mut terms: Vec<String>, subject: &str, amount: usize) -> Vec<String> {
    if terms.is_empty() {
        let subject_term = clean_term(subject);
        if !subject_term.is_empty() {
            terms.push(subject_term);
        }
    }
    for filler in FALLBACK_TERMS {
        if terms.len() >= amount {
            break;
        }
        if !terms.iter().any(|t| t.eq_ignore_ascii_case(filler)) {
            terms.push(filler.to_string());
        }
    }
    terms.truncate(amount);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl GenerateText for ScriptedLlm {
        async fn generate_text(&self, _prompt: &str) -> Result<String> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(String::new())
            } else {
                replies.remove(0)
            }
        }
    }

    #[test]
    fn parse_terms_json_array() {
        let terms = parse_terms(r#"["coffee cup", "office desk", "sunrise"]"#, 2);
        assert_eq!(terms, vec!["coffee cup", "office desk"]);
    }

    #[test]
    fn parse_terms_fenced_json() {
        let terms = parse_terms("```json\n[\"beach\", \"waves\"]\n```", 5);
        assert_eq!(terms, vec!["beach", "waves"]);
    }

    #[test]
    fn parse_terms_comma_fallback() {
        let terms = parse_terms("mountain trail, forest, river rapids", 3);
        assert_eq!(terms, vec!["mountain trail", "forest", "river rapids"]);
    }

    #[test]
    fn parse_terms_dedupes_case_insensitively() {
        let terms = parse_terms(r#"["City", "city", "harbor"]"#, 5);
        assert_eq!(terms, vec!["City", "harbor"]);
    }

    #[test]
    fn parse_terms_strips_punctuation() {
        let terms = parse_terms("1. running! 2. jumping?", 4);
        assert_eq!(terms, vec!["1 running", "2 jumping"]);
    }

    #[test]
    fn sanitize_script_strips_markdown() {
        let raw = "```\n# Title\n* First point about habits.\nSecond line.\n```";
        assert_eq!(sanitize_script(raw), "Title\nFirst point about habits.\nSecond line.");
    }

    #[test]
    fn sanitize_script_unwraps_quotes() {
        assert_eq!(sanitize_script("\"Plain narration.\""), "Plain narration.");
    }

    #[tokio::test]
    async fn empty_subject_yields_empty_script() {
        let llm = ScriptedLlm::new(vec![Ok("should not be used".to_string())]);
        let script = generate_script(&llm, "  ", "en-US", 1).await;
        assert!(script.is_empty());
    }

    #[tokio::test]
    async fn script_retries_then_succeeds() {
        let llm = ScriptedLlm::new(vec![
            Err(anyhow::anyhow!("boom")),
            Ok(String::new()),
            Ok("A calm morning starts the day right.".to_string()),
        ]);
        let script = generate_script(&llm, "morning routines", "en-US", 1).await;
        assert_eq!(script, "A calm morning starts the day right.");
    }

    #[tokio::test]
    async fn script_exhausted_retries_yield_empty() {
        let llm = ScriptedLlm::new(vec![
            Err(anyhow::anyhow!("a")),
            Err(anyhow::anyhow!("b")),
            Err(anyhow::anyhow!("c")),
        ]);
        let script = generate_script(&llm, "anything", "en-US", 1).await;
        assert!(script.is_empty());
    }

    #[tokio::test]
    async fn terms_fallback_pads_with_subject() {
        let llm = ScriptedLlm::new(vec![
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
        ]);
        let terms = generate_terms(&llm, "Morning routines", "", 4).await;
        assert_eq!(terms.len(), 4);
        assert_eq!(terms[0], "Morning routines");
        assert_eq!(terms[1], FALLBACK_TERMS[0]);
    }

    #[tokio::test]
    async fn terms_exact_amount() {
        let llm = ScriptedLlm::new(vec![Ok(r#"["desk", "coffee"]"#.to_string())]);
        let terms = generate_terms(&llm, "work", "", 4).await;
        assert_eq!(terms.len(), 4);
        assert_eq!(&terms[..2], &["desk".to_string(), "coffee".to_string()]);
    }
}
