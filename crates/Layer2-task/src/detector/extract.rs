//! Final-answer extraction from a raw terminal buffer

use super::patterns::{is_box_line, is_prompt_line, is_spinner_line, is_status_line};

/// Glyph that opens each assistant response block
pub const RESPONSE_MARKER: char = '⏺';

/// Replaces output that looks like terminal noise
pub const GARBLED_PLACEHOLDER: &str =
    "[output could not be reliably extracted from the terminal session]";

/// Extraction knobs
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub max_chars: usize,
    pub garbled_detection: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            garbled_detection: true,
        }
    }
}

/// ANSI-free text with carriage returns folded into newlines
pub fn clean(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip_str(raw);
    stripped.replace("\r\n", "\n").replace('\r', "\n")
}

/// Best-effort answer text out of everything the session printed since the prompt
pub fn extract_response(raw: &str, prompt: &str, options: ExtractOptions) -> String {
    let clean = clean(raw);
    let body = response_region(&clean, prompt);

    let lines: Vec<String> = body
        .lines()
        .filter(|line| !is_spinner_line(line) && !is_box_line(line) && !is_status_line(line))
        .map(strip_border)
        .collect();

    let start = lines.iter().position(|l| !is_prompt_line(l)).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !is_prompt_line(l)).map_or(start, |i| i + 1);
    let text = lines[start..end.max(start)].join("\n");

    if options.garbled_detection && looks_garbled(&text) {
        tracing::debug!(chars = text.len(), "Extracted text looks garbled");
        return GARBLED_PLACEHOLDER.to_string();
    }

    keep_tail(&text, options.max_chars)
}

/// Content after the last response marker, else after the echoed prompt
fn response_region<'a>(clean: &'a str, prompt: &str) -> &'a str {
    if let Some(pos) = clean.rfind(RESPONSE_MARKER) {
        return &clean[pos + RESPONSE_MARKER.len_utf8()..];
    }

    let echo = prompt.lines().find(|l| !l.trim().is_empty()).map(str::trim);
    match echo.and_then(|echo| clean.rfind(echo).map(|pos| pos + echo.len())) {
        Some(end) => &clean[end..],
        None => clean,
    }
}

fn strip_border(line: &str) -> String {
    line.trim()
        .trim_start_matches('│')
        .trim_end_matches('│')
        .trim()
        .to_string()
}

/// Many very short words and no non-Latin script
pub fn looks_garbled(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 5 || has_non_latin(text) {
        return false;
    }

    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    (letters as f64 / words.len() as f64) < 3.0
}

fn has_non_latin(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_alphabetic() && !c.is_ascii() && !('\u{00C0}'..='\u{024F}').contains(&c))
}

/// At most `max_chars` characters, keeping the end
pub fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
