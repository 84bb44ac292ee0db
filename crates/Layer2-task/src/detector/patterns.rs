//! Text signatures seen in interactive agent terminals

use regex::Regex;
use std::sync::OnceLock;

/// Lines of the cleaned buffer inspected for an idle prompt
pub const TAIL_LINES: usize = 5;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Skipping invalid detector pattern {}: {}", p, e);
                None
            }
        })
        .collect()
}

/// Input box borders, empty prompts, shortcut hints, token/cost status lines
fn idle_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"╰─+╯",
            r"(?m)^\s*│?\s*[>❯]\s*│?\s*$",
            r"\?\s+for shortcuts",
            r"(?i)auto-accept edits on",
            r"(?i)\bctrl\+c to exit\b",
            r"(?i)^\s*(token usage|tokens used|total cost)\s*[:=]",
            r"(?i)\d[\d,.]*k?\s+tokens\b.*(\$\d|context|used)",
        ])
    })
}

/// Still-working indicators
fn busy_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(&[r"(?i)esc to interrupt", r"(?i)\bthinking…"]))
}

fn background_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"(?i)\b\d+\s+background\s+(tasks?|agents?|shells?)\b",
            r"(?i)running in (the )?background",
            r"(?i)\bsub-?agents?\s+(running|working|started|launched)",
            r"⎿\s+Task\b",
        ])
    })
}

fn status_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"\?\s+for shortcuts",
            r"(?i)auto-accept edits on",
            r"(?i)esc to interrupt",
            r"(?i)^\s*(token usage|tokens used|total cost)\s*[:=]",
            r"(?i)\d[\d,.]*k?\s+tokens\b.*(\$\d|context|used)",
            r"(?i)context left until auto-compact",
        ])
    })
}

/// Last `TAIL_LINES` non-blank lines
pub fn tail(clean: &str) -> String {
    let lines: Vec<&str> = clean.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n")
}

/// The session is waiting for input: the last line is idle UI and nothing
/// in the tail says it is still working
pub fn is_idle_tail(tail: &str) -> bool {
    let Some(last) = tail.lines().rev().find(|l| !l.trim().is_empty()) else {
        return false;
    };

    idle_patterns().iter().any(|re| re.is_match(last))
        && !busy_patterns().iter().any(|re| re.is_match(tail))
}

/// Background sub-agent activity
pub fn is_background_activity(text: &str) -> bool {
    background_patterns().iter().any(|re| re.is_match(text))
}

/// Spinner and thinking-animation frames
pub fn is_spinner_line(line: &str) -> bool {
    const SPINNER: &[char] = &[
        '✻', '✽', '✶', '✳', '✢', '·', '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '◐',
        '◓', '◑', '◒',
    ];
    let trimmed = line.trim_start();
    trimmed.starts_with(SPINNER) || busy_patterns().iter().any(|re| re.is_match(line))
}

/// Only box-drawing characters and whitespace
pub fn is_box_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| ('\u{2500}'..='\u{257F}').contains(&c) || c.is_whitespace())
}

/// Hint and token/cost status lines
pub fn is_status_line(line: &str) -> bool {
    status_patterns().iter().any(|re| re.is_match(line))
}

/// Empty or echoed prompt line (`> ...`, `❯ ...`)
pub fn is_prompt_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('>') || trimmed.starts_with('❯')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_tail() {
        assert!(is_idle_tail("Done.\n╭────────╮\n│ >      │\n╰────────╯"));
        assert!(is_idle_tail("answer\n❯ "));
        assert!(is_idle_tail("  ? for shortcuts"));
        assert!(is_idle_tail("Token usage: total=1200 input=1000 output=200"));

        assert!(!is_idle_tail("Reading src/main.rs"));
        // Output after the prompt box means it is working again
        assert!(!is_idle_tail("╰────────╯\n⏺ Running cargo test…"));
        // Box drawn while the spinner still runs
        assert!(!is_idle_tail("✻ Pondering… (esc to interrupt)\n╰────────╯"));
    }

    #[test]
    fn test_background_activity() {
        assert!(is_background_activity("2 background tasks"));
        assert!(is_background_activity("Agent is running in the background"));
        assert!(is_background_activity("  ⎿  Task (review auth module)"));
        assert!(!is_background_activity("All tasks done"));
    }

    #[test]
    fn test_line_classes() {
        assert!(is_spinner_line("✻ Thinking… (3s · esc to interrupt)"));
        assert!(is_spinner_line("  ⠙ working"));
        assert!(!is_spinner_line("Fixed the bug."));

        assert!(is_box_line("╭──────────╮"));
        assert!(!is_box_line("│ text │"));

        assert!(is_prompt_line("> fix the bug"));
        assert!(is_prompt_line("   "));
        assert!(!is_prompt_line("fix the bug"));
    }

    #[test]
    fn test_tail_skips_blank_lines() {
        let text = (1..=20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n\n");
        let tail = tail(&text);
        assert_eq!(tail.lines().count(), TAIL_LINES);
        assert!(tail.ends_with("20"));
    }
}
