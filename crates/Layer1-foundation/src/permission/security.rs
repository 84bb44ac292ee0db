//! Security - risk classification of incoming commands
//!
//! Commands arrive as free-form text that may embed shell snippets
//! ("clean up with rm -rf build/"). The analyzer looks for:
//! - forbidden patterns (always rejected)
//! - dangerous operations (execution requires approval)
//! - caution operations (allowed, logged)

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

// ============================================================
// Risk levels
// ============================================================

/// Command risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandRisk {
    /// Read-only or informational
    Safe,
    /// Modifies the workspace in ordinary ways
    Caution,
    /// Destructive or externally visible, needs a human
    Dangerous,
    /// Never executed
    Forbidden,
}

impl CommandRisk {
    /// Risk score (0-10)
    pub fn score(&self) -> u8 {
        match self {
            CommandRisk::Safe => 0,
            CommandRisk::Caution => 3,
            CommandRisk::Dangerous => 7,
            CommandRisk::Forbidden => 10,
        }
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self, CommandRisk::Dangerous)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, CommandRisk::Forbidden)
    }
}

// ============================================================
// Patterns
// ============================================================

#[derive(Debug, Clone)]
pub enum PatternType {
    Contains(String),
    Regex(String),
}

/// A single risk rule
#[derive(Debug, Clone)]
pub struct RiskPattern {
    pub pattern: PatternType,
    pub risk: CommandRisk,
    pub reason: String,
}

impl RiskPattern {
    pub fn contains(
        substring: impl Into<String>,
        risk: CommandRisk,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            pattern: PatternType::Contains(substring.into()),
            risk,
            reason: reason.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>, risk: CommandRisk, reason: impl Into<String>) -> Self {
        Self {
            pattern: PatternType::Regex(pattern.into()),
            risk,
            reason: reason.into(),
        }
    }

    fn describe(&self) -> String {
        match &self.pattern {
            PatternType::Contains(s) => s.clone(),
            PatternType::Regex(r) => r.clone(),
        }
    }
}

/// Patterns that are always rejected
pub fn forbidden_patterns() -> Vec<RiskPattern> {
    use CommandRisk::Forbidden;
    vec![
        RiskPattern::regex(r"rm\s+(-[rf]+\s+)+/(\*|\s|$)", Forbidden, "Root filesystem deletion"),
        RiskPattern::contains(":(){ :|:& };:", Forbidden, "Fork bomb"),
        RiskPattern::regex(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", Forbidden, "Fork bomb"),
        RiskPattern::regex(r"dd\s+if=.*of=/dev/[sh]d[a-z]", Forbidden, "Disk overwrite"),
        RiskPattern::regex(r"\bmkfs\.", Forbidden, "Filesystem format"),
        RiskPattern::regex(r"chmod\s+(-R\s+)?777\s+/(\s|$)", Forbidden, "Dangerous permission change"),
        RiskPattern::regex(r"bash\s+-i\s+>&\s*/dev/tcp", Forbidden, "Reverse shell"),
        RiskPattern::regex(r"\b(exfiltrate|leak)\b.*\b(secrets?|credentials|api keys?)\b", Forbidden, "Credential exfiltration"),
    ]
}

/// Operations that force an approval step
pub fn dangerous_patterns() -> Vec<RiskPattern> {
    use CommandRisk::Dangerous;
    vec![
        RiskPattern::regex(r"\brm\s+-[a-z]*r", Dangerous, "Recursive deletion"),
        RiskPattern::regex(r"\b(delete|remove|wipe|purge)\b", Dangerous, "Deletes data"),
        RiskPattern::regex(r"\bdrop\s+(table|database|schema)\b", Dangerous, "Drops database objects"),
        RiskPattern::regex(r"\btruncate\b", Dangerous, "Truncates data"),
        RiskPattern::regex(r"git\s+push\s+.*(--force|-f\b)", Dangerous, "Force push"),
        RiskPattern::regex(r"\bforce[- ]push\b", Dangerous, "Force push"),
        RiskPattern::regex(r"git\s+reset\s+--hard", Dangerous, "Discards commits"),
        RiskPattern::regex(r"\b(deploy|release|publish)\b", Dangerous, "Externally visible change"),
        RiskPattern::regex(r"\bproduction\b|\bprod\b", Dangerous, "Touches production"),
        RiskPattern::regex(r"\bsudo\b", Dangerous, "Privilege escalation"),
    ]
}

/// Ordinary modifications
pub fn caution_patterns() -> Vec<RiskPattern> {
    use CommandRisk::Caution;
    vec![
        RiskPattern::regex(r"\b(install|upgrade|uninstall)\b", Caution, "Changes dependencies"),
        RiskPattern::regex(r"\b(commit|push|merge|rebase)\b", Caution, "Changes history"),
        RiskPattern::regex(r"\b(refactor|rename|rewrite|migrate)\b", Caution, "Broad code change"),
    ]
}

// ============================================================
// Analyzer
// ============================================================

/// Analysis result
#[derive(Debug, Clone)]
pub struct CommandAnalysis {
    pub command: String,
    pub risk: CommandRisk,
    pub risk_score: u8,
    pub matched_pattern: Option<String>,
    pub reason: Option<String>,
}

impl CommandAnalysis {
    pub fn requires_approval(&self) -> bool {
        self.risk.requires_approval()
    }

    pub fn is_blocked(&self) -> bool {
        self.risk.is_blocked()
    }
}

struct CompiledPattern {
    rule: RiskPattern,
    regex: Option<Regex>,
}

impl CompiledPattern {
    fn compile(rule: RiskPattern) -> Option<Self> {
        let regex = match &rule.pattern {
            PatternType::Contains(_) => None,
            PatternType::Regex(r) => match RegexBuilder::new(r).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Skipping invalid security pattern {}: {}", r, e);
                    return None;
                }
            },
        };
        Some(Self { rule, regex })
    }

    fn matches(&self, command: &str, lowered: &str) -> bool {
        match (&self.rule.pattern, &self.regex) {
            (PatternType::Contains(s), _) => lowered.contains(&s.to_lowercase()),
            (PatternType::Regex(_), Some(re)) => re.is_match(command),
            (PatternType::Regex(_), None) => false,
        }
    }
}

/// Command analyzer (patterns compiled once)
pub struct CommandAnalyzer {
    /// Ordered from most to least severe
    patterns: Vec<CompiledPattern>,
}

static ANALYZER: OnceLock<CommandAnalyzer> = OnceLock::new();

/// Shared analyzer with the default rule set
pub fn command_analyzer() -> &'static CommandAnalyzer {
    ANALYZER.get_or_init(CommandAnalyzer::new)
}

impl CommandAnalyzer {
    pub fn new() -> Self {
        let rules = forbidden_patterns()
            .into_iter()
            .chain(dangerous_patterns())
            .chain(caution_patterns());
        Self::with_patterns(rules)
    }

    /// Build from custom rules; most severe rule wins
    pub fn with_patterns(rules: impl IntoIterator<Item = RiskPattern>) -> Self {
        let mut patterns: Vec<CompiledPattern> =
            rules.into_iter().filter_map(CompiledPattern::compile).collect();
        patterns.sort_by(|a, b| b.rule.risk.cmp(&a.rule.risk));
        Self { patterns }
    }

    /// Add one rule on top of the current set
    pub fn add_pattern(&mut self, rule: RiskPattern) {
        if let Some(compiled) = CompiledPattern::compile(rule) {
            self.patterns.push(compiled);
            self.patterns.sort_by(|a, b| b.rule.risk.cmp(&a.rule.risk));
        }
    }

    pub fn analyze(&self, command: &str) -> CommandAnalysis {
        let command = command.trim();
        let lowered = command.to_lowercase();

        for compiled in &self.patterns {
            if compiled.matches(command, &lowered) {
                let risk = compiled.rule.risk;
                return CommandAnalysis {
                    command: command.to_string(),
                    risk,
                    risk_score: risk.score(),
                    matched_pattern: Some(compiled.rule.describe()),
                    reason: Some(compiled.rule.reason.clone()),
                };
            }
        }

        CommandAnalysis {
            command: command.to_string(),
            risk: CommandRisk::Safe,
            risk_score: 0,
            matched_pattern: None,
            reason: None,
        }
    }

    pub fn is_forbidden(&self, command: &str) -> bool {
        self.analyze(command).is_blocked()
    }
}

impl Default for CommandAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
