//! Default security policy on top of the foundation command analyzer
//!
//! Forbidden patterns reject the command; dangerous ones force approval.

use crate::capability::SecurityPolicy;
use conductor_foundation::{command_analyzer, CommandAnalyzer, Error, Result, RiskPattern};
use std::sync::Arc;
use tracing::{debug, warn};

enum AnalyzerSource {
    Shared,
    Custom(Arc<CommandAnalyzer>),
}

/// Pattern-based [`SecurityPolicy`]
pub struct PatternSecurityPolicy {
    analyzer: AnalyzerSource,
}

impl PatternSecurityPolicy {
    /// Policy with extra rules on top of the defaults
    pub fn with_patterns(extra: impl IntoIterator<Item = RiskPattern>) -> Self {
        let mut analyzer = CommandAnalyzer::new();
        for rule in extra {
            analyzer.add_pattern(rule);
        }
        Self {
            analyzer: AnalyzerSource::Custom(Arc::new(analyzer)),
        }
    }

    fn analyzer(&self) -> &CommandAnalyzer {
        match &self.analyzer {
            AnalyzerSource::Shared => command_analyzer(),
            AnalyzerSource::Custom(analyzer) => analyzer,
        }
    }
}

impl Default for PatternSecurityPolicy {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerSource::Shared,
        }
    }
}

impl SecurityPolicy for PatternSecurityPolicy {
    fn validate_command(&self, command: &str) -> Result<()> {
        let analysis = self.analyzer().analyze(command);
        if analysis.is_blocked() {
            let reason = analysis.reason.unwrap_or_else(|| "Forbidden command".to_string());
            warn!(pattern = ?analysis.matched_pattern, "Command rejected: {}", reason);
            return Err(Error::PermissionDenied(format!("Command rejected: {}", reason)));
        }
        Ok(())
    }

    fn requires_approval(&self, command: &str) -> bool {
        let analysis = self.analyzer().analyze(command);
        if analysis.requires_approval() {
            debug!(reason = ?analysis.reason, "Command forces approval");
        }
        analysis.requires_approval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_foundation::CommandRisk;

    #[test]
    fn test_default_policy() {
        let policy = PatternSecurityPolicy::default();

        assert!(policy.validate_command("list files").is_ok());
        assert!(!policy.requires_approval("list files"));

        let err = policy.validate_command("clean up with rm -rf /").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        assert!(policy.validate_command("deploy to production").is_ok());
        assert!(policy.requires_approval("deploy to production"));
    }

    #[test]
    fn test_extra_patterns() {
        let policy = PatternSecurityPolicy::with_patterns([RiskPattern::contains(
            "billing service",
            CommandRisk::Forbidden,
            "Billing is off limits",
        )]);

        let err = policy.validate_command("refactor the billing service").unwrap_err();
        assert!(err.to_string().contains("Billing is off limits"));
    }
}
