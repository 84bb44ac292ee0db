//! Permission - command risk analysis
//!
//! ```rust,ignore
//! use conductor_foundation::permission::{command_analyzer, CommandRisk};
//!
//! let result = command_analyzer().analyze("drop table users");
//! if result.requires_approval() {
//!     // ask a human first
//! }
//! ```

pub mod security;

pub use security::{
    caution_patterns, command_analyzer, dangerous_patterns, forbidden_patterns, CommandAnalysis,
    CommandAnalyzer, CommandRisk, PatternType, RiskPattern,
};
