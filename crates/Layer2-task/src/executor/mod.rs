//! Worker executors
//!
//! Provides multiple execution backends:
//! - `ProcessExecutor` - One-shot backend CLI process per call
//! - `ApiExecutor` - Messages-style HTTP endpoint
//! - `PtyExecutor` - Interactive CLI in a pseudo-terminal, completion detected heuristically
//! - `ContainerExecutor` - Backend CLI inside `docker run`
//!
//! ## Shared pieces
//! - `BackendProfile` - how each backend CLI is invoked
//! - `IdentityQueue` - one in-flight call per backend identity
//! - `EnvSecurityConfig` - credential stripping for child environments
//! - `output` - wire-format parsing and failure classification

pub mod api;
pub mod backend;
pub mod container;
pub mod env;
pub mod factory;
pub mod output;
pub mod process;
pub mod pty;
pub mod queue;
pub mod r#trait;

pub use api::{ApiExecutor, ApiExecutorConfig};
pub use backend::{ArgStyle, BackendProfile, RunParams};
pub use container::{ContainerExecutor, ContainerExecutorConfig, ContainerRuntime, ResourceLimits};
pub use env::EnvSecurityConfig;
pub use factory::{DefaultExecutorFactory, ExecutorFactory};
pub use output::{
    classify_failure, parse_event_stream, parse_json_result, parse_output, ExitInfo,
    NormalizedResult, OutputFormat, ProcessError, ProcessErrorKind, TokenUsage,
};
pub use process::{to_worker_result, CommandSpec, ProcessExecutor, ProcessExecutorConfig};
pub use pty::{
    InteractiveSession, PortablePtyTerminal, PromptOutcome, PseudoTerminal, PtyExecutor,
    PtyExecutorConfig, PtySizeConfig,
};
pub use queue::IdentityQueue;
pub use r#trait::{Executor, OutputSink};
