//! # conductor-task
//!
//! Worker execution for Conductor.
//! Runs worker tasks under a bounded pool and supervises the processes behind them.
//!
//! ## Features
//!
//! - Worker pool with a concurrency ceiling and a bounded FIFO queue
//! - Execution strategies: single, sequential, parallel, pipeline
//! - Spawned backend CLIs with SIGTERM/SIGKILL escalation
//! - Two backend wire formats normalized into one result shape
//! - One in-flight call per backend identity
//! - Interactive CLIs in a pseudo-terminal with heuristic completion detection
//! - API and container executors

pub mod detector;
pub mod events;
pub mod executor;
pub mod pool;
pub mod state;
pub mod strategy;
pub mod task;

// Worker model
pub use state::WorkerStatus;
pub use task::{new_worker_id, BackendOptions, ExecutionMode, WorkerResult, WorkerTask};

// Executors
pub use executor::{
    ApiExecutor, BackendProfile, CommandSpec, ContainerExecutor, DefaultExecutorFactory,
    EnvSecurityConfig, Executor, ExecutorFactory, IdentityQueue, InteractiveSession,
    NormalizedResult, OutputFormat, OutputSink, PortablePtyTerminal, ProcessErrorKind,
    ProcessExecutor, ProcessExecutorConfig, PseudoTerminal, PtyExecutor, RunParams, TokenUsage,
};

// Completion detection
pub use detector::{CompletionDetector, DetectorConfig, DetectorPoll, ProcessingState};

// Pool
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig};
pub use strategy::{run_strategy, run_strategy_until, ExecutionStrategy, ResultCallback};
