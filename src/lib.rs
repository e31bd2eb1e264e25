//! # Research Pipeline
//!
//! A multi-round research orchestrator. A user query becomes an approved
//! research brief through a short conversation; the pipeline then plans,
//! executes and reviews rounds of data and research tasks until coverage of
//! the brief is good enough or the round budget runs out, and finally
//! aggregates everything into a report.
//!
//! ## Features
//!
//! - **Crash recovery**: every step persists its output before the session
//!   status, so a restarted process resumes at the last checkpoint
//! - **Parallel rounds**: tasks of a round run concurrently, isolated from
//!   each other, under one round deadline
//! - **Resilience**: retry with backoff and a circuit breaker per dependency
//! - **Coverage-driven looping**: a deterministic evaluator decides whether
//!   another round is needed
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → Pipeline → Collaborators → Oracle pipes (HTTP)
//!                                     ↓                     ↘ Data sources (HTTP)
//!                                StateStore (file / SQLite / memory)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use research_pipeline::agents::Collaborators;
//! use research_pipeline::pipeline::Pipeline;
//! use research_pipeline::storage::open_store;
//!
//! let store = open_store(&config.storage).await?;
//! let collaborators = Collaborators::from_oracle(oracle, connector, resilience, &config.pipes, false);
//! let pipeline = Pipeline::new(store, collaborators, config.pipeline.clone(), tracker);
//! let session = pipeline.start_session("user-1", "EV charging in Germany").await?;
//! ```

/// Collaborator contracts and their reasoning-service implementations.
pub mod agents;
/// Command-line session operations.
pub mod cli;
/// Configuration management.
pub mod config;
/// HTTP data-source connectors.
pub mod connectors;
/// Coverage evaluation and the continue/stop decision.
pub mod coverage;
/// Error types, classification and result aliases.
pub mod error;
/// Concurrent execution of one round's tasks.
pub mod executor;
/// Session, brief, plan and result records.
pub mod model;
/// Client for the external reasoning service.
pub mod oracle;
/// The session state machine.
pub mod pipeline;
/// System prompts for the collaborator pipes.
pub mod prompts;
/// Retry and circuit breaking for outbound calls.
pub mod resilience;
/// MCP server implementation and request handling.
pub mod server;
/// Key-value state stores.
pub mod storage;
/// Call and task counters.
pub mod tracker;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::Pipeline;
pub use server::{AppState, McpServer, SharedState};
