//! Command-line operations on persisted sessions.
//!
//! These run against the same store the server uses, so an operator can
//! inspect or push forward a session without going through the MCP channel.

use clap::Subcommand;

use crate::pipeline::{Pipeline, StatusView};

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the MCP server over stdio (default)
    Serve,

    /// Show the status of a session
    Status {
        /// Session identifier
        session_id: String,
    },

    /// Resume a session from its last checkpoint and run it to the next stop
    Resume {
        /// Session identifier
        session_id: String,
    },

    /// List stored sessions that can be resumed
    Sessions,

    /// Delete every stored record of a session
    Cleanup {
        /// Session identifier
        session_id: String,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a session command. `Serve` is handled by the binary.
pub async fn execute_command(command: Commands, pipeline: &Pipeline) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a session command"),
        Commands::Status { session_id } => match pipeline.status(&session_id).await {
            Ok(view) => CliResult::success(format_status(&view)),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        },
        Commands::Resume { session_id } => match pipeline.resume(&session_id).await {
            Ok(session) => CliResult::success(format!(
                "Session {} is now {} (round {})",
                session.id, session.status, session.current_round
            )),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        },
        Commands::Sessions => match pipeline.resumable_sessions().await {
            Ok(ids) if ids.is_empty() => CliResult::success("No resumable sessions"),
            Ok(ids) => CliResult::success(ids.join("\n")),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        },
        Commands::Cleanup { session_id } => match pipeline.cleanup(&session_id).await {
            Ok(true) => CliResult::success(format!("Deleted session {}", session_id)),
            Ok(false) => CliResult::error(format!("Session not found: {}", session_id)),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        },
    }
}

fn format_status(view: &StatusView) -> String {
    let session = &view.session;
    let mut out = format!(
        "Session {}\n  status: {}\n  query: {}\n  round: {}\n",
        session.id, session.status, session.query, session.current_round
    );
    if view.draft_pending {
        out.push_str("  draft brief awaiting approval\n");
    }
    if let Some(error) = &session.error {
        out.push_str(&format!("  error: {} - {}\n", error.code, error.message));
    }
    for round in &view.rounds {
        out.push_str(&format!(
            "  round {}: {} planned, {} completed, {} partial, {} failed",
            round.round, round.planned, round.completed, round.partial, round.failed
        ));
        if let Some(coverage) = round.coverage {
            out.push_str(&format!(", coverage {:.0}%", coverage * 100.0));
        }
        out.push('\n');
    }
    out
}
