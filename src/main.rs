use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use research_pipeline::{
    agents::Collaborators,
    cli::{execute_command, Commands},
    config::{Config, LogFormat},
    connectors::{HttpConnector, MetricsInterceptor},
    oracle::OracleClient,
    pipeline::Pipeline,
    resilience::ResilienceExecutor,
    server::{AppState, McpServer},
    storage::open_store,
    tracker::ResourceTracker,
};

/// Multi-round research orchestrator.
#[derive(Parser, Debug)]
#[command(name = "research-pipeline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.storage.backend,
        "Research pipeline starting..."
    );

    let store = match open_store(&config.storage).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to open state store");
            return Err(e.into());
        }
    };

    let oracle = match OracleClient::new(&config.oracle, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.oracle.base_url, "Oracle client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize oracle client");
            return Err(e.into());
        }
    };

    let connector_metrics = Arc::new(MetricsInterceptor::new());
    let connector =
        HttpConnector::new(&config.request)?.with_interceptor(connector_metrics.clone());

    let tracker = Arc::new(ResourceTracker::new());
    let resilience = Arc::new(ResilienceExecutor::new(
        config.retry.clone(),
        config.circuit_breaker.clone(),
        Arc::clone(&tracker),
    ));

    let command = cli.command.unwrap_or(Commands::Serve);
    let serving = command == Commands::Serve;
    if serving {
        // Ensure required pipes exist (create if needed)
        info!("Ensuring collaborator pipes exist...");
        if let Err(e) = oracle.ensure_pipes(&config.pipes).await {
            error!(error = %e, "Failed to ensure pipes exist");
            return Err(e.into());
        }
    }

    let collaborators = Collaborators::from_oracle(
        Arc::new(oracle),
        Arc::new(connector),
        Arc::clone(&resilience),
        &config.pipes,
        config.pipeline.strict_mode,
    );
    let pipeline = Arc::new(Pipeline::new(
        store,
        collaborators,
        config.pipeline.clone(),
        tracker,
    ));

    if !serving {
        let result = execute_command(command, &pipeline).await;
        if result.exit_code == 0 {
            println!("{}", result.message);
        } else {
            eprintln!("{}", result.message);
        }
        std::process::exit(result.exit_code);
    }

    resume_interrupted(&pipeline).await;

    let state =
        Arc::new(AppState::new(pipeline, resilience).with_connector_metrics(connector_metrics));
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Continue sessions a previous process left in an automated state.
async fn resume_interrupted(pipeline: &Arc<Pipeline>) {
    let sessions = match pipeline.resumable_sessions().await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "Could not list sessions to resume");
            return;
        }
    };
    if !sessions.is_empty() {
        info!(count = sessions.len(), "Resuming interrupted sessions");
    }
    for session_id in sessions {
        let pipeline = Arc::clone(pipeline);
        tokio::spawn(async move {
            if let Err(e) = pipeline.resume(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Resume failed");
            }
        });
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
