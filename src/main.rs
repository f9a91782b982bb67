use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttle::{Decision, RateLimiter, ThrottleConfig, ThrottleError};

/// Output and log formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Check identities read from stdin, one per line, against a throttle configuration.
#[derive(Debug, Parser)]
#[command(name = "throttle", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Format of the per-line decisions written to stdout
    #[arg(long, value_enum, default_value_t = Format::Text)]
    output: Format,

    /// Format of the log lines written to stderr
    #[arg(long, value_enum, default_value_t = Format::Text)]
    log_format: Format,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match args.log_format {
        Format::Json => subscriber.json().init(),
        Format::Text => subscriber.init(),
    }

    info!("Starting throttle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottleConfig::from_file(&args.config)?;
    let limiter = RateLimiter::new(&config)?;

    tokio::select! {
        result = run(&limiter, args.output) => result?,
        _ = shutdown_signal() => {}
    }

    info!(buckets = limiter.len(), "Throttle stopped");
    Ok(())
}

/// Read identities until EOF and write one decision per line.
async fn run(limiter: &RateLimiter, output: Format) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let key = line.trim();
        let outcome = limiter.check(key);
        if let Err(ref e) = outcome {
            warn!(error = %e, "Could not check identity");
        }

        let mut rendered = render(key, &outcome, output);
        rendered.push('\n');
        stdout.write_all(rendered.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

fn render(key: &str, outcome: &Result<Decision, ThrottleError>, output: Format) -> String {
    match output {
        Format::Text => match outcome {
            Ok(Decision::Admit) => format!("ADMIT {}", key),
            Ok(Decision::Reject(rejection)) => format!(
                "REJECT {} {} {}",
                key,
                rejection.status_code(),
                rejection.message
            ),
            Err(e) => format!("ERROR {} {}", e.status_code(), e),
        },
        Format::Json => {
            let value = match outcome {
                Ok(Decision::Admit) => serde_json::json!({
                    "key": key,
                    "decision": "admit",
                }),
                Ok(Decision::Reject(rejection)) => serde_json::json!({
                    "key": key,
                    "decision": "reject",
                    "status": rejection.status_code(),
                    "rate": rejection.rate,
                    "message": rejection.message,
                }),
                Err(e) => serde_json::json!({
                    "key": key,
                    "decision": "error",
                    "status": e.status_code(),
                    "message": e.to_string(),
                }),
            };
            value.to_string()
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
