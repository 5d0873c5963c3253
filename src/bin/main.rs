//! CLI entrypoint for vocalmate.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use vocalmate::audio::AudioEngine;
use vocalmate::{MateError, Orchestrator, VocalmateConfig};

/// Vocalmate: a full-duplex voice assistant core.
#[derive(Parser)]
#[command(name = "vocalmate", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the conversation loop (default).
    Listen,
    /// List available audio input/output devices.
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match VocalmateConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    match cli.command.unwrap_or(Command::Listen) {
        Command::Devices => run_devices(),
        Command::Listen => run_listen(config).await,
    }
}

fn init_logging(config: &VocalmateConfig) {
    let file_appender = tracing_appender::rolling::daily(vocalmate::paths::logs_dir(), "vocalmate.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive every subsequent log
    // call for the process lifetime, and `main` never returns early after
    // this point without exiting.
    std::mem::forget(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(VocalmateConfig::log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stdout))
        .init();
}

fn run_devices() -> ExitCode {
    match AudioEngine::list_devices() {
        Ok((inputs, outputs)) => {
            println!("Input devices:");
            for d in inputs {
                println!("  [{}] {} (channels: {})", d.index, d.name, d.max_input_channels);
            }
            println!("\nOutput devices:");
            for d in outputs {
                println!("  [{}] {} (channels: {})", d.index, d.name, d.max_output_channels);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to enumerate devices: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_listen(config: VocalmateConfig) -> ExitCode {
    let orchestrator = match Orchestrator::new(&config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
            cancel_for_signal.cancel();
        }
    });

    match orchestrator.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(MateError::NoProvider(capability)) => {
            error!("no available provider for {capability}");
            eprintln!("{}", orchestrator.status_table());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}
