mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "polyrun")]
#[command(about = "Run JavaScript, TypeScript and Python snippets in isolated runtimes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/polyrun/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Speak the JSON-lines protocol on stdin/stdout (default if no subcommand provided)
    Serve,
    /// Execute a source file once and print its output
    Run {
        /// Source file
        file: PathBuf,

        /// Language tag (default: from the file extension)
        #[arg(short, long)]
        language: Option<String>,

        /// Text made available as program input; "-" reads stdin
        #[arg(short, long)]
        input: Option<String>,

        /// Program argument (repeatable)
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,

        /// Execution timeout, e.g. "5s" or "1m"
        #[arg(short, long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },
    /// List preloaded Python packages
    Packages,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Some(Commands::Serve) | None => commands::serve(cli.config.as_deref()).await,
        Some(Commands::Run {
            file,
            language,
            input,
            args,
            timeout,
        }) => {
            let options = commands::RunOptions {
                file,
                language,
                input,
                args,
                timeout,
            };
            let succeeded = commands::run_file(cli.config.as_deref(), options).await?;
            if !succeeded {
                drop(guard);
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Packages) => commands::list_packages(cli.config.as_deref()).await,
    }?;

    drop(guard);
    Ok(())
}

/// Logs go to stderr; stdout carries protocol messages and program output
fn init_logging(verbose: bool, log_file: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "polyrun={},polyrun_engine={},polyrun_common={}",
                    log_level, log_level, log_level
                ))
            }),
        )
        .init();

    Ok(guard)
}
