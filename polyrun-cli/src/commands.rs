//! CLI command implementations

use anyhow::{anyhow, Context, Result};
use polyrun_common::{ExecutionRequest, Language};
use polyrun_engine::{transport, Engine, EngineConfig, EngineHandle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub struct RunOptions {
    pub file: PathBuf,
    pub language: Option<String>,
    pub input: Option<String>,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = EngineConfig::load(path).context("Failed to load configuration")?;
    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn start_engine(config: EngineConfig) -> Result<EngineHandle> {
    Engine::spawn(config).context("Failed to start engine")
}

/// Serve the JSON-lines protocol on stdin/stdout until stdin closes
pub async fn serve(config_path: Option<&Path>) -> Result<()> {
    let handle = start_engine(load_config(config_path)?)?;
    info!("Serving on stdin/stdout");

    transport::serve(handle, tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Transport failed")?;

    info!("Input closed, shutting down");
    Ok(())
}

/// Execute one file and print its output. Returns whether it succeeded.
pub async fn run_file(config_path: Option<&Path>, options: RunOptions) -> Result<bool> {
    let mut config = load_config(config_path)?;
    if let Some(timeout) = options.timeout {
        config.limits.timeout = timeout;
    }
    // Output is printed from the final result
    config.stream_output = false;

    let language = resolve_language(&options.file, options.language.as_deref())?;
    let code = std::fs::read_to_string(&options.file)
        .with_context(|| format!("Failed to read {}", options.file.display()))?;
    let input = match options.input.as_deref() {
        Some("-") => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read input from stdin")?;
            text
        }
        Some(text) => text.to_string(),
        None => String::new(),
    };

    let mut request = ExecutionRequest::new(code, language).with_input(input);
    for arg in options.args {
        request = request.with_arg(arg);
    }

    let handle = start_engine(config)?;
    let result = handle.submit(request).await?;

    for line in &result.output {
        println!("{}", line);
    }
    for line in &result.stderr {
        eprintln!("{}", line);
    }
    if result.truncated {
        eprintln!("(output truncated)");
    }
    if let Some(error) = &result.error {
        eprintln!("✗ {}", error);
    }
    info!(elapsed_ms = result.execution_time_ms, "Execution finished");

    Ok(result.success())
}

/// Print each preloaded Python package and whether it is importable
pub async fn list_packages(config_path: Option<&Path>) -> Result<()> {
    let handle = start_engine(load_config(config_path)?)?;
    let packages = handle
        .packages()
        .await
        .context("Failed to list packages")?;

    if packages.is_empty() {
        println!("No packages configured");
    }
    for package in packages {
        let marker = if package.available { "✓" } else { "✗" };
        match package.version {
            Some(version) => println!("{} {} {}", marker, package.name, version),
            None => println!("{} {}", marker, package.name),
        }
    }
    Ok(())
}

fn resolve_language(file: &Path, explicit: Option<&str>) -> Result<Language> {
    if let Some(tag) = explicit {
        return Ok(Language::from(tag));
    }
    file.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        .ok_or_else(|| {
            anyhow!(
                "Cannot infer language of {}; pass --language",
                file.display()
            )
        })
}
