//! Common utilities for ambit-cmd

use std::path::Path;

use ambit::executor::ExecutorOptions;
use anyhow::{Context, Result};

/// Checks if a file exists and is readable
pub fn validate_file_exists(path: &str) -> Result<()> {
    let file_path = Path::new(path);
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", path);
    }
    if !file_path.is_file() {
        anyhow::bail!("Path is not a file: {}", path);
    }
    Ok(())
}

/// Reads and validates executor options from a JSON file.
pub fn read_options_file(path: &str) -> Result<ExecutorOptions> {
    validate_file_exists(path)?;
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file: {path}"))?;
    ExecutorOptions::from_json_str(&json)
        .with_context(|| format!("Invalid executor options in {path}"))
}

/// Builds the executor options of a run: the config file (or defaults), then
/// command-line overrides.
pub fn load_options(
    config: Option<&str>,
    threads: Option<usize>,
    queue_capacity: Option<usize>,
) -> Result<ExecutorOptions> {
    let mut options = match config {
        Some(path) => read_options_file(path)?,
        None => ExecutorOptions::default(),
    };
    if let Some(threads) = threads {
        options = options.core_threads(threads);
    }
    if queue_capacity.is_some() {
        options = options.queue_capacity(queue_capacity);
    }
    options
        .validate()
        .context("Invalid executor options after command-line overrides")?;
    Ok(options)
}
