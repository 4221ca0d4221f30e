//! Runs the `settle` binary end to end

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// `settle` invocation isolated from the user's config directory
struct SettleCommand {
    working_dir: PathBuf,
    args: Vec<String>,
}

impl SettleCommand {
    fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    fn execute(&self) -> Result<Output> {
        Command::new(env!("CARGO_BIN_EXE_settle"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env("XDG_CONFIG_HOME", self.working_dir.join(".config"))
            .env("RUST_LOG", "warn")
            .output()
            .context("Failed to run settle")
    }
}

#[test]
fn test_example_config_is_valid_toml() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = SettleCommand::new(temp_dir.path())
        .args(&["config", "--example"])
        .execute()?;

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    let parsed: toml::Value = toml::from_str(&stdout)?;
    assert_eq!(parsed["scheduler"]["worker_threads"].as_integer(), Some(4));
    Ok(())
}

#[test]
fn test_config_show_reads_explicit_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("settle.toml");
    std::fs::write(&config_path, "[scheduler]\nbatch_size = 3\n")?;

    let output = SettleCommand::new(temp_dir.path())
        .args(&["config", "--config", config_path.to_str().unwrap()])
        .execute()?;

    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains("batch_size = 3"));
    Ok(())
}

#[test]
fn test_watch_missing_directory_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = SettleCommand::new(temp_dir.path())
        .args(&["watch", "does-not-exist"])
        .execute()?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Cannot watch"));
    Ok(())
}

#[test]
fn test_watch_rejects_zero_workers() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = SettleCommand::new(temp_dir.path())
        .args(&["watch", ".", "--workers", "0"])
        .execute()?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("worker"));
    Ok(())
}
