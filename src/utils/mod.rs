pub mod logfile;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the docker executable in the system PATH.
pub fn find_docker_executable() -> Result<PathBuf> {
    which("docker").context("docker executable not found in PATH. Please ensure Docker is installed and in your PATH.")
}
