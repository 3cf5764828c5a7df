// pgbackuptool/src/locator/mod.rs
use anyhow::{Context, Result};
use std::process::Command;

use crate::errors::AppError;
use crate::utils::find_docker_executable;

/// Lists running containers that look like PostgreSQL servers, optionally
/// narrowed by a name fragment from the configuration. Names come back
/// sorted so the candidate ordering is deterministic.
pub fn discover_postgres_containers(name_filter: Option<&str>) -> Result<Vec<String>> {
    let docker_path = find_docker_executable()?;
    let output = Command::new(&docker_path)
        .arg("ps")
        .arg("--format")
        .arg("{{.Names}}\t{{.Image}}")
        .output()
        .context("Failed to execute 'docker ps' to discover containers")?;

    if !output.status.success() {
        anyhow::bail!(
            "'docker ps' failed with status: {}\nStderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(parse_container_rows(
        &String::from_utf8_lossy(&output.stdout),
        name_filter,
    ))
}

fn parse_container_rows(stdout: &str, name_filter: Option<&str>) -> Vec<String> {
    let mut names: Vec<String> = stdout
        .lines()
        .filter_map(|line| {
            let (name, image) = line.split_once('\t')?;
            if !image.contains("postgres") {
                return None;
            }
            if let Some(filter) = name_filter {
                if !name.contains(filter) {
                    return None;
                }
            }
            Some(name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names
}

/// Picks the target container from the candidate set.
///
/// Exactly one candidate selects itself. Zero candidates is fatal (the
/// operator has to start the database service first). Several candidates
/// require an explicit selection, and a selection outside the set is
/// rejected.
pub fn locate(
    candidates: &[String],
    selection: Option<&str>,
) -> std::result::Result<String, AppError> {
    match candidates {
        [] => Err(AppError::TargetNotFound),
        [only] => match selection {
            Some(chosen) if chosen != only => Err(AppError::InvalidInput(format!(
                "container '{}' is not among the running candidates: {:?}",
                chosen, candidates
            ))),
            _ => Ok(only.clone()),
        },
        _ => match selection {
            Some(chosen) if candidates.iter().any(|c| c == chosen) => Ok(chosen.to_string()),
            Some(chosen) => Err(AppError::InvalidInput(format!(
                "container '{}' is not among the running candidates: {:?}",
                chosen, candidates
            ))),
            None => Err(AppError::AmbiguousTarget {
                candidates: candidates.to_vec(),
            }),
        },
    }
}
