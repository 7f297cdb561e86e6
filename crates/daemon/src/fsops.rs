//! Filesystem steps around a transcode: temporary outputs, destination paths,
//! and the final move.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use uuid::Uuid;
use crate::config::TranscodeConfig;
use crate::error::DaemonError;

const PARTIAL_MARKER: &str = ".partial.";

/// Random, collision-free path for a job's in-progress output
pub fn partial_output_path(temp_dir: &Path, extension: &str) -> PathBuf {
    temp_dir.join(format!("{}{}{}", Uuid::new_v4(), PARTIAL_MARKER, extension))
}

pub fn is_partial_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(PARTIAL_MARKER))
        .unwrap_or(false)
}

/// Create the temporary directory and deal with outputs left by a previous run.
///
/// Returns how many leftovers were deleted. When deleting is disabled, any
/// leftover aborts the boot since another encoder may still be writing it.
pub fn prepare_temp_dir(cfg: &TranscodeConfig) -> Result<usize> {
    let dir = cfg.temp_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create temporary directory: {}", dir.display()))?;

    info!("🔍 Checking for leftover temporary outputs...");

    let leftovers: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("Failed to read temporary directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_partial_output(p))
        .collect();

    if leftovers.is_empty() {
        return Ok(0);
    }

    if !cfg.delete_temporary_files {
        return Err(DaemonError::LeftoverTemporaryFiles { dir, count: leftovers.len() }.into());
    }

    let mut cleaned_count = 0;
    for path in leftovers {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("🗑️  Removed leftover temporary output: {}", path.display());
                cleaned_count += 1;
            }
            Err(e) => warn!("Failed to remove leftover temporary output {}: {}", path.display(), e),
        }
    }
    Ok(cleaned_count)
}

/// Make sure the configured destination directory exists
pub fn prepare_destination(cfg: &TranscodeConfig) -> Result<()> {
    if let Some(dest) = &cfg.destination_dir {
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create destination directory: {}", dest.display()))?;
    }
    Ok(())
}

/// Final location of an encoded input.
///
/// Same stem with the output extension, either next to the input or under the
/// destination directory at the input's path relative to the working tree.
pub fn destination_path(cfg: &TranscodeConfig, input: &Path) -> Result<PathBuf> {
    let input_dir = input
        .parent()
        .ok_or_else(|| anyhow!("Input has no parent directory: {}", input.display()))?;
    let stem = input
        .file_stem()
        .ok_or_else(|| anyhow!("Input has no file name: {}", input.display()))?;

    let mut file_name = stem.to_os_string();
    file_name.push(".");
    file_name.push(&cfg.output_extension);

    let dir = match &cfg.destination_dir {
        Some(dest) => {
            let relative = input_dir.strip_prefix(&cfg.working_dir).unwrap_or(Path::new(""));
            dest.join(relative)
        }
        None => input_dir.to_path_buf(),
    };
    Ok(dir.join(file_name))
}

/// Destination of `input`, refused when finalizing would overwrite a file.
///
/// The input itself only counts as free when it is removed before the move.
pub fn free_destination(cfg: &TranscodeConfig, input: &Path) -> Result<PathBuf> {
    let destination = destination_path(cfg, input)?;
    let replaces_input = cfg.remove_old_file && destination == input;
    if destination.exists() && !replaces_input {
        return Err(DaemonError::DestinationExists(destination).into());
    }
    Ok(destination)
}

/// Rename, falling back to copy + delete across filesystems
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    debug!("Rename failed, copying {} to {}", from.display(), to.display());
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from)
        .with_context(|| format!("Failed to remove {} after copy", from.display()))?;
    Ok(())
}

/// Delete `dir` if it has no entries left; returns whether it was removed
pub fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(dir).with_context(|| format!("Failed to remove directory: {}", dir.display()))?;
    Ok(true)
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
