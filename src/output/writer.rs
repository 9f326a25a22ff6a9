//! Output file naming and atomic persistence

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{VtrimError, VtrimResult};

/// File name for a job started at `millis` (Unix epoch) from `source`
///
/// `t_<millis>_<source stem>.mp4`
pub fn output_file_name(source: &Path, millis: i64) -> VtrimResult<String> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            VtrimError::invalid(format!("source path has no file name: {}", source.display()))
        })?;
    Ok(format!("t_{}_{}.mp4", millis, stem))
}

/// Places job outputs under one destination directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    destination: PathBuf,
}

impl OutputWriter {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Create the destination directory if it does not exist
    pub fn prepare(&self) -> VtrimResult<()> {
        if !self.destination.is_dir() {
            info!("Creating output directory: {}", self.destination.display());
            fs::create_dir_all(&self.destination)?;
        }
        Ok(())
    }

    /// Timestamped output path for `source`
    pub fn next_output_path(&self, source: &Path) -> VtrimResult<PathBuf> {
        let millis = chrono::Utc::now().timestamp_millis();
        Ok(self.destination.join(output_file_name(source, millis)?))
    }

    /// Hidden scratch file inside the destination, removed on drop
    pub fn temp_file(&self) -> VtrimResult<NamedTempFile> {
        self.prepare()?;
        let file = tempfile::Builder::new()
            .prefix(".vtrim-")
            .suffix(".part")
            .tempfile_in(&self.destination)?;
        debug!("Scratch file: {}", file.path().display());
        Ok(file)
    }

    /// Atomically move a finished scratch file to `target`
    pub fn persist(&self, file: NamedTempFile, target: &Path) -> VtrimResult<PathBuf> {
        file.persist(target).map_err(|e| {
            VtrimError::write(format!("cannot persist {}: {}", target.display(), e.error))
        })?;
        info!("Output written: {}", target.display());
        Ok(target.to_path_buf())
    }
}
