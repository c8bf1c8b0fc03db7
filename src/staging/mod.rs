//! Configuration artifact staging and promotion.
//!
//! # Data Flow
//! ```text
//! archive bytes
//!     → stage():   clear STAGING_DIR, write <staging>.zip, extract, stub if needed
//!     → [validator checks STAGING_DIR/<program>]
//!     → promote(): copy into <active>.incoming, swap into ACTIVE_DIR by rename
//!     → purge():   remove everything on shutdown (unless retained)
//! ```
//!
//! # Design Decisions
//! - ACTIVE_DIR is only touched by promote(), after validation succeeded
//! - The swap is rename-based so a reader sees the old tree or the new tree
//! - All operations are blocking; async callers use `spawn_blocking`

mod archive;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::StagingConfig;

/// Program used when an archive does not carry one. It compiles on its own
/// and forwards everything to a local placeholder backend.
pub const STUB_PROGRAM: &str = r#"vcl 4.0;

# Generated: the configuration archive did not include a program file.

import directors;

backend stub {
    .host = "localhost";
    .port = "8080";
}

sub vcl_init {
    new round_robin_director = directors.round_robin();
    round_robin_director.add_backend(stub);
}

sub vcl_recv {
    set req.backend_hint = round_robin_director.backend();
}
"#;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("configuration archive is empty")]
    EmptyArchive,

    #[error("invalid configuration archive: {0}")]
    Archive(String),

    #[error("archive entry escapes the staging directory: {0:?}")]
    UnsafeEntry(String),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StagingError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the archive content itself is defective, as opposed to a
    /// local filesystem problem.
    pub fn is_content_error(&self) -> bool {
        !matches!(self, StagingError::Io { .. })
    }
}

/// A configuration extracted into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedConfig {
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub files: usize,
    /// The archive lacked a program file and the stub was written instead.
    pub stubbed: bool,
}

/// Owner of the active and staging directories.
#[derive(Debug, Clone)]
pub struct ArtifactStaging {
    active_dir: PathBuf,
    staging_dir: PathBuf,
    program_file: String,
}

impl ArtifactStaging {
    pub fn new(config: &StagingConfig) -> Self {
        Self {
            active_dir: config.active_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            program_file: config.program_file.clone(),
        }
    }

    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Path of the program file inside the active directory.
    pub fn active_program(&self) -> PathBuf {
        self.active_dir.join(&self.program_file)
    }

    /// Paths next to the configured directories that staging and promotion
    /// create and delete.
    pub fn scratch_paths(&self) -> [PathBuf; 3] {
        [self.archive_path(), self.incoming_dir(), self.retired_dir()]
    }

    fn archive_path(&self) -> PathBuf {
        sibling(&self.staging_dir, "zip")
    }

    fn incoming_dir(&self) -> PathBuf {
        sibling(&self.active_dir, "incoming")
    }

    fn retired_dir(&self) -> PathBuf {
        sibling(&self.active_dir, "retired")
    }

    /// Materialize `blob` in a freshly cleared staging directory.
    pub fn stage(&self, blob: &[u8]) -> Result<StagedConfig, StagingError> {
        if blob.is_empty() {
            return Err(StagingError::EmptyArchive);
        }

        remove_dir_if_exists(&self.staging_dir)?;
        fs::create_dir_all(&self.staging_dir).map_err(|e| StagingError::io(&self.staging_dir, e))?;

        let archive_path = self.archive_path();
        fs::write(&archive_path, blob).map_err(|e| StagingError::io(&archive_path, e))?;

        tracing::info!(dir = ?self.staging_dir, bytes = blob.len(), "Extracting configuration archive");
        let files = archive::extract_zip(&archive_path, &self.staging_dir)?;

        let program_path = self.staging_dir.join(&self.program_file);
        let stubbed = !program_path.is_file();
        if stubbed {
            tracing::warn!(
                program = %self.program_file,
                "Archive has no configuration program, writing stub"
            );
            fs::write(&program_path, STUB_PROGRAM).map_err(|e| StagingError::io(&program_path, e))?;
        }

        Ok(StagedConfig {
            dir: self.staging_dir.clone(),
            program_path,
            files,
            stubbed,
        })
    }

    /// Replace the active directory with the contents of `staged`.
    ///
    /// The new tree is fully written next to the active directory before it is
    /// renamed into place.
    pub fn promote(&self, staged: &Path) -> Result<PathBuf, StagingError> {
        let incoming = self.incoming_dir();
        let retired = self.retired_dir();

        remove_dir_if_exists(&incoming)?;
        remove_dir_if_exists(&retired)?;
        if let Some(parent) = self.active_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| StagingError::io(parent, e))?;
        }

        copy_tree(staged, &incoming)?;

        if self.active_dir.exists() {
            fs::rename(&self.active_dir, &retired).map_err(|e| StagingError::io(&self.active_dir, e))?;
            if let Err(e) = fs::rename(&incoming, &self.active_dir) {
                // Put the previous configuration back before reporting.
                if let Err(restore) = fs::rename(&retired, &self.active_dir) {
                    tracing::error!(error = %restore, "Failed to restore previous active directory");
                }
                return Err(StagingError::io(&self.active_dir, e));
            }
            if let Err(e) = fs::remove_dir_all(&retired) {
                tracing::warn!(dir = ?retired, error = %e, "Failed to remove retired configuration");
            }
        } else {
            fs::rename(&incoming, &self.active_dir).map_err(|e| StagingError::io(&self.active_dir, e))?;
        }

        tracing::info!(dir = ?self.active_dir, "Configuration promoted");
        Ok(self.active_dir.clone())
    }

    /// Delete both directories and any swap leftovers.
    pub fn purge(&self) -> Result<(), StagingError> {
        remove_dir_if_exists(&self.staging_dir)?;
        remove_dir_if_exists(&self.active_dir)?;
        remove_dir_if_exists(&self.incoming_dir())?;
        remove_dir_if_exists(&self.retired_dir())?;

        let archive = self.archive_path();
        match fs::remove_file(&archive) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StagingError::io(&archive, e)),
        }

        tracing::info!("Configuration directories purged");
        Ok(())
    }
}

/// `/a/b/active` + `incoming` → `/a/b/active.incoming`.
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), StagingError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StagingError::io(dir, e)),
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), StagingError> {
    fs::create_dir_all(dest).map_err(|e| StagingError::io(dest, e))?;

    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            StagingError::Io {
                path,
                source: e.into(),
            }
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StagingError::Archive(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| StagingError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| StagingError::io(&target, e))?;
        }
    }

    Ok(())
}
