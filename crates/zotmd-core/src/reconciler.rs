//! File reconciler
//!
//! Applies file operations under the output directory. Writes go to a
//! temporary file in the target directory, are synced, then renamed over the
//! target, so a crash leaves either the old or the new content and never a
//! partial file. The temp file is removed on any failure.
//!
//! All paths handed in and out are relative to the output directory and use
//! `/` as separator.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::config::DeletionBehavior;

/// Errors from file operations
#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path '{0}' escapes the output directory")]
    OutsideOutput(String),

    #[error("'{0}' is not valid UTF-8 text")]
    NotText(PathBuf),
}

impl FileError {
    fn io(path: &Path, source: io::Error) -> Self {
        FileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of [`FileReconciler::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file already had exactly this content
    Unchanged,
}

/// Result of [`FileReconciler::remove`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Moved into the quarantine subtree; holds the new relative path
    Quarantined(String),
    Deleted,
    /// There was no file to remove
    Missing,
}

/// Executes file operations for the sync engine
#[derive(Debug, Clone)]
pub struct FileReconciler {
    output_dir: PathBuf,
    quarantine_dir: String,
    behavior: DeletionBehavior,
}

impl FileReconciler {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<String>,
        behavior: DeletionBehavior,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            behavior,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn behavior(&self) -> DeletionBehavior {
        self.behavior
    }

    /// Deterministic file name for a citation key
    pub fn target_path(&self, citation_key: &str) -> String {
        format!("{}.md", sanitize_file_stem(citation_key))
    }

    /// Absolute path for a relative one, refusing anything outside the output tree
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, FileError> {
        let path = Path::new(rel);
        let escapes = path.components().any(|c| {
            !matches!(c, Component::Normal(_) | Component::CurDir)
        });
        if rel.is_empty() || escapes {
            return Err(FileError::OutsideOutput(rel.to_string()));
        }
        Ok(self.output_dir.join(path))
    }

    /// Read a file's text, `None` if it does not exist
    pub fn read(&self, rel: &str) -> Result<Option<String>, FileError> {
        let path = self.resolve(rel)?;
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| FileError::NotText(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileError::io(&path, e)),
        }
    }

    /// Atomically replace a file's content
    pub fn write(&self, rel: &str, text: &str) -> Result<WriteOutcome, FileError> {
        let path = self.resolve(rel)?;

        match fs::read(&path) {
            Ok(existing) if existing == text.as_bytes() => return Ok(WriteOutcome::Unchanged),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FileError::io(&path, e)),
        }

        atomic_write(&path, text.as_bytes())?;
        tracing::debug!("Wrote {}", rel);
        Ok(WriteOutcome::Written)
    }

    /// Unlink a file left behind by a move; a missing file is not an error
    pub fn discard(&self, rel: &str) -> Result<bool, FileError> {
        let path = self.resolve(rel)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileError::io(&path, e)),
        }
    }

    /// Remove a file according to the configured deletion behavior
    pub fn remove(&self, rel: &str) -> Result<RemovalOutcome, FileError> {
        let path = self.resolve(rel)?;
        if !path.exists() {
            return Ok(RemovalOutcome::Missing);
        }

        match self.behavior {
            DeletionBehavior::Delete => {
                fs::remove_file(&path).map_err(|e| FileError::io(&path, e))?;
                tracing::debug!("Deleted {}", rel);
                Ok(RemovalOutcome::Deleted)
            }
            DeletionBehavior::Move => {
                let target_rel = self.free_quarantine_path(rel)?;
                let target = self.resolve(&target_rel)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| FileError::io(parent, e))?;
                }
                fs::rename(&path, &target).map_err(|e| FileError::io(&path, e))?;
                tracing::debug!("Quarantined {} as {}", rel, target_rel);
                Ok(RemovalOutcome::Quarantined(target_rel))
            }
        }
    }

    /// First unused path under the quarantine dir, suffixing `-1`, `-2`, ...
    fn free_quarantine_path(&self, rel: &str) -> Result<String, FileError> {
        let base = format!("{}/{}", self.quarantine_dir, rel);
        if !self.resolve(&base)?.exists() {
            return Ok(base);
        }

        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.ends_with('/') && !ext.contains('/') => {
                (stem.to_string(), format!(".{}", ext))
            }
            _ => (base.clone(), String::new()),
        };

        let mut n = 1;
        loop {
            let candidate = format!("{}-{}{}", stem, n, ext);
            if !self.resolve(&candidate)?.exists() {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Replace characters that are unsafe in file names
pub fn sanitize_file_stem(citation_key: &str) -> String {
    let cleaned: String = citation_key
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Write via a synced temp file in the same directory, then rename
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), FileError> {
    let parent = path
        .parent()
        .ok_or_else(|| FileError::OutsideOutput(path.display().to_string()))?;
    fs::create_dir_all(parent).map_err(|e| FileError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(FileError::io(path, e));
    }
    Ok(())
}
