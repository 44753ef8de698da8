// src/exec/resolver.rs

//! Artifact resolution.
//!
//! A job definition lists the libraries its payload needs, relative to the
//! node's artifact root. Resolution turns that list into concrete file paths
//! or fails, in which case the instance crashes before it starts.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::fs::{FileSystem, RealFileSystem};
use crate::store::JobDefinition;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("artifact {0:?} not found")]
    ArtifactNotFound(PathBuf),

    #[error("artifact {path:?} is unreadable: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("no builtin payload named '{0}' is registered")]
    UnknownBuiltin(String),

    #[error("library paths cannot be joined: {0}")]
    InvalidPath(String),

    #[error("artifact resolution interrupted: {0}")]
    Interrupted(String),
}

pub trait ArtifactResolver: Send + Sync + Debug {
    /// Concrete library files for `jd`, in a stable order.
    fn resolve(&self, jd: &JobDefinition) -> Result<Vec<PathBuf>, ResolveError>;
}

/// Resolves libraries against a root directory through a [`FileSystem`].
/// A file resolves to itself, a directory to the files directly inside it.
#[derive(Debug, Clone)]
pub struct FsArtifactResolver<F: FileSystem = RealFileSystem> {
    root: PathBuf,
    fs: F,
}

impl FsArtifactResolver<RealFileSystem> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_fs(root, RealFileSystem)
    }
}

impl<F: FileSystem> FsArtifactResolver<F> {
    pub fn with_fs(root: impl Into<PathBuf>, fs: F) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn canonical(&self, path: &Path) -> Result<PathBuf, ResolveError> {
        self.fs
            .canonicalize(path)
            .map_err(|e| ResolveError::Unreadable {
                path: path.to_path_buf(),
                message: format!("{e:#}"),
            })
    }
}

impl<F: FileSystem> ArtifactResolver for FsArtifactResolver<F> {
    fn resolve(&self, jd: &JobDefinition) -> Result<Vec<PathBuf>, ResolveError> {
        let mut resolved = Vec::new();
        for lib in &jd.payload.libraries {
            let full = self.root.join(lib);
            if self.fs.is_file(&full) {
                resolved.push(self.canonical(&full)?);
            } else if self.fs.is_dir(&full) {
                let mut entries = self
                    .fs
                    .read_dir(&full)
                    .map_err(|e| ResolveError::Unreadable {
                        path: full.clone(),
                        message: format!("{e:#}"),
                    })?;
                entries.sort();
                for entry in entries.into_iter().filter(|e| self.fs.is_file(e)) {
                    resolved.push(self.canonical(&entry)?);
                }
            } else {
                return Err(ResolveError::ArtifactNotFound(full));
            }
        }

        let mut seen = std::collections::HashSet::new();
        resolved.retain(|p| seen.insert(p.clone()));

        debug!(
            application = %jd.application_name,
            libraries = resolved.len(),
            "artifacts resolved"
        );
        Ok(resolved)
    }
}
