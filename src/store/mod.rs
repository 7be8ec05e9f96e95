//! Versioned on-disk storage for rendered configuration artifacts.
//!
//! The store owns a single canonical file (`<name>`) plus a monotonically
//! numbered trail of candidate files (`<name>.1`, `<name>.2`, …) in one
//! directory. Every reconciliation materialises a new candidate; candidates
//! whose content matches the canonical file are discarded again, while
//! changed content replaces the canonical file atomically and leaves the
//! candidate behind as a forensic record of what was generated when.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Suffix used for the temporary file during canonical replacement.
const PENDING_SUFFIX: &str = "pending";

/// Errors raised by the version store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Raised when the required base template file does not exist.
    #[error("base template not found at {path}; create it before deploying")]
    MissingBaseTemplate {
        /// Path that was expected to hold the base template.
        path: Utf8PathBuf,
    },
    /// Raised when the canonical path has no usable file name.
    #[error("invalid canonical config path {path:?}: missing file name")]
    InvalidCanonicalPath {
        /// The rejected path.
        path: Utf8PathBuf,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Result of committing a rendered candidate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Commit {
    /// Path of the canonical configuration file.
    pub path: Utf8PathBuf,
    /// Whether the canonical file was replaced by this commit.
    pub is_new: bool,
}

/// Reads the required base template, failing fatally when it is absent.
///
/// # Errors
///
/// Returns [`StoreError::MissingBaseTemplate`] when the file does not exist
/// and [`StoreError::Io`] for any other file system failure.
pub fn read_base_template(path: &Utf8Path) -> Result<String, StoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::MissingBaseTemplate {
                path: path.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(StoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::MissingBaseTemplate {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(StoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Manages the canonical configuration file and its numbered candidates.
///
/// The store is the only writer of its file-name family; callers serialise
/// commits (see the reconciler) so the suffix scan and the canonical replace
/// never race.
#[derive(Clone, Debug)]
pub struct VersionStore {
    dir: Utf8PathBuf,
    file_name: String,
}

impl VersionStore {
    /// Creates a store for the given canonical file path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCanonicalPath`] when the path has no file
    /// name component.
    pub fn new(canonical_path: &Utf8Path) -> Result<Self, StoreError> {
        let (parent, file_name) = split_path(canonical_path)?;
        Ok(Self {
            dir: parent.to_path_buf(),
            file_name: file_name.to_owned(),
        })
    }

    /// Path of the canonical configuration file.
    #[must_use]
    pub fn canonical_path(&self) -> Utf8PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Logical name identifying this store's file family, used to key the
    /// reconciliation lock.
    #[must_use]
    pub fn logical_name(&self) -> String {
        self.canonical_path().into_string()
    }

    /// Materialises `content` as the next numbered candidate and promotes it
    /// to canonical when it differs from the current canonical content.
    ///
    /// When the content is identical the candidate is deleted again and
    /// `is_new` is `false`. When it differs (or no canonical file exists yet)
    /// the canonical file is replaced via a temporary file and an atomic
    /// rename, and the numbered candidate is retained.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when any file system operation fails.
    pub fn commit(&self, content: &str) -> Result<Commit, StoreError> {
        let dir = self.open_dir()?;
        let suffix = self.next_suffix(&dir)?;
        let candidate_name = format!("{}.{suffix}", self.file_name);
        dir.write(&candidate_name, content)
            .map_err(|err| self.io_error(&candidate_name, &err))?;

        let current = match dir.read_to_string(&self.file_name) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(self.io_error(&self.file_name, &err)),
        };

        if current.as_deref() == Some(content) {
            dir.remove_file(&candidate_name)
                .map_err(|err| self.io_error(&candidate_name, &err))?;
            return Ok(Commit {
                path: self.canonical_path(),
                is_new: false,
            });
        }

        self.replace_canonical(&dir, content)?;
        Ok(Commit {
            path: self.canonical_path(),
            is_new: true,
        })
    }

    /// Replaces the canonical file through a temporary file and rename so an
    /// aborted run can never leave a partially written canonical file.
    fn replace_canonical(&self, dir: &Dir, content: &str) -> Result<(), StoreError> {
        let temp_name = format!("{}.{PENDING_SUFFIX}", self.file_name);
        dir.write(&temp_name, content)
            .map_err(|err| self.io_error(&temp_name, &err))?;
        dir.rename(&temp_name, dir, &self.file_name)
            .map_err(|err| self.io_error(&self.file_name, &err))?;
        Ok(())
    }

    /// Computes the lowest unused candidate suffix as `max(existing) + 1` in
    /// a single directory scan.
    fn next_suffix(&self, dir: &Dir) -> Result<u64, StoreError> {
        let prefix = format!("{}.", self.file_name);
        let entries = dir
            .entries()
            .map_err(|err| self.io_error(".", &err))?;
        let mut max_seen = 0_u64;
        for result in entries {
            let entry = result.map_err(|err| self.io_error(".", &err))?;
            let name = entry.file_name().map_err(|err| self.io_error(".", &err))?;
            if let Some(rest) = name.strip_prefix(&prefix)
                && let Ok(number) = rest.parse::<u64>()
            {
                max_seen = max_seen.max(number);
            }
        }
        Ok(max_seen + 1)
    }

    fn open_dir(&self) -> Result<Dir, StoreError> {
        Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(|err| StoreError::Io {
            path: self.dir.clone(),
            message: err.to_string(),
        })
    }

    fn io_error(&self, name: &str, err: &io::Error) -> StoreError {
        StoreError::Io {
            path: self.dir.join(name),
            message: err.to_string(),
        }
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), StoreError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::InvalidCanonicalPath {
            path: path.to_path_buf(),
        })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Ok((parent, file_name))
}
