//! Discovery of the files a block request covers
//!
//! Files are enumerated under the request root (optionally recursively),
//! matched against the selected extensions, then filtered by the exclusion
//! lists. Results come back in a stable order: directory walk order with
//! entries sorted by file name.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File types that can be blocked
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TargetExtension {
    #[strum(to_string = "exe", serialize = ".exe")]
    Exe,
    #[strum(to_string = "dll", serialize = ".dll")]
    Dll,
}

impl TargetExtension {
    /// Extension without the leading dot
    pub const fn as_str(self) -> &'static str {
        match self {
            TargetExtension::Exe => "exe",
            TargetExtension::Dll => "dll",
        }
    }

    pub fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.as_str()))
    }
}

/// What to block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlockRequest {
    pub root: PathBuf,
    pub recursive: bool,
    pub extensions: BTreeSet<TargetExtension>,
    /// Case-insensitive substrings; a file whose name contains any is skipped
    pub exclusion_keywords: Vec<String>,
    /// Case-insensitive exact file names to skip
    pub exclusion_files: Vec<String>,
}

impl FileBlockRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            extensions: BTreeSet::new(),
            exclusion_keywords: Vec::new(),
            exclusion_files: Vec::new(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_extension(mut self, extension: TargetExtension) -> Self {
        self.extensions.insert(extension);
        self
    }

    pub fn exclude_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.exclusion_keywords.push(keyword.into());
        self
    }

    pub fn exclude_file(mut self, file_name: impl Into<String>) -> Self {
        self.exclusion_files.push(file_name.into());
        self
    }

    /// Checks the request before any backend is touched
    ///
    /// # Errors
    ///
    /// Returns `Err` if no extension is selected or the root has no usable
    /// folder name.
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(Error::validation(
                "extensions",
                "select at least one file type to block",
            ));
        }
        self.application_name().map(|_| ())
    }

    /// Application name derived from the root folder's name
    ///
    /// # Errors
    ///
    /// Returns `Err` if the root has no final component (e.g. a drive root).
    pub fn application_name(&self) -> Result<String> {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::validation(
                    "root",
                    format!("'{}' has no folder name to use as application", self.root.display()),
                )
            })
    }

    /// True if `file_name` hits an exclusion filename or keyword
    pub fn is_excluded(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();

        self.exclusion_files
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .any(|f| f.to_lowercase() == lower)
            || self
                .exclusion_keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .any(|k| lower.contains(&k.to_lowercase()))
    }
}

/// Enumerates files under the root matching the selected extensions
///
/// Unreadable entries are logged and skipped.
///
/// # Errors
///
/// Returns `Err` if the root is not a readable directory.
pub fn enumerate_files(request: &FileBlockRequest) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(&request.root)?;
    if !metadata.is_dir() {
        return Err(Error::validation(
            "root",
            format!("'{}' is not a directory", request.root.display()),
        ));
    }

    let mut walker = WalkDir::new(&request.root)
        .min_depth(1)
        .sort_by_file_name();
    if !request.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if request.extensions.iter().any(|ext| ext.matches(path)) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Enumerates files and drops the excluded ones
///
/// # Errors
///
/// See [`enumerate_files`].
pub fn discover(request: &FileBlockRequest) -> Result<Vec<PathBuf>> {
    let files = enumerate_files(request)?;
    let total = files.len();

    let kept: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let excluded = request.is_excluded(&name);
            if excluded {
                debug!("Excluded {name}");
            }
            !excluded
        })
        .collect();

    debug!("Discovered {} file(s), {} after exclusions", total, kept.len());
    Ok(kept)
}
