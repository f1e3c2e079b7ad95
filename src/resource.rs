//! Resource naming shared by both connectors.
//!
//! A path without an extension names a repository location (`//Local Repository/data/churn`);
//! a path with an extension names a plain file (`/tmp/churn.csv`).

use std::fmt;
use std::path::{Path, PathBuf};

use crate::serialization::STREAM_EXTENSION;

/// Prefix used when a file is handed to the Studio launcher.
const FILE_PREFIX: &str = "file://";

/// A named pointer to backend-held or file-held data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Logical location inside a backend repository.
    RepositoryLocation(String),
    /// Filesystem path.
    File(PathBuf),
}

impl Resource {
    /// Classify a path: repository location when it has no extension, file otherwise.
    pub fn parse(path: &str) -> Self {
        if has_extension(path) {
            Self::File(PathBuf::from(path))
        } else {
            Self::RepositoryLocation(path.to_string())
        }
    }

    pub fn repository(path: impl Into<String>) -> Self {
        Self::RepositoryLocation(path.into())
    }

    /// A filesystem path. Directories are allowed (Studio output targets).
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// The path as a string, without any prefix.
    pub fn path(&self) -> String {
        match self {
            Self::RepositoryLocation(path) => path.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// The argument form understood by the Studio launcher.
    pub fn to_launcher_arg(&self) -> String {
        match self {
            Self::RepositoryLocation(path) => path.clone(),
            Self::File(path) => format!("{FILE_PREFIX}{}", path.display()),
        }
    }

    /// Whether the launcher needs a temporary directory to consume this resource
    /// (stream files are unpacked there).
    pub fn needs_temp_dir(&self) -> bool {
        match self {
            Self::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == STREAM_EXTENSION),
            Self::RepositoryLocation(_) => false,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl From<&str> for Resource {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for Resource {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&Path> for Resource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Resource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

fn has_extension(path: &str) -> bool {
    let last = path.rsplit(['/', '\\']).next().unwrap_or(path);
    Path::new(last).extension().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(
            Resource::parse("//Local Repository/data/churn"),
            Resource::repository("//Local Repository/data/churn")
        );
        assert_eq!(Resource::parse("/tmp/churn.csv"), Resource::file("/tmp/churn.csv"));
        assert_eq!(Resource::parse("C:\\data\\in.bin"), Resource::file("C:\\data\\in.bin"));
    }

    #[test]
    fn dotted_folder_does_not_make_a_file() {
        assert!(!Resource::parse("//Repo/v1.2/model").is_file());
        assert!(!Resource::parse("//Repo/.hidden").is_file());
    }

    #[test]
    fn launcher_args() {
        assert_eq!(Resource::repository("//Repo/x").to_launcher_arg(), "//Repo/x");
        assert_eq!(Resource::file("/tmp/in0.csv").to_launcher_arg(), "file:///tmp/in0.csv");
    }

    #[test]
    fn only_stream_files_need_a_temp_dir() {
        assert!(Resource::file("/tmp/input0.fo").needs_temp_dir());
        assert!(!Resource::file("/tmp/input0.csv").needs_temp_dir());
        assert!(!Resource::repository("//Repo/x.fo").needs_temp_dir());
    }
}
