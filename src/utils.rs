//! Utility functions for stdio-app

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Validate and canonicalize a working directory
///
/// The path must exist and be a directory; symlinks and `..` segments are
/// resolved so the child always starts from the same absolute location.
pub fn validate_working_dir(path: &Path) -> Result<PathBuf> {
    let canonical_path = path.canonicalize().map_err(|_| {
        Error::InvalidPath(format!("Invalid or non-existent path: {}", path.display()))
    })?;

    if !canonical_path.is_dir() {
        return Err(Error::InvalidPath(format!(
            "Not a directory: {}",
            canonical_path.display()
        )));
    }

    Ok(canonical_path)
}

/// Resolve a command to an executable path
///
/// Bare names are looked up on `PATH`; anything containing a path separator
/// is taken relative to `cwd` (or the current directory) and must exist.
pub fn resolve_command(command: &str, cwd: Option<&Path>) -> Result<PathBuf> {
    if command.is_empty() {
        return Err(Error::CommandNotFound("<empty>".to_string()));
    }

    let as_path = Path::new(command);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        let candidate = match cwd {
            Some(dir) if as_path.is_relative() => dir.join(as_path),
            _ => as_path.to_path_buf(),
        };
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(Error::CommandNotFound(command.to_string()));
    }

    which::which(command).map_err(|_| Error::CommandNotFound(command.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_working_dir_valid() {
        let result = validate_working_dir(Path::new("/"));
        assert!(result.is_ok());
        assert!(result.unwrap().is_absolute());
    }

    #[test]
    fn test_validate_working_dir_invalid() {
        let result = validate_working_dir(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_validate_working_dir_rejects_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = validate_working_dir(file.path());
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_command_on_path() {
        let resolved = resolve_command("sh", None).unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_resolve_command_missing() {
        let result = resolve_command("definitely-not-a-real-binary-7f3a", None);
        assert!(matches!(result, Err(Error::CommandNotFound(_))));

        let result = resolve_command("./missing/bin", Some(Path::new("/")));
        assert!(matches!(result, Err(Error::CommandNotFound(_))));

        assert!(resolve_command("", None).is_err());
    }
}
