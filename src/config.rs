//! Spawn specification
//!
//! Describes the child process an application runs. The same spec is reused
//! verbatim for every restart. Specs can be built in code or read from TOML:
//!
//! ```toml
//! command = "cat"
//! args = []
//! with_logging = true
//!
//! [options]
//! cwd = "/tmp"
//! stderr = "piped"
//!
//! [options.env]
//! RUST_LOG = "debug"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};

use crate::utils::{resolve_command, validate_working_dir};
use crate::{Error, Result};

/// Default depth of the per-process stdin queue
pub const DEFAULT_STDIN_CAPACITY: usize = 1024;

fn default_stdin_capacity() -> usize {
    DEFAULT_STDIN_CAPACITY
}

/// Where the child's stderr goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Captured and delivered to the stderr handler
    #[default]
    Piped,
    /// Shared with the supervising process; no stderr events
    Inherit,
    /// Discarded; no stderr events
    Null,
}

impl StderrMode {
    pub(crate) fn stdio(self) -> Stdio {
        match self {
            StderrMode::Piped => Stdio::piped(),
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Null => Stdio::null(),
        }
    }
}

/// OS-level spawn options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// Working directory of the child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,

    /// Start from an empty environment instead of inheriting ours
    pub clear_env: bool,

    pub stderr: StderrMode,
}

/// Immutable description of the process to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnSpec {
    /// Executable path or a name resolvable on `PATH`
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub options: SpawnOptions,

    /// Also write stderr chunks and abnormal terminations to the log
    #[serde(default)]
    pub with_logging: bool,

    /// How many stdin writes may be queued before writes are refused
    #[serde(default = "default_stdin_capacity")]
    pub stdin_capacity: usize,
}

impl SpawnSpec {
    /// Create a spec for `command` with no arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            options: SpawnOptions::default(),
            with_logging: false,
            stdin_capacity: DEFAULT_STDIN_CAPACITY,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    pub fn clear_env(mut self, clear: bool) -> Self {
        self.options.clear_env = clear;
        self
    }

    pub fn stderr(mut self, mode: StderrMode) -> Self {
        self.options.stderr = mode;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.with_logging = enabled;
        self
    }

    pub fn stdin_capacity(mut self, capacity: usize) -> Self {
        self.stdin_capacity = capacity;
        self
    }

    /// Parse a spec from TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let spec: SpawnSpec = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse spawn spec: {}", e)))?;
        spec.check_capacity()?;
        Ok(spec)
    }

    /// Read a spec from a TOML file
    pub fn read_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read spawn spec {}: {}", path.display(), e))
        })?;

        let spec = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded spawn spec for {:?} from {:?}", spec.command, path);
        Ok(spec)
    }

    /// Check that the working directory exists and the command resolves
    ///
    /// Returns the resolved executable path. Spawning does not require this;
    /// it gives a precise error before the first start attempt.
    pub fn validate(&self) -> Result<PathBuf> {
        self.check_capacity()?;
        let cwd = match &self.options.cwd {
            Some(dir) => Some(validate_working_dir(dir)?),
            None => None,
        };
        resolve_command(&self.command, cwd.as_deref())
    }

    fn check_capacity(&self) -> Result<()> {
        if self.stdin_capacity == 0 {
            return Err(Error::Config(
                "stdin_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_spec() {
        let toml_content = r#"
command = "node"
args = ["-e", "process.stdin.pipe(process.stdout)"]
with_logging = true

[options]
cwd = "/tmp"
clear_env = true
stderr = "inherit"

[options.env]
LANG = "C"
"#;

        let spec = SpawnSpec::from_toml_str(toml_content).unwrap();
        assert_eq!(spec.command, "node");
        assert_eq!(spec.args.len(), 2);
        assert!(spec.with_logging);
        assert_eq!(spec.options.cwd, Some(PathBuf::from("/tmp")));
        assert!(spec.options.clear_env);
        assert_eq!(spec.options.stderr, StderrMode::Inherit);
        assert_eq!(spec.options.env["LANG"], "C");
        assert_eq!(spec.stdin_capacity, DEFAULT_STDIN_CAPACITY);
    }

    #[test]
    fn test_minimal_spec_defaults() {
        let spec = SpawnSpec::from_toml_str("command = \"cat\"").unwrap();
        assert_eq!(spec, SpawnSpec::new("cat"));
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(matches!(
            SpawnSpec::from_toml_str("args = []"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SpawnSpec::from_toml_str("command = \"cat\"\nstdin_capacity = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SpawnSpec::from_toml_str("command = \"cat\"\n[options]\nstderr = \"pipe\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_read_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command = \"cat\"\nargs = [\"-u\"]").unwrap();

        let spec = SpawnSpec::read_from_path(file.path()).unwrap();
        assert_eq!(spec, SpawnSpec::new("cat").arg("-u"));

        let missing = SpawnSpec::read_from_path(Path::new("/nonexistent/spec.toml"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder() {
        let spec = SpawnSpec::new("sh")
            .args(["-c", "exit 0"])
            .env("A", "1")
            .stderr(StderrMode::Null)
            .with_logging(true)
            .stdin_capacity(8);

        assert_eq!(spec.args, vec!["-c".to_string(), "exit 0".to_string()]);
        assert_eq!(spec.options.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(spec.options.stderr, StderrMode::Null);
        assert!(spec.with_logging);
        assert_eq!(spec.stdin_capacity, 8);
    }

    #[cfg(unix)]
    #[test]
    fn test_validate() {
        assert!(SpawnSpec::new("sh").cwd("/").validate().is_ok());
        assert!(matches!(
            SpawnSpec::new("sh").cwd("/nonexistent/dir").validate(),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            SpawnSpec::new("definitely-not-a-real-binary-7f3a").validate(),
            Err(Error::CommandNotFound(_))
        ));
    }
}
