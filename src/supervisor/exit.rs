//! Termination reporting and signals

use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

#[cfg(unix)]
pub use nix::sys::signal::Signal;

/// Signals deliverable where the OS has no POSIX signals
///
/// Every variant terminates the child immediately.
#[cfg(not(unix))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    SIGTERM,
    SIGKILL,
}

#[cfg(not(unix))]
impl Signal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Signal::SIGTERM => "SIGTERM",
            Signal::SIGKILL => "SIGKILL",
        }
    }
}

/// How a child process terminated
///
/// `code` is set for a normal exit and `signal` (by name, e.g. `"SIGTERM"`)
/// when the process was killed. Both are `None` only when the OS failed to
/// report the status at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    /// Neither a code nor a signal could be determined
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Exited normally with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }

    /// Non-zero exit code or any signal
    pub fn is_abnormal(&self) -> bool {
        !self.success()
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;

            if let Some(number) = status.signal() {
                return Self::signaled(signal_name(number));
            }
        }

        match status.code() {
            Some(code) => Self::exited(code),
            None => Self::unknown(),
        }
    }
}

#[cfg(unix)]
fn signal_name(number: i32) -> String {
    Signal::try_from(number)
        .map(|signal| signal.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{}", number))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_normal_exit() {
        // wait(2) status: exit code lives in the second byte
        let info = ExitInfo::from(ExitStatus::from_raw(1 << 8));
        assert_eq!(info, ExitInfo::exited(1));
        assert!(info.is_abnormal());

        let info = ExitInfo::from(ExitStatus::from_raw(0));
        assert!(info.success());
    }

    #[test]
    fn test_signaled() {
        let info = ExitInfo::from(ExitStatus::from_raw(Signal::SIGTERM as i32));
        assert_eq!(info.code, None);
        assert_eq!(info.signal.as_deref(), Some("SIGTERM"));
        assert!(info.is_abnormal());
    }

    #[test]
    fn test_unknown_status_is_abnormal() {
        let info = ExitInfo::unknown();
        assert_eq!(info.code, None);
        assert_eq!(info.signal, None);
        assert!(info.is_abnormal());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&ExitInfo::signaled("SIGKILL")).unwrap();
        assert_eq!(json, r#"{"code":null,"signal":"SIGKILL"}"#);
    }
}
