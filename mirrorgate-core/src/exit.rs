//! Worker process exit codes.
//!
//! The supervisor reads these back from reaped workers to decide what to log;
//! every non-zero code leads to a respawn.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerExit {
    /// Shutdown signal handled, listener drained.
    Graceful,
    /// Environment configuration could not be parsed.
    ConfigInvalid,
    /// The metrics directory was absent or the shard file could not be created.
    MetricsDirUnavailable,
    /// The HTTP listener could not bind its port.
    BindFailed,
    /// The metrics directory disappeared or was replaced while serving.
    MetricsDirLost,
    /// The document store could not be opened.
    StoreUnavailable,
}

impl WorkerExit {
    pub const fn code(self) -> i32 {
        match self {
            WorkerExit::Graceful => 0,
            WorkerExit::ConfigInvalid => 2,
            WorkerExit::MetricsDirUnavailable => 3,
            WorkerExit::BindFailed => 4,
            WorkerExit::MetricsDirLost => 5,
            WorkerExit::StoreUnavailable => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [
            WorkerExit::Graceful,
            WorkerExit::ConfigInvalid,
            WorkerExit::MetricsDirUnavailable,
            WorkerExit::BindFailed,
            WorkerExit::MetricsDirLost,
            WorkerExit::StoreUnavailable,
        ]
        .into_iter()
        .find(|exit| exit.code() == code)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WorkerExit::Graceful => "graceful shutdown",
            WorkerExit::ConfigInvalid => "invalid configuration",
            WorkerExit::MetricsDirUnavailable => "failed to acquire metrics directory",
            WorkerExit::BindFailed => "failed to bind port",
            WorkerExit::MetricsDirLost => "metrics directory lost",
            WorkerExit::StoreUnavailable => "document store unavailable",
        };
        write!(f, "{} (exit {})", text, self.code())
    }
}

impl From<WorkerExit> for std::process::ExitCode {
    fn from(exit: WorkerExit) -> Self {
        std::process::ExitCode::from(exit.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            WorkerExit::Graceful,
            WorkerExit::ConfigInvalid,
            WorkerExit::MetricsDirUnavailable,
            WorkerExit::BindFailed,
            WorkerExit::MetricsDirLost,
            WorkerExit::StoreUnavailable,
        ]
        .map(WorkerExit::code);
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert_eq!(WorkerExit::Graceful.code(), 0);
    }

    #[test]
    fn test_from_code_round_trip() {
        assert_eq!(WorkerExit::from_code(4), Some(WorkerExit::BindFailed));
        assert_eq!(WorkerExit::from_code(3), Some(WorkerExit::MetricsDirUnavailable));
        assert_eq!(WorkerExit::from_code(101), None);
    }
}
