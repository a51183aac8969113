//! Error taxonomy for the build lane.
//!
//! Every failure a build can surface maps to one of these kinds. The stable
//! kind strings (and the CLI exit codes derived from them) are part of the
//! lane's external contract: collaborators report them to users and admins
//! without parsing message text.

use std::path::PathBuf;

use thiserror::Error;

/// Which timeout policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Wall-clock budget from process start was exceeded.
    Absolute,
    /// The process produced no output for longer than the inactivity window.
    Inactivity,
}

impl TimeoutKind {
    /// Stable identifier for reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::Absolute => "TIMEOUT_ABSOLUTE",
            TimeoutKind::Inactivity => "TIMEOUT_INACTIVITY",
        }
    }
}

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRefusal {
    /// The requester already holds a build slot.
    AlreadyInFlight,
    /// All slots are occupied.
    AtCapacity,
}

impl std::fmt::Display for AdmissionRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionRefusal::AlreadyInFlight => write!(f, "a build for this requester is already running"),
            AdmissionRefusal::AtCapacity => write!(f, "all build slots are busy, try again later"),
        }
    }
}

/// Lane-wide error type.
#[derive(Debug, Error)]
pub enum LaneError {
    /// Admission control refused the build; no slot was consumed.
    #[error("build refused for {requester}: {reason}")]
    AdmissionRefused {
        requester: String,
        reason: AdmissionRefusal,
    },

    /// The build tool could not be launched at all (missing executable,
    /// permissions). Distinct from a build-logic failure.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The build tool ran and exited non-zero. `message` is the bounded
    /// summary extracted from its output plus a pointer to the full log.
    #[error("{tool} failed{}: {message}", .exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    BuildTool {
        tool: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// A supervised step breached its deadline and was force-killed.
    #[error("build step timed out ({}) after {elapsed_secs}s", .kind.as_str())]
    Timeout { kind: TimeoutKind, elapsed_secs: u64 },

    /// The build was cancelled (operator signal or slot reclamation).
    #[error("build cancelled")]
    Cancelled,

    /// The tool reported success but no output artifact was located.
    #[error("build succeeded but no artifact was found under {}", .searched.display())]
    ArtifactNotFound { searched: PathBuf },

    /// The uploaded archive was missing, malformed, or not a recognizable
    /// project of the declared kind.
    #[error("invalid upload: {0}")]
    Archive(String),

    /// Configuration problem (bad value, unreadable file).
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying filesystem/OS failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaneError {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            LaneError::AdmissionRefused { .. } => "ADMISSION_REFUSED",
            LaneError::Spawn { .. } => "SPAWN",
            LaneError::BuildTool { .. } => "BUILD_TOOL",
            LaneError::Timeout { .. } => "TIMEOUT",
            LaneError::Cancelled => "CANCELLED",
            LaneError::ArtifactNotFound { .. } => "ARTIFACT_NOT_FOUND",
            LaneError::Archive(_) => "ARCHIVE",
            LaneError::Config(_) => "CONFIG",
            LaneError::Io(_) => "IO",
        }
    }

    /// Stable CLI exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaneError::Config(_) => 2,
            LaneError::AdmissionRefused { .. } => 10,
            LaneError::Archive(_) => 30,
            LaneError::Spawn { .. } | LaneError::Io(_) => 40,
            LaneError::BuildTool { .. } => 50,
            LaneError::Timeout { .. } => 60,
            LaneError::ArtifactNotFound { .. } => 70,
            LaneError::Cancelled => 80,
        }
    }
}

/// Result alias used throughout the lane.
pub type LaneResult<T> = Result<T, LaneError>;
