//! Build pipelines.
//!
//! Two ways in, one way out: a project is either scaffolded from an on-disk
//! template ([`template`]) or extracted from an uploaded archive
//! ([`archive`]); both end by locating the produced APK ([`artifacts`]) and
//! publishing it into the shared output directory.
//!
//! Every pipeline works inside a throwaway [`Workspace`] under the configured
//! work root. Cleanup is best-effort and never turns a finished build into a
//! failure.

pub mod archive;
pub mod artifacts;
pub mod scaffold;
pub mod template;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LaneConfig;
use crate::error::LaneResult;
use crate::progress::ProgressSender;
use crate::supervisor::SupervisedCommand;
use crate::timeout::TimeoutPolicy;

/// What kind of project an uploaded archive contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Flutter,
    Gradle,
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectKind::Flutter => write!(f, "flutter"),
            ProjectKind::Gradle => write!(f, "gradle"),
        }
    }
}

/// Everything a pipeline run needs besides its own inputs.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub config: LaneConfig,
    pub progress: ProgressSender,
    pub cancel: Arc<AtomicBool>,
}

impl BuildContext {
    pub fn new(config: LaneConfig, progress: ProgressSender, cancel: Arc<AtomicBool>) -> Self {
        Self {
            config,
            progress,
            cancel,
        }
    }

    /// A supervised command wired to this build's cancel flag and the
    /// configured timeout-check period.
    pub fn command(
        &self,
        program: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        policy: TimeoutPolicy,
    ) -> SupervisedCommand {
        SupervisedCommand::new(program, working_dir, policy)
            .with_cancel_flag(Arc::clone(&self.cancel))
            .timeout_check_every(self.config.timeout_check())
    }

    /// Absolute wall-clock policy for compile steps.
    pub fn absolute_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::AbsoluteFromStart(self.config.absolute_timeout())
    }

    /// Inactivity policy for network-bound steps that legitimately idle
    /// between bursts of output.
    pub fn inactivity_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::InactivityWindow(self.config.inactivity_timeout())
    }
}

/// A throwaway per-build directory under the work root.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    pub fn create(work_root: &Path) -> LaneResult<Self> {
        let id = Uuid::new_v4();
        let dir = work_root.join(id.simple().to_string());
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "created build workspace");
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

/// Best-effort removal of build leftovers when the pipeline returns, on
/// success and failure alike. Errors are logged and swallowed; a build that
/// produced an artifact must not fail because a temp dir would not delete.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else if path.exists() {
                std::fs::remove_file(path)
            } else {
                continue;
            };
            if let Err(e) = result {
                warn!(path = %path.display(), "cleanup failed: {e}");
            }
        }
    }
}

/// Pick the build command for a Gradle project root: the project's own
/// wrapper when present (as an absolute path, since the subprocess resolves
/// relative programs against its own environment), otherwise `gradle` from
/// PATH.
pub(crate) fn gradle_command(project_root: &Path) -> String {
    let wrapper = project_root.join("gradlew");
    if wrapper.is_file() {
        let wrapper = wrapper.canonicalize().unwrap_or(wrapper);
        wrapper.to_string_lossy().into_owned()
    } else {
        "gradle".to_string()
    }
}

/// A process-environment override applied to every build-tool invocation:
/// keep Gradle in-process so the force-kill of the group actually stops
/// compilation instead of orphaning a daemon.
pub(crate) fn gradle_env() -> (String, String) {
    (
        "GRADLE_OPTS".to_string(),
        "-Dorg.gradle.daemon=false".to_string(),
    )
}
