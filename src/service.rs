//! Build service: ties admission, supervision, and pipelines together.
//!
//! One request is one admission attempt plus one pipeline run. The slot is
//! held for exactly the duration of the pipeline (RAII guard), the build's
//! kill flag is attached to the slot so watchdog reclamation stops the
//! subprocess, and every progress event doubles as a slot-activity bump.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::LaneConfig;
use crate::error::{LaneError, LaneResult};
use crate::governor::BuildGovernor;
use crate::pipeline::scaffold::{ProjectScaffolder, TemplateSpec};
use crate::pipeline::{archive, template, BuildContext, ProjectKind};
use crate::progress::ProgressSender;

/// What to build.
#[derive(Debug, Clone)]
pub enum BuildJob {
    /// Scaffold from the configured template and compile with Gradle.
    Templated { spec: TemplateSpec },
    /// Extract an uploaded archive and compile with its native toolchain.
    Archive {
        kind: ProjectKind,
        archive: PathBuf,
        label: String,
    },
}

impl BuildJob {
    fn label(&self) -> &str {
        match self {
            BuildJob::Templated { spec } => &spec.app_name,
            BuildJob::Archive { label, .. } => label,
        }
    }
}

/// One build request from one requester.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Stable requester identity; the admission key.
    pub requester: String,
    pub job: BuildJob,
}

/// Machine-readable record of a finished build, written next to the logs.
#[derive(Debug, Serialize)]
struct BuildSummary<'a> {
    requester: &'a str,
    label: &'a str,
    outcome: &'static str,
    error_kind: Option<&'static str>,
    artifact: Option<&'a str>,
    detail: Option<String>,
    finished_at: String,
}

/// Front door for builds.
pub struct BuildService {
    config: LaneConfig,
    governor: Arc<BuildGovernor>,
    scaffolder: Arc<dyn ProjectScaffolder>,
}

impl BuildService {
    pub fn new(
        config: LaneConfig,
        governor: Arc<BuildGovernor>,
        scaffolder: Arc<dyn ProjectScaffolder>,
    ) -> Self {
        Self {
            config,
            governor,
            scaffolder,
        }
    }

    pub fn governor(&self) -> &Arc<BuildGovernor> {
        &self.governor
    }

    /// Run one build to completion with a fresh kill flag.
    pub fn submit(&self, request: &BuildRequest, progress: ProgressSender) -> LaneResult<PathBuf> {
        self.submit_with_cancel(request, progress, Arc::new(AtomicBool::new(false)))
    }

    /// Run one build to completion. `cancel` is shared with the supervised
    /// subprocesses and with the governor slot, so both an external signal
    /// handler and watchdog reclamation can stop the build.
    pub fn submit_with_cancel(
        &self,
        request: &BuildRequest,
        progress: ProgressSender,
        cancel: Arc<AtomicBool>,
    ) -> LaneResult<PathBuf> {
        let guard = self
            .governor
            .admit(&request.requester)
            .map_err(|reason| LaneError::AdmissionRefused {
                requester: request.requester.clone(),
                reason,
            })?;
        self.governor
            .attach_cancel_handle(&request.requester, Arc::clone(&cancel));

        // Every progress event proves the build is alive.
        let progress = {
            let governor = Arc::clone(&self.governor);
            let requester = request.requester.clone();
            progress.observed(move || governor.update_activity(Some(&requester)))
        };

        info!(requester = %request.requester, label = %request.job.label(), "build started");
        let ctx = BuildContext::new(self.config.clone(), progress, cancel);
        let result = match &request.job {
            BuildJob::Templated { spec } => {
                template::run_templated(&ctx, spec, self.scaffolder.as_ref())
            }
            BuildJob::Archive {
                kind,
                archive,
                label,
            } => archive::run_archive(&ctx, *kind, archive, label),
        };

        match &result {
            Ok(artifact) => {
                info!(requester = %request.requester, artifact = %artifact.display(), "build succeeded")
            }
            Err(e) => {
                error!(requester = %request.requester, kind = e.kind(), "build failed: {e}")
            }
        }
        self.write_summary(request, &result);

        drop(guard);
        result
    }

    /// Record the outcome as JSON next to the build logs. Best-effort and
    /// write-then-rename, so readers never see a partial file.
    fn write_summary(&self, request: &BuildRequest, result: &LaneResult<PathBuf>) {
        let artifact_display = result.as_ref().ok().map(|p| p.display().to_string());
        let summary = BuildSummary {
            requester: &request.requester,
            label: request.job.label(),
            outcome: if result.is_ok() { "success" } else { "failure" },
            error_kind: result.as_ref().err().map(|e| e.kind()),
            artifact: artifact_display.as_deref(),
            detail: result.as_ref().err().map(|e| e.to_string()),
            finished_at: Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.persist_summary(&summary) {
            warn!(requester = %request.requester, "failed to write build summary: {e}");
        }
    }

    fn persist_summary(&self, summary: &BuildSummary<'_>) -> LaneResult<()> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        let name = format!(
            "summary-{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        let target = self.config.log_dir.join(name);
        let tmp = target.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(summary)
            .map_err(|e| LaneError::Config(format!("summary serialization failed: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress;
    use std::path::Path;
    use tempfile::TempDir;

    struct FailingScaffolder;

    impl ProjectScaffolder for FailingScaffolder {
        fn scaffold(&self, _spec: &TemplateSpec, _into: &Path) -> LaneResult<PathBuf> {
            Err(LaneError::Config("no template".to_string()))
        }
    }

    fn service(root: &Path) -> BuildService {
        let config = LaneConfig {
            work_root: root.join("work"),
            output_dir: root.join("out"),
            log_dir: root.join("logs"),
            ..LaneConfig::default()
        };
        let governor = Arc::new(BuildGovernor::from_config(&config));
        BuildService::new(config, governor, Arc::new(FailingScaffolder))
    }

    fn templated_request(requester: &str) -> BuildRequest {
        BuildRequest {
            requester: requester.to_string(),
            job: BuildJob::Templated {
                spec: TemplateSpec {
                    app_name: "Demo".to_string(),
                    site_url: "https://example.com".to_string(),
                },
            },
        }
    }

    #[test]
    fn test_failed_build_releases_slot() {
        let root = TempDir::new().unwrap();
        let svc = service(root.path());

        let err = svc
            .submit(&templated_request("alice"), progress::sink())
            .unwrap_err();
        assert!(matches!(err, LaneError::Config(_)));
        // The slot must be free again after the failure.
        assert_eq!(svc.governor().active_count(), 0);
    }

    #[test]
    fn test_failed_build_writes_summary() {
        let root = TempDir::new().unwrap();
        let svc = service(root.path());
        let _ = svc.submit(&templated_request("alice"), progress::sink());

        let summaries: Vec<_> = std::fs::read_dir(root.path().join("logs"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("summary-") && name.ends_with(".json")
            })
            .collect();
        assert_eq!(summaries.len(), 1);

        let text = std::fs::read_to_string(summaries[0].path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["outcome"], "failure");
        assert_eq!(parsed["requester"], "alice");
        assert_eq!(parsed["error_kind"], "CONFIG");
    }

    #[test]
    fn test_missing_archive_is_archive_error() {
        let root = TempDir::new().unwrap();
        let svc = service(root.path());
        let request = BuildRequest {
            requester: "bob".to_string(),
            job: BuildJob::Archive {
                kind: ProjectKind::Gradle,
                archive: root.path().join("absent.zip"),
                label: "upload".to_string(),
            },
        };

        let err = svc.submit(&request, progress::sink()).unwrap_err();
        assert!(matches!(err, LaneError::Archive(_)));
        assert_eq!(svc.governor().active_count(), 0);
    }
}
