//! Templated build pipeline: scaffold an app project from the on-disk
//! template, compile it with Gradle, publish the APK.

use std::path::PathBuf;

use tracing::info;

use crate::error::LaneResult;

use super::artifacts;
use super::scaffold::{ProjectScaffolder, TemplateSpec};
use super::{gradle_command, gradle_env, BuildContext, CleanupGuard, ProjectKind, Workspace};

/// Run the templated pipeline to completion and return the published
/// artifact path.
pub fn run_templated(
    ctx: &BuildContext,
    spec: &TemplateSpec,
    scaffolder: &dyn ProjectScaffolder,
) -> LaneResult<PathBuf> {
    let workspace = Workspace::create(&ctx.config.work_root)?;
    let mut cleanup = CleanupGuard::new();
    cleanup.add(workspace.path());

    ctx.progress.send(format!("Preparing project for {}", spec.app_name));
    let project_root = scaffolder.scaffold(spec, workspace.path())?;

    ctx.progress.send("Compiling application");
    let (opts_key, opts_value) = gradle_env();
    ctx.command(
        gradle_command(&project_root),
        &project_root,
        ctx.absolute_policy(),
    )
    .arg("assemble")
    .env(opts_key, opts_value)
    .run(&ctx.config.log_dir, Some(&ctx.progress))?;

    let artifact = artifacts::locate_artifact(&project_root, ProjectKind::Gradle)?;
    let published = artifacts::publish(&artifact, &ctx.config.output_dir, &spec.app_name)?;
    info!(app = %spec.app_name, artifact = %published.display(), "templated build finished");
    ctx.progress.send("Build finished");
    Ok(published)
}
