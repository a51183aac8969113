//! Archive build pipeline: extract an uploaded project ZIP, prepare it,
//! compile it with its native toolchain, publish the APK.
//!
//! Flutter uploads get extra preparation before compiling: tool caches from
//! the uploader's machine are deleted and `android/gradle.properties` is
//! rewritten to disable daemon and build caches, since stale caches from a
//! foreign environment are the dominant cause of unreproducible failures.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LaneError, LaneResult};

use super::artifacts;
use super::{gradle_command, gradle_env, BuildContext, CleanupGuard, ProjectKind, Workspace};

/// Build-file names that mark a Gradle project root.
const GRADLE_MARKERS: &[&str] = &[
    "settings.gradle",
    "settings.gradle.kts",
    "build.gradle",
    "build.gradle.kts",
];

/// Cache directories (relative to the project root) stripped from Flutter
/// uploads before building.
const FLUTTER_STALE_DIRS: &[&str] = &[".gradle", "build", ".dart_tool", "android/.gradle"];

/// Gradle properties forced off for uploaded projects.
const FORCED_PROPERTIES: &[(&str, &str)] = &[
    ("org.gradle.daemon", "false"),
    ("org.gradle.caching", "false"),
    ("android.enableBuildCache", "false"),
];

/// Run the archive pipeline to completion and return the published artifact
/// path. The uploaded archive itself is removed on the way out.
pub fn run_archive(
    ctx: &BuildContext,
    kind: ProjectKind,
    archive: &Path,
    label: &str,
) -> LaneResult<PathBuf> {
    validate_archive(archive)?;

    let workspace = Workspace::create(&ctx.config.work_root)?;
    let mut cleanup = CleanupGuard::new();
    cleanup.add(workspace.path());
    cleanup.add(archive);

    ctx.progress.send("Extracting uploaded project");
    extract(ctx, archive, workspace.path())?;

    let project_root = locate_project_root(workspace.path(), kind)?;
    debug!(root = %project_root.display(), %kind, "located project root");

    if kind == ProjectKind::Flutter {
        prepare_flutter_project(ctx, &project_root)?;
    }

    ctx.progress.send("Compiling application");
    compile(ctx, kind, &project_root)?;

    let artifact = artifacts::locate_artifact(&project_root, kind)?;
    let published = artifacts::publish(&artifact, &ctx.config.output_dir, label)?;
    info!(%kind, artifact = %published.display(), "archive build finished");
    ctx.progress.send("Build finished");
    Ok(published)
}

fn validate_archive(archive: &Path) -> LaneResult<()> {
    if !archive.is_file() {
        return Err(LaneError::Archive(format!(
            "uploaded archive not found: {}",
            archive.display()
        )));
    }
    let is_zip = archive
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if !is_zip {
        return Err(LaneError::Archive(format!(
            "unsupported archive type (expected .zip): {}",
            archive.display()
        )));
    }
    Ok(())
}

fn extract(ctx: &BuildContext, archive: &Path, into: &Path) -> LaneResult<()> {
    let result = ctx
        .command("unzip", into, ctx.inactivity_policy())
        .arg("-o")
        .arg("-q")
        .arg(archive.to_string_lossy())
        .arg("-d")
        .arg(into.to_string_lossy())
        .run(&ctx.config.log_dir, Some(&ctx.progress));

    match result {
        Ok(_) => Ok(()),
        // A broken upload is the uploader's problem, not a build-tool one.
        Err(LaneError::BuildTool { message, .. }) => Err(LaneError::Archive(format!(
            "failed to extract {}: {message}",
            archive.display()
        ))),
        Err(other) => Err(other),
    }
}

/// Find the buildable project inside an extracted archive: the extraction
/// root itself, or exactly one level down (uploads are commonly zipped with
/// a single wrapping directory).
pub fn locate_project_root(extracted: &Path, kind: ProjectKind) -> LaneResult<PathBuf> {
    if has_project_marker(extracted, kind) {
        return Ok(extracted.to_path_buf());
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(extracted)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();
    for dir in entries {
        if has_project_marker(&dir, kind) {
            return Ok(dir);
        }
    }

    Err(LaneError::Archive(format!(
        "no {kind} project found in archive (looked in {} and one level below)",
        extracted.display()
    )))
}

fn has_project_marker(dir: &Path, kind: ProjectKind) -> bool {
    match kind {
        ProjectKind::Flutter => dir.join("pubspec.yaml").is_file(),
        ProjectKind::Gradle => GRADLE_MARKERS.iter().any(|m| dir.join(m).is_file()),
    }
}

fn prepare_flutter_project(ctx: &BuildContext, project_root: &Path) -> LaneResult<()> {
    ctx.progress.send("Preparing Flutter project");
    invalidate_stale_caches(project_root);
    rewrite_gradle_properties(&project_root.join("android/gradle.properties"))?;

    ctx.command("flutter", project_root, ctx.inactivity_policy())
        .arg("pub")
        .arg("get")
        .run(&ctx.config.log_dir, Some(&ctx.progress))?;
    Ok(())
}

/// Remove tool caches carried over from the uploader's machine. Best-effort.
fn invalidate_stale_caches(project_root: &Path) {
    for relative in FLUTTER_STALE_DIRS {
        let dir = project_root.join(relative);
        if dir.is_dir() {
            debug!(dir = %dir.display(), "removing stale cache directory");
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}

/// Force the build-cache properties off in `gradle.properties`, replacing
/// existing assignments and appending missing ones. Creates the file (and
/// its directory) when the upload lacks one.
pub fn rewrite_gradle_properties(path: &Path) -> LaneResult<()> {
    let existing = if path.is_file() {
        std::fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    for (key, value) in FORCED_PROPERTIES {
        let assignment = format!("{key}={value}");
        let prefix = format!("{key}=");
        match lines.iter_mut().find(|l| l.trim_start().starts_with(&prefix)) {
            Some(line) => *line = assignment,
            None => lines.push(assignment),
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = lines.join("\n");
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

fn compile(ctx: &BuildContext, kind: ProjectKind, project_root: &Path) -> LaneResult<()> {
    match kind {
        ProjectKind::Flutter => {
            ctx.command("flutter", project_root, ctx.absolute_policy())
                .arg("build")
                .arg("apk")
                .arg("--release")
                .run(&ctx.config.log_dir, Some(&ctx.progress))?;
        }
        ProjectKind::Gradle => {
            let (opts_key, opts_value) = gradle_env();
            ctx.command(
                gradle_command(project_root),
                project_root,
                ctx.absolute_policy(),
            )
            .arg("assemble")
            .env(opts_key, opts_value)
            .run(&ctx.config.log_dir, Some(&ctx.progress))?;
        }
    }
    Ok(())
}
