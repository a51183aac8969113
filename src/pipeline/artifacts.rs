//! Locating and publishing built APKs.
//!
//! The build tools put artifacts at well-known paths, so those are probed
//! first (release before debug). Projects with customized output layouts
//! fall back to a bounded filesystem search that skips VCS and tool-cache
//! directories.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{LaneError, LaneResult};

use super::ProjectKind;

/// How deep below the project root the fallback search descends.
pub const SEARCH_MAX_DEPTH: usize = 5;

/// Well-known output paths relative to the project root, release first.
fn known_paths(kind: ProjectKind) -> &'static [&'static str] {
    match kind {
        ProjectKind::Flutter => &[
            "build/app/outputs/flutter-apk/app-release.apk",
            "build/app/outputs/apk/release/app-release.apk",
            "build/app/outputs/flutter-apk/app-debug.apk",
            "build/app/outputs/apk/debug/app-debug.apk",
        ],
        ProjectKind::Gradle => &[
            "app/build/outputs/apk/release/app-release.apk",
            "app/build/outputs/apk/release/app-release-unsigned.apk",
            "app/build/outputs/apk/debug/app-debug.apk",
        ],
    }
}

/// Directory names the fallback search never descends into.
fn excluded_dirs() -> &'static GlobSet {
    static SET: OnceLock<GlobSet> = OnceLock::new();
    SET.get_or_init(|| {
        let mut builder = GlobSetBuilder::new();
        for pattern in [".git", ".svn", ".gradle", ".dart_tool", ".idea", "node_modules"] {
            builder.add(Glob::new(pattern).expect("static glob"));
        }
        builder.build().expect("static glob set")
    })
}

/// Find the APK a successful build produced under `project_root`.
///
/// Probes the known output paths for `kind`; when none exist, searches the
/// tree to [`SEARCH_MAX_DEPTH`], preferring a release-named APK over any
/// other.
pub fn locate_artifact(project_root: &Path, kind: ProjectKind) -> LaneResult<PathBuf> {
    for relative in known_paths(kind) {
        let candidate = project_root.join(relative);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "artifact found at known path");
            return Ok(candidate);
        }
    }

    debug!(root = %project_root.display(), "no known artifact path, searching tree");
    search_fallback(project_root).ok_or_else(|| LaneError::ArtifactNotFound {
        searched: project_root.to_path_buf(),
    })
}

fn search_fallback(project_root: &Path) -> Option<PathBuf> {
    let excluded = excluded_dirs();
    let mut first_apk: Option<PathBuf> = None;

    let walker = WalkDir::new(project_root)
        .max_depth(SEARCH_MAX_DEPTH)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && excluded.is_match(entry.file_name()))
        });

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".apk") {
            continue;
        }
        if name.contains("release") {
            return Some(entry.into_path());
        }
        if first_apk.is_none() {
            first_apk = Some(entry.into_path());
        }
    }
    first_apk
}

/// Copy a located artifact into the shared output directory under a
/// collision-free name, and return the published path.
pub fn publish(artifact: &Path, output_dir: &Path, label: &str) -> LaneResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let name = format!("{}-{}.apk", sanitize_label(label), Uuid::new_v4().simple());
    let target = output_dir.join(name);
    std::fs::copy(artifact, &target)?;
    info!(artifact = %target.display(), "published build artifact");
    Ok(target)
}

/// Reduce a free-form build label to a safe file-name stem.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "app".to_string()
    } else {
        trimmed.to_string()
    }
}
