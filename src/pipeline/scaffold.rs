//! Project scaffolding for templated builds.
//!
//! The templated pipeline turns a small request (app name + target URL)
//! into a full Gradle project by instantiating an on-disk template. The
//! scaffolder is a trait so the service can be tested without a real
//! Android project tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{LaneError, LaneResult};

/// Inputs for a templated app build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Display name of the generated app; also the artifact label.
    pub app_name: String,
    /// URL the generated app wraps.
    pub site_url: String,
}

/// Produces a buildable project directory from a [`TemplateSpec`].
pub trait ProjectScaffolder: Send + Sync {
    /// Materialize the project under `into` and return the project root
    /// (the directory containing the Gradle build files).
    fn scaffold(&self, spec: &TemplateSpec, into: &Path) -> LaneResult<PathBuf>;
}

/// Placeholder for the app name inside template files.
pub const APP_NAME_TOKEN: &str = "{{APP_NAME}}";
/// Placeholder for the wrapped URL inside template files.
pub const SITE_URL_TOKEN: &str = "{{SITE_URL}}";

/// File extensions the scaffolder treats as text and token-substitutes.
/// Everything else (images, keystores, wrapper jars) is copied verbatim.
const TEXT_EXTENSIONS: &[&str] = &[
    "gradle", "kts", "properties", "xml", "json", "kt", "java", "txt", "md", "pro", "yaml", "yml",
];

/// Copies a template directory and substitutes the name/URL tokens in text
/// files.
#[derive(Debug, Clone)]
pub struct CopyScaffolder {
    template_dir: PathBuf,
}

impl CopyScaffolder {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }
}

impl ProjectScaffolder for CopyScaffolder {
    fn scaffold(&self, spec: &TemplateSpec, into: &Path) -> LaneResult<PathBuf> {
        if !self.template_dir.is_dir() {
            return Err(LaneError::Config(format!(
                "template directory not found: {}",
                self.template_dir.display()
            )));
        }

        let project_root = into.join("project");
        for entry in WalkDir::new(&self.template_dir) {
            let entry = entry.map_err(|e| {
                LaneError::Config(format!(
                    "cannot read template {}: {e}",
                    self.template_dir.display()
                ))
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.template_dir)
                .expect("walkdir yields paths under its root");
            let target = project_root.join(relative);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if is_text_file(entry.path()) {
                    let text = std::fs::read_to_string(entry.path())?;
                    let text = text
                        .replace(APP_NAME_TOKEN, &spec.app_name)
                        .replace(SITE_URL_TOKEN, &spec.site_url);
                    std::fs::write(&target, text)?;
                } else {
                    std::fs::copy(entry.path(), &target)?;
                }
                copy_permissions(entry.path(), &target);
            }
        }

        debug!(root = %project_root.display(), app = %spec.app_name, "scaffolded project from template");
        Ok(project_root)
    }
}

fn is_text_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => TEXT_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)),
        // Extensionless template files are scripts (gradlew) and copied raw.
        None => false,
    }
}

/// Preserve the execute bit on copied scripts (gradlew in particular).
fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(metadata) = std::fs::metadata(from) {
        let _ = std::fs::set_permissions(to, metadata.permissions());
    }
}
