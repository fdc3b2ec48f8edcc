//! Edit-path containment checks.
//!
//! An edit target must resolve to a file strictly nested under the apps
//! directory. Containment is decided twice: lexically (on normalized absolute
//! paths, the way the host computes them) and again on canonical paths so a
//! symlink inside the apps directory cannot point the agent outside of it.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// File extensions accepted for an edit target (compared case-insensitively).
pub const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm"];

/// Error text when the target is not strictly nested under the apps directory.
pub const OUTSIDE_APPS_DIR: &str = "Edit path is outside of apps directory";

/// Error text when the target is missing, not a file, or not a document.
pub const NOT_A_DOCUMENT: &str = "Edit path must be an existing HTML file";

/// Resolve `path` to an absolute, lexically normalized path.
///
/// Relative paths are joined onto `base`. `.` segments are dropped and `..`
/// pops the previous segment; popping past the root stays at the root.
#[must_use]
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize_lexically(&joined)
}

/// Compute the relative path leading from `base` to `target`.
///
/// Both inputs are expected to be absolute and normalized. When they share no
/// root (different drive prefixes), `target` itself is returned.
#[must_use]
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let shared = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let shares_root = shared > 0
        && matches!(
            base_parts.first(),
            Some(Component::RootDir | Component::Prefix(_))
        );
    if !shares_root {
        return target.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for _ in shared..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[shared..] {
        relative.push(part.as_os_str());
    }
    relative
}

/// Whether `target` is strictly nested under `base`.
///
/// Holds iff the relative path from `base` to `target` is non-empty, does not
/// start with a parent segment, and is not itself absolute.
#[must_use]
pub fn is_strictly_nested(base: &Path, target: &Path) -> bool {
    let relative = relative_path(base, target);
    match relative.components().next() {
        None | Some(Component::ParentDir | Component::RootDir | Component::Prefix(_)) => false,
        Some(_) => !relative.is_absolute(),
    }
}

/// Canonical locations an edit-mode run is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditScope {
    /// Canonical apps directory; the agent's working and additional directory.
    pub apps_dir: PathBuf,
    /// Canonical path of the document being edited.
    pub target: PathBuf,
}

/// Validate an edit target against the apps directory.
///
/// `apps_dir` is resolved against `cwd`; `edit_path` is resolved against the
/// resolved apps directory. Returns the canonical scope on success.
///
/// # Errors
///
/// Returns `AppError::PathSafety` if:
/// - The target is not strictly nested under the apps directory, lexically
///   or after resolving symlinks.
/// - The target does not exist, cannot be inspected, is not a regular file,
///   or lacks a document extension.
pub fn validate_edit_target(apps_dir: &Path, edit_path: &Path, cwd: &Path) -> Result<EditScope> {
    let base = resolve_against(cwd, apps_dir);
    let target = resolve_against(&base, edit_path);

    if !is_strictly_nested(&base, &target) {
        return Err(AppError::PathSafety(OUTSIDE_APPS_DIR.into()));
    }

    let metadata =
        std::fs::metadata(&target).map_err(|_| AppError::PathSafety(NOT_A_DOCUMENT.into()))?;
    if !metadata.is_file() || !has_document_extension(&target) {
        return Err(AppError::PathSafety(NOT_A_DOCUMENT.into()));
    }

    let canonical_base = base
        .canonicalize()
        .map_err(|_| AppError::PathSafety(OUTSIDE_APPS_DIR.into()))?;
    let canonical_target = target
        .canonicalize()
        .map_err(|_| AppError::PathSafety(NOT_A_DOCUMENT.into()))?;

    if !is_strictly_nested(&canonical_base, &canonical_target) {
        return Err(AppError::PathSafety(OUTSIDE_APPS_DIR.into()));
    }

    Ok(EditScope {
        apps_dir: canonical_base,
        target: canonical_target,
    })
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Popping the root itself is a no-op, matching `/..` == `/`.
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }
    normalized
}
