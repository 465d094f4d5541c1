use std::path::{Component, Path, PathBuf};

use crate::stdlib::STDLIB_FILE_NAME;

/// Extensions recognised as jaiph sources.
pub const SOURCE_EXTENSIONS: [&str; 3] = ["jph", "jh", "jrh"];

const PARENT_COMPONENT: &str = "_parent";

/// True when `path` carries one of the [`SOURCE_EXTENSIONS`].
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Resolve an import path against the directory of the importing file,
/// appending `.jph` when no source extension is present.
pub fn resolve_import_path(from_file: &Path, import_path: &str) -> PathBuf {
    let has_extension = SOURCE_EXTENSIONS
        .iter()
        .any(|ext| import_path.ends_with(&format!(".{ext}")));
    let normalized = if has_extension {
        import_path.to_string()
    } else {
        format!("{import_path}.jph")
    };
    let base = from_file.parent().unwrap_or_else(|| Path::new(""));
    normalize(&absolute(&base.join(normalized)))
}

/// Canonical module prefix: path relative to `root`, separators as `__`,
/// extension dropped, `..` rendered as `_parent`.
pub fn module_symbol(file: &Path, root: &Path) -> String {
    let rel = output_components(file, root);
    let mut parts: Vec<String> = rel.iter().map(|part| part.to_string()).collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = Path::new(last.as_str()).file_stem().and_then(|s| s.to_str()) {
            *last = stem.to_string();
        }
    }
    parts.join("__")
}

/// Output location of `file` relative to the output root (`.sh` suffix).
pub fn output_rel_path(file: &Path, root: &Path) -> PathBuf {
    let mut rel: PathBuf = output_components(file, root).iter().collect();
    rel.set_extension("sh");
    rel
}

/// Path from the generated script for `file` to the runtime library.
pub fn stdlib_source_path(file: &Path, root: &Path) -> String {
    let depth = output_components(file, root).len().saturating_sub(1);
    let mut path = "../".repeat(depth);
    path.push_str(STDLIB_FILE_NAME);
    path
}

/// Path from the generated script for `importer` to the one for
/// `imported`, with forward slashes.
pub fn import_source_path(importer: &Path, imported: &Path, root: &Path) -> String {
    let from = output_rel_path(importer, root);
    let to = output_rel_path(imported, root);
    let from_dir = from.parent().unwrap_or_else(|| Path::new(""));
    relative_between(from_dir, &to)
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Absolute form of `path` without touching the filesystem beyond the
/// current directory lookup.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically resolve `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `file` relative to `root` as plain names, `..` mapped to `_parent`.
fn output_components(file: &Path, root: &Path) -> Vec<String> {
    let file = normalize(&absolute(file));
    let root = normalize(&absolute(root));
    relative_between(&root, &file)
        .components()
        .map(|component| match component {
            Component::ParentDir => PARENT_COMPONENT.to_string(),
            other => other.as_os_str().to_string_lossy().into_owned(),
        })
        .collect()
}

/// Relative path from directory `from` to `to`; both must be in the same
/// form (both absolute or both relative to the same base).
fn relative_between(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let shared = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in shared..from.len() {
        rel.push("..");
    }
    for component in &to[shared..] {
        rel.push(component.as_os_str());
    }
    rel
}
