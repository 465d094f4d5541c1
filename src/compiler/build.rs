use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::parser::parse_file;
use super::symbols::{absolute, is_source_file, normalize, output_rel_path, resolve_import_path};
use super::transpile;
use super::{CompileError, Result};
use crate::stdlib::{STDLIB_FILE_NAME, stdlib_source};

/// One compiled source file.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Source the shell was generated from.
    pub source_path: PathBuf,
    /// Where the shell was written.
    pub output_path: PathBuf,
    /// Generated shell text.
    pub shell: String,
}

/// Compile `input` (a source file or a directory tree) into `target`, or
/// next to the sources when no target is given.
///
/// The runtime library is written to the output root whenever at least one
/// source file was found.
pub fn build(input: &Path, target: Option<&Path>) -> Result<Vec<BuildOutput>> {
    let input = normalize(&absolute(input));
    let metadata = fs::metadata(&input).map_err(|source| CompileError::Read {
        path: input.clone(),
        source,
    })?;
    let root = if metadata.is_dir() {
        input.clone()
    } else {
        input.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let out_root = target.map_or_else(|| root.clone(), |dir| normalize(&absolute(dir)));
    create_dir(&out_root)?;

    let files = if metadata.is_dir() {
        collect_sources(&input)?
    } else if is_source_file(&input) {
        vec![input.clone()]
    } else {
        Vec::new()
    };
    if !files.is_empty() {
        write_stdlib(&out_root)?;
    }

    files
        .into_iter()
        .map(|file| compile_into(&file, &root, &out_root))
        .collect()
}

/// [`build`] a single entry file, then compile every module reachable
/// through its imports into the same output tree. Only the entry's outputs
/// are returned.
pub fn build_with_imports(entry: &Path, target: &Path) -> Result<Vec<BuildOutput>> {
    let outputs = build(entry, Some(target))?;
    let entry = normalize(&absolute(entry));
    let root = entry.parent().map(Path::to_path_buf).unwrap_or_default();
    let out_root = normalize(&absolute(target));

    let mut seen: HashSet<PathBuf> = HashSet::from([entry.clone()]);
    let mut queue: VecDeque<PathBuf> = VecDeque::from([entry]);
    while let Some(file) = queue.pop_front() {
        let module = parse_file(&file)?;
        for import in &module.imports {
            let imported = resolve_import_path(&file, &import.path);
            if seen.insert(imported.clone()) {
                compile_into(&imported, &root, &out_root)?;
                queue.push_back(imported);
            }
        }
    }

    Ok(outputs)
}

fn compile_into(file: &Path, root: &Path, out_root: &Path) -> Result<BuildOutput> {
    let shell = transpile(file, root)?;
    let output_path = out_root.join(output_rel_path(file, root));
    if let Some(parent) = output_path.parent() {
        create_dir(parent)?;
    }
    fs::write(&output_path, format!("{shell}\n")).map_err(|source| CompileError::Write {
        path: output_path.clone(),
        source,
    })?;
    debug!(source = %file.display(), output = %output_path.display(), "compiled module");
    Ok(BuildOutput {
        source_path: file.to_path_buf(),
        output_path,
        shell,
    })
}

fn write_stdlib(out_root: &Path) -> Result<()> {
    let path = out_root.join(STDLIB_FILE_NAME);
    fs::write(&path, stdlib_source()).map_err(|source| CompileError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "wrote runtime library");
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| CompileError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// Every source file under `dir`, sorted by path.
fn collect_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let read_error = |source| CompileError::Read {
            path: current.clone(),
            source,
        };
        for entry in fs::read_dir(&current).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            let file_type = entry.file_type().map_err(read_error)?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && is_source_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
