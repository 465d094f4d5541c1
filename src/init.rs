//! `jaiph init`: scaffold a workspace.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::{CONFIG_FILE_NAME, WORKSPACE_DIR};

/// Name of the starter workflow file inside `.jaiph/`.
pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.jph";

const BOOTSTRAP_TEMPLATE: &str = r#"#!/usr/bin/env jaiph

# Bootstraps Jaiph workflows for this repository.
workflow default {
  prompt "
    You are bootstrapping Jaiph for this repository.
    Follow the Jaiph language rules exactly.
    Perform these tasks in order:
    1) Analyze repository structure, languages, package manager, and build/test/lint commands.
    2) Detect existing contribution conventions (branching, commit style, CI checks).
    3) Create or update Jaiph workflows under .jaiph/ for safe feature implementation, including:
       - preflight checks (clean git state, branch guards when relevant)
       - implementation workflow
       - verification workflow (tests/lint/build)
    4) Keep workflows minimal, composable, and specific to this project.
    5) Print a short usage guide with exact jaiph run commands.
  "
}
"#;

const CONFIG_TEMPLATE: &str = r#"# Jaiph project configuration
[agent]
# Default model for prompt steps (passed as --model to the agent command).
default_model = "gpt-5"

[run]
# Store run logs under .jaiph/runs by default (relative to workspace root).
logs_dir = ".jaiph/runs"
# Set to true to enable shell xtrace during jaiph run.
debug = false
"#;

/// Errors from [`init`].
#[derive(Debug, Error)]
pub enum InitError {
    /// The workspace argument is missing or not a directory.
    #[error("jaiph init expects a directory path, got: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Creating a file or directory failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },

    /// Writing the report failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Create `.jaiph/bootstrap.jph` (executable) and `.jaiph/config.toml`
/// under `workspace`. Existing files are left untouched. Progress is
/// reported on `out`.
pub fn init(workspace: &Path, out: &mut impl Write) -> Result<(), InitError> {
    if !workspace.is_dir() {
        return Err(InitError::NotADirectory(workspace.to_path_buf()));
    }
    let root = std::path::absolute(workspace)?;
    let jaiph_dir = root.join(WORKSPACE_DIR);
    let bootstrap_path = jaiph_dir.join(BOOTSTRAP_FILE_NAME);
    let config_path = jaiph_dir.join(CONFIG_FILE_NAME);
    let bootstrap_rel = Path::new(WORKSPACE_DIR).join(BOOTSTRAP_FILE_NAME);
    let config_rel = Path::new(WORKSPACE_DIR).join(CONFIG_FILE_NAME);

    writeln!(out)?;
    writeln!(out, "Jaiph init")?;
    writeln!(out)?;
    writeln!(out, "▸ Creating {} in {}...", bootstrap_rel.display(), root.display())?;
    fs::create_dir_all(&jaiph_dir).map_err(|source| InitError::Write {
        path: jaiph_dir.clone(),
        source,
    })?;

    let created_bootstrap = write_new(&bootstrap_path, BOOTSTRAP_TEMPLATE)?;
    fs::set_permissions(&bootstrap_path, fs::Permissions::from_mode(0o755)).map_err(
        |source| InitError::Write {
            path: bootstrap_path.clone(),
            source,
        },
    )?;
    let created_config = write_new(&config_path, CONFIG_TEMPLATE)?;
    debug!(created_bootstrap, created_config, root = %root.display(), "initialized workspace");

    writeln!(out, "✓ Initialized {}", bootstrap_rel.display())?;
    if !created_bootstrap {
        writeln!(out, "▸ Note: bootstrap file already existed; left unchanged.")?;
    }
    if created_config {
        writeln!(out, "✓ Initialized {}", config_rel.display())?;
    } else {
        writeln!(out, "▸ Note: config file already existed; left unchanged.")?;
    }
    writeln!(out)?;
    writeln!(out, "Try:")?;
    writeln!(out, "  ./{}", bootstrap_rel.display())?;
    writeln!(out, "  jaiph run {}", bootstrap_rel.display())?;
    writeln!(out)?;
    writeln!(
        out,
        "This asks an agent to analyze the project and scaffold recommended workflows."
    )?;
    writeln!(out, "Tip: add `.jaiph/runs/` to `.gitignore`.")?;
    writeln!(out)?;
    Ok(())
}

/// Write `contents` unless `path` exists; true when written.
fn write_new(path: &Path, contents: &str) -> Result<bool, InitError> {
    if path.exists() {
        return Ok(false);
    }
    fs::write(path, contents).map_err(|source| InitError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
