//! User and workspace configuration.
//!
//! Two optional TOML files are read: the global one under
//! `$XDG_CONFIG_HOME/jaiph/config.toml` (or `~/.config/jaiph/config.toml`)
//! and the workspace one at `<workspace>/.jaiph/config.toml`. Workspace
//! values override global ones key by key, and environment variables
//! override both when the run environment is assembled.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Directory holding workspace-local jaiph state.
pub const WORKSPACE_DIR: &str = ".jaiph";
/// Configuration file name, in both locations.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Default run-log directory, relative to the workspace root.
pub const DEFAULT_LOGS_DIR: &str = ".jaiph/runs";

/// Errors while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },

    /// The file is not valid TOML.
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
}

/// Settings recognised in `config.toml`. Unset keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// `[agent] default_model`
    pub agent_model: Option<String>,
    /// `[agent] command`
    pub agent_command: Option<String>,
    /// `[run] logs_dir`
    pub logs_dir: Option<String>,
    /// `[run] debug`
    pub debug: Option<bool>,
}

impl Config {
    /// Global config merged with the workspace config. Unreadable or
    /// malformed files are logged and skipped.
    pub fn load(workspace: &Path) -> Self {
        let global = global_config_path()
            .map(|path| load_or_default(&path))
            .unwrap_or_default();
        let local = load_or_default(&local_config_path(workspace));
        global.merge(local)
    }

    /// Parse config text. Keys with the wrong type are ignored.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let table: toml::Table = text.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let section = |name: &str| table.get(name).and_then(toml::Value::as_table);
        let string = |section: Option<&toml::Table>, key: &str| {
            section
                .and_then(|s| s.get(key))
                .and_then(toml::Value::as_str)
                .map(str::to_string)
        };

        let agent = section("agent");
        let run = section("run");
        Ok(Self {
            agent_model: string(agent, "default_model"),
            agent_command: string(agent, "command"),
            logs_dir: string(run, "logs_dir"),
            debug: run
                .and_then(|s| s.get("debug"))
                .and_then(toml::Value::as_bool),
        })
    }

    /// Read and parse `path`; `Ok(None)` when it does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml_str(&text, path).map(Some)
    }

    /// Per-key merge where `overrides` wins.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            agent_model: overrides.agent_model.or(self.agent_model),
            agent_command: overrides.agent_command.or(self.agent_command),
            logs_dir: overrides.logs_dir.or(self.logs_dir),
            debug: overrides.debug.or(self.debug),
        }
    }

    /// Run-log directory: `JAIPH_RUNS_DIR`, then `logs_dir`, then
    /// [`DEFAULT_LOGS_DIR`]. Relative paths are taken from `workspace`.
    pub fn resolve_logs_dir(&self, workspace: &Path, env_value: Option<&str>) -> PathBuf {
        let chosen = env_value
            .filter(|value| !value.is_empty())
            .or(self.logs_dir.as_deref())
            .unwrap_or(DEFAULT_LOGS_DIR);
        workspace.join(chosen)
    }

    /// Variables to add to the child environment. Each one is emitted only
    /// when `lookup` reports it unset, so the caller's environment wins.
    pub fn runtime_env(
        &self,
        workspace: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<(&'static str, String)> {
        let mut env = vec![("JAIPH_WORKSPACE", workspace.display().to_string())];
        let candidates = [
            ("JAIPH_AGENT_MODEL", self.agent_model.clone()),
            ("JAIPH_AGENT_COMMAND", self.agent_command.clone()),
            ("JAIPH_RUNS_DIR", self.logs_dir.clone()),
            ("JAIPH_DEBUG", self.debug.filter(|debug| *debug).map(|_| "true".to_string())),
        ];
        for (name, value) in candidates {
            if let Some(value) = value {
                if lookup(name).is_none() {
                    env.push((name, value));
                }
            }
        }
        env
    }
}

/// `$XDG_CONFIG_HOME/jaiph/config.toml`, else `$HOME/.config/jaiph/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("jaiph").join(CONFIG_FILE_NAME))
}

/// `<workspace>/.jaiph/config.toml`
pub fn local_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE_NAME)
}

/// Nearest ancestor of `start` (inclusive) that contains `.jaiph` or
/// `.git`; `start` itself when none does.
pub fn detect_workspace_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_DIR).exists() || dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

fn load_or_default(path: &Path) -> Config {
    match Config::from_file(path) {
        Ok(Some(config)) => {
            debug!(path = %path.display(), "loaded config");
            config
        }
        Ok(None) => Config::default(),
        Err(err) => {
            warn!(error = %err, "ignoring config file");
            Config::default()
        }
    }
}
