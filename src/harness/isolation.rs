use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tokio::task;
use tracing::debug;

/// Variable the runtime library reads to pick its rule wrapper.
pub const ISOLATION_VAR: &str = "JAIPH_ISOLATION";

/// Host capabilities consulted when choosing how rules are sandboxed.
pub trait ToolProbe {
    /// True when the host kernel supports mount namespaces.
    fn is_linux(&self) -> bool;
    /// True when `name` resolves to a file on `PATH`.
    fn has_command(&self, name: &str) -> bool;
    /// True when `sudo -n` works without a password prompt.
    fn passwordless_sudo(&self) -> bool;
}

/// How rule bodies are executed.
pub trait IsolationStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    /// Value exported as [`ISOLATION_VAR`].
    fn mode(&self) -> &'static str;
}

/// Rules run inside a private mount namespace with `/` remounted
/// read-only, via `sudo -n unshare -m`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegedNamespace;

impl IsolationStrategy for PrivilegedNamespace {
    fn name(&self) -> &'static str {
        "privileged-namespace"
    }

    fn mode(&self) -> &'static str {
        "namespace"
    }
}

/// Rules run as plain function calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl IsolationStrategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn mode(&self) -> &'static str {
        "none"
    }
}

/// Probe backed by the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ToolProbe for SystemProbe {
    fn is_linux(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn has_command(&self, name: &str) -> bool {
        find_executable_in_path(name).is_some()
    }

    fn passwordless_sudo(&self) -> bool {
        Command::new("sudo")
            .args(["-n", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }
}

/// Namespace isolation when the host can provide it, passthrough otherwise.
pub fn select_isolation(probe: &dyn ToolProbe) -> Box<dyn IsolationStrategy> {
    let available = probe.is_linux()
        && probe.has_command("unshare")
        && probe.has_command("sudo")
        && probe.passwordless_sudo();
    let strategy: Box<dyn IsolationStrategy> = if available {
        Box::new(PrivilegedNamespace)
    } else {
        Box::new(Passthrough)
    };
    debug!(strategy = strategy.name(), "selected rule isolation");
    strategy
}

/// Honour an explicit `JAIPH_ISOLATION` of `namespace` or `none`;
/// anything else falls back to probing.
pub fn isolation_from_env(
    value: Option<&str>,
    probe: &dyn ToolProbe,
) -> Box<dyn IsolationStrategy> {
    match value.map(str::trim) {
        Some("namespace") => Box::new(PrivilegedNamespace),
        Some("none") => Box::new(Passthrough),
        _ => select_isolation(probe),
    }
}

/// [`isolation_from_env`] against the real host, run on the blocking pool
/// because probing may wait on `sudo`.
pub async fn resolve_isolation(value: Option<String>) -> io::Result<Box<dyn IsolationStrategy>> {
    task::spawn_blocking(move || isolation_from_env(value.as_deref(), &SystemProbe))
        .await
        .map_err(io::Error::other)
}

fn find_executable_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|base| base.join(name))
        .find(|candidate| candidate.is_file())
}
