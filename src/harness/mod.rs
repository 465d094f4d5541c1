//! Execution harness behind `jaiph run`.
//!
//! A run builds the entry file into a scratch directory, derives a display
//! tree from the `default` workflow, starts the compiled program in its own
//! process group and turns the step events it writes to stderr into live
//! progress. Everything happens on one task: stream reads, the child exit,
//! a one-second ticker, forwarded signals and the kill timer are the arms
//! of a single `select!` loop, so the tree has exactly one writer.

/// Per-run identity and step log bookkeeping.
pub mod context;
/// Step-event decoding and line buffering.
pub mod events;
/// Rule sandbox selection.
pub mod isolation;
/// Process-group signalling and exit codes.
pub mod process;
/// Terminal rendering of the run tree.
pub mod render;
/// Display tree derived from the source model.
pub mod tree;

use std::io::{self, Stderr, Stdout};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::compiler::symbols::{absolute, is_source_file, module_symbol, normalize};
use crate::compiler::{CompileError, build_with_imports, parse_file};
use crate::config::{Config, detect_workspace_root};
use crate::stdlib::{EVENT_FD_VAR, STDLIB_FILE_NAME};

use context::RunContext;
use events::{LineBuffer, StepEvent, StepPhase, parse_event};
use isolation::{ISOLATION_VAR, resolve_isolation};
use process::{KILL_GRACE, ProcessGroup, Signal, exit_code};
use render::{FailureLogs, ProgressRenderer, RenderMode, summarize_error};
use tree::{ROOT_WORKFLOW, RunTree};

/// Bash program that loads the built module and calls its `default`
/// workflow. Positional parameters: built script, module symbol, then the
/// workflow arguments. Descriptor 3 duplicates stderr and carries events.
const LAUNCHER: &str = r#"built_script="$1"
shift
workflow_symbol="$1"
shift
exec 3>&2
export JAIPH_EVENT_FD=3
source "$built_script"
entrypoint="${workflow_symbol}__workflow_default"
if ! declare -F "$entrypoint" >/dev/null; then
  echo "jaiph run requires workflow 'default' in the input file" >&2
  exit 1
fi
if [[ "${JAIPH_DEBUG:-}" == "true" ]]; then
  set -x
fi
set +e
"$entrypoint" "$@"
status=$?
exit "$status"
"#;

const READ_CHUNK: usize = 8192;

/// Failures that stop a run before a workflow outcome exists.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Parsing, validation or build of the entry file failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The entry file declares no `default` workflow.
    #[error("jaiph run requires workflow 'default' in the input file")]
    MissingDefaultWorkflow,

    /// Building the entry file produced other than exactly one script.
    #[error("jaiph run expected one built output, got {0}")]
    UnexpectedBuildOutputs(usize),

    /// The entry path is a directory or has a foreign extension.
    #[error("jaiph run expects a single .jph file: {}", .0.display())]
    NotAFile(PathBuf),

    /// `bash` could not be started.
    #[error("failed to start bash: {0}")]
    Spawn(#[source] io::Error),

    /// Filesystem or terminal IO failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Inputs of one `jaiph run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Source file whose `default` workflow is run.
    pub entry: PathBuf,
    /// Build output directory; a temporary one is used when absent.
    pub target: Option<PathBuf>,
    /// Positional arguments for the workflow.
    pub args: Vec<String>,
}

/// Build and execute `options.entry`, rendering progress on the real
/// stdout/stderr. Returns the workflow's exit code.
pub async fn run(options: RunOptions) -> Result<i32, HarnessError> {
    let entry = normalize(&absolute(&options.entry));
    if !entry.is_file() || !is_source_file(&entry) {
        return Err(HarnessError::NotAFile(entry));
    }
    let entry_dir = entry.parent().map(Path::to_path_buf).unwrap_or_default();
    let workspace = detect_workspace_root(&entry_dir);
    let config = Config::load(&workspace);

    let module = parse_file(&entry)?;
    let tree = RunTree::from_module(&module);

    // Held until return so the scratch build is removed on every path.
    let (out_dir, scratch) = match &options.target {
        Some(target) => (normalize(&absolute(target)), None),
        None => {
            let dir = tempfile::Builder::new().prefix("jaiph-run-").tempdir()?;
            (dir.path().to_path_buf(), Some(dir))
        }
    };

    let outputs = build_with_imports(&entry, &out_dir)?;
    let [built] = outputs.as_slice() else {
        return Err(HarnessError::UnexpectedBuildOutputs(outputs.len()));
    };
    if module.workflow(ROOT_WORKFLOW).is_none() {
        return Err(HarnessError::MissingDefaultWorkflow);
    }
    let symbol = module_symbol(&entry, &entry_dir);

    let env_runs_dir = std::env::var("JAIPH_RUNS_DIR").ok();
    let logs_dir = config.resolve_logs_dir(&workspace, env_runs_dir.as_deref());
    let mut context = RunContext::create(&logs_dir)?;
    info!(
        run_id = %context.run_id,
        entry = %entry.display(),
        run_dir = %context.run_dir.display(),
        "starting run"
    );

    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(LAUNCHER)
        .arg("jaiph-run")
        .arg(&built.output_path)
        .arg(&symbol)
        .args(&options.args)
        .current_dir(&workspace)
        .envs(config.runtime_env(&workspace, |name| std::env::var(name).ok()))
        .envs(context.env())
        .env_remove("JAIPH_PRECEDING_FILES")
        .env_remove(EVENT_FD_VAR)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if std::env::var_os("JAIPH_STDLIB").is_none() {
        command.env("JAIPH_STDLIB", out_dir.join(STDLIB_FILE_NAME));
    }
    let isolation = resolve_isolation(std::env::var(ISOLATION_VAR).ok()).await?;
    command.env(ISOLATION_VAR, isolation.mode());

    let renderer = ProgressRenderer::new(io::stdout(), io::stderr(), RenderMode::detect());
    let mut session = RunSession::new(tree, renderer, symbol);
    session.renderer.start(&session.tree)?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let started = Instant::now();
    let mut child = command.spawn().map_err(HarnessError::Spawn)?;
    let group = ProcessGroup::from_pid(child.id());
    debug!(pid = ?child.id(), isolation = isolation.name(), "spawned workflow");
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(HarnessError::Io(io::Error::other("child stdio was not captured")));
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let grace = tokio::time::sleep(KILL_GRACE);
    tokio::pin!(grace);
    let mut grace_armed = false;

    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut status: Option<ExitStatus> = None;

    while status.is_none() || stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut out_buf), if stdout_open => match read {
                Ok(0) => stdout_open = false,
                Ok(n) => session.stdout_chunk(&out_buf[..n])?,
                Err(err) => {
                    warn!(error = %err, "stdout read failed");
                    stdout_open = false;
                }
            },
            read = stderr.read(&mut err_buf), if stderr_open => match read {
                Ok(0) => {
                    stderr_open = false;
                    session.stderr_closed(&mut context)?;
                }
                Ok(n) => session.stderr_chunk(&err_buf[..n], &mut context)?,
                Err(err) => {
                    warn!(error = %err, "stderr read failed");
                    stderr_open = false;
                }
            },
            waited = child.wait(), if status.is_none() => {
                let waited = waited?;
                debug!(status = ?waited, "child exited");
                status = Some(waited);
            },
            _ = ticker.tick(), if status.is_none() => session.tick()?,
            _ = sigint.recv() => {
                forward(group, Signal::Interrupt);
                grace.as_mut().reset(tokio::time::Instant::now() + KILL_GRACE);
                grace_armed = true;
            },
            _ = sigterm.recv() => {
                forward(group, Signal::Terminate);
                grace.as_mut().reset(tokio::time::Instant::now() + KILL_GRACE);
                grace_armed = true;
            },
            () = &mut grace, if grace_armed => {
                grace_armed = false;
                forward(group, Signal::Kill);
            },
        }
    }

    let Some(status) = status else {
        return Err(HarnessError::Io(io::Error::other("child exit status missing")));
    };
    if grace_armed {
        // The leader is gone; background jobs ignoring SIGINT may remain.
        forward(group, Signal::Kill);
    }
    let code = exit_code(status);
    let elapsed_ms = started.elapsed().as_millis();
    info!(run_id = %context.run_id, code, elapsed_ms, "run finished");
    session.conclude(code, status, elapsed_ms, &context)?;
    drop(scratch);
    Ok(code)
}

fn forward(group: Option<ProcessGroup>, signal: Signal) {
    let Some(group) = group else {
        return;
    };
    debug!(pgid = group.leader(), signal = signal.number(), "forwarding signal");
    if let Err(err) = group.signal(signal) {
        debug!(error = %err, "signal not delivered");
    }
}

/// Tree, renderer and captured diagnostics of one run.
struct RunSession {
    tree: RunTree,
    renderer: ProgressRenderer<Stdout, Stderr>,
    lines: LineBuffer,
    diagnostics: String,
    active_since: Instant,
    entry_symbol: String,
}

impl RunSession {
    fn new(
        tree: RunTree,
        renderer: ProgressRenderer<Stdout, Stderr>,
        entry_symbol: String,
    ) -> Self {
        Self {
            tree,
            renderer,
            lines: LineBuffer::new(),
            diagnostics: String::new(),
            active_since: Instant::now(),
            entry_symbol,
        }
    }

    fn running_secs(&self) -> u64 {
        self.active_since.elapsed().as_secs()
    }

    fn tick(&mut self) -> io::Result<()> {
        let secs = self.running_secs();
        self.renderer.tick(&self.tree, secs)
    }

    fn stdout_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let secs = self.running_secs();
        self.renderer.child_stdout(&self.tree, chunk, secs)
    }

    fn stderr_chunk(&mut self, chunk: &[u8], context: &mut RunContext) -> io::Result<()> {
        for line in self.lines.push(chunk) {
            self.stderr_line(&line, context)?;
        }
        Ok(())
    }

    fn stderr_closed(&mut self, context: &mut RunContext) -> io::Result<()> {
        match self.lines.finish() {
            Some(line) => self.stderr_line(&line, context),
            None => Ok(()),
        }
    }

    fn stderr_line(&mut self, line: &str, context: &mut RunContext) -> io::Result<()> {
        match parse_event(line) {
            Some(event) => self.step_event(&event, context),
            None => {
                self.diagnostics.push_str(line);
                self.diagnostics.push('\n');
                let secs = self.running_secs();
                self.renderer.diagnostic(&self.tree, line, secs)
            }
        }
    }

    fn step_event(&mut self, event: &StepEvent, context: &mut RunContext) -> io::Result<()> {
        context.record(event);
        if event.is_root(&self.entry_symbol) {
            return Ok(());
        }
        let (kind, name) = event.step();
        let Some(index) = self.tree.find_pending(kind, name) else {
            debug!(func = %event.func, "event has no pending row");
            return Ok(());
        };
        match event.phase {
            StepPhase::StepStart => {
                self.active_since = Instant::now();
                self.renderer.step_started(&self.tree, index)
            }
            StepPhase::StepEnd => {
                self.tree
                    .resolve(index, event.exit_status() == 0, event.elapsed_secs());
                self.renderer.step_finished(&self.tree, index)
            }
        }
    }

    fn conclude(
        &mut self,
        code: i32,
        status: ExitStatus,
        elapsed_ms: u128,
        context: &RunContext,
    ) -> io::Result<()> {
        use std::os::unix::process::ExitStatusExt;

        let success = code == 0;
        self.renderer.finish(&mut self.tree, success)?;
        if success {
            return self.renderer.pass(elapsed_ms);
        }
        let summary = match status.signal() {
            Some(signo) if self.diagnostics.trim().is_empty() => {
                format!("Process terminated by signal {signo}")
            }
            _ => summarize_error(&self.diagnostics),
        };
        let (out_file, err_file) = context.failure_files();
        let logs = FailureLogs {
            run_dir: &context.run_dir,
            out_file: out_file.as_deref(),
            err_file: err_file.as_deref(),
        };
        self.renderer.fail(elapsed_ms, &summary, Some(logs))
    }
}
