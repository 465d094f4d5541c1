use std::io::{self, Write};
use std::path::Path;

use super::tree::{RowStatus, RunTree, TreeRow};

const CLEAR_LINE: &str = "\r\x1b[2K";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// How progress is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderMode {
    /// Redraw a single running line in place (stdout is a terminal).
    pub interactive: bool,
    /// Emit ANSI styling.
    pub color: bool,
}

impl RenderMode {
    /// Interactive when stdout is a terminal; colored when it is one and
    /// `NO_COLOR` is unset.
    pub fn detect() -> Self {
        use std::io::IsTerminal;
        let interactive = io::stdout().is_terminal();
        Self {
            interactive,
            color: interactive && std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

/// Where the failure report points at.
#[derive(Debug, Clone, Copy)]
pub struct FailureLogs<'a> {
    /// Run log directory.
    pub run_dir: &'a Path,
    /// Most recent step stdout capture.
    pub out_file: Option<&'a Path>,
    /// Most recent step stderr capture.
    pub err_file: Option<&'a Path>,
}

/// Draws the run tree and the final banner.
///
/// In interactive mode exactly one row is "active": it is drawn as a
/// running line that is rewritten in place and committed once the row
/// resolves. Otherwise each resolved row is printed once, in event order.
pub struct ProgressRenderer<O: Write, E: Write> {
    out: O,
    err: E,
    mode: RenderMode,
    active: Option<usize>,
}

impl<O: Write, E: Write> ProgressRenderer<O, E> {
    /// Renderer over the given streams.
    pub fn new(out: O, err: E, mode: RenderMode) -> Self {
        Self {
            out,
            err,
            mode,
            active: None,
        }
    }

    /// Index of the row drawn as running, if any.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Print the root label and, interactively, the first running row.
    pub fn start(&mut self, tree: &RunTree) -> io::Result<()> {
        let root = self.label(tree.row(0));
        writeln!(self.out, "{root}")?;
        if self.mode.interactive && tree.len() > 1 {
            self.active = Some(1);
            self.draw_running(tree, 0)?;
        }
        self.out.flush()
    }

    /// A step started: make its row the active one.
    pub fn step_started(&mut self, tree: &RunTree, index: usize) -> io::Result<()> {
        if !self.mode.interactive {
            return Ok(());
        }
        self.active = Some(index);
        self.draw_running(tree, 0)?;
        self.out.flush()
    }

    /// The row at `index` was just resolved.
    pub fn step_finished(&mut self, tree: &RunTree, index: usize) -> io::Result<()> {
        if self.mode.interactive {
            self.commit_resolved(tree)?;
        } else {
            let line = self.completed_line(tree, index, true);
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }

    /// Redraw the running counter.
    pub fn tick(&mut self, tree: &RunTree, running_secs: u64) -> io::Result<()> {
        if self.mode.interactive && self.active.is_some() {
            self.draw_running(tree, running_secs)?;
            self.out.flush()?;
        }
        Ok(())
    }

    /// Forward a chunk of the child's stdout.
    pub fn child_stdout(&mut self, tree: &RunTree, chunk: &[u8], running_secs: u64) -> io::Result<()> {
        if self.mode.interactive {
            write!(self.out, "{CLEAR_LINE}")?;
        }
        self.out.write_all(chunk)?;
        self.redraw(tree, running_secs)
    }

    /// Forward a non-event diagnostic line to stderr.
    pub fn diagnostic(&mut self, tree: &RunTree, line: &str, running_secs: u64) -> io::Result<()> {
        if self.mode.interactive {
            write!(self.out, "{CLEAR_LINE}\n")?;
            self.out.flush()?;
        }
        writeln!(self.err, "{line}")?;
        self.err.flush()?;
        self.redraw(tree, running_secs)
    }

    /// Settle the tree after the child exited: pending rows take the final
    /// outcome and, interactively, every remaining row is committed.
    pub fn finish(&mut self, tree: &mut RunTree, success: bool) -> io::Result<()> {
        if !self.mode.interactive {
            tree.reconcile(1, success);
            return Ok(());
        }
        let Some(from) = self.active.take() else {
            return Ok(());
        };
        tree.reconcile(from, success);
        for index in from..tree.len() {
            let line = self.completed_line(tree, index, false);
            write!(self.out, "{CLEAR_LINE}{line}\n")?;
        }
        self.out.flush()
    }

    /// `✓ PASS workflow default (Nms)` on stdout.
    pub fn pass(&mut self, elapsed_ms: u128) -> io::Result<()> {
        let (green, dim, reset) = self.palette(GREEN);
        writeln!(
            self.out,
            "{green}✓ PASS{reset} workflow default {dim}({elapsed_ms}ms){reset}"
        )?;
        self.out.flush()
    }

    /// `✗ FAIL workflow default (Nms)` plus summary and log pointers on
    /// stderr.
    pub fn fail(
        &mut self,
        elapsed_ms: u128,
        summary: &str,
        logs: Option<FailureLogs<'_>>,
    ) -> io::Result<()> {
        let (red, dim, reset) = self.palette(RED);
        writeln!(
            self.err,
            "{red}✗ FAIL{reset} workflow default {dim}({elapsed_ms}ms){reset}"
        )?;
        writeln!(self.err, "  {summary}")?;
        if let Some(logs) = logs {
            writeln!(self.err, "  Logs: {}", logs.run_dir.display())?;
            if let Some(out_file) = logs.out_file {
                writeln!(self.err, "    out: {}", out_file.display())?;
            }
            if let Some(err_file) = logs.err_file {
                writeln!(self.err, "    err: {}", err_file.display())?;
            }
        }
        self.err.flush()
    }

    /// Consume the renderer, returning the streams.
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    /// Commit the active row while it is resolved, advancing to the next.
    fn commit_resolved(&mut self, tree: &RunTree) -> io::Result<()> {
        while let Some(index) = self.active {
            if tree.state(index).status == RowStatus::Pending {
                break;
            }
            let line = self.completed_line(tree, index, false);
            write!(self.out, "{CLEAR_LINE}{line}\n")?;
            let next = index + 1;
            if next >= tree.len() {
                self.active = None;
            } else {
                self.active = Some(next);
                self.draw_running(tree, 0)?;
            }
        }
        Ok(())
    }

    fn redraw(&mut self, tree: &RunTree, running_secs: u64) -> io::Result<()> {
        if self.mode.interactive && self.active.is_some() {
            self.draw_running(tree, running_secs)?;
        }
        self.out.flush()
    }

    fn draw_running(&mut self, tree: &RunTree, seconds: u64) -> io::Result<()> {
        let Some(index) = self.active else {
            return Ok(());
        };
        let row = tree.row(index);
        let label = self.label(row);
        let suffix = self.dim(&format!("(running {seconds}s)"));
        write!(self.out, "{CLEAR_LINE}{}└── {label} {suffix}", row.prefix)
    }

    /// Interactive lines always use the middle branch; the static tree
    /// branch is used when `own_branch` is set.
    fn completed_line(&self, tree: &RunTree, index: usize, own_branch: bool) -> String {
        let row = tree.row(index);
        let state = tree.state(index);
        let seconds = state.elapsed_secs.unwrap_or(0);
        let branch = if own_branch {
            row.branch.unwrap_or("")
        } else {
            "├── "
        };
        let suffix = if own_branch && state.status == RowStatus::Failed {
            format!("({seconds}s failed)")
        } else {
            format!("({seconds}s)")
        };
        format!("{}{branch}{} {}", row.prefix, self.label(row), self.dim(&suffix))
    }

    fn label(&self, row: &TreeRow) -> String {
        if self.mode.color {
            format!("{BOLD}{}{RESET} {}", row.kind, row.name)
        } else {
            row.label()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.mode.color {
            format!("{DIM}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn palette(&self, accent: &'static str) -> (&'static str, &'static str, &'static str) {
        if self.mode.color {
            (accent, DIM, RESET)
        } else {
            ("", "", "")
        }
    }
}

/// Last non-blank stderr line, or a generic message.
pub fn summarize_error(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("Workflow execution failed.")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse_module;

    const PLAIN: RenderMode = RenderMode {
        interactive: false,
        color: false,
    };
    const LIVE: RenderMode = RenderMode {
        interactive: true,
        color: false,
    };

    fn tree() -> RunTree {
        let src = "workflow default {\n  ensure a\n  run sub\n}\nworkflow sub {\n  ensure b\n}\n";
        RunTree::from_module(&parse_module(src, "t.jph").expect("parse"))
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn non_interactive_prints_rows_in_event_order() {
        let mut tree = tree();
        let mut renderer = ProgressRenderer::new(Vec::new(), Vec::new(), PLAIN);
        renderer.start(&tree).expect("start");
        tree.resolve(3, true, 1);
        renderer.step_finished(&tree, 3).expect("b");
        tree.resolve(1, false, 4);
        renderer.step_finished(&tree, 1).expect("a");
        let (out, _) = renderer.into_inner();
        assert_eq!(
            text(out),
            "workflow default\n    └── rule b (1s)\n├── rule a (4s failed)\n"
        );
    }

    #[test]
    fn interactive_commits_in_declaration_order() {
        let mut tree = tree();
        let mut renderer = ProgressRenderer::new(Vec::new(), Vec::new(), LIVE);
        renderer.start(&tree).expect("start");
        assert_eq!(renderer.active(), Some(1));
        tree.resolve(1, true, 2);
        renderer.step_finished(&tree, 1).expect("a");
        assert_eq!(renderer.active(), Some(2));
        renderer.finish(&mut tree, true).expect("finish");
        let (out, _) = renderer.into_inner();
        let out = text(out);
        assert!(out.starts_with("workflow default\n\r\x1b[2K└── rule a (running 0s)"));
        assert!(out.contains("\r\x1b[2K├── rule a (2s)\n"));
        assert!(out.contains("\r\x1b[2K└── workflow sub (running 0s)"));
        assert!(out.ends_with("\r\x1b[2K├── workflow sub (0s)\n\r\x1b[2K    ├── rule b (0s)\n"));
    }

    #[test]
    fn diagnostics_go_to_stderr() {
        let tree = tree();
        let mut renderer = ProgressRenderer::new(Vec::new(), Vec::new(), PLAIN);
        renderer.diagnostic(&tree, "warning: x", 0).expect("diag");
        renderer.child_stdout(&tree, b"hello\n", 0).expect("stdout");
        let (out, err) = renderer.into_inner();
        assert_eq!(text(out), "hello\n");
        assert_eq!(text(err), "warning: x\n");
    }

    #[test]
    fn banners() {
        let mut renderer = ProgressRenderer::new(Vec::new(), Vec::new(), PLAIN);
        renderer.pass(12).expect("pass");
        renderer
            .fail(
                40,
                "boom",
                Some(FailureLogs {
                    run_dir: Path::new("/runs/x"),
                    out_file: Some(Path::new("/runs/x/1.out")),
                    err_file: None,
                }),
            )
            .expect("fail");
        let (out, err) = renderer.into_inner();
        assert_eq!(text(out), "✓ PASS workflow default (12ms)\n");
        assert_eq!(
            text(err),
            "✗ FAIL workflow default (40ms)\n  boom\n  Logs: /runs/x\n    out: /runs/x/1.out\n"
        );
    }

    #[test]
    fn colored_labels_bold_the_kind() {
        let tree = tree();
        let mode = RenderMode {
            interactive: false,
            color: true,
        };
        let mut renderer = ProgressRenderer::new(Vec::new(), Vec::new(), mode);
        renderer.start(&tree).expect("start");
        let (out, _) = renderer.into_inner();
        assert_eq!(text(out), "\x1b[1mworkflow\x1b[0m default\n");
    }

    #[test]
    fn summary_uses_last_non_blank_line() {
        assert_eq!(summarize_error("a\n  b  \n\n"), "b");
        assert_eq!(summarize_error(" \n"), "Workflow execution failed.");
    }
}
