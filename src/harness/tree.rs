use std::collections::HashSet;
use std::fmt;

use crate::compiler::{Module, Step};

/// Name of the entry workflow every run starts from.
pub const ROOT_WORKFLOW: &str = "default";

const BRANCH_MIDDLE: &str = "├── ";
const BRANCH_LAST: &str = "└── ";
const INDENT_OPEN: &str = "│   ";
const INDENT_CLOSED: &str = "    ";

/// What a tree row stands for; matches the `kind` of step events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// A workflow invocation.
    Workflow,
    /// A rule check.
    Rule,
    /// A call to a declared function from a shell line.
    Function,
    /// A prompt sent to the agent.
    Prompt,
    /// Anything else the runtime reports.
    Step,
}

impl RowKind {
    /// Keyword shown in front of the row name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Rule => "rule",
            Self::Function => "function",
            Self::Prompt => "prompt",
            Self::Step => "step",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// Not reported yet.
    Pending,
    /// Finished with status 0.
    Done,
    /// Finished with a non-zero status.
    Failed,
}

/// One static line of the run tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    /// Row kind.
    pub kind: RowKind,
    /// Reference text as written (`name` or `alias.name`).
    pub name: String,
    /// Indentation inherited from ancestors.
    pub prefix: String,
    /// Branch glyph; `None` for the root.
    pub branch: Option<&'static str>,
    /// True only for the first row.
    pub is_root: bool,
}

impl TreeRow {
    /// `kind name`
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.name)
    }
}

/// Mutable state attached to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowState {
    /// Current status.
    pub status: RowStatus,
    /// Whole seconds the step took, once known.
    pub elapsed_secs: Option<u64>,
}

/// Static expansion of the `default` workflow plus per-row status.
#[derive(Debug, Clone)]
pub struct RunTree {
    rows: Vec<TreeRow>,
    states: Vec<RowState>,
}

struct Child<'m> {
    kind: RowKind,
    name: &'m str,
    nested: Option<&'m str>,
}

impl RunTree {
    /// Expand `default` depth-first. Local workflows are expanded once;
    /// imported (`alias.name`) workflows are shown but never expanded.
    pub fn from_module(module: &Module) -> Self {
        let mut rows = vec![TreeRow {
            kind: RowKind::Workflow,
            name: ROOT_WORKFLOW.to_string(),
            prefix: String::new(),
            branch: None,
            is_root: true,
        }];
        let mut visited: HashSet<&str> = HashSet::from([ROOT_WORKFLOW]);
        expand(module, ROOT_WORKFLOW, "", &mut visited, &mut rows);

        let states = rows
            .iter()
            .map(|row| RowState {
                status: if row.is_root {
                    RowStatus::Done
                } else {
                    RowStatus::Pending
                },
                elapsed_secs: None,
            })
            .collect();
        Self { rows, states }
    }

    /// All rows, root first.
    pub fn rows(&self) -> &[TreeRow] {
        &self.rows
    }

    /// Row at `index`.
    pub fn row(&self, index: usize) -> &TreeRow {
        &self.rows[index]
    }

    /// State of the row at `index`.
    pub fn state(&self, index: usize) -> RowState {
        self.states[index]
    }

    /// Number of rows including the root.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows; never the case for a built tree.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First pending non-root row, in declaration order, whose kind matches
    /// and whose name is `name` or ends with `.name`.
    ///
    /// Repeated calls to the same step therefore fill rows in order.
    pub fn find_pending(&self, kind: RowKind, name: &str) -> Option<usize> {
        let suffix = format!(".{name}");
        (1..self.rows.len()).find(|&index| {
            let row = &self.rows[index];
            self.states[index].status == RowStatus::Pending
                && row.kind == kind
                && (row.name == name || row.name.ends_with(&suffix))
        })
    }

    /// Record the outcome of the row at `index`.
    pub fn resolve(&mut self, index: usize, success: bool, elapsed_secs: u64) {
        self.states[index] = RowState {
            status: if success {
                RowStatus::Done
            } else {
                RowStatus::Failed
            },
            elapsed_secs: Some(elapsed_secs),
        };
    }

    /// Mark every still-pending row at or after `from` with the run's final
    /// outcome and zero elapsed time.
    pub fn reconcile(&mut self, from: usize, success: bool) {
        for index in from.max(1)..self.rows.len() {
            if self.states[index].status == RowStatus::Pending {
                self.resolve(index, success, 0);
            }
        }
    }
}

fn expand<'m>(
    module: &'m Module,
    workflow: &str,
    prefix: &str,
    visited: &mut HashSet<&'m str>,
    rows: &mut Vec<TreeRow>,
) {
    let children = children_of(module, workflow);
    let count = children.len();
    for (position, child) in children.into_iter().enumerate() {
        let is_last = position + 1 == count;
        rows.push(TreeRow {
            kind: child.kind,
            name: child.name.to_string(),
            prefix: prefix.to_string(),
            branch: Some(if is_last { BRANCH_LAST } else { BRANCH_MIDDLE }),
            is_root: false,
        });
        let Some(nested) = child.nested else {
            continue;
        };
        if nested.contains('.') || !visited.insert(nested) {
            continue;
        }
        let indent = if is_last { INDENT_CLOSED } else { INDENT_OPEN };
        expand(module, nested, &format!("{prefix}{indent}"), visited, rows);
    }
}

fn children_of<'m>(module: &'m Module, workflow: &str) -> Vec<Child<'m>> {
    let Some(workflow) = module.workflow(workflow) else {
        return Vec::new();
    };
    let mut children = Vec::new();
    for step in &workflow.steps {
        match step {
            Step::Ensure { rule, .. } | Step::IfNotEnsureThenShell { rule, .. } => {
                children.push(Child {
                    kind: RowKind::Rule,
                    name: &rule.value,
                    nested: None,
                });
            }
            Step::Run { workflow } => children.push(Child {
                kind: RowKind::Workflow,
                name: &workflow.value,
                nested: Some(&workflow.value),
            }),
            Step::IfNotEnsureThenRun { rule, workflow } => {
                children.push(Child {
                    kind: RowKind::Rule,
                    name: &rule.value,
                    nested: None,
                });
                children.push(Child {
                    kind: RowKind::Workflow,
                    name: &workflow.value,
                    nested: Some(&workflow.value),
                });
            }
            Step::Prompt { .. } => children.push(Child {
                kind: RowKind::Prompt,
                name: "prompt",
                nested: None,
            }),
            Step::Shell { command, .. } => {
                for function in &module.functions {
                    if calls_function(command, &function.name) {
                        children.push(Child {
                            kind: RowKind::Function,
                            name: &function.name,
                            nested: None,
                        });
                    }
                }
            }
        }
    }
    children
}

/// True when `name` appears in `command` as a whole word that is followed
/// by whitespace, `)` or the end of the line.
fn calls_function(command: &str, name: &str) -> bool {
    command.match_indices(name).any(|(start, _)| {
        let before_ok = command[..start]
            .chars()
            .next_back()
            .is_none_or(|ch| !(ch == '_' || ch.is_ascii_alphanumeric()));
        let after_ok = command[start + name.len()..]
            .chars()
            .next()
            .is_none_or(|ch| ch.is_whitespace() || ch == ')');
        before_ok && after_ok
    })
}
