use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 1-based line/column position inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    /// Line number, starting at 1.
    pub line: usize,
    /// Column number, starting at 1.
    pub col: usize,
}

impl SourceLoc {
    /// Construct a location from a line/column pair.
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// `import "<path>" as <alias>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    /// Path exactly as written, quotes removed.
    pub path: String,
    /// Alias used by two-part references.
    pub alias: String,
    /// Location of the `import` keyword.
    pub loc: SourceLoc,
}

/// A `name` or `alias.name` reference to a rule or workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Reference text as written.
    pub value: String,
    /// Location of the statement keyword that carries the reference.
    pub loc: SourceLoc,
}

/// Reference to a rule (`ensure` target).
pub type RuleRef = Reference;
/// Reference to a workflow (`run` target).
pub type WorkflowRef = Reference;

/// Split form of a well-formed [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget<'a> {
    /// Entity declared in the same module.
    Local(&'a str),
    /// Entity declared in the module imported under `alias`.
    Imported {
        /// Import alias.
        alias: &'a str,
        /// Entity name inside the imported module.
        name: &'a str,
    },
}

impl Reference {
    /// Construct a reference.
    pub fn new(value: impl Into<String>, loc: SourceLoc) -> Self {
        Self {
            value: value.into(),
            loc,
        }
    }

    /// Split on the dot. Returns `None` for anything with more than one dot
    /// or empty parts.
    pub fn target(&self) -> Option<RefTarget<'_>> {
        let mut parts = self.value.split('.');
        let first = parts.next().filter(|part| !part.is_empty())?;
        match (parts.next(), parts.next()) {
            (None, _) => Some(RefTarget::Local(first)),
            (Some(name), None) if !name.is_empty() => Some(RefTarget::Imported {
                alias: first,
                name,
            }),
            _ => None,
        }
    }
}

/// A `rule` block: an idempotent precondition check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name.
    pub name: String,
    /// Comment lines directly above the declaration.
    pub comments: Vec<String>,
    /// Body lines, trimmed.
    pub commands: Vec<String>,
    /// Location of the declaration line.
    pub loc: SourceLoc,
}

/// A `function` block: a reusable shell snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Comment lines directly above the declaration.
    pub comments: Vec<String>,
    /// Body lines, trimmed, with any `run ` prefix removed.
    pub commands: Vec<String>,
    /// Location of the declaration line.
    pub loc: SourceLoc,
}

/// A single shell line captured inside an `if ! ensure` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellLine {
    /// Trimmed command text.
    pub command: String,
    /// Location of the first non-blank character.
    pub loc: SourceLoc,
}

/// One instruction inside a workflow body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// `ensure <ref> [args]`
    Ensure {
        /// Rule to invoke.
        rule: RuleRef,
        /// Raw argument text forwarded verbatim.
        args: Option<String>,
    },
    /// `run <ref>`
    Run {
        /// Workflow to invoke.
        workflow: WorkflowRef,
    },
    /// `prompt "<text>"`
    Prompt {
        /// Literal text between the quotes, escapes still encoded.
        text: String,
        /// Location of the `prompt` keyword.
        loc: SourceLoc,
    },
    /// Any other line, passed through verbatim.
    Shell {
        /// Trimmed command text.
        command: String,
        /// Location of the line.
        loc: SourceLoc,
    },
    /// `if ! ensure <rule>; then run <workflow> fi`
    IfNotEnsureThenRun {
        /// Rule checked first.
        rule: RuleRef,
        /// Workflow run when the rule fails.
        workflow: WorkflowRef,
    },
    /// `if ! ensure <rule>; then <shell...> fi`
    IfNotEnsureThenShell {
        /// Rule checked first.
        rule: RuleRef,
        /// Shell lines run when the rule fails.
        commands: Vec<ShellLine>,
    },
}

/// A `workflow` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name.
    pub name: String,
    /// Comment lines directly above the declaration.
    pub comments: Vec<String>,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Location of the declaration line.
    pub loc: SourceLoc,
}

/// A parsed source file. Identity is its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Path the module was parsed from.
    pub file_path: PathBuf,
    /// Imports in declaration order.
    pub imports: Vec<Import>,
    /// Names declared with `export`. Recorded only; never enforced.
    pub exports: Vec<String>,
    /// Rules in declaration order.
    pub rules: Vec<Rule>,
    /// Functions in declaration order.
    pub functions: Vec<Function>,
    /// Workflows in declaration order.
    pub workflows: Vec<Workflow>,
}

impl Module {
    /// Empty module for `file_path`.
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            imports: Vec::new(),
            exports: Vec::new(),
            rules: Vec::new(),
            functions: Vec::new(),
            workflows: Vec::new(),
        }
    }

    /// Look up a workflow by name.
    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|workflow| workflow.name == name)
    }

    /// True when a rule called `name` is declared here.
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.name == name)
    }

    /// True when a workflow called `name` is declared here.
    pub fn has_workflow(&self, name: &str) -> bool {
        self.workflow(name).is_some()
    }
}

/// Valid identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

/// Valid reference: an identifier, optionally qualified by one alias.
pub fn is_reference(text: &str) -> bool {
    match text.split_once('.') {
        None => is_identifier(text),
        Some((alias, name)) => is_identifier(alias) && is_identifier(name),
    }
}
