use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ast::{Function, Module, RefTarget, Reference, Rule, Step, Workflow};
use super::parser::parse_file;
use super::prompt::PromptLiteral;
use super::symbols::{
    absolute, import_source_path, module_symbol, normalize, resolve_import_path,
    stdlib_source_path,
};
use super::validator::validate;
use super::{CompileError, Result};

/// Parse, validate and translate `file` into shell. `root` is the compile
/// root that symbols and output paths are relative to.
pub fn transpile(file: &Path, root: &Path) -> Result<String> {
    let file = normalize(&absolute(file));
    let root = normalize(&absolute(root));
    let module = parse_file(&file)?;
    validate(&module)?;
    Generator::new(&module, &root).emit()
}

struct Generator<'m> {
    module: &'m Module,
    root: PathBuf,
    symbol: String,
    imported_symbols: HashMap<&'m str, String>,
    out: Vec<String>,
}

impl<'m> Generator<'m> {
    fn new(module: &'m Module, root: &Path) -> Self {
        let imported_symbols = module
            .imports
            .iter()
            .map(|import| {
                let path = resolve_import_path(&module.file_path, &import.path);
                (import.alias.as_str(), module_symbol(&path, root))
            })
            .collect();
        Self {
            module,
            root: root.to_path_buf(),
            symbol: module_symbol(&module.file_path, root),
            imported_symbols,
            out: Vec::new(),
        }
    }

    fn emit(mut self) -> Result<String> {
        let module = self.module;
        self.emit_header();
        for rule in &module.rules {
            self.emit_rule(rule);
        }
        for function in &module.functions {
            self.emit_function(function);
        }
        for workflow in &module.workflows {
            self.emit_workflow(workflow)?;
        }
        Ok(self.out.join("\n").trim_end().to_string())
    }

    fn emit_header(&mut self) {
        let module = self.module;
        let file = &module.file_path;
        let guard = load_guard(&self.symbol);
        self.push("set -euo pipefail");
        self.push(format!("if [[ -n \"${{{guard}:-}}\" ]]; then return 0; fi"));
        self.push(format!("{guard}=1"));
        self.push(format!(
            "source \"${{JAIPH_STDLIB:-$(dirname \"${{BASH_SOURCE[0]}}\")/{}}}\"",
            stdlib_source_path(file, &self.root)
        ));
        for import in &module.imports {
            let imported = resolve_import_path(file, &import.path);
            self.push(format!(
                "source \"$(dirname \"${{BASH_SOURCE[0]}}\")/{}\"",
                import_source_path(file, &imported, &self.root)
            ));
        }
        self.push("");
    }

    fn emit_rule(&mut self, rule: &Rule) {
        let symbol = format!("{}__rule_{}", self.symbol, rule.name);
        self.emit_comments(&rule.comments);
        self.emit_shell_impl(&symbol, &rule.commands);
        self.emit_wrapper(&symbol, Some("jaiph__execute_readonly"));
    }

    fn emit_function(&mut self, function: &Function) {
        let symbol = format!("{}__function_{}", self.symbol, function.name);
        self.emit_comments(&function.comments);
        self.emit_shell_impl(&symbol, &function.commands);
        self.emit_wrapper(&symbol, None);
        self.push(format!("{}() {{ {symbol} \"$@\"; }}", function.name));
        self.push("");
    }

    fn emit_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        let symbol = format!("{}__workflow_{}", self.symbol, workflow.name);
        self.emit_comments(&workflow.comments);
        self.push(format!("{symbol}__impl() {{"));
        if workflow.steps.is_empty() {
            self.push("  :");
        }
        for step in &workflow.steps {
            self.emit_step(step)?;
        }
        self.push("}");
        self.push("");
        self.emit_wrapper(&symbol, None);
        Ok(())
    }

    fn emit_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Ensure { rule, args } => {
                let call = self.reference(rule, "rule")?;
                match args {
                    Some(args) => self.push(format!("  {call} {args}")),
                    None => self.push(format!("  {call}")),
                }
            }
            Step::Run { workflow } => {
                let call = self.reference(workflow, "workflow")?;
                self.push(format!("  {call}"));
            }
            Step::Prompt { text, loc } => {
                let prompt = PromptLiteral::parse(text, &self.module.file_path, *loc)?;
                let body = prompt.heredoc_body();
                let delimiter = PromptLiteral::heredoc_delimiter(&body);
                self.push(format!("  jaiph__prompt <<{delimiter}"));
                if !body.is_empty() {
                    self.push(body);
                }
                self.push(delimiter);
            }
            Step::Shell { command, .. } => self.push(format!("  {command}")),
            Step::IfNotEnsureThenRun { rule, workflow } => {
                let check = self.reference(rule, "rule")?;
                let call = self.reference(workflow, "workflow")?;
                self.push(format!("  if ! {check}; then"));
                self.push(format!("    {call}"));
                self.push("  fi");
            }
            Step::IfNotEnsureThenShell { rule, commands } => {
                let check = self.reference(rule, "rule")?;
                self.push(format!("  if ! {check}; then"));
                if commands.is_empty() {
                    self.push("    :");
                }
                for line in commands {
                    self.push(format!("    {}", line.command));
                }
                self.push("  fi");
            }
        }
        Ok(())
    }

    fn emit_comments(&mut self, comments: &[String]) {
        for comment in comments {
            self.push(comment.clone());
        }
    }

    fn emit_shell_impl(&mut self, symbol: &str, commands: &[String]) {
        self.push(format!("{symbol}__impl() {{"));
        self.push("  set -eo pipefail");
        self.push("  set +u");
        if commands.is_empty() {
            self.push("  :");
        }
        for command in commands {
            self.push(format!("  {command}"));
        }
        self.push("}");
        self.push("");
    }

    fn emit_wrapper(&mut self, symbol: &str, sandbox: Option<&str>) {
        let runner = match sandbox {
            Some(sandbox) => format!("{symbol} {sandbox} {symbol}__impl"),
            None => format!("{symbol} {symbol}__impl"),
        };
        self.push(format!("{symbol}() {{"));
        self.push(format!("  jaiph__run_step {runner} \"$@\""));
        self.push("}");
        self.push("");
    }

    fn reference(&self, reference: &Reference, kind: &'static str) -> Result<String> {
        match reference.target() {
            Some(RefTarget::Local(name)) => Ok(format!("{}__{kind}_{name}", self.symbol)),
            Some(RefTarget::Imported { alias, name }) => {
                let prefix = self
                    .imported_symbols
                    .get(alias)
                    .map_or(alias, String::as_str);
                Ok(format!("{prefix}__{kind}_{name}"))
            }
            None => Err(CompileError::InvalidReference {
                kind,
                reference: reference.value.clone(),
            }),
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }
}

/// Shell variable marking a module as sourced, so cyclic imports stop
/// after the first pass.
fn load_guard(symbol: &str) -> String {
    let name: String = symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("__jaiph_loaded_{name}")
}
