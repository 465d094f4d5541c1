use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::debug;

use super::ast::{Module, RefTarget, Reference, Step};
use super::parser::parse_file;
use super::symbols::resolve_import_path;
use super::{CompileError, ErrorCode, Result};

#[derive(Clone, Copy)]
enum RefKind {
    Rule,
    Workflow,
}

impl RefKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Workflow => "workflow",
        }
    }
}

/// Check imports and every rule/workflow reference in `module`.
///
/// Imported files are parsed but not validated themselves, so checking
/// reaches exactly one level deep.
pub fn validate(module: &Module) -> Result<()> {
    Scope::load(module)?.check_steps()
}

/// Names visible from one module.
struct Scope<'m> {
    module: &'m Module,
    local_rules: HashSet<&'m str>,
    local_workflows: HashSet<&'m str>,
    imports: HashMap<&'m str, Module>,
}

impl<'m> Scope<'m> {
    fn load(module: &'m Module) -> Result<Self> {
        let mut imports: HashMap<&str, Module> = HashMap::new();
        let mut resolved_paths: HashMap<PathBuf, Module> = HashMap::new();

        for import in &module.imports {
            if imports.contains_key(import.alias.as_str()) {
                return Err(CompileError::located(
                    module.file_path.clone(),
                    import.loc,
                    ErrorCode::Validate,
                    format!("duplicate import alias \"{}\"", import.alias),
                ));
            }
            let resolved = resolve_import_path(&module.file_path, &import.path);
            if !resolved.is_file() {
                return Err(CompileError::located(
                    module.file_path.clone(),
                    import.loc,
                    ErrorCode::ImportNotFound,
                    format!(
                        "import \"{}\" resolves to missing file \"{}\"",
                        import.alias,
                        resolved.display()
                    ),
                ));
            }
            let imported = match resolved_paths.get(&resolved) {
                Some(cached) => cached.clone(),
                None => {
                    debug!(alias = %import.alias, path = %resolved.display(), "parsing import");
                    let parsed = parse_file(&resolved)?;
                    resolved_paths.insert(resolved, parsed.clone());
                    parsed
                }
            };
            imports.insert(import.alias.as_str(), imported);
        }

        Ok(Self {
            module,
            local_rules: module.rules.iter().map(|rule| rule.name.as_str()).collect(),
            local_workflows: module
                .workflows
                .iter()
                .map(|workflow| workflow.name.as_str())
                .collect(),
            imports,
        })
    }

    fn check_steps(&self) -> Result<()> {
        for workflow in &self.module.workflows {
            for step in &workflow.steps {
                match step {
                    Step::Ensure { rule, .. } => self.check(rule, RefKind::Rule)?,
                    Step::Run { workflow } => self.check(workflow, RefKind::Workflow)?,
                    Step::IfNotEnsureThenRun { rule, workflow } => {
                        self.check(rule, RefKind::Rule)?;
                        self.check(workflow, RefKind::Workflow)?;
                    }
                    Step::IfNotEnsureThenShell { rule, .. } => self.check(rule, RefKind::Rule)?,
                    Step::Prompt { .. } | Step::Shell { .. } => {}
                }
            }
        }
        Ok(())
    }

    fn check(&self, reference: &Reference, kind: RefKind) -> Result<()> {
        let kind_name = kind.as_str();
        match reference.target() {
            None => Err(self.error(
                reference,
                format!("invalid {kind_name} reference \"{}\"", reference.value),
            )),
            Some(RefTarget::Local(name)) => {
                let known = match kind {
                    RefKind::Rule => self.local_rules.contains(name),
                    RefKind::Workflow => self.local_workflows.contains(name),
                };
                if known {
                    Ok(())
                } else {
                    Err(self.error(
                        reference,
                        format!("unknown local {kind_name} reference \"{}\"", reference.value),
                    ))
                }
            }
            Some(RefTarget::Imported { alias, name }) => {
                let Some(imported) = self.imports.get(alias) else {
                    return Err(self.error(
                        reference,
                        format!(
                            "unknown import alias \"{alias}\" for {kind_name} reference \"{}\"",
                            reference.value
                        ),
                    ));
                };
                let exists = match kind {
                    RefKind::Rule => imported.has_rule(name),
                    RefKind::Workflow => imported.has_workflow(name),
                };
                if exists {
                    Ok(())
                } else {
                    Err(self.error(
                        reference,
                        format!("imported {kind_name} \"{}\" does not exist", reference.value),
                    ))
                }
            }
        }
    }

    fn error(&self, reference: &Reference, message: String) -> CompileError {
        CompileError::located(
            self.module.file_path.clone(),
            reference.loc,
            ErrorCode::Validate,
            message,
        )
    }
}
