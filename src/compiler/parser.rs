use std::path::{Path, PathBuf};

use super::ast::{
    Function, Import, Module, Reference, Rule, ShellLine, SourceLoc, Step, Workflow,
    is_identifier, is_reference,
};
use super::{CompileError, ErrorCode, Result};

const RULE_RUN_MESSAGE: &str = "`run` is not allowed inside a `rule` block.\nUse `ensure` to call another rule, or move this call to a `workflow`.";

/// Read and parse a source file from disk.
pub fn parse_file(path: &Path) -> Result<Module> {
    let source = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_module(&source, path)
}

/// Parse DSL source text into a [`Module`].
///
/// `file_path` is recorded on the module and used in error messages; it is
/// never read.
pub fn parse_module(source: &str, file_path: impl AsRef<Path>) -> Result<Module> {
    Parser::new(source, file_path.as_ref()).parse()
}

/// Line cursor over the source. Block scanners take the index of their
/// opening line and return the index of the first line after the block.
struct Parser<'a> {
    file: PathBuf,
    lines: Vec<&'a str>,
}

type Scanned<T> = Result<(usize, T)>;

impl<'a> Parser<'a> {
    fn new(source: &'a str, file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            lines: source.lines().collect(),
        }
    }

    fn parse(self) -> Result<Module> {
        let mut module = Module::new(self.file.clone());
        let mut pending_comments: Vec<String> = Vec::new();
        let mut cursor = 0;

        while cursor < self.lines.len() {
            let raw = self.lines[cursor];
            let line = raw.trim();

            if line.is_empty() {
                pending_comments.clear();
                cursor += 1;
                continue;
            }
            if cursor == 0 && line.starts_with("#!") {
                cursor += 1;
                continue;
            }
            if line.starts_with('#') {
                pending_comments.push(line.to_string());
                cursor += 1;
                continue;
            }
            if strip_keyword(line, "import").is_some() {
                pending_comments.clear();
                module.imports.push(self.parse_import(cursor)?);
                cursor += 1;
                continue;
            }

            let (exported, decl) = match strip_keyword(line, "export") {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let keyword = decl.split_whitespace().next().unwrap_or_default();

            match keyword {
                "rule" => {
                    let name = declaration_name(decl, "rule", false)
                        .ok_or_else(|| self.error(cursor, 1, "invalid rule declaration"))?;
                    let (next, mut rule) = self.parse_rule(cursor, name)?;
                    rule.comments = std::mem::take(&mut pending_comments);
                    if exported {
                        module.exports.push(rule.name.clone());
                    }
                    module.rules.push(rule);
                    cursor = next;
                }
                "function" => {
                    let name = declaration_name(decl, "function", true)
                        .filter(|_| !exported)
                        .ok_or_else(|| self.error(cursor, 1, "invalid function declaration"))?;
                    let (next, mut function) = self.parse_function(cursor, name)?;
                    function.comments = std::mem::take(&mut pending_comments);
                    module.functions.push(function);
                    cursor = next;
                }
                "workflow" => {
                    let name = declaration_name(decl, "workflow", false)
                        .ok_or_else(|| self.error(cursor, 1, "invalid workflow declaration"))?;
                    let (next, mut workflow) = self.parse_workflow(cursor, name)?;
                    workflow.comments = std::mem::take(&mut pending_comments);
                    if exported {
                        module.exports.push(workflow.name.clone());
                    }
                    module.workflows.push(workflow);
                    cursor = next;
                }
                _ => {
                    return Err(self.error(
                        cursor,
                        1,
                        format!("unsupported top-level statement: {line}"),
                    ));
                }
            }
        }

        Ok(module)
    }

    fn parse_import(&self, index: usize) -> Result<Import> {
        let raw = self.lines[index];
        let invalid = || self.error(index, 1, "import must match: import \"<path>\" as <alias>");

        let rest = strip_keyword(raw.trim(), "import").ok_or_else(invalid)?;
        let (head, alias) = rest.rsplit_once(char::is_whitespace).ok_or_else(invalid)?;
        let path = head
            .trim_end()
            .strip_suffix("as")
            .filter(|path| path.ends_with(char::is_whitespace))
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .ok_or_else(invalid)?;
        if !is_identifier(alias) {
            return Err(invalid());
        }

        Ok(Import {
            path: strip_quotes(path).to_string(),
            alias: alias.to_string(),
            loc: SourceLoc::new(index + 1, keyword_col(raw, "import")),
        })
    }

    fn parse_rule(&self, start: usize, name: String) -> Scanned<Rule> {
        let mut rule = Rule {
            name,
            comments: Vec::new(),
            commands: Vec::new(),
            loc: SourceLoc::new(start + 1, 1),
        };

        for index in start + 1..self.lines.len() {
            let raw = self.lines[index];
            let inner = raw.trim();
            if inner.is_empty() {
                continue;
            }
            if inner == "}" {
                return Ok((index + 1, rule));
            }
            if !inner.starts_with('#') && strip_keyword(inner, "run").is_some() {
                return Err(self.error(index, keyword_col(raw, "run"), RULE_RUN_MESSAGE));
            }
            rule.commands.push(inner.to_string());
        }

        Err(self.error(
            start,
            1,
            format!("unterminated rule block: {}", rule.name),
        ))
    }

    fn parse_function(&self, start: usize, name: String) -> Scanned<Function> {
        let mut function = Function {
            name,
            comments: Vec::new(),
            commands: Vec::new(),
            loc: SourceLoc::new(start + 1, 1),
        };

        for index in start + 1..self.lines.len() {
            let inner = self.lines[index].trim();
            if inner.is_empty() {
                continue;
            }
            if inner == "}" {
                return Ok((index + 1, function));
            }
            let command = if inner.starts_with('#') {
                inner
            } else {
                strip_keyword(inner, "run").unwrap_or(inner)
            };
            function.commands.push(command.to_string());
        }

        Err(self.error(
            start,
            1,
            format!("unterminated function block: {}", function.name),
        ))
    }

    fn parse_workflow(&self, start: usize, name: String) -> Scanned<Workflow> {
        let mut workflow = Workflow {
            name,
            comments: Vec::new(),
            steps: Vec::new(),
            loc: SourceLoc::new(start + 1, 1),
        };

        let mut cursor = start + 1;
        while cursor < self.lines.len() {
            let raw = self.lines[cursor];
            let inner = raw.trim();
            let line_no = cursor + 1;

            if inner.is_empty() {
                cursor += 1;
                continue;
            }
            if inner == "}" {
                return Ok((cursor + 1, workflow));
            }
            if inner.starts_with('#') {
                workflow.steps.push(Step::Shell {
                    command: inner.to_string(),
                    loc: SourceLoc::new(line_no, 1),
                });
                cursor += 1;
                continue;
            }

            if let Some(rule) = match_if_not_ensure(inner) {
                let (next, step) = self.parse_if_block(cursor, rule)?;
                workflow.steps.push(step);
                cursor = next;
                continue;
            }

            if strip_keyword(inner, "prompt").is_some() {
                let (next, step) = self.parse_prompt(cursor)?;
                workflow.steps.push(step);
                cursor = next;
                continue;
            }

            if let Some(body) = strip_keyword(inner, "ensure") {
                let (reference, args) = match body.split_once(char::is_whitespace) {
                    Some((reference, args)) => (reference, Some(args.trim())),
                    None => (body, None),
                };
                if !is_reference(reference) {
                    return Err(self.error(cursor, 1, "invalid ensure statement"));
                }
                workflow.steps.push(Step::Ensure {
                    rule: Reference::new(reference, SourceLoc::new(line_no, keyword_col(raw, "ensure"))),
                    args: args.filter(|args| !args.is_empty()).map(str::to_string),
                });
                cursor += 1;
                continue;
            }

            if let Some(target) = strip_keyword(inner, "run") {
                if !is_reference(target) {
                    return Err(self.error(cursor, 1, "run must target a workflow reference"));
                }
                workflow.steps.push(Step::Run {
                    workflow: Reference::new(target, SourceLoc::new(line_no, keyword_col(raw, "run"))),
                });
                cursor += 1;
                continue;
            }

            workflow.steps.push(Step::Shell {
                command: inner.to_string(),
                loc: SourceLoc::new(line_no, 1),
            });
            cursor += 1;
        }

        Err(self.error(
            start,
            1,
            format!("unterminated workflow block: {}", workflow.name),
        ))
    }

    /// `if ! ensure <rule>; then` ... `fi`. A bare `run <ref>` before any
    /// shell line turns the block into a conditional run.
    fn parse_if_block(&self, start: usize, rule: &str) -> Scanned<Step> {
        let raw = self.lines[start];
        let rule = Reference::new(rule, SourceLoc::new(start + 1, keyword_col(raw, "ensure")));
        let mut commands = Vec::new();

        for index in start + 1..self.lines.len() {
            let look_raw = self.lines[index];
            let look = look_raw.trim();
            if look.is_empty() || look.starts_with('#') {
                continue;
            }
            if look == "fi" {
                return Ok((index + 1, Step::IfNotEnsureThenShell { rule, commands }));
            }
            if commands.is_empty() {
                if let Some(target) = strip_keyword(look, "run").filter(|t| is_reference(t)) {
                    let workflow = Reference::new(
                        target,
                        SourceLoc::new(index + 1, keyword_col(look_raw, "run")),
                    );
                    let fi = self.expect_fi(index + 1, start)?;
                    return Ok((fi + 1, Step::IfNotEnsureThenRun { rule, workflow }));
                }
            }
            commands.push(ShellLine {
                command: look.to_string(),
                loc: SourceLoc::new(index + 1, indent_col(look_raw)),
            });
        }

        Err(self.error(start, 1, "unterminated if-block, expected \"fi\""))
    }

    fn expect_fi(&self, from: usize, if_start: usize) -> Result<usize> {
        for index in from..self.lines.len() {
            let look = self.lines[index].trim();
            if look.is_empty() || look.starts_with('#') {
                continue;
            }
            if look == "fi" {
                return Ok(index);
            }
            return Err(self.error(index, 1, "if-block must end with \"fi\""));
        }
        Err(self.error(if_start, 1, "unterminated if-block, expected \"fi\""))
    }

    /// `prompt "<text>`, possibly spanning lines until an unescaped quote.
    fn parse_prompt(&self, start: usize) -> Scanned<Step> {
        let raw = self.lines[start];
        let keyword = raw.find("prompt").unwrap_or_default();
        let loc = SourceLoc::new(start + 1, keyword + 1);
        let arg = raw[keyword + "prompt".len()..].trim_start();
        if !arg.starts_with('"') {
            return Err(self.error(start, loc.col, "prompt must match: prompt \"<text>\""));
        }

        if let Some(close) = closing_quote(arg, 1) {
            self.expect_prompt_end(start, raw, &arg[close + 1..])?;
            let text = arg[1..close].to_string();
            return Ok((start + 1, Step::Prompt { text, loc }));
        }

        let mut text = arg[1..].to_string();
        for index in start + 1..self.lines.len() {
            let line = self.lines[index];
            text.push('\n');
            if let Some(close) = closing_quote(line, 0) {
                self.expect_prompt_end(index, line, &line[close + 1..])?;
                text.push_str(&line[..close]);
                return Ok((index + 1, Step::Prompt { text, loc }));
            }
            text.push_str(line);
        }

        Err(self.error(start, loc.col, "unterminated prompt string"))
    }

    fn expect_prompt_end(&self, index: usize, raw: &str, rest: &str) -> Result<()> {
        if rest.trim().is_empty() {
            return Ok(());
        }
        let col = raw.len() - rest.trim_start().len() + 1;
        Err(self.error(index, col, "unexpected text after prompt string"))
    }

    fn error(&self, index: usize, col: usize, message: impl Into<String>) -> CompileError {
        CompileError::located(
            self.file.clone(),
            SourceLoc::new(index + 1, col),
            ErrorCode::Parse,
            message,
        )
    }
}

/// `keyword<ws>rest` → `rest` (trimmed). The keyword must be followed by
/// whitespace and something else.
fn strip_keyword<'s>(line: &'s str, keyword: &str) -> Option<&'s str> {
    let rest = line.strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}

/// Name in `<keyword> <name>[()] {`.
fn declaration_name(decl: &str, keyword: &str, allow_parens: bool) -> Option<String> {
    let rest = strip_keyword(decl, keyword)?;
    let head = rest.strip_suffix('{')?.trim_end();
    let name = if allow_parens {
        head.strip_suffix("()").unwrap_or(head)
    } else {
        head
    };
    is_identifier(name).then(|| name.to_string())
}

/// Reference in `if ! ensure <ref>; then`.
fn match_if_not_ensure(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("if")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('!')?.trim_start();
    let rest = rest.strip_prefix("ensure")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (reference, tail) = rest.trim_start().split_once(';')?;
    let reference = reference.trim_end();
    (is_reference(reference) && tail.trim() == "then").then_some(reference)
}

/// Index of the first `"` at or after `from` that is preceded by an even
/// number of consecutive backslashes.
fn closing_quote(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (from..bytes.len()).find(|&index| {
        if bytes[index] != b'"' {
            return false;
        }
        let backslashes = bytes[..index]
            .iter()
            .rev()
            .take_while(|&&byte| byte == b'\\')
            .count();
        backslashes % 2 == 0
    })
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn keyword_col(raw: &str, keyword: &str) -> usize {
    raw.find(keyword).map_or(1, |index| index + 1)
}

fn indent_col(raw: &str) -> usize {
    raw.len() - raw.trim_start().len() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        parse_module(src, "flow.jph").expect("parse")
    }

    fn parse_err(src: &str) -> String {
        parse_module(src, "flow.jph")
            .expect_err("parse should fail")
            .to_string()
    }

    #[test]
    fn parses_declarations_and_comments() {
        let src = "#!/usr/bin/env jaiph\n\
                   import \"./lib.jph\" as lib\n\
                   \n\
                   # Checks the tree.\n\
                   export rule clean {\n\
                   \x20 git diff --quiet\n\
                   }\n\
                   \n\
                   # dropped by the blank line\n\
                   \n\
                   function greet() {\n\
                   \x20 run echo hi\n\
                   }\n\
                   workflow default {\n\
                   \x20 ensure clean\n\
                   }\n";
        let module = parse(src);
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].path, "./lib.jph");
        assert_eq!(module.imports[0].alias, "lib");
        assert_eq!(module.imports[0].loc, SourceLoc::new(2, 1));
        assert_eq!(module.exports, vec!["clean".to_string()]);
        assert_eq!(module.rules[0].comments, vec!["# Checks the tree.".to_string()]);
        assert_eq!(module.rules[0].commands, vec!["git diff --quiet".to_string()]);
        assert!(module.functions[0].comments.is_empty());
        assert_eq!(module.functions[0].commands, vec!["echo hi".to_string()]);
        assert_eq!(module.workflows[0].loc, SourceLoc::new(14, 1));
    }

    #[test]
    fn classifies_workflow_steps() {
        let src = "workflow default {\n\
                   \x20 # note\n\
                   \x20 ensure ready \"$1\" --fast\n\
                   \x20 run lib.setup\n\
                   \x20 prompt \"hi $name\"\n\
                   \x20 echo done\n\
                   }\n";
        let steps = &parse(src).workflows[0].steps;
        assert!(matches!(&steps[0], Step::Shell { command, .. } if command == "# note"));
        match &steps[1] {
            Step::Ensure { rule, args } => {
                assert_eq!(rule.value, "ready");
                assert_eq!(rule.loc, SourceLoc::new(3, 3));
                assert_eq!(args.as_deref(), Some("\"$1\" --fast"));
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert!(matches!(&steps[2], Step::Run { workflow } if workflow.value == "lib.setup"));
        assert!(matches!(&steps[3], Step::Prompt { text, .. } if text == "hi $name"));
        assert!(matches!(&steps[4], Step::Shell { command, .. } if command == "echo done"));
    }

    #[test]
    fn parses_conditional_run() {
        let src = "workflow default {\n\
                   \x20 if ! ensure ready; then\n\
                   \x20   # fall back\n\
                   \x20   run setup\n\
                   \x20 fi\n\
                   }\n\
                   workflow setup {\n\
                   }\n";
        let module = parse(src);
        match &module.workflows[0].steps[0] {
            Step::IfNotEnsureThenRun { rule, workflow } => {
                assert_eq!(rule.value, "ready");
                assert_eq!(workflow.value, "setup");
                assert_eq!(workflow.loc, SourceLoc::new(4, 5));
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(module.workflows.len(), 2);
    }

    #[test]
    fn parses_conditional_shell() {
        let src = "workflow default {\n\
                   \x20 if !ensure m.ready; then\n\
                   \x20   echo missing\n\
                   \x20   run setup\n\
                   \x20 fi\n\
                   }\n";
        match &parse(src).workflows[0].steps[0] {
            Step::IfNotEnsureThenShell { rule, commands } => {
                assert_eq!(rule.value, "m.ready");
                let lines: Vec<_> = commands.iter().map(|c| c.command.as_str()).collect();
                assert_eq!(lines, vec!["echo missing", "run setup"]);
                assert_eq!(commands[0].loc, SourceLoc::new(3, 5));
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn conditional_run_requires_fi_next() {
        let src = "workflow default {\n  if ! ensure a; then\n    run b\n    echo x\n  fi\n}\n";
        let err = parse_err(src);
        assert!(err.contains("flow.jph:4:1 E_PARSE if-block must end with \"fi\""), "{err}");
    }

    #[test]
    fn multi_line_prompt_keeps_raw_lines() {
        let src = "workflow default {\n  prompt \"first\n    say \\\"hi\\\"\n  done\"\n  echo after\n}\n";
        let steps = &parse(src).workflows[0].steps;
        match &steps[0] {
            Step::Prompt { text, loc } => {
                assert_eq!(text, "first\n    say \\\"hi\\\"\n  done");
                assert_eq!(*loc, SourceLoc::new(2, 3));
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn even_backslashes_close_the_prompt() {
        let src = "workflow default {\n  prompt \"path\\\\\"\n}\n";
        assert!(matches!(
            &parse(src).workflows[0].steps[0],
            Step::Prompt { text, .. } if text == "path\\\\"
        ));
    }

    #[test]
    fn rejects_run_inside_rule() {
        let src = "rule r {\n  echo ok\n  run other\n}\n";
        let err = parse_err(src);
        assert!(err.starts_with("flow.jph:3:3 E_PARSE `run` is not allowed inside a `rule` block."), "{err}");
        assert!(err.contains("Use `ensure` to call another rule"));
    }

    #[test]
    fn unterminated_blocks_name_the_construct() {
        assert!(parse_err("rule r {\n  true\n").contains("unterminated rule block: r"));
        assert!(parse_err("function f {\n").contains("unterminated function block: f"));
        assert!(parse_err("workflow w {\n  echo\n").contains("unterminated workflow block: w"));
        assert!(
            parse_err("workflow w {\n  if ! ensure r; then\n    echo\n")
                .contains("unterminated if-block, expected \"fi\"")
        );
        assert!(
            parse_err("workflow w {\n  prompt \"never closed\n}\n")
                .contains("flow.jph:2:3 E_PARSE unterminated prompt string")
        );
    }

    #[test]
    fn rejects_malformed_statements() {
        assert!(parse_err("import lib\n").contains("import must match"));
        assert!(parse_err("rule bad-name {\n}\n").contains("invalid rule declaration"));
        assert!(parse_err("export function f {\n}\n").contains("invalid function declaration"));
        assert!(parse_err("echo top\n").contains("unsupported top-level statement: echo top"));
        assert!(parse_err("workflow w {\n  ensure a.b.c\n}\n").contains("invalid ensure statement"));
        assert!(parse_err("workflow w {\n  run a b\n}\n").contains("run must target a workflow reference"));
        assert!(parse_err("workflow w {\n  prompt hello\n}\n").contains("prompt must match"));
        assert!(parse_err("workflow w {\n  prompt \"a\" extra\n}\n").contains("unexpected text after prompt string"));
    }

    #[test]
    fn shebang_only_ignored_on_first_line() {
        assert!(parse("#!/usr/bin/env jaiph\nrule r {\n}\n").rules.len() == 1);
        let module = parse("\n#!not a shebang\nrule r {\n}\n");
        assert_eq!(module.rules[0].comments, vec!["#!not a shebang".to_string()]);
    }
}
