//! Compiler for the jaiph workflow language.
//!
//! Source files are parsed line by line into a [`Module`], cross-checked
//! against the modules they import, and translated into instrumented shell
//! that links against the runtime library in [`crate::stdlib`].

/// Source model produced by the parser.
pub mod ast;
/// Directory walking and output layout for `build`.
pub mod build;
/// Shell code generation.
pub mod codegen;
/// Line-oriented DSL parser.
pub mod parser;
/// Prompt literal decoding.
pub mod prompt;
/// Canonical symbol and path mapping.
pub mod symbols;
/// Cross-module reference validation.
pub mod validator;

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use ast::{
    Function, Import, Module, RefTarget, Reference, Rule, RuleRef, ShellLine, SourceLoc, Step,
    Workflow, WorkflowRef,
};
pub use build::{BuildOutput, build, build_with_imports};
pub use codegen::transpile;
pub use parser::{parse_file, parse_module};
pub use prompt::PromptLiteral;
pub use validator::validate;

/// Convenience result alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Machine-readable category printed in located errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed syntax, unterminated blocks, disallowed constructs.
    Parse,
    /// Unresolved or malformed references, duplicate aliases.
    Validate,
    /// Import path does not exist on disk.
    ImportNotFound,
}

impl ErrorCode {
    /// Stable text form, e.g. `E_PARSE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "E_PARSE",
            Self::Validate => "E_VALIDATE",
            Self::ImportNotFound => "E_IMPORT_NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while parsing, validating or generating code.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Error tied to a source position; renders as `path:line:col CODE message`.
    #[error("{}:{}:{} {code} {message}", file.display(), loc.line, loc.col)]
    Located {
        /// File the error was found in.
        file: PathBuf,
        /// Position inside `file`.
        loc: SourceLoc,
        /// Error category.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Malformed reference that reached the generator.
    #[error("ValidationError: invalid {kind} reference \"{reference}\"")]
    InvalidReference {
        /// `rule` or `workflow`.
        kind: &'static str,
        /// Offending reference text.
        reference: String,
    },

    /// Source file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },

    /// Output could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl CompileError {
    /// Build a located error.
    pub fn located(
        file: impl Into<PathBuf>,
        loc: SourceLoc,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Located {
            file: file.into(),
            loc,
            code,
            message: message.into(),
        }
    }

    /// Error category, when the error is located.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Located { code, .. } => Some(*code),
            _ => None,
        }
    }
}
