//! Jaiph: a workflow language that compiles to bash.
//!
//! A `.jph` file declares rules (read-only checks), functions and
//! workflows made of `ensure`, `run`, `prompt` and plain shell steps.
//! [`compiler`] turns source trees into instrumented bash linked against
//! the runtime library in [`stdlib`]; [`harness`] executes a built
//! `default` workflow and renders its progress as a live tree.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Parser, validator and shell code generator.
pub mod compiler;
/// `config.toml` loading and workspace detection.
pub mod config;
/// `jaiph run`: process supervision and progress rendering.
pub mod harness;
/// `jaiph init` workspace scaffolding.
pub mod init;
/// Bash runtime library shipped with every build.
pub mod stdlib;

pub use compiler::{BuildOutput, CompileError, build, transpile};
pub use config::Config;
pub use harness::{HarnessError, RunOptions, run};

/// Current version of jaiph
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
