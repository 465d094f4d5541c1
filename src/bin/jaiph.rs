//! jaiph CLI: build, run and scaffold workflows.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use jaiph::compiler::symbols::{absolute, is_source_file};
use jaiph::harness::{self, RunOptions};

#[derive(Parser)]
#[command(name = "jaiph")]
#[command(version, about = "Compile and run jaiph workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one file, or every source file under a directory
    Build {
        /// Output directory (defaults to the input's directory)
        #[arg(long)]
        target: Option<PathBuf>,

        /// File or directory to compile
        #[arg(default_value = "./")]
        path: PathBuf,
    },

    /// Run the `default` workflow of a file
    Run {
        /// Keep the build in this directory instead of a temporary one
        #[arg(long)]
        target: Option<PathBuf>,

        /// Workflow file
        file: PathBuf,

        /// Arguments passed to the workflow
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Scaffold `.jaiph/` in a workspace
    Init {
        /// Workspace directory
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },
}

/// `jaiph flow.jph args...` is shorthand for `jaiph run flow.jph args...`.
fn normalize_args(mut args: Vec<OsString>) -> Vec<OsString> {
    let shorthand = args.get(1).is_some_and(|first| {
        let path = Path::new(first);
        is_source_file(path) && path.is_file()
    });
    if shorthand {
        args.insert(1, OsString::from("run"));
    }
    args
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("JAIPH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args_os().collect()));

    match execute(cli.command).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn execute(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Build { target, path } => {
            let outputs = jaiph::build(&path, target.as_deref())?;
            for output in &outputs {
                println!("built {}", absolute(&output.output_path).display());
            }
            if outputs.is_empty() {
                println!("no .jph files found");
            }
            Ok(0)
        }

        Commands::Run { target, file, args } => {
            let code = harness::run(RunOptions {
                entry: file,
                target,
                args,
            })
            .await?;
            Ok(code)
        }

        Commands::Init { workspace } => {
            jaiph::init::init(&workspace, &mut std::io::stdout().lock())?;
            Ok(0)
        }
    }
}
