//! Cargar CLI - staged checkpoint loading with bounded memory
//!
//! # Commands
//!
//! - `gen` - Write a synthetic checkpoint with named tensors
//! - `info` - List a checkpoint's tensors
//! - `split` - Split a checkpoint into one file per tensor
//! - `load` - Load a store under a chosen strategy and report peak memory

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cargar::cli::{self, LoadOptions};
use cargar::loader::{LoadStrategy, MissingPolicy};
use cargar::tensor::Dtype;

/// Cargar - staged, bounded-memory tensor checkpoint loading
#[derive(Parser)]
#[command(name = "cargar")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic checkpoint with deterministic values
    ///
    /// Examples:
    ///   cargar gen model.ckpt -t fc1.weight=128x64 -t fc1.bias=128
    Gen {
        /// Output checkpoint path
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Tensor spec, repeatable (name=2x3)
        #[arg(short = 't', long = "tensor", value_name = "SPEC", required = true)]
        tensors: Vec<String>,

        /// Element type (f32 or f16)
        #[arg(long, default_value = "f32")]
        dtype: String,

        /// Model name recorded in the metadata
        #[arg(long)]
        model_name: Option<String>,
    },

    /// List a checkpoint's tensors
    Info {
        /// Checkpoint path
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Split a checkpoint into one file per tensor
    Split {
        /// Source checkpoint path
        #[arg(value_name = "CHECKPOINT")]
        checkpoint: PathBuf,

        /// Destination directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Load a store under a chosen strategy and report peak memory
    ///
    /// STORE is a checkpoint file, or a pre-split directory for
    /// --strategy per-tensor-file.
    Load {
        /// Store path
        #[arg(value_name = "STORE")]
        store: PathBuf,

        /// naive, sequential, meta-sequential, mapped-assign, per-tensor-file
        #[arg(short, long, default_value = "sequential")]
        strategy: String,

        /// Override the strategy's missing-name policy (fail or skip)
        #[arg(long, value_name = "POLICY")]
        missing_policy: Option<String>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,

        /// Poll process RSS during the load
        #[arg(long)]
        sample_rss: bool,
    },
}

fn parse_dtype(s: &str) -> Result<Dtype, String> {
    match s {
        "f32" => Ok(Dtype::F32),
        "f16" => Ok(Dtype::F16),
        other => Err(format!("Unknown dtype '{other}' (expected f32 or f16)")),
    }
}

fn parse_policy(s: &str) -> Result<MissingPolicy, String> {
    match s {
        "fail" | "fail-fast" => Ok(MissingPolicy::FailFast),
        "skip" | "skip-with-warning" => Ok(MissingPolicy::SkipWithWarning),
        other => Err(format!("Unknown policy '{other}' (expected fail or skip)")),
    }
}

fn run(cli: Cli) -> Result<String, String> {
    match cli.command {
        Commands::Gen {
            path,
            tensors,
            dtype,
            model_name,
        } => {
            let dtype = parse_dtype(&dtype)?;
            let specs = tensors
                .iter()
                .map(|s| cli::parse_tensor_spec(s))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            cli::generate(&path, model_name.as_deref(), &specs, dtype)
                .map_err(|e| e.to_string())?;
            Ok(format!(
                "Wrote {} tensors to {}\n",
                specs.len(),
                path.display()
            ))
        }
        Commands::Info { path } => cli::info(&path).map_err(|e| e.to_string()),
        Commands::Split { checkpoint, dir } => {
            cli::split(&checkpoint, &dir).map_err(|e| e.to_string())
        }
        Commands::Load {
            store,
            strategy,
            missing_policy,
            json,
            sample_rss,
        } => {
            let strategy: LoadStrategy = strategy.parse().map_err(|e: cargar::error::CargarError| e.to_string())?;
            let missing_policy = missing_policy.as_deref().map(parse_policy).transpose()?;
            let opts = LoadOptions {
                missing_policy,
                json,
                sample_rss,
            };
            cli::run_load(&store, strategy, opts).map_err(|e| e.to_string())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
