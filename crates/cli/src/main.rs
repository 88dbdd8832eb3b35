//! This is the CLI driver for the Aurion code intelligence engine. For more
//! detail, please see the documentation for the [`aurion_engine`] crate.
//!
//! Every subcommand mirrors one request of the engine and prints its result as
//! JSON on standard output. Diagnostics are rendered for humans on standard
//! error.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

use std::{
    fs,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{anyhow, Context};
use aurion_avm::{asm, Program};
use aurion_engine::{
    complete::FileContext,
    config::EngineConfig,
    issue::Severity,
    simulate::{ChainDescriptor, DeclarativeProfiles},
    source::SourceFile,
    EngineBuilder,
};
use aurion_errors::{location::Location, report::render, Error};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Analyzes, verifies, optimizes and simulates Aurion smart contracts.
#[derive(Debug, Parser)]
#[command(name = "aurion", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// A JSON file with the engine configuration. Missing keys keep their
    /// defaults.
    #[arg(long, global = true, env = "AURION_CONFIG")]
    config: Option<PathBuf>,

    /// Logs more detail to standard error. Repeat for even more.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Never color rendered diagnostics.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parses a file and prints its tree.
    Parse { file: PathBuf },

    /// Scans a file for vulnerabilities and verifies its inferred properties.
    Analyze {
        file: PathBuf,

        /// Exits with a failure if any issue is at least this severe.
        #[arg(long, value_parser = parse_severity)]
        fail_on: Option<Severity>,
    },

    /// Optimizes an AVM bytecode buffer.
    Optimize {
        file: PathBuf,

        /// Reads the input as AVM assembly instead of a binary buffer.
        #[arg(long)]
        asm: bool,

        /// Writes the optimized buffer here.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Offers completions at a position in a file.
    Complete {
        file: PathBuf,

        /// The 1-based line of the cursor.
        #[arg(long)]
        line: usize,

        /// The 1-based column of the cursor.
        #[arg(long)]
        column: usize,
    },

    /// Generates a test suite for a file.
    TestGen { file: PathBuf },

    /// Simulates a file against one or more chains.
    Simulate {
        file: PathBuf,

        /// A chain to simulate against, as `name` or `name=rpc-endpoint`.
        #[arg(long = "chain", required = true)]
        chains: Vec<String>,

        /// A JSON file with chain profiles to add to the built-in ones.
        #[arg(long)]
        profiles: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    install_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration `{}`", path.display()))?;
            EngineConfig::from_json(&json)
                .with_context(|| format!("Invalid configuration `{}`", path.display()))?
        }
        None => EngineConfig::default(),
    }
    .with_completion_from_env();

    let color = !cli.no_color && std::io::stderr().is_terminal();
    let mut builder = EngineBuilder::new().with_config(config);
    if let Command::Simulate {
        profiles: Some(path),
        ..
    } = &cli.command
    {
        let mut profiles = DeclarativeProfiles::builtin();
        profiles.extend_from_json(&read(path)?)?;
        tracing::debug!(profiles = %profiles.names().join(", "), "loaded chain profiles");
        builder = builder.with_profiles(Arc::new(profiles));
    }
    let engine = builder.build()?;

    match cli.command {
        Command::Parse { file } => {
            let file = source(&file)?;
            match engine.parse(&file) {
                Ok(ast) => print_json(&ast)?,
                Err(diagnostics) => {
                    eprint!("{}", render(&file.path, &file.content, &diagnostics, color));
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Analyze { file, fail_on } => {
            let file = source(&file)?;
            let report = engine.analyze(&file);
            eprint!("{}", render(&file.path, &file.content, &report.diagnostics, color));
            eprint!("{}", render(&file.path, &file.content, &report.semantic_errors, color));
            print_json(&report)?;

            if let Some(threshold) = fail_on {
                if report.issues.iter().any(|i| i.severity >= threshold) {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Optimize { file, asm, output } => {
            let bytes = if asm {
                asm::assemble(&read(&file)?)?.encode()?
            } else {
                fs::read(&file).with_context(|| format!("Failed to read `{}`", file.display()))?
            };
            let result = engine.optimize(&bytes);
            if let Some(output) = output {
                fs::write(&output, &result.bytes)
                    .with_context(|| format!("Failed to write `{}`", output.display()))?;
            }
            if let Ok(program) = Program::decode(&result.bytes) {
                eprint!("{}", asm::disassemble(&program));
            }
            print_json(&result)?;
        }
        Command::Complete { file, line, column } => {
            let file = source(&file)?;
            let context = FileContext::new(file.path, file.content).with_cursor(Location::new(line, column));
            print_json(&engine.complete(&context))?;
        }
        Command::TestGen { file } => {
            let file = source(&file)?;
            match engine.generate_tests(&file) {
                Ok(suite) => {
                    eprint!("{}", render(&file.path, &file.content, &suite.semantic_errors, color));
                    print_json(&suite)?;
                }
                Err(error) => return Ok(report_failure(&file, &error, color)),
            }
        }
        Command::Simulate { file, chains, .. } => {
            let file = source(&file)?;
            let chains = chains.iter().map(String::as_str).map(chain).collect::<Vec<_>>();
            match engine.simulate(&file, &chains) {
                Ok(results) => {
                    eprint!("{}", render(&file.path, &file.content, &results.semantic_errors, color));
                    print_json(&results)?;
                    if results.value.values().any(|r| !r.passed) {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                Err(error) => return Ok(report_failure(&file, &error, color)),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Logs to standard error, at a level that `RUST_LOG` overrides.
fn install_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read `{}`", path.display()))
}

fn source(path: &Path) -> anyhow::Result<SourceFile> {
    SourceFile::try_from(path).with_context(|| format!("Failed to read `{}`", path.display()))
}

fn chain(argument: &str) -> ChainDescriptor {
    match argument.split_once('=') {
        Some((name, endpoint)) => ChainDescriptor::new(name.trim(), endpoint.trim()),
        None => ChainDescriptor::new(argument.trim(), ""),
    }
}

fn parse_severity(name: &str) -> Result<Severity, String> {
    match name.to_ascii_lowercase().as_str() {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        _ => Err(format!("Unknown severity `{name}`, expected low, medium or high")),
    }
}

/// Renders the diagnostics behind a failed request, returning the exit code
/// to finish with.
fn report_failure(file: &SourceFile, error: &Error, color: bool) -> ExitCode {
    match error {
        Error::Syntax(diagnostics) => eprint!("{}", render(&file.path, &file.content, diagnostics, color)),
        Error::Semantic(errors) => eprint!("{}", render(&file.path, &file.content, errors, color)),
        other => eprintln!("error: {other}"),
    }
    ExitCode::FAILURE
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| anyhow!("Failed to write JSON: {e}"))?;
    println!("{json}");
    Ok(())
}
