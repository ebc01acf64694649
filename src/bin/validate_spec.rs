//! Validate a specification: parse, resolve, and lint it.
//!
//! Usage:
//!   validate_spec --protocol <DIR | FILE.json> [--human] [--verbose]
//!
//! A directory is read as a protocol directory (`protocol.json`, plus `mission.json`
//! when present). Exits non-zero if the specification does not load or resolve.
//! Lint findings are reported but never fail the run.

use anyhow::{Context, Result};
use bitspec::ast::ResolvedLength;
use bitspec::lint::{lint, LintMessage, LintRule, Severity};
use bitspec::{load_protocol, parse_file, ResolvedSchema};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "validate_spec")]
#[command(about = "Parse, resolve and lint a binary message specification")]
#[command(version)]
struct Cli {
    /// Protocol directory or specification file
    #[arg(short, long)]
    protocol: PathBuf,

    /// Print the resolved layout of every message type
    #[arg(short = 'H', long)]
    human: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn rule_id(rule: LintRule) -> &'static str {
    match rule {
        LintRule::NoCorruptionCandidates => "no-corruption-candidates",
        LintRule::UnboundedDependee => "unbounded-dependee",
        LintRule::RedundantStrict => "redundant-strict",
        LintRule::ShortListConstraint => "short-list-constraint",
    }
}

fn print_message(path: &str, m: &LintMessage) {
    println!("{}: {} [{}]", path, m, rule_id(m.rule));
}

fn print_layout(schema: &ResolvedSchema) {
    for m in &schema.messages {
        match m.fixed_bits() {
            Some(bits) => println!("{} ({} bytes)", m.name, bits / 8),
            None => println!("{} (variable length)", m.name),
        }
        for f in &m.fields {
            let shape = match f.length {
                None => String::new(),
                Some(ResolvedLength::Fixed(n)) => format!("[{}]", n),
                Some(ResolvedLength::Dependee(i)) => format!("[{}]", m.fields[i].name),
            };
            println!("  {:<24} {}{}  {}", f.name, f.primitive, shape, f.constraint);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let schema = if cli.protocol.is_dir() {
        load_protocol(&cli.protocol)
    } else {
        parse_file(&cli.protocol)
    }
    .with_context(|| format!("loading {}", cli.protocol.display()))?;
    let resolved = ResolvedSchema::resolve(&schema).with_context(|| format!("resolving {}", cli.protocol.display()))?;

    if cli.human {
        print_layout(&resolved);
    }

    let display_path = cli.protocol.display().to_string();
    let messages = lint(&resolved);
    for m in &messages {
        print_message(&display_path, m);
    }
    let warnings = messages.iter().filter(|m| m.severity == Severity::Warning).count();
    eprintln!(
        "{}: {} message type(s), {} warning(s), {} note(s)",
        display_path,
        resolved.messages.len(),
        warnings,
        messages.len() - warnings
    );
    Ok(())
}
