//! Generate a testcase directory for a protocol.
//!
//! Usage:
//!   generate_testcase --protocol <DIR> --name <NAME> (--msg_count <N> | --one_per) (--valid | --invalid)
//!                     [--seed <SEED>] [--on-empty-pool abort|skip|substitute-valid] [--verbose]
//!
//! Output goes to `<DIR>/testcases/<NAME>/`; an existing testcase is never overwritten.

use anyhow::{Context, Result};
use bitspec::{
    load_protocol, BatchSize, Conformance, EmptyPoolPolicy, GeneratorConfig, ResolvedSchema, Testcase, TestcaseRequest,
};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "generate_testcase")]
#[command(about = "Generate valid or invalid message instances for a protocol")]
#[command(version)]
#[command(group(ArgGroup::new("size").required(true).args(["msg_count", "one_per"])))]
#[command(group(ArgGroup::new("conformance").required(true).args(["valid", "invalid"])))]
struct Cli {
    /// Protocol directory containing protocol.json
    #[arg(short, long)]
    protocol: PathBuf,

    /// Testcase name (directory under <protocol>/testcases)
    #[arg(short, long)]
    name: String,

    /// Number of instances, message types drawn at random
    #[arg(long = "msg_count")]
    msg_count: Option<usize>,

    /// One instance per message type
    #[arg(long = "one_per")]
    one_per: bool,

    /// Generate conformant instances
    #[arg(long)]
    valid: bool,

    /// Corrupt exactly one field per instance
    #[arg(long)]
    invalid: bool,

    /// Seed for a reproducible run
    #[arg(long, env = "BITSPEC_SEED")]
    seed: Option<u64>,

    /// What to do for message types that admit no corruption
    #[arg(long = "on-empty-pool", default_value = "abort")]
    on_empty_pool: EmptyPoolPolicy,

    /// Largest change applied to a corrupted array length
    #[arg(long = "max-length-delta", default_value_t = GeneratorConfig::default().max_length_delta)]
    max_length_delta: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let schema = load_protocol(&cli.protocol).with_context(|| format!("loading {}", cli.protocol.display()))?;
    let resolved = ResolvedSchema::resolve(&schema).context("resolving specification")?;

    let size = match cli.msg_count {
        Some(n) => BatchSize::Count(n),
        None => BatchSize::OnePerType,
    };
    let conformance = if cli.invalid { Conformance::Invalid } else { Conformance::Valid };
    let request = TestcaseRequest {
        name: cli.name.clone(),
        size,
        conformance,
        on_empty_pool: cli.on_empty_pool,
    };
    let config = GeneratorConfig {
        seed: cli.seed,
        max_length_delta: cli.max_length_delta,
        ..GeneratorConfig::default()
    };
    info!(seed = ?config.seed, "generator configured");

    let testcase = Testcase::generate(&resolved, config, &request)
        .with_context(|| format!("generating testcase {}", cli.name))?;
    let dir = testcase.write(&cli.protocol).with_context(|| format!("writing testcase {}", cli.name))?;

    let invalid = testcase.instances().iter().filter(|i| !i.is_valid()).count();
    println!(
        "{}: {} instance(s), {} invalid",
        dir.display(),
        testcase.instances().len(),
        invalid
    );
    Ok(())
}
