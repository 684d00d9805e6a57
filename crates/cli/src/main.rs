use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kspec_core::{Configuration, Resource};
use kspec_memory::{bootstrap, default_kinds, snapshot, MemoryBackend};
use kspec_reconcile::{ChangeResult, ChangeStatus, Reconciler, ReconciliationContext, ReconciliationMode, RunSummary};
use kspec_selector::{AggregateSelector, FieldSelector, Selector};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kspecctl", version, about = "Declarative Kafka resource reconciliation")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Mode { Full, Create, Update, Delete }

impl From<Mode> for ReconciliationMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Full => ReconciliationMode::Full,
            Mode::Create => ReconciliationMode::Create,
            Mode::Update => ReconciliationMode::Update,
            Mode::Delete => ReconciliationMode::Delete,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Desired-state YAML files (multi-document)
    #[arg(short = 'f', long = "file", required = true)]
    files: Vec<PathBuf>,
    /// State file backing the in-memory backend
    #[arg(long = "state", env = "KSPEC_STATE", default_value = "kspec-state.yaml")]
    state: PathBuf,
    /// Selector expression, e.g. "metadata.labels.env IN (prod)"; repeatable
    #[arg(short = 's', long = "selector")]
    selectors: Vec<String>,
    /// Keep resources matching any selector instead of all of them
    #[arg(long = "any", action = ArgAction::SetTrue)]
    any: bool,
    /// Extension configuration, `key=value`; repeatable
    #[arg(long = "set")]
    set: Vec<String>,
    /// Delete resources present in the backend but absent from the files
    #[arg(long = "delete-orphans", action = ArgAction::SetTrue)]
    delete_orphans: bool,
    /// Upper bound on concurrently applied changes
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what would change, without applying anything
    Plan(RunArgs),
    /// Apply changes and write the resulting state back
    Apply {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long = "mode", value_enum, default_value_t = Mode::Full)]
        mode: Mode,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// List supported kinds and registered extensions
    Kinds,
}

fn init_tracing() {
    let env = std::env::var("KSPEC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSPEC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KSPEC_METRICS_ADDR; expected host:port");
        }
    }
}

/// `KSPEC_*` environment, then `--set`, then dedicated flags.
fn configuration(args: &RunArgs) -> Result<Configuration> {
    let mut cfg = Configuration::from_env("KSPEC");
    for pair in args.set.iter() {
        let (k, v) = pair.split_once('=').ok_or_else(|| anyhow!("--set expects key=value, got '{}'", pair))?;
        let value = serde_json::from_str::<serde_json::Value>(v).unwrap_or_else(|_| serde_json::Value::String(v.to_string()));
        cfg = cfg.with(k.trim(), value);
    }
    if args.delete_orphans { cfg = cfg.with("delete-orphans", true); }
    if let Some(n) = args.concurrency { cfg = cfg.with("apply-concurrency", n as u64); }
    Ok(cfg)
}

fn selector(args: &RunArgs) -> Result<AggregateSelector> {
    if !args.any { return Ok(AggregateSelector::parse_all(&args.selectors)?); }
    let mut parsed: Vec<Arc<dyn Selector>> = Vec::new();
    for s in args.selectors.iter() { parsed.push(Arc::new(FieldSelector::parse(s)?)); }
    Ok(AggregateSelector::any(parsed))
}

fn load_desired(files: &[PathBuf]) -> Result<Vec<Resource>> {
    let mut out = Vec::new();
    for f in files.iter() { out.extend(snapshot::load_file(f)?); }
    Ok(out)
}

#[derive(Serialize)]
struct Report<'a> {
    summary: RunSummary,
    results: &'a [ChangeResult],
}

fn print_results(output: Output, results: &[ChangeResult]) -> Result<()> {
    let summary = RunSummary::of(results);
    match output {
        Output::Human => {
            for r in results.iter() {
                match &r.error {
                    Some(e) => println!("{:<8} {}  {}", r.status, r.description, e),
                    None => println!("{:<8} {}", r.status, r.description),
                }
            }
            println!("{}", summary);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&Report { summary, results })?),
    }
    Ok(())
}

async fn run(args: RunArgs, mode: ReconciliationMode, dry_run: bool, output: Output) -> Result<()> {
    let t0 = Instant::now();
    let cfg = configuration(&args)?;
    let ctx = ReconciliationContext::new(cfg.clone()).dry_run(dry_run).with_selector(selector(&args)?);
    let desired = load_desired(&args.files)?;
    let backend = MemoryBackend::load(&args.state)?;
    let registry = bootstrap(&backend, &default_kinds(), &cfg)?;
    info!(resources = desired.len(), state = %args.state.display(), mode = %mode, dry_run, "run invoked");

    let results = Reconciler::new(Arc::new(registry)).reconcile(desired, mode, &ctx).await?;
    print_results(output, &results)?;

    if !dry_run {
        backend.save(&args.state).with_context(|| format!("saving state to {}", args.state.display()))?;
    }
    let failed = results.iter().filter(|r| r.status == ChangeStatus::Failed).count();
    info!(results = results.len(), failed, took_ms = %t0.elapsed().as_millis(), "run done");
    if failed > 0 {
        warn!(failed, "some changes failed");
        bail!("{} change(s) failed", failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Plan(args) => run(args, ReconciliationMode::Full, true, cli.output).await,
        Commands::Apply { run: args, mode, dry_run } => run(args, mode.into(), dry_run, cli.output).await,
        Commands::Kinds => {
            let registry = bootstrap(&MemoryBackend::new(), &default_kinds(), &Configuration::from_env("KSPEC"))?;
            match cli.output {
                Output::Human => {
                    for rt in default_kinds() { println!("{}", rt); }
                    for r in registry.registrations() {
                        let rt = r.resource_type.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "*".to_string());
                        println!("  {:<14} {:<40} {}", r.capability, r.name, rt);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(registry.registrations())?),
            }
            Ok(())
        }
    };
    if let Err(e) = &outcome { error!(error = ?e, "kspecctl failed"); }
    outcome
}
