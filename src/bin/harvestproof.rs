use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use harvestproof::commit::{
    default_samples, read_proof_file, read_root_file, verify_proof, write_commitment, Record,
};
use harvestproof::delivery::{verify_delivery, DeliverySigner, KeySource};
use harvestproof::harvest::{
    to_checksum_address, BatchHarvester, ChunkProgress, HarvestObserver, SweepStatus, TokenSpec,
};
use harvestproof::runtime::telemetry::spawn_metrics_reporter;
use harvestproof::{HarvestConfig, RpcExecutor, Telemetry};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const EXIT_MISMATCH: u8 = 1;
const EXIT_UNREADABLE: u8 = 2;
const EXIT_TIP_UNRESOLVED: u8 = 3;

#[derive(Parser)]
#[command(name = "harvestproof", version, about = "Harvest chain activity and deliver verifiable extracts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep recent blocks and write every sender/receiver address.
    Harvest(HarvestArgs),
    /// Fetch native and token balances for a list of addresses.
    Balances(BalancesArgs),
    /// Build the Merkle commitment over a dataset and write sample proofs.
    Commit(CommitArgs),
    /// Hash the dataset and sample, write and sign the delivery manifest.
    Sign(SignArgs),
    /// Check one inclusion proof against a published root.
    Verify(VerifyArgs),
    /// Check the manifest signature inside a delivery directory.
    CheckSignature {
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct RpcArgs {
    /// RPC endpoint; repeat for rotation. Defaults to ETH_RPC_URL, then the
    /// built-in public list.
    #[arg(long = "rpc")]
    rpc: Vec<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
}

impl RpcArgs {
    fn config(&self, lookback: Option<u64>) -> Result<HarvestConfig> {
        let explicit = (!self.rpc.is_empty()).then(|| self.rpc.clone());
        let mut builder = HarvestConfig::builder_from_env(explicit)?;
        if let Some(concurrency) = self.concurrency {
            builder = builder.max_concurrent_requests(concurrency);
        }
        if let Some(batch_size) = self.batch_size {
            builder = builder.chunk_size(batch_size);
        }
        if let Some(lookback) = lookback {
            builder = builder.lookback_blocks(lookback);
        }
        builder.build()
    }
}

#[derive(Args)]
struct HarvestArgs {
    #[command(flatten)]
    rpc: RpcArgs,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    lookback: Option<u64>,
}

#[derive(Args)]
struct BalancesArgs {
    #[command(flatten)]
    rpc: RpcArgs,
    /// JSON array of addresses.
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// `SYMBOL=0xCONTRACT`, or a bare `SYMBOL` for a token absent on this chain.
    /// Defaults to USDC, USDT, WETH and WBTC, merged with TOKENS_JSON.
    #[arg(long = "token", value_parser = parse_token)]
    tokens: Vec<TokenSpec>,
}

#[derive(Args)]
struct CommitArgs {
    /// JSON array of rows, each an array of scalars (strings, numbers,
    /// booleans or nulls).
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Row indexes to write inclusion proofs for. Defaults to the first ten
    /// rows; explicit indexes past the end are an error.
    #[arg(long = "samples", num_args = 1..)]
    samples: Vec<usize>,
}

#[derive(Args)]
struct SignArgs {
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long)]
    sample: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// PKCS#8 PEM private key; a one-off key is generated when omitted.
    #[arg(long)]
    privkey: Option<PathBuf>,
}

#[derive(Args)]
struct VerifyArgs {
    proof: PathBuf,
    root: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_cli_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Harvest(args) => harvest(args).await,
        Command::Balances(args) => balances(args).await,
        Command::Commit(args) => commit(args),
        Command::Sign(args) => sign(args),
        Command::Verify(args) => Ok(verify(args)),
        Command::CheckSignature { dir } => check_signature(&dir),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_cli_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    harvestproof::init_tracing();
}

async fn harvest(args: HarvestArgs) -> Result<ExitCode> {
    let config = args.rpc.config(args.lookback)?;
    let executor = RpcExecutor::from_config(&config)?;
    let outcome = run_harvest(&config, executor.clone(), &args.out).await;
    executor.close();
    outcome
}

async fn run_harvest(config: &HarvestConfig, executor: RpcExecutor, out: &Path) -> Result<ExitCode> {
    let telemetry = Arc::new(Telemetry::default());
    let shutdown = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c_listener(shutdown.clone());
    let reporter_stop = CancellationToken::new();
    let reporter = spawn_metrics_reporter(
        telemetry.clone(),
        executor.clone(),
        reporter_stop.clone(),
        config.metrics_interval(),
    );

    let bar = build_progress_bar("blocks");
    let harvester = BatchHarvester::from_config(executor.clone(), config)?
        .with_telemetry(telemetry)
        .with_observer(Arc::new(BarObserver(bar.clone())))
        .with_shutdown(shutdown);

    let report = harvester.sweep_recent(config.lookback_blocks()).await;
    reporter_stop.cancel();
    let _ = reporter.await;
    ctrl_c.abort();

    let addresses: Vec<&String> = report.addresses.iter().collect();
    write_json(out, &addresses).await?;

    let code = match &report.status {
        SweepStatus::Completed => {
            bar.finish_with_message("done");
            ExitCode::SUCCESS
        }
        SweepStatus::Cancelled => {
            bar.abandon_with_message("stopped by Ctrl-C");
            ExitCode::SUCCESS
        }
        SweepStatus::TipUnresolved { last_error } => {
            bar.abandon_with_message("latest block unavailable");
            eprintln!("could not resolve the latest block: {last_error}");
            ExitCode::from(EXIT_TIP_UNRESOLVED)
        }
    };

    bar.println(format!(
        "{} addresses from blocks {}..={} ({} missing) -> {}",
        report.addresses.len(),
        report.start,
        report.end,
        report.missing_blocks.len(),
        out.display()
    ));
    Ok(code)
}

async fn balances(args: BalancesArgs) -> Result<ExitCode> {
    let config = args.rpc.config(None)?;
    let raw = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let addresses: Vec<String> = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a JSON array of addresses", args.input.display()))?;

    let tokens = if args.tokens.is_empty() {
        config.tokens().to_vec()
    } else {
        args.tokens
    };

    let executor = RpcExecutor::from_config(&config)?;
    let outcome = run_balances(&config, executor.clone(), &addresses, &tokens, &args.out).await;
    executor.close();
    outcome
}

async fn run_balances(
    config: &HarvestConfig,
    executor: RpcExecutor,
    addresses: &[String],
    tokens: &[TokenSpec],
    out: &Path,
) -> Result<ExitCode> {
    let bar = build_progress_bar("addresses");
    let harvester = BatchHarvester::from_config(executor, config)?
        .with_observer(Arc::new(BarObserver(bar.clone())));

    // address -> asset -> decimal amount
    let mut table: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let native = harvester.native_balances(addresses).await;
    for (address, value) in &native.balances {
        table
            .entry(address.clone())
            .or_default()
            .insert("native".to_string(), value.to_string());
    }
    for token in tokens {
        let sheet = harvester.token_balances(addresses, token).await;
        for (address, value) in &sheet.balances {
            table
                .entry(address.clone())
                .or_default()
                .insert(token.symbol.clone(), value.to_string());
        }
    }
    bar.finish_with_message("done");

    write_json(out, &table).await?;
    bar.println(format!(
        "{} addresses ({} dropped, {} native balances missing) -> {}",
        table.len(),
        native.dropped,
        native.missing.len(),
        out.display()
    ));
    Ok(ExitCode::SUCCESS)
}

fn commit(args: CommitArgs) -> Result<ExitCode> {
    let raw = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let rows: Vec<Record> = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a JSON array of rows", args.input.display()))?;

    let samples = if args.samples.is_empty() {
        default_samples(rows.len())
    } else {
        args.samples
    };
    let artifacts = write_commitment(&rows, &samples, &args.out)?;
    println!("merkle_root: {}", artifacts.root_hex);
    println!("root_file: {}", artifacts.root_file.display());
    for path in &artifacts.proof_files {
        println!("proof: {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn sign(args: SignArgs) -> Result<ExitCode> {
    let signer = DeliverySigner::new(KeySource::from(args.privkey));
    let artifacts = signer.sign_delivery(&args.dataset, &args.sample, &args.out)?;
    println!("manifest: {}", artifacts.manifest_file.display());
    println!("signature: {}", artifacts.signature_file.display());
    println!("public_key: {}", artifacts.public_key_file.display());
    if artifacts.ephemeral_key {
        println!("signed with a one-off key; the private half was not kept");
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(args: VerifyArgs) -> ExitCode {
    let checked = read_proof_file(&args.proof).and_then(|proof| {
        let expected = read_root_file(&args.root)?;
        verify_proof(&proof, &expected)
    });

    match checked {
        Ok(outcome) => {
            println!("computed_root: {}", outcome.computed);
            println!("expected_root: {}", outcome.expected);
            println!("match: {}", outcome.matches);
            if outcome.matches {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_MISMATCH)
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_UNREADABLE)
        }
    }
}

fn check_signature(dir: &Path) -> Result<ExitCode> {
    let valid = verify_delivery(dir)?;
    println!("signature_valid: {valid}");
    Ok(if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_MISMATCH)
    })
}

fn parse_token(raw: &str) -> Result<TokenSpec, String> {
    let (symbol, contract) = match raw.split_once('=') {
        Some((symbol, contract)) => (symbol.trim(), contract.trim()),
        None => (raw.trim(), ""),
    };
    if symbol.is_empty() {
        return Err(format!("token `{raw}` has no symbol"));
    }
    if contract.is_empty() {
        return Ok(TokenSpec::new(symbol, None));
    }
    let contract = to_checksum_address(contract)
        .ok_or_else(|| format!("token `{raw}` has an invalid contract address"))?;
    Ok(TokenSpec::new(symbol, Some(contract)))
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let encoded = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, encoded)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

fn spawn_ctrl_c_listener(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received; finishing the current chunk");
            shutdown.cancel();
        }
    })
}

fn build_progress_bar(unit: &str) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(1), ProgressDrawTarget::stderr_with_hz(12));
    let template = format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
    );
    let style = ProgressStyle::with_template(&template)
        .expect("valid progress bar template")
        .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

struct BarObserver(ProgressBar);

impl HarvestObserver for BarObserver {
    fn on_chunk(&self, progress: &ChunkProgress) {
        self.0.set_length(progress.total);
        self.0.set_position(progress.processed);
        self.0.set_message(format!(
            "{} unique, {} missing{}",
            progress.unique_results,
            progress.missing,
            if progress.fell_back { " (fallback)" } else { "" }
        ));
    }
}
