//! wasm-bridge CLI entry point.
//!
//! Runs a guest module once on behalf of a request described on the command
//! line, and prints what the guest returned.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_bridge_common::{
    ConfigFile, CoordinatedRequest, ExecutionConfig, LogFormat, LoggingConfig, RuntimeConfig,
    RuntimeError,
};
use wasm_bridge_core::{
    CompiledModule, ExecutionResult, GuestOutput, InstanceRegistry, InstanceRunner, WasmEngine,
    create_store,
};
use wasm_bridge_host::{HostApi, register_all};

#[derive(Debug, Parser)]
#[command(
    name = "wasm-bridge",
    version,
    about = "Run WebAssembly guests against the wasm-bridge host API"
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "WASM_BRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a guest module once.
    Run(RunArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the `.wasm` module.
    module: PathBuf,

    /// Request body.
    #[arg(long, default_value = "")]
    body: String,

    /// Request method.
    #[arg(long, default_value = "GET")]
    method: String,

    /// Request URL, including any query string.
    #[arg(long, default_value = "/")]
    url: String,

    /// Request header as `name=value`. May be repeated.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Exported function to call instead of the configured entry point.
    #[arg(long)]
    entry_point: Option<String>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    init_tracing(&config.logging);

    match cli.command {
        Command::Run(args) => run(&config.runtime, args).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only the guest's result
    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(config: &RuntimeConfig, args: RunArgs) -> anyhow::Result<()> {
    let engine = WasmEngine::new(&config.engine)?;
    let registry = Arc::new(InstanceRegistry::new());

    let mut runner =
        InstanceRunner::new(engine.inner(), Arc::clone(&registry), config.execution.wasi)?;
    let api = Arc::new(HostApi::new(
        Arc::clone(&registry),
        config.capabilities.clone(),
    ));
    register_all(runner.linker_mut(), api)?;

    let module = CompiledModule::from_file(engine.inner(), &args.module)
        .with_context(|| format!("Failed to load module {}", args.module.display()))?;

    let entry_point = args
        .entry_point
        .unwrap_or_else(|| config.execution.entry_point.clone());
    if !module.exports_function(&entry_point) {
        bail!("Module does not export `{entry_point}`");
    }

    let mut request = CoordinatedRequest::new(args.method, args.url, args.body.into_bytes());
    for (name, value) in args.headers {
        request.set_header(&name, value);
    }

    info!(
        request_id = %request.id,
        module = %args.module.display(),
        content_hash = module.content_hash(),
        entry_point = %entry_point,
        "Running guest"
    );

    let mut store = create_store(&engine, &config.execution, request.id.clone())?;
    let ticker = engine
        .config()
        .epoch_interruption
        .then(|| spawn_epoch_ticker(engine.clone()));

    let execution = runner
        .execute(&module, &mut store, &entry_point, Some(request), &[])
        .await;
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    let execution = execution.map_err(|err| describe_failure(&config.execution, err))?;

    info!(
        ident = execution.ident,
        fuel_consumed = store.data().metrics.fuel_consumed,
        guest_logs = execution.logs.len(),
        "Guest finished"
    );

    if let ExecutionResult::Trap { message, .. } = &execution.result {
        bail!("Guest trapped: {message}");
    }

    match execution.output {
        Some(GuestOutput::Result(bytes)) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        Some(GuestOutput::Error { code, message }) => {
            bail!("Guest returned error {code}: {message}");
        }
        None => warn!("Guest returned no result"),
    }

    Ok(())
}

/// Name the configured budget when the guest ran past it.
fn describe_failure(config: &ExecutionConfig, err: RuntimeError) -> anyhow::Error {
    if err.is_resource_limit() {
        anyhow!(
            "{err} (limits: timeout {}ms, fuel {})",
            config.timeout().as_millis(),
            config.max_fuel
        )
    } else {
        err.into()
    }
}

/// Drive epoch interruption: one tick per millisecond.
fn spawn_epoch_ticker(engine: WasmEngine) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(1));
        loop {
            interval.tick().await;
            engine.increment_epoch();
        }
    })
}
