use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use regcheck_engine::{
    ComplianceService, EngineConfig, EngineError, FeedbackRequest, ScenarioContext,
};
use regcheck_oracle::OracleConfig;
use regcheck_protocol::{serialize_json, serialize_json_pretty};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod http_api;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serialize_json_pretty(value)?
    } else {
        serialize_json(value)?
    };
    print_stdout(&text)
}

/// Engine failures keep their stable code visible on stderr.
fn engine_failure(err: EngineError) -> anyhow::Error {
    anyhow::anyhow!("[{}] {err}", err.code())
}

#[derive(Parser)]
#[command(name = "regcheck")]
#[command(about = "Check documents against regulation-derived requirements", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Data directory (overrides REGCHECK_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Reference regulation document; repeat for several (overrides REGCHECK_REFERENCE_DOCS)
    #[arg(long = "reference-doc", global = true)]
    reference_docs: Vec<PathBuf>,

    /// Oracle model id (overrides REGCHECK_ORACLE_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze documents against the requirement catalog
    Analyze(AnalyzeArgs),

    /// Record a correction for one requirement
    Feedback(FeedbackArgs),

    /// Show or regenerate the requirement catalog
    #[command(subcommand)]
    Requirements(RequirementsCommand),

    /// Generate the requirement catalog unless one already exists
    Bootstrap,

    /// Serve the analysis API over HTTP
    ServeHttp(ServeArgs),
}

#[derive(Args)]
struct ScenarioArgs {
    /// Invoice scenario, e.g. TICARIFATURA
    #[arg(long)]
    scenario: String,

    /// Invoice type, e.g. SATIS
    #[arg(long)]
    invoice_type: String,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Documents to analyze
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    #[command(flatten)]
    ctx: ScenarioArgs,
}

#[derive(Args)]
struct FeedbackArgs {
    /// Requirement text as shown in the analysis output
    #[arg(long)]
    requirement: String,

    #[command(flatten)]
    ctx: ScenarioArgs,

    /// Corrected presence verdict
    #[arg(long)]
    present: Option<bool>,

    /// Corrected evidence text
    #[arg(long)]
    evidence: Option<String>,
}

#[derive(Subcommand)]
enum RequirementsCommand {
    /// Print the stored catalog
    Show,
    /// Rebuild the catalog from the reference documents, replacing the stored one
    Regenerate,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address, e.g. 127.0.0.1:7710
    #[arg(long, default_value = "127.0.0.1:7710")]
    bind: String,

    /// Allow binding to non-loopback addresses (requires --auth-token)
    #[arg(long)]
    public: bool,

    /// Require Authorization: Bearer <token> on all requests
    #[arg(long, env = http_api::AUTH_TOKEN_ENV, hide_env_values = true)]
    auth_token: Option<String>,

    /// Largest accepted request body in bytes; documents are posted base64-encoded
    #[arg(
        long,
        env = http_api::MAX_BODY_BYTES_ENV,
        default_value_t = http_api::DEFAULT_MAX_BODY_BYTES
    )]
    max_body_bytes: usize,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match &cli.command {
        Commands::Analyze(args) => run_analyze(&cli, args).await,
        Commands::Feedback(args) => run_feedback(&cli, args).await,
        Commands::Requirements(RequirementsCommand::Show) => run_requirements_show(&cli).await,
        Commands::Requirements(RequirementsCommand::Regenerate) => {
            run_requirements_regenerate(&cli).await
        }
        Commands::Bootstrap => run_bootstrap(&cli).await,
        Commands::ServeHttp(args) => serve_http(&cli, args).await,
    }
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().map_err(engine_failure)?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if !cli.reference_docs.is_empty() {
        config.reference_docs = cli.reference_docs.clone();
    }
    Ok(config)
}

fn oracle_config(cli: &Cli) -> Result<OracleConfig> {
    let mut config = OracleConfig::from_env().context("Invalid oracle configuration")?;
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    Ok(config)
}

async fn open_service(cli: &Cli) -> Result<ComplianceService> {
    ComplianceService::with_gateway(engine_config(cli)?, oracle_config(cli)?)
        .await
        .map_err(engine_failure)
}

/// Cancelled on Ctrl-C so in-flight oracle work stops at the next await point.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_analyze(cli: &Cli, args: &AnalyzeArgs) -> Result<()> {
    let service = open_service(cli).await?;
    let ctx = ScenarioContext::new(&args.ctx.scenario, &args.ctx.invoice_type);
    let report = service
        .analyze_documents(&args.paths, &ctx, &interrupt_token())
        .await
        .map_err(engine_failure)?;
    print_json(&report, cli.pretty)
}

async fn run_feedback(cli: &Cli, args: &FeedbackArgs) -> Result<()> {
    let service = open_service(cli).await?;
    let record = service
        .record_feedback(FeedbackRequest {
            requirement: args.requirement.clone(),
            scenario: args.ctx.scenario.clone(),
            invoice_type: args.ctx.invoice_type.clone(),
            present_override: args.present,
            evidence_override: args.evidence.clone(),
        })
        .await
        .map_err(engine_failure)?;
    print_json(&record, cli.pretty)
}

async fn run_requirements_show(cli: &Cli) -> Result<()> {
    let service = open_service(cli).await?;
    let Some(catalog) = service.requirements().await.map_err(engine_failure)? else {
        anyhow::bail!(
            "No requirement catalog at {}. Run `regcheck requirements regenerate` or `regcheck bootstrap`.",
            service.layout().requirements_path().display()
        )
    };
    print_json(&catalog, cli.pretty)
}

async fn run_requirements_regenerate(cli: &Cli) -> Result<()> {
    let service = open_service(cli).await?;
    let catalog = service
        .regenerate_requirements(&interrupt_token())
        .await
        .map_err(engine_failure)?;
    print_json(&catalog, cli.pretty)
}

async fn run_bootstrap(cli: &Cli) -> Result<()> {
    let service = open_service(cli).await?;
    let outcome = service
        .bootstrap(&interrupt_token())
        .await
        .map_err(engine_failure)?;
    print_json(&outcome, cli.pretty)
}

/// Bind `bind`, refusing non-loopback interfaces unless `public` is set.
async fn bind_listener(bind: &str, public: bool) -> Result<tokio::net::TcpListener> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("Failed to resolve bind address {bind}"))?
        .collect();
    if resolved.is_empty() {
        anyhow::bail!("Bind address {bind} resolved to nothing")
    }
    if let Some(exposed) = resolved.iter().find(|addr| !addr.ip().is_loopback()) {
        if !public {
            anyhow::bail!(
                "Refusing to bind {exposed} ({bind}): not a loopback address. Pass --public with \
                 --auth-token or {} to expose the API.",
                http_api::AUTH_TOKEN_ENV
            )
        }
    }
    tokio::net::TcpListener::bind(resolved.as_slice())
        .await
        .with_context(|| format!("Failed to bind {bind}"))
}

async fn serve_http(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let auth_token = match args.auth_token.as_deref() {
        Some(secret) => Some(
            http_api::ApiToken::new(secret)
                .ok_or_else(|| anyhow::anyhow!("--auth-token must not be blank"))?,
        ),
        None => None,
    };
    if args.public && auth_token.is_none() {
        anyhow::bail!(
            "--public requires an auth token: set --auth-token or export {}",
            http_api::AUTH_TOKEN_ENV
        );
    }
    let listener = bind_listener(&args.bind, args.public).await?;

    let service = Arc::new(open_service(cli).await?);
    let shutdown = service.shutdown_token().clone();
    let bootstrap = service.spawn_bootstrap(shutdown.child_token());

    let has_auth = auth_token.is_some();
    let state = Arc::new(http_api::HttpState {
        service,
        auth_token,
    });
    let app = http_api::router(state, args.max_body_bytes);

    let base_url = format!("http://{}", listener.local_addr()?);
    print_stdout(&format!("Serving analysis API: {base_url}/analyze"))?;
    print_stdout(&format!("Health endpoint: {base_url}/health"))?;
    if has_auth {
        print_stdout(&format!(
            "Auth enabled: add header 'Authorization: Bearer ${}'",
            http_api::AUTH_TOKEN_ENV
        ))?;
    }
    if args.public {
        print_stdout("Public bind enabled (--public)")?;
    }
    log::info!("request body limit: {} bytes", args.max_body_bytes);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutting down");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = bootstrap.await {
        log::warn!("bootstrap task ended abnormally: {err}");
    }
    Ok(())
}
