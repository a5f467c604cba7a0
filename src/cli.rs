use crate::{
    config::Config,
    orchestrator::{ConversionRequest, Orchestrator},
    registry::Registry,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "slidedown")]
#[command(about = "Convert PPT/PPTX to zipped Markdown through pluggable external converters")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./slidedown.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Overrides server.bind.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Report which backends are usable on this host.
    Doctor {},
    /// Convert one file without the HTTP layer.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        backend: Option<String>,
        /// Archive path; defaults to the suggested name in the current dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = Config::resolve(args.config.as_deref())?;
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    let registry = Arc::new(
        Registry::from_config(&cfg).with_context(|| "building backend registry")?,
    );

    match &args.cmd {
        Command::Serve { bind } => serve(&cfg, registry, bind.as_deref()),
        Command::Doctor {} => doctor(&registry),
        Command::Convert {
            input,
            backend,
            out,
        } => convert(&cfg, registry, input, backend.as_deref(), out.as_deref()),
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("logs").join("slidedown.log"))
}

fn serve(cfg: &Config, registry: Arc<Registry>, bind: Option<&str>) -> Result<()> {
    let bind = bind.unwrap_or(cfg.server.bind.as_str()).to_string();
    for status in registry.describe(false) {
        if status.available {
            info!("backend {} ready ({})", status.descriptor.id, status.descriptor.program);
        } else {
            info!(
                "backend {} unavailable: {}",
                status.descriptor.id,
                status.detail.as_deref().unwrap_or("unknown")
            );
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(cfg, registry));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;
    runtime.block_on(crate::http::serve(cfg, orchestrator, &bind))
}

fn doctor(registry: &Registry) -> Result<()> {
    let statuses = registry.describe(true);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "default_backend": registry.default_backend().as_str(),
            "backends": statuses,
        }))?
    );
    Ok(())
}

fn convert(
    cfg: &Config,
    registry: Arc<Registry>,
    input: &Path,
    backend: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let content =
        std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let orchestrator = Orchestrator::new(cfg, registry);
    let outcome = orchestrator.run(ConversionRequest {
        filename,
        content,
        backend: backend.map(str::to_string),
    })?;

    let out_path = out
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&outcome.filename));
    std::fs::write(&out_path, &outcome.archive.bytes)
        .with_context(|| format!("writing archive: {}", out_path.display()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "request_id": outcome.request_id.to_string(),
            "backend": outcome.backend.as_str(),
            "archive": out_path,
            "sha256": outcome.archive.sha256,
            "markdown_files": outcome.markdown_files,
            "asset_files": outcome.asset_files,
        }))?
    );
    Ok(())
}
