mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use node_engine::{
    Graph, HttpCodeService, HttpCompletionService, HttpTranscriptionService, LogEventSink,
    NodeEngineError, ResponseCache, Runtime, RuntimeBuilder,
};
use node_worker::{TokioProcessSpawner, WorkerError, WorkerServer};

use config::{AppConfig, ConfigError};

/// One host frame
const FRAME: Duration = Duration::from_millis(16);

/// Load a node graph, run it and save it back
#[derive(Debug, Parser)]
#[command(name = "node-runner", version)]
struct Cli {
    /// Directory holding config.json
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Graph file, overrides the config
    #[arg(long)]
    graph: Option<PathBuf>,

    #[arg(long)]
    max_threads: Option<usize>,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Worker server port
    #[arg(long)]
    port: Option<u16>,

    /// Run until the graph settles, save and exit
    #[arg(long)]
    once: bool,
}

#[derive(Debug, thiserror::Error)]
enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] NodeEngineError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("node-runner"))
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn load_config(cli: &Cli) -> Result<(PathBuf, AppConfig), RunnerError> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let mut config = match AppConfig::load(&config_dir).await {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
    };
    config.resolve_paths(&config_dir);

    if let Some(graph) = &cli.graph {
        config.graph_path = graph.clone();
    }
    if let Some(max_threads) = cli.max_threads {
        config.max_threads = max_threads;
    }
    if let Some(timeout) = cli.timeout {
        config.http_timeout_secs = timeout;
    }
    if let Some(port) = cli.port {
        config.worker_port = port;
    }
    Ok((config_dir, config))
}

async fn load_graph(path: &Path) -> Result<Graph, RunnerError> {
    if tokio::fs::try_exists(path).await? {
        Ok(Graph::load(path).await?)
    } else {
        log::info!("{} doesn't exist, starting with an empty graph", path.display());
        Ok(Graph::new())
    }
}

async fn build_runtime(config: &AppConfig) -> Result<Runtime, RunnerError> {
    let engine = config.engine_config();
    let server = WorkerServer::bind(
        engine.worker_port,
        engine.workers_dir.clone(),
        Arc::new(TokioProcessSpawner::new()),
    )
    .await?;
    log::info!(
        "Worker server on port {} serving {}",
        server.port(),
        engine.workers_dir.display()
    );

    let mut builder = RuntimeBuilder::new(engine)
        .graph(load_graph(&config.graph_path).await?)
        .event_sink(Arc::new(LogEventSink))
        .worker_server(Arc::new(server));

    let services = &config.services;
    if let Some(url) = &services.completion_url {
        let cache = response_cache(services.cache_dir.as_deref(), "completion").await?;
        let service = HttpCompletionService::new(url, &services.completion_model, config.http_timeout())?
            .with_cache(cache);
        builder = builder.completion(Arc::new(service));
    }
    if let Some(url) = &services.transcription_url {
        let cache = response_cache(services.cache_dir.as_deref(), "transcription").await?;
        let service = HttpTranscriptionService::new(url, config.http_timeout())?.with_cache(cache);
        builder = builder.transcription(Arc::new(service));
    }
    if let Some(url) = &services.code_url {
        let cache = response_cache(services.cache_dir.as_deref(), "code").await?;
        let service = HttpCodeService::new(url, config.http_timeout())?.with_cache(cache);
        builder = builder.code(Arc::new(service));
    }
    Ok(builder.build()?)
}

async fn response_cache(dir: Option<&Path>, name: &str) -> Result<ResponseCache, RunnerError> {
    match dir {
        Some(dir) => Ok(ResponseCache::open(dir, name).await?),
        None => Ok(ResponseCache::in_memory()),
    }
}

async fn run(cli: Cli) -> Result<(), RunnerError> {
    let (config_dir, config) = load_config(&cli).await?;
    log::info!("Config directory {}", config_dir.display());
    let mut runtime = build_runtime(&config).await?;

    if cli.once {
        runtime.run_until_idle().await;
    } else {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut frame = tokio::time::interval(FRAME);
        loop {
            tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        log::error!("Can't listen for Ctrl-C: {}", e);
                    }
                    log::info!("Shutting down");
                    break;
                }
                _ = frame.tick() => {
                    runtime.tick().await;
                }
            }
        }
    }

    runtime.stop().await;
    runtime.save(&config.graph_path).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
