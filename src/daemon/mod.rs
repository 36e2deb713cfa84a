pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

use crate::models::AppConfig;
use crate::server::{self, AppState};
use crate::tools::ToolContext;

const APP_DIR: &str = "mcp-finnhub";
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the AppConfig:
///   1. --config CLI flag (must exist)
///   2. FINNHUB_CONFIG_DIR/config.json
///   3. Platform config dir (dirs::config_dir()/mcp-finnhub/config.json)
///   4. Defaults
///
/// `FINNHUB_*` environment overrides are applied on top, then the result is
/// validated.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    load_config_with(config_path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(config_path: Option<&Path>, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    resolve_config(config_path, lookup).map(|(config, _)| config)
}

/// Load the config and return the file it was read from, `None` when the
/// defaults were used. The source is reported to the caller instead of logged
/// so it can be recorded after tracing is initialised.
pub fn resolve_config<F>(config_path: Option<&Path>, lookup: F) -> Result<(AppConfig, Option<PathBuf>)>
where
    F: Fn(&str) -> Option<String>,
{
    let source = find_config_file(config_path, &lookup)?;
    let mut config = match &source {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str::<AppConfig>(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => AppConfig::default(),
    };

    config.apply_env_overrides(&lookup);
    config.validate()?;
    Ok((config, source))
}

fn find_config_file<F>(config_path: Option<&Path>, lookup: &F) -> Result<Option<PathBuf>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Some(dir) = lookup("FINNHUB_CONFIG_DIR") {
        let path = PathBuf::from(dir).join("config.json");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.json"))
        .filter(|path| path.exists()))
}

/// Storage root: the configured directory, else the platform data dir.
pub fn resolve_storage_dir(config: &AppConfig) -> PathBuf {
    if let Some(dir) = &config.storage_directory {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber: stderr always, plus `log_file` when it can
/// be opened. `RUST_LOG` takes precedence over `level`.
///
/// Keep the returned guard alive for the process lifetime so buffered file
/// output is flushed.
pub fn init_tracing(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        return None;
    };

    match open_log_file(path) {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);

            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if result.is_ok() {
                tracing::info!("Logging to stderr and {}", path.display());
            }
            Some(guard)
        }
        Err(e) => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            if result.is_ok() {
                tracing::warn!(
                    "Could not open log file {}: {}. Logging to stderr only.",
                    path.display(),
                    e
                );
            }
            None
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

/// Delete expired jobs now and then once per `interval`.
pub fn spawn_cleanup_loop(ctx: Arc<ToolContext>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = ctx.cleanup_jobs().await {
                tracing::warn!("Job cleanup failed: {:#}", e);
            }
        }
    })
}

/// Run the HTTP tool server until Ctrl+C or SIGTERM.
///
/// On shutdown the server stops accepting connections and every in-flight
/// job is cancelled so none is left RUNNING on disk.
pub async fn start_daemon(
    config_path: Option<&Path>,
    storage_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
) -> Result<()> {
    let (mut config, source) = resolve_config(config_path, |name| std::env::var(name).ok())?;

    if let Some(dir) = storage_override {
        config.storage_directory = Some(dir.to_path_buf());
    }
    if let Some(h) = host_override {
        config.host = h.to_string();
    }
    if let Some(p) = port_override {
        config.port = p;
    }

    let _log_guard = init_tracing(&config.log_level, config.log_file.as_deref());
    match &source {
        Some(path) => tracing::info!("Loaded config from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    if config.finnhub_api_key.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "FINNHUB_API_KEY is not set. Provide it in the config file or environment."
        ));
    }

    let storage_dir = resolve_storage_dir(&config);
    tracing::info!("Storage directory: {}", storage_dir.display());

    let bind_addr = format!("{}:{}", config.host, config.port);
    let ctx = Arc::new(ToolContext::new(config, storage_dir).await?);

    let cleanup_handle = spawn_cleanup_loop(Arc::clone(&ctx), CLEANUP_INTERVAL);

    let state = Arc::new(AppState {
        ctx: Arc::clone(&ctx),
        start_time: Instant::now(),
    });
    let router = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    wait_for_signal().await?;

    let _ = shutdown_tx.send(());
    cleanup_handle.abort();

    ctx.worker().shutdown(true).await;
    let _ = server_handle.await;

    tracing::info!("Server exited cleanly.");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9999, "safe_token_limit": 5000}"#).unwrap();

        let config = load_config_with(Some(&path), env(&[])).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.safe_token_limit, 5000);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let result = load_config_with(Some(Path::new("/nonexistent/config.json")), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_config_dir_env() {
        let tmp = TempDir::new().expect("create temp dir");
        std::fs::write(tmp.path().join("config.json"), r#"{"max_concurrent_jobs": 2}"#).unwrap();
        let dir = tmp.path().to_string_lossy().to_string();

        let config = load_config_with(None, env(&[("FINNHUB_CONFIG_DIR", dir.as_str())])).unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_resolve_config_reports_source_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9001}"#).unwrap();

        let (config, source) = resolve_config(Some(&path), env(&[])).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(source.as_deref(), Some(path.as_path()));

        let dir = tmp.path().to_string_lossy().to_string();
        let (_, source) = resolve_config(None, env(&[("FINNHUB_CONFIG_DIR", dir.as_str())])).unwrap();
        assert_eq!(source, Some(tmp.path().join("config.json")));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"finnhub_api_key": "from-file", "max_retries": 1}"#).unwrap();

        let config = load_config_with(
            Some(&path),
            env(&[("FINNHUB_API_KEY", "from-env"), ("FINNHUB_MAX_RETRIES", "5")]),
        )
        .unwrap();
        assert_eq!(config.finnhub_api_key, "from-env");
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"safe_token_limit": 10}"#).unwrap();

        let err = load_config_with(Some(&path), env(&[])).unwrap_err();
        assert!(err.to_string().contains("safe_token_limit"), "{}", err);
    }

    #[test]
    fn test_malformed_config_file_fails() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_with(Some(&path), env(&[])).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_storage_dir() {
        let mut config = AppConfig::default();
        config.storage_directory = Some(PathBuf::from("/custom/data"));
        assert_eq!(resolve_storage_dir(&config), PathBuf::from("/custom/data"));

        config.storage_directory = None;
        assert!(resolve_storage_dir(&config).ends_with(APP_DIR));
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("logs").join("server.log");
        open_log_file(&path).expect("open log file");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_loop_removes_expired_jobs() {
        let tmp = TempDir::new().expect("create temp dir");
        let ctx = Arc::new(
            ToolContext::new(AppConfig::default(), tmp.path().to_path_buf())
                .await
                .unwrap(),
        );

        let mut old = crate::models::Job::new("quote", Default::default());
        old.start(None).unwrap();
        old.complete(serde_json::json!(1), None).unwrap();
        old.completed_at = Some(chrono::Utc::now() - chrono::Duration::days(3));
        ctx.store().save(&old).await.unwrap();

        let handle = spawn_cleanup_loop(Arc::clone(&ctx), Duration::from_secs(3600));
        for _ in 0..100 {
            if ctx.store().get(old.id).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(ctx.store().get(old.id).await.unwrap().is_none());
    }
}
