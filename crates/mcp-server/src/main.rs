//! rule-mcp 服务入口

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mcp_shared::config::{AppConfig, StorageBackend};
use mcp_shared::error::{StartupError, exit_code};
use mcp_shared::observability;
use rule_engine::{CacheType, CachedRuleEngine, EngineConfig};
use rule_mcp::cli::{Cli, Commands, ServerArgs};
use rule_mcp::{McpServer, MemoryRulesetStore, PostgresRulesetStore, RuleOrchestrator, RulesetStore};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "rule-mcp";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("创建 tokio 运行时失败: {e}");
            return ExitCode::from(exit_code::GENERIC);
        }
    };

    let result = match cli.command {
        Commands::Server(args) => runtime.block_on(run_server(args)),
    };
    release_runtime(runtime);

    match result {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("rule-mcp 退出 [{}]: {e}", e.code());
            ExitCode::from(e.exit_code())
        }
    }
}

/// 释放运行时，不等待阻塞线程池
///
/// stdio 传输停止后，阻塞在 stdin 上的读取线程无法被唤醒，等待它只会拖慢退出。
fn release_runtime(runtime: tokio::runtime::Runtime) {
    runtime.shutdown_background();
}

async fn run_server(args: ServerArgs) -> Result<(), StartupError> {
    let mut config = AppConfig::load(SERVICE_NAME)?;
    args.apply(&mut config);
    config.validate()?;

    let _guard = observability::init(&config.service_name, &config.observability)
        .await
        .map_err(|e: anyhow::Error| StartupError::Other(format!("{e:#}")))?;

    info!(
        environment = %config.environment,
        transport = %config.transport.kind,
        storage = %config.storage.backend,
        "Starting {}",
        config.service_name
    );

    let cache_type = config.engine.cache_type.parse::<CacheType>().unwrap_or_else(|e| {
        warn!(cache_type = %config.engine.cache_type, error = %e, "未知的缓存类型，使用 LRU");
        CacheType::Lru
    });
    let engine = Arc::new(CachedRuleEngine::new(EngineConfig {
        cache_type,
        cache_size: config.engine.cache_size,
        ttl: Duration::from_secs(config.engine.ttl_seconds),
        cleanup_interval: Duration::from_secs(config.engine.cleanup_interval_seconds),
        max_cycles: config.engine.max_cycles,
        trace: config.engine.trace,
    }));

    let store: Arc<dyn RulesetStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryRulesetStore::new()),
        StorageBackend::Postgresql => {
            let url = config.storage.url.as_deref().unwrap_or_default();
            let store = PostgresRulesetStore::connect(
                url,
                config.storage.max_connections,
                Duration::from_secs(config.storage.connect_timeout_seconds),
            )
            .await
            .map_err(|e| StartupError::Storage(e.to_string()))?;
            Arc::new(store)
        }
    };

    let orchestrator = RuleOrchestrator::new(store, engine.clone());
    orchestrator
        .register_all()
        .await
        .map_err(|e| StartupError::Storage(e.to_string()))?;

    let (stop_cleanup, cleanup_rx) = watch::channel(false);
    let cleanup = engine.spawn_cleanup(cleanup_rx);

    if config.transport.auth_token.is_some() {
        warn!("已配置 auth_token，但当前版本不会校验请求令牌");
    }

    let mut server = McpServer::new(orchestrator)
        .with_shutdown_grace(Duration::from_secs(config.transport.shutdown_grace_seconds));
    server
        .register_tools()
        .map_err(|e| StartupError::Transport(e.to_string()))?;

    let result = server.run_until(&config.transport, shutdown_signal()).await;

    stop_cleanup.send_replace(true);
    if let Some(handle) = cleanup {
        if let Err(e) = handle.await {
            warn!(error = %e, "缓存清理任务异常退出");
        }
    }

    match result {
        Ok(()) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "服务器异常退出");
            Err(StartupError::Transport(e.to_string()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
