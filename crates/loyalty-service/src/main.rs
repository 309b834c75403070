//! 积分账本服务
//!
//! 提供积分、兑换、礼品链接 REST API 与工作台 Webhook，并运行同步与过期处理 Worker。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use loyalty_core::api::{self, AppState};
use loyalty_core::notification::LogNotifier;
use loyalty_core::repository::PgLoyaltyStore;
use loyalty_core::sync::{SyncOperations, SyncWorker};
use loyalty_core::worker::ExpireWorker;
use loyalty_core::workspace::HttpWorkspaceClient;
use loyalty_shared::{
    config::AppConfig, database::Database, observability, retry::RetryPolicy,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "loyalty-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 缺少凭证或关键配置时直接退出，不带着残缺配置启动
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config.validate().context("配置校验失败")?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    // 初始化基础设施
    let connect_policy = RetryPolicy::from_sync_config(&config.sync);
    let db = Database::connect_with_retry(&config.database, &connect_policy).await?;
    db.migrate().await.context("数据库迁移失败")?;

    let store = Arc::new(PgLoyaltyStore::new(db.pool().clone()));
    let workspace = Arc::new(HttpWorkspaceClient::new(&config.workspace)?);

    let state = AppState::new(store.clone(), workspace.clone(), Arc::new(LogNotifier), &config)
        .with_database(db.clone());

    // 后台 Worker 共享同一个关闭信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let executor = Arc::new(SyncOperations::new(
        store.clone(),
        workspace,
        config.workspace.clone(),
    ));
    for i in 0..config.sync.workers.max(1) {
        let worker = SyncWorker::new(
            format!("sync-{i}"),
            state.sync_queue.clone(),
            executor.clone(),
            Duration::from_millis(config.sync.poll_interval_ms),
            state.sync_wake.clone(),
            shutdown_rx.clone(),
        );
        workers.push(tokio::spawn(worker.run()));
    }

    let expire_worker = ExpireWorker::new(
        state.gifts.clone(),
        config.loyalty.expire_sweep_interval_secs,
        1000,
        shutdown_rx.clone(),
    );
    workers.push(tokio::spawn(expire_worker.run()));

    let app = api::app(state).layer(cors_layer(&config));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接，等待已有请求处理完毕，再通知 Worker 在条目之间退出
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if shutdown_tx.send(true).is_err() {
        warn!("Worker 已全部退出");
    }
    for handle in workers {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker 异常退出");
        }
    }

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// CORS 配置：通过 LOYALTY_CORS_ORIGINS 环境变量控制允许的来源
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let allowed_origins = std::env::var("LOYALTY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:5173".to_string());

    if allowed_origins == "*" {
        if config.is_production() {
            warn!("LOYALTY_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号（SIGTERM 或 Ctrl+C）
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
