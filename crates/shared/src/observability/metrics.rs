//! Prometheus 指标
//!
//! 业务代码只调用下面的 `record_*` 函数；未安装 recorder 时这些调用是空操作，
//! 测试和关闭指标的部署都无需额外处理。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 指标导出服务，Drop 时停止
pub struct MetricsHandle {
    server: JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server.abort();
    }
}

enum Kind {
    Counter,
    Histogram,
    Gauge,
}

const DESCRIPTIONS: &[(&str, Kind, &str)] = &[
    ("http_requests_total", Kind::Counter, "HTTP requests by method, path and status"),
    ("http_request_duration_seconds", Kind::Histogram, "HTTP request latency"),
    ("ledger_movements_total", Kind::Counter, "Ledger movements by kind and result"),
    ("redemptions_total", Kind::Counter, "Catalog redemptions by result"),
    ("redemption_duration_seconds", Kind::Histogram, "Catalog redemption latency"),
    ("gift_redemptions_total", Kind::Counter, "Gift link redemptions by outcome"),
    ("sync_items_total", Kind::Counter, "Outbound sync items processed by outcome"),
    ("sync_dead_letters_total", Kind::Counter, "Sync items moved to dead letter"),
    ("webhook_events_total", Kind::Counter, "Inbound workspace events by effect and outcome"),
    ("worker_last_run_timestamp", Kind::Gauge, "Unix time of the last background worker pass"),
];

/// 安装全局 recorder 并在 `metrics_port` 上暴露 `/metrics`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("安装 Prometheus recorder 失败")?;

    for (name, kind, help) in DESCRIPTIONS {
        match kind {
            Kind::Counter => metrics::describe_counter!(*name, *help),
            Kind::Histogram => metrics::describe_histogram!(*name, *help),
            Kind::Gauge => metrics::describe_gauge!(*name, *help),
        }
    }
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server = serve(addr, handle).await?;
    Ok(MetricsHandle { server })
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) -> Result<JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("指标端口 {addr} 绑定失败"))?;
    info!(%addr, "指标导出已启动");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录账本流水
#[inline]
pub fn record_movement(kind: &str, status: &str) {
    metrics::counter!(
        "ledger_movements_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录目录兑换
#[inline]
pub fn record_redemption(status: &str, duration_secs: f64) {
    metrics::counter!("redemptions_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("redemption_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

/// 记录礼品链接兑换
#[inline]
pub fn record_gift_redemption(outcome: &str) {
    metrics::counter!("gift_redemptions_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录同步队列条目处理结果
#[inline]
pub fn record_sync_item(operation: &str, outcome: &str) {
    metrics::counter!(
        "sync_items_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录进入死信的条目
#[inline]
pub fn record_dead_letter(operation: &str) {
    metrics::counter!("sync_dead_letters_total", "operation" => operation.to_string())
        .increment(1);
}

/// 记录入站 webhook 事件
#[inline]
pub fn record_webhook_event(effect: &str, outcome: &str) {
    metrics::counter!(
        "webhook_events_total",
        "effect" => effect.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录后台任务最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时调用同样安全
        record_http_request("GET", "/api/health", 200, 0.1);
        record_movement("earned", "success");
        record_redemption("success", 0.3);
        record_gift_redemption("issued");
        record_sync_item("sync_client", "completed");
        record_dead_letter("sync_client");
        record_webhook_event("redemption_status", "success");
        set_worker_last_run("sync_worker");
    }
}
