//! 日志与指标的初始化入口
//!
//! 服务启动时调用一次 [`init`]，返回的守卫需活到进程退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 持有指标导出服务；关闭指标时为空
pub struct ObservabilityGuard {
    metrics: Option<metrics::MetricsHandle>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if self.metrics.is_some() {
            info!("指标导出已停止");
        }
    }
}

pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        log_format = %config.log_format,
        metrics_port = metrics.as_ref().map(|_| config.metrics_port),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard { metrics })
}
