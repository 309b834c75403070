//! 权益与礼品链接过期处理 Worker
//!
//! 定期把过了有效期的 active 权益与 pending 链接标记为 expired。
//! 存储层使用 `FOR UPDATE SKIP LOCKED` 分批处理，多实例部署时不会重复处理

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use loyalty_shared::observability::metrics;

use crate::service::GiftService;

/// 过期处理 Worker
pub struct ExpireWorker {
    gifts: Arc<GiftService>,
    /// 轮询间隔
    poll_interval: Duration,
    /// 每批处理的最大记录数
    batch_size: i64,
    shutdown: watch::Receiver<bool>,
}

impl ExpireWorker {
    pub fn new(
        gifts: Arc<GiftService>,
        poll_interval_secs: u64,
        batch_size: i64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gifts,
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_size: batch_size.max(1),
            shutdown,
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults(gifts: Arc<GiftService>, shutdown: watch::Receiver<bool>) -> Self {
        Self::new(gifts, 300, 1000, shutdown)
    }

    /// 执行一轮扫描，批次写满时继续下一批
    pub async fn run_once(&self) {
        loop {
            match self.gifts.expire_overdue(self.batch_size).await {
                Ok(report) => {
                    let touched = report.benefits_expired + report.links_expired;
                    if touched < self.batch_size as u64 {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "处理过期权益出错");
                    break;
                }
            }
        }
    }

    /// 主循环：直到收到关闭信号
    pub async fn run(mut self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "ExpireWorker 已启动"
        );

        while !*self.shutdown.borrow() {
            self.run_once().await;

            // 记录 Worker 健康状态
            metrics::set_worker_last_run("expire_worker");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("ExpireWorker 已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GiftKind, GiftLink, GiftLinkStatus, RecipientMode};
    use crate::notification::LogNotifier;
    use crate::repository::{LoyaltyStore, MemoryLoyaltyStore};
    use chrono::Utc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_run_once_expires_overdue_links() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let now = Utc::now();
        let link = store.seed_gift_link(GiftLink::new(
            "OLD1",
            GiftKind::Points,
            RecipientMode::Single,
            50,
            now - chrono::Duration::hours(1),
            now - chrono::Duration::days(3),
        ));

        let gifts = Arc::new(GiftService::new(
            store.clone(),
            Arc::new(LogNotifier),
            Arc::new(Notify::new()),
            365,
        ));
        let (_tx, rx) = watch::channel(false);
        let worker = ExpireWorker::new(gifts, 60, 10, rx);
        worker.run_once().await;

        let stored = store.get_gift_link(&link.code).await.unwrap().unwrap();
        assert_eq!(stored.status, GiftLinkStatus::Expired);
    }
}
