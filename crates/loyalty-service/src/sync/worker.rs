//! 同步队列 Worker
//!
//! 按固定间隔或唤醒信号排空队列。可启动多个实例，认领由存储层保证互斥。
//! 收到关闭信号后在当前条目处理完成后退出，不会中断正在执行的同步

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use loyalty_shared::observability::metrics;

use crate::error::Result;
use crate::sync::operations::SyncExecutor;
use crate::sync::queue::SyncQueue;

pub struct SyncWorker {
    name: String,
    queue: Arc<SyncQueue>,
    executor: Arc<dyn SyncExecutor>,
    /// 空闲轮询间隔
    poll_interval: Duration,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl SyncWorker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<SyncQueue>,
        executor: Arc<dyn SyncExecutor>,
        poll_interval: Duration,
        wake: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            executor,
            poll_interval,
            wake,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 处理一条到期条目，返回是否取到了条目
    pub async fn run_once(&self) -> Result<bool> {
        let Some(item) = self.queue.dequeue_next().await? else {
            return Ok(false);
        };

        debug!(
            worker = %self.name,
            item_id = item.id,
            operation = item.operation.as_str(),
            resource_id = item.resource_id,
            "处理同步条目"
        );

        match self.executor.execute(&item).await {
            Ok(()) => {
                self.queue.complete(item.id, true, None).await?;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(worker = %self.name, item_id = item.id, error = %e, "同步失败");
                } else {
                    error!(worker = %self.name, item_id = item.id, error = %e, "同步失败");
                }
                self.queue
                    .complete(item.id, false, Some(&e.to_string()))
                    .await?;
            }
        }
        Ok(true)
    }

    /// 排空当前到期条目；关闭信号只在条目之间检查
    async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while !self.stopping() && self.run_once().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// 主循环：直到收到关闭信号
    pub async fn run(mut self) {
        info!(
            worker = %self.name,
            poll_interval = ?self.poll_interval,
            "SyncWorker 已启动"
        );

        while !self.stopping() {
            if let Err(e) = self.queue.requeue_stale().await {
                error!(worker = %self.name, error = %e, "回收过期租约出错");
            }

            match self.drain().await {
                Ok(0) => {}
                Ok(processed) => debug!(worker = %self.name, processed, "本轮同步完成"),
                Err(e) => error!(worker = %self.name, error = %e, "处理同步队列出错"),
            }

            metrics::set_worker_last_run("sync_worker");

            if self.stopping() {
                break;
            }

            let wake = self.wake.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = wake.notified() => {}
                changed = self.shutdown.changed() => {
                    // 发送端已释放，视同关闭
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker = %self.name, "SyncWorker 已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoyaltyError;
    use crate::models::{SyncOperation, SyncStatus};
    use crate::repository::MemoryLoyaltyStore;
    use crate::sync::operations::MockSyncExecutor;
    use loyalty_shared::retry::RetryPolicy;
    use serde_json::Value;

    fn worker(
        store: Arc<MemoryLoyaltyStore>,
        executor: MockSyncExecutor,
    ) -> (SyncWorker, watch::Sender<bool>) {
        let queue = Arc::new(SyncQueue::with_policy(store, RetryPolicy::immediate(5), 5));
        let (tx, rx) = watch::channel(false);
        let worker = SyncWorker::new(
            "sync-test",
            queue,
            Arc::new(executor),
            Duration::from_millis(10),
            Arc::new(Notify::new()),
            rx,
        );
        (worker, tx)
    }

    #[tokio::test]
    async fn test_run_once_completes_item() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let mut executor = MockSyncExecutor::new();
        executor.expect_execute().times(1).returning(|_| Ok(()));
        let (worker, _tx) = worker(store.clone(), executor);

        worker
            .queue
            .enqueue(SyncOperation::SyncClient, 1, Value::Null)
            .await
            .unwrap();

        assert!(worker.run_once().await.unwrap());
        assert!(!worker.run_once().await.unwrap());
        assert_eq!(store.sync_items()[0].status, SyncStatus::Done);
    }

    #[tokio::test]
    async fn test_failure_recorded_with_error_text() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let mut executor = MockSyncExecutor::new();
        executor
            .expect_execute()
            .returning(|_| Err(LoyaltyError::WorkspaceTimeout("create_page".to_string())));
        let (worker, _tx) = worker(store.clone(), executor);

        worker
            .queue
            .enqueue(SyncOperation::CreateBenefitTicket, 7, Value::Null)
            .await
            .unwrap();
        assert!(worker.run_once().await.unwrap());

        let item = &store.sync_items()[0];
        assert_eq!(item.status, SyncStatus::Pending);
        assert_eq!(item.retry_count, 1);
        assert!(item.last_error.as_deref().unwrap().contains("create_page"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let mut executor = MockSyncExecutor::new();
        executor.expect_execute().returning(|_| Ok(()));
        let (worker, tx) = worker(store, executor);

        let handle = tokio::spawn(worker.run());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
