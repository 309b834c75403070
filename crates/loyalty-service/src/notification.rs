//! 业务通知
//!
//! 兑换与礼品发放成功后调用；通知失败只记录日志，不影响已提交的业务结果

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{Client, GiftRedemption, Redemption};

/// 通知发送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 目录兑换成功
    async fn redemption_created(&self, client: &Client, redemption: &Redemption) -> Result<()>;

    /// 礼品已发放
    async fn gift_granted(&self, client_id: i64, grant: &GiftRedemption) -> Result<()>;
}

/// 仅写日志的通知实现
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn redemption_created(&self, client: &Client, redemption: &Redemption) -> Result<()> {
        info!(
            client_id = client.id,
            redemption_id = redemption.id,
            points_spent = redemption.points_spent,
            balance = client.balance,
            "兑换通知已发送"
        );
        Ok(())
    }

    async fn gift_granted(&self, client_id: i64, grant: &GiftRedemption) -> Result<()> {
        info!(
            client_id = client_id,
            code = %grant.link.code,
            benefit_id = grant.benefit.id,
            "礼品通知已发送"
        );
        Ok(())
    }
}

/// 发送结果只记录，不向上传播
pub(crate) fn log_failure(kind: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(notification = kind, error = %e, "通知发送失败");
    }
}
