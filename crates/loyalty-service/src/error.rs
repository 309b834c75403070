//! 积分服务错误类型
//!
//! 业务拒绝（余额不足、库存不足、链接已兑换等）与系统错误（数据库、外部平台）分开，
//! 前者同步返回具体原因且不重试，后者交由队列退避重试或以通用提示返回

use loyalty_shared::error::InfraError;
use thiserror::Error;

use crate::models::RedemptionStatus;

/// 积分服务错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 客户与账本 ===
    #[error("客户不存在: {0}")]
    ClientNotFound(i64),

    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("无效的积分变动: {0}")]
    InvalidMovement(String),

    // === 目录兑换 ===
    #[error("目录项不存在: {0}")]
    ItemNotFound(i64),

    #[error("目录项不可兑换: item_id={0}")]
    ItemUnavailable(i64),

    #[error("兑换记录不存在: {0}")]
    RedemptionNotFound(i64),

    #[error("兑换状态不允许此变更: redemption_id={redemption_id}, {from:?} -> {to:?}")]
    InvalidStatusTransition {
        redemption_id: i64,
        from: RedemptionStatus,
        to: RedemptionStatus,
    },

    // === 礼品链接 ===
    #[error("礼品链接不存在: {0}")]
    GiftLinkNotFound(String),

    #[error("礼品链接已被兑换: {0}")]
    AlreadyRedeemed(String),

    #[error("礼品链接已过期: {0}")]
    Expired(String),

    #[error("活动名额已满: {0}")]
    CampaignExhausted(String),

    #[error("该礼品链接不属于此手机号: {0}")]
    WrongRecipient(String),

    #[error("手机号未注册为会员: {0}")]
    ClientNotRegistered(String),

    #[error("客户已参与过该活动: code={code}, client_id={client_id}")]
    AlreadyRedeemedByClient { code: String, client_id: i64 },

    // === 权益 ===
    #[error("权益不存在: {0}")]
    BenefitNotFound(i64),

    #[error("权益不可使用: benefit_id={benefit_id}, {reason}")]
    BenefitNotUsable { benefit_id: i64, reason: String },

    // === 同步队列 ===
    #[error("同步条目不存在: {0}")]
    SyncItemNotFound(i64),

    #[error("同步条目不在死信状态: {0}")]
    SyncItemNotDeadLetter(i64),

    // === 幂等与数据完整性 ===
    #[error("事件已处理: {origin}/{record_id}/{event_type}")]
    DuplicateEvent {
        origin: String,
        record_id: String,
        event_type: String,
    },

    #[error("数据不完整: {0}")]
    Integrity(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("工作台请求失败: status={status:?}, {message}")]
    Workspace {
        status: Option<u16>,
        message: String,
    },

    #[error("工作台请求超时: {0}")]
    WorkspaceTimeout(String),

    #[error("兑换失败: {cause}")]
    RedemptionFailed {
        #[source]
        cause: Box<LoyaltyError>,
    },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 包装兑换流程中的意外错误，业务错误原样返回
    pub fn into_redemption_failure(self) -> Self {
        if self.is_business_error() || matches!(self, Self::RedemptionFailed { .. }) {
            self
        } else {
            Self::RedemptionFailed {
                cause: Box::new(self),
            }
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::Workspace { .. } | Self::WorkspaceTimeout(_) => true,
            Self::RedemptionFailed { cause } => cause.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Workspace { .. }
                | Self::WorkspaceTimeout(_)
                | Self::RedemptionFailed { .. }
                | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidMovement(_) => "INVALID_MOVEMENT",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::ItemUnavailable(_) => "ITEM_UNAVAILABLE",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::GiftLinkNotFound(_) => "GIFT_LINK_NOT_FOUND",
            Self::AlreadyRedeemed(_) => "ALREADY_REDEEMED",
            Self::Expired(_) => "EXPIRED",
            Self::CampaignExhausted(_) => "CAMPAIGN_EXHAUSTED",
            Self::WrongRecipient(_) => "WRONG_RECIPIENT",
            Self::ClientNotRegistered(_) => "CLIENT_NOT_REGISTERED",
            Self::AlreadyRedeemedByClient { .. } => "ALREADY_REDEEMED_BY_CLIENT",
            Self::BenefitNotFound(_) => "BENEFIT_NOT_FOUND",
            Self::BenefitNotUsable { .. } => "BENEFIT_NOT_USABLE",
            Self::SyncItemNotFound(_) => "SYNC_ITEM_NOT_FOUND",
            Self::SyncItemNotDeadLetter(_) => "SYNC_ITEM_NOT_DEAD_LETTER",
            Self::DuplicateEvent { .. } => "DUPLICATE_EVENT",
            Self::Integrity(_) => "INTEGRITY_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Workspace { .. } => "WORKSPACE_ERROR",
            Self::WorkspaceTimeout(_) => "WORKSPACE_TIMEOUT",
            Self::RedemptionFailed { .. } => "REDEMPTION_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 从共享基础设施错误转换
impl From<InfraError> for LoyaltyError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Database(e) => Self::Database(e),
            InfraError::ExternalService {
                service,
                status,
                message,
            } => Self::Workspace {
                status,
                message: format!("{}: {}", service, message),
            },
            InfraError::ExternalServiceTimeout { service } => Self::WorkspaceTimeout(service),
            InfraError::Config(message) => Self::Internal(message),
        }
    }
}
