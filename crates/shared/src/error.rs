//! 基础设施错误
//!
//! 只描述连接、配置和外部平台层面的失败；业务错误由服务自己的错误类型承载。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("配置错误: {0}")]
    Config(String),

    /// 外部平台返回了非成功响应；`status` 为空表示连接层失败
    #[error("外部服务错误: {service} status={status:?} - {message}")]
    ExternalService {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },
}

pub type Result<T> = std::result::Result<T, InfraError>;

impl InfraError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
        }
    }

    /// 连接失败、超时、429 与 5xx 可退避重试，其余 4xx 重试也不会成功
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::ExternalServiceTimeout { .. } => true,
            Self::ExternalService { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Self::Config(_) => false,
        }
    }
}

impl From<config::ConfigError> for InfraError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(status: Option<u16>) -> InfraError {
        InfraError::ExternalService {
            service: "workspace".to_string(),
            status,
            message: "rejected".to_string(),
        }
    }

    #[test]
    fn test_error_code() {
        assert_eq!(InfraError::Config("x".into()).code(), "CONFIG_ERROR");
        assert_eq!(workspace(Some(400)).code(), "EXTERNAL_SERVICE_ERROR");
        assert_eq!(
            InfraError::Database(sqlx::Error::PoolTimedOut).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(InfraError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            InfraError::ExternalServiceTimeout {
                service: "workspace".to_string()
            }
            .is_retryable()
        );
        assert!(workspace(None).is_retryable());
        assert!(workspace(Some(503)).is_retryable());
        assert!(workspace(Some(429)).is_retryable());
        assert!(!workspace(Some(404)).is_retryable());
        assert!(!InfraError::Config("missing".to_string()).is_retryable());
    }
}
