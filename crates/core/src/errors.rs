use std::fmt;

use thiserror::Error;

/// 数据传输管道错误类型定义
#[derive(Debug, Error)]
pub enum DatatransError {
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("{entity}未找到: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} 状态不允许此操作: 期望 {expected}, 实际 {actual}")]
    InvalidState {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("暂时性错误: {0}")]
    Transient(String),

    #[error("永久性错误: {0}")]
    Permanent(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误分类，决定调用方的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 同步拒绝，永不重试
    InvalidArgument,
    NotFound,
    InvalidState,
    /// 在分发或处理边界按退避策略重试
    Transient,
    /// 标记任务失败并保留错误信息
    Permanent,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Permanent => "PERMANENT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DatatransError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DatatransError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        expected: impl fmt::Debug,
        actual: impl fmt::Debug,
    ) -> Self {
        DatatransError::InvalidState {
            entity,
            id: id.to_string(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatatransError::InvalidArgument(_) | DatatransError::Configuration(_) => {
                ErrorKind::InvalidArgument
            }
            DatatransError::NotFound { .. } => ErrorKind::NotFound,
            DatatransError::InvalidState { .. } => ErrorKind::InvalidState,
            DatatransError::Transient(_) | DatatransError::MessageQueue(_) => ErrorKind::Transient,
            DatatransError::Database(e) => match e {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => ErrorKind::Transient,
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                _ => ErrorKind::Permanent,
            },
            DatatransError::Permanent(_)
            | DatatransError::Serialization(_)
            | DatatransError::Internal(_) => ErrorKind::Permanent,
        }
    }

    /// 只有暂时性错误可以重试
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for DatatransError {
    fn from(e: serde_json::Error) -> Self {
        DatatransError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type DatatransResult<T> = std::result::Result<T, DatatransError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            DatatransError::InvalidArgument("batch".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            DatatransError::not_found("Mission", "m-1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DatatransError::MessageQueue("down".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DatatransError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DatatransError::Permanent("rejected".into()).kind(),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(DatatransError::Transient("timeout".into()).is_retryable());
        assert!(!DatatransError::Permanent("bad doc".into()).is_retryable());
        assert!(!DatatransError::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DatatransError::not_found("Task", 42);
        assert_eq!(err.to_string(), "Task未找到: 42");
    }
}
