//! 规则集服务错误类型
//!
//! 定义存储、编排和服务器生命周期中的错误

use rule_engine::RuleError;
use thiserror::Error;

use crate::server::ServerState;

/// 规则集业务错误
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("规则集不存在: {name}")]
    NotFound { name: String },

    #[error("规则集已存在: {name}")]
    AlreadyExists { name: String },

    #[error("存储错误: {0}")]
    Store(String),

    #[error("规则集 {name} 执行失败: {source}")]
    Evaluation {
        name: String,
        #[source]
        source: RuleError,
    },

    #[error("参数校验失败: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, RulesetError>;

impl RulesetError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Store(_) => "STORE_ERROR",
            Self::Evaluation { .. } => "EVALUATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl From<sqlx::Error> for RulesetError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<validator::ValidationErrors> for RulesetError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

/// 服务器生命周期错误
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("服务器状态错误: {operation} 不能在 {state} 状态下执行")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    #[error("监听地址绑定失败 {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("传输层 I/O 错误: {0}")]
    Transport(#[from] std::io::Error),

    #[error("后台任务异常退出: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
