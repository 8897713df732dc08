//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则编译失败: {0}")]
    CompileError(String),

    #[error("规则执行失败: {0}")]
    ExecutionError(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("规则集未注册: {0}")]
    RuleNotRegistered(String),

    #[error("规则集 {ruleset} 超过最大执行周期 {max_cycles}")]
    MaxCyclesExceeded { ruleset: String, max_cycles: usize },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
