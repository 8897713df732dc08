//! 启动错误与进程退出码
//!
//! 二进制入口把所有启动阶段的失败归类到 [`StartupError`]，并据此选择退出码。

use thiserror::Error;

/// 进程退出码
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const GENERIC: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const STORAGE: u8 = 3;
    pub const TRANSPORT: u8 = 4;
}

/// 启动阶段错误
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储后端不可用: {0}")]
    Storage(String),

    #[error("传输层错误: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl StartupError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_UNAVAILABLE",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Other(_) => "GENERIC_ERROR",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => exit_code::CONFIG,
            Self::Storage(_) => exit_code::STORAGE,
            Self::Transport(_) => exit_code::TRANSPORT,
            Self::Other(_) => exit_code::GENERIC,
        }
    }
}

impl From<config::ConfigError> for StartupError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
