//! 命令行接口
//!
//! 命令行参数的优先级高于配置文件与环境变量。

use clap::{Args, Parser, Subcommand};
use mcp_shared::config::{AppConfig, StorageBackend, TransportKind};

/// 规则引擎 MCP 服务
#[derive(Parser, Debug)]
#[command(name = "rule-mcp")]
#[command(version, about = "通过 MCP 协议提供规则集管理与执行")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动 MCP 服务器
    Server(ServerArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// 传输方式 (stdio, sse, streamable-http)
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// HTTP 监听地址
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP 监听端口
    #[arg(short, long)]
    pub port: Option<u16>,

    /// 规则集存储后端 (memory, postgresql)
    #[arg(long)]
    pub storage: Option<StorageBackend>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ServerArgs {
    /// 用命令行参数覆盖已加载的配置
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(host) = &self.host {
            config.transport.host = host.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(backend) = self.storage {
            config.storage.backend = backend;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}
