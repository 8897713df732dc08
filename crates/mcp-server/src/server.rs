//! MCP 服务器生命周期
//!
//! 状态机：`Created → ToolsRegistered → Running → ShuttingDown → Stopped`，
//! 运行期间的传输错误进入 `Failed`。当前状态通过 watch 通道发布。

use std::fmt;
use std::future::Future;
use std::time::Duration;

use mcp_shared::config::{TransportConfig, TransportKind};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::ServerError;
use crate::mcp::{McpHandler, ToolRegistry};
use crate::service::RuleOrchestrator;
use crate::transport::{http, sse, stdio, streamable};

/// HTTP 传输默认的优雅关闭宽限期
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    ToolsRegistered,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::ToolsRegistered => "tools_registered",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// MCP 服务器
pub struct McpServer {
    orchestrator: RuleOrchestrator,
    handler: Option<McpHandler>,
    state: watch::Sender<ServerState>,
    shutdown_grace: Duration,
}

impl McpServer {
    pub fn new(orchestrator: RuleOrchestrator) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            orchestrator,
            handler: None,
            state,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn handler(&self) -> Option<&McpHandler> {
        self.handler.as_ref()
    }

    /// 绑定六个规则集工具，不打开任何 I/O 资源
    pub fn register_tools(&mut self) -> Result<(), ServerError> {
        self.expect_state("register_tools", ServerState::Created)?;

        let registry = ToolRegistry::with_ruleset_tools();
        info!(tools = registry.len(), "工具已注册");

        self.handler = Some(McpHandler::new(self.orchestrator.clone(), registry));
        self.state.send_replace(ServerState::ToolsRegistered);
        Ok(())
    }

    /// 按配置选择传输绑定并运行，直到 `signal` 完成后关闭
    pub async fn run_until<F>(&mut self, config: &TransportConfig, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        match config.kind {
            TransportKind::Stdio => {
                self.run_pipe_until(tokio::io::stdin(), tokio::io::stdout(), signal)
                    .await
            }
            kind => {
                self.expect_state("run", ServerState::ToolsRegistered)?;
                let addr = config.addr();
                let listener = match TcpListener::bind(&addr).await {
                    Ok(listener) => listener,
                    Err(source) => {
                        self.state.send_replace(ServerState::Failed);
                        error!(%addr, error = %source, "监听地址绑定失败");
                        return Err(ServerError::Bind { addr, source });
                    }
                };
                self.run_http_until(listener, kind, signal).await
            }
        }
    }

    /// 在给定的输入输出流上运行管道传输
    pub async fn run_pipe_until<R, W, F>(&mut self, reader: R, writer: W, signal: F) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()> + Send,
    {
        let handler = self.start("run", TransportKind::Stdio)?;
        let (cancel, cancelled) = watch::channel(false);

        let transport = stdio::serve(handler, reader, writer, cancelled);
        let result = self.drive(transport, signal, cancel).await;
        self.finish(result)
    }

    /// 在已绑定的监听器上运行 HTTP 传输
    pub async fn run_http_until<F>(
        &mut self,
        listener: TcpListener,
        kind: TransportKind,
        signal: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let handler = self.start("run", kind)?;
        let (cancel, cancelled) = watch::channel(false);

        let router = match kind {
            TransportKind::Sse => sse::router(handler, cancelled.clone()),
            _ => streamable::router(handler),
        };

        let transport = http::serve(listener, router, cancelled, self.shutdown_grace);
        let result = self.drive(transport, signal, cancel).await;
        self.finish(result)
    }

    fn expect_state(&self, operation: &'static str, expected: ServerState) -> Result<(), ServerError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState { operation, state })
        }
    }

    fn start(&mut self, operation: &'static str, kind: TransportKind) -> Result<McpHandler, ServerError> {
        self.expect_state(operation, ServerState::ToolsRegistered)?;
        let handler = self.handler.clone().ok_or(ServerError::InvalidState {
            operation,
            state: ServerState::Created,
        })?;

        self.state.send_replace(ServerState::Running);
        info!(transport = %kind, "MCP 服务器开始运行");
        Ok(handler)
    }

    /// 同时等待传输结束与关闭信号
    ///
    /// 信号先到时切换到 `ShuttingDown` 并广播取消，然后继续等待传输自行收尾。
    async fn drive<T, F>(&self, transport: T, signal: F, cancel: watch::Sender<bool>) -> Result<(), ServerError>
    where
        T: Future<Output = Result<(), ServerError>>,
        F: Future<Output = ()>,
    {
        let mut transport = std::pin::pin!(transport);
        let mut signal = std::pin::pin!(signal);
        let mut signalled = false;

        loop {
            tokio::select! {
                result = &mut transport => return result,
                _ = &mut signal, if !signalled => {
                    signalled = true;
                    self.state.send_replace(ServerState::ShuttingDown);
                    cancel.send_replace(true);
                    info!("开始关闭 MCP 服务器");
                }
            }
        }
    }

    fn finish(&self, result: Result<(), ServerError>) -> Result<(), ServerError> {
        match &result {
            Ok(()) => {
                self.state.send_replace(ServerState::Stopped);
                info!("MCP 服务器已停止");
            }
            Err(e) => {
                self.state.send_replace(ServerState::Failed);
                error!(error = %e, "MCP 服务器运行失败");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRulesetStore;
    use rule_engine::CachedRuleEngine;
    use std::sync::Arc;

    fn server() -> McpServer {
        McpServer::new(RuleOrchestrator::new(
            Arc::new(MemoryRulesetStore::new()),
            Arc::new(CachedRuleEngine::default()),
        ))
    }

    #[test]
    fn test_register_tools_transitions_once() {
        let mut server = server();
        assert_eq!(server.state(), ServerState::Created);

        server.register_tools().unwrap();
        assert_eq!(server.state(), ServerState::ToolsRegistered);
        assert_eq!(server.handler().unwrap().registry().len(), 6);

        let err = server.register_tools().unwrap_err();
        assert!(matches!(err, ServerError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_run_before_register_is_invalid() {
        let mut server = server();
        let (_client, pipe) = tokio::io::duplex(64);
        let (_out, sink) = tokio::io::duplex(64);

        let err = server
            .run_pipe_until(pipe, sink, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServerError::InvalidState { state: ServerState::Created, .. }
        ));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_signal_stops_pipe_transport() {
        let mut server = server();
        server.register_tools().unwrap();
        let mut states = server.subscribe();

        let (_client, pipe) = tokio::io::duplex(64);
        let (sink, _out) = tokio::io::duplex(64);

        let (trigger, fired) = tokio::sync::oneshot::channel::<()>();
        let signal = async move {
            let _ = fired.await;
        };

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);
                if state == ServerState::Stopped {
                    break;
                }
            }
            seen
        });

        let run = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(server.run_pipe_until(pipe, sink, signal), run);

        result.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);

        let seen = observer.await.unwrap();
        assert_eq!(seen.last(), Some(&ServerState::Stopped));
        assert!(!seen.contains(&ServerState::Failed));
    }
}
