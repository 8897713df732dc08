//! 传输绑定
//!
//! 三种绑定共享同一个 [`McpHandler`](crate::mcp::McpHandler)：
//!
//! - `stdio`：按行分隔的 JSON-RPC，适合作为子进程运行
//! - `sse`：旧版 HTTP + Server-Sent Events
//! - `streamable`：Streamable HTTP，单个 `/mcp` 端点
//!
//! 取消信号统一使用 `watch::Receiver<bool>`，值变为 `true` 表示开始关闭。

pub mod http;
pub mod sse;
pub mod stdio;
pub mod streamable;

use tokio::sync::watch;

/// 等待取消信号；发送端被丢弃同样视为关闭
pub(crate) async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
