//! stdio 传输
//!
//! 每行一条 JSON-RPC 消息。每个请求在独立任务中处理，响应经由 mpsc 通道
//! 串行写回输出流。日志只写 stderr，stdout 专用于协议消息。

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::mcp::McpHandler;

const RESPONSE_BUFFER: usize = 64;

/// 运行 stdio 传输，直到输入结束或收到取消信号
///
/// 收到取消信号时立即丢弃行读取器，阻塞中的读取不再等待；已在处理中的
/// 请求会继续完成并写出响应。丢弃读取器不会关闭 fd 0，进程退出时由
/// `shutdown_background` 释放仍阻塞在 stdin 上的线程。
pub async fn serve<R, W>(
    handler: McpHandler,
    reader: R,
    writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>(RESPONSE_BUFFER);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();

    let read_result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let handler = handler.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = handler.handle_message(&line).await {
                            if tx.send(response).await.is_err() {
                                debug!("输出通道已关闭，丢弃响应");
                            }
                        }
                    });
                }
                Ok(None) => {
                    info!("stdin 已关闭，停止读取");
                    break Ok(());
                }
                Err(e) => break Err(ServerError::Transport(e)),
            },
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("收到关闭信号，关闭 stdin 读取");
                break Ok(());
            }
        }
    };
    drop(lines);

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "请求处理任务异常退出");
        }
    }

    drop(tx);
    let write_result = writer_task.await?;

    read_result.and(write_result)
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
