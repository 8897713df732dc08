//! HTTP 传输公共部分
//!
//! 负责公共路由层，以及带有宽限期的优雅关闭。

use std::time::Duration;

use axum::{Json, Router, middleware, routing::get};
use mcp_shared::observability::middleware::http_metrics;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::cancelled;
use crate::error::ServerError;

/// 为传输路由添加健康检查、请求追踪与指标中间件
pub fn with_common_layers(router: Router) -> Router {
    router
        .route("/health", get(health_check))
        .layer(middleware::from_fn(http_metrics))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 运行 HTTP 服务
///
/// 取消信号到来后开始优雅关闭，在宽限期内等待进行中的请求完成；宽限期
/// 耗尽时记录警告并中止服务任务，仍然视为正常停止。
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP 传输开始监听");

    let graceful = cancelled(shutdown.clone());
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
    });

    tokio::select! {
        joined = &mut server => return flatten(joined),
        _ = cancelled(shutdown) => {}
    }

    tokio::select! {
        joined = &mut server => {
            info!("HTTP 传输已停止");
            flatten(joined)
        }
        _ = tokio::time::sleep(grace) => {
            warn!(grace_secs = grace.as_secs_f64(), "优雅关闭超过宽限期，强制停止 HTTP 服务");
            server.abort();
            Ok(())
        }
    }
}

fn flatten(joined: Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<(), ServerError> {
    Ok(joined??)
}
