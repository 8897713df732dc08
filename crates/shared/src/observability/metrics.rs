//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Metrics 资源守卫，drop 时停止指标服务
pub struct MetricsHandle {
    server_handle: JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("tool_calls_total", "Total number of MCP tool calls");
    metrics::describe_histogram!(
        "tool_call_duration_seconds",
        "MCP tool call duration in seconds"
    );

    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::describe_counter!(
        "rule_registration_failures_total",
        "Rulesets persisted but not registered with the engine"
    );

    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }))
}

async fn start_metrics_server(addr: SocketAddr, handle: PrometheusHandle) -> Result<JoinHandle<()>> {
    let app = metrics_router(handle);
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }))
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 MCP 工具调用
#[inline]
pub fn record_tool_call(tool: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "tool_calls_total",
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "tool_call_duration_seconds",
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

/// 记录规则评估
#[inline]
pub fn record_rule_evaluation(status: &str, duration_secs: f64) {
    metrics::counter!(
        "rule_evaluations_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!("rule_evaluation_duration_seconds").record(duration_secs);
}

/// 记录规则集持久化成功但引擎注册失败
#[inline]
pub fn record_registration_failure(stage: &str) {
    metrics::counter!(
        "rule_registration_failures_total",
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}
