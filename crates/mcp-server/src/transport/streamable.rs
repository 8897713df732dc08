//! Streamable HTTP 传输
//!
//! 单个 `/mcp` 端点：`POST` 投递 JSON-RPC 消息并直接以 JSON 返回响应，
//! `DELETE` 结束会话。`initialize` 的响应携带 `Mcp-Session-Id` 头。
//! 客户端未发送 `DELETE` 就断开时，会话在空闲超时后被回收。

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::http;
use crate::mcp::McpHandler;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// 会话空闲超时
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// 会话表，记录每个会话最后一次请求的时间
struct SessionTable {
    entries: DashMap<String, Instant>,
    idle_timeout: Duration,
}

impl SessionTable {
    fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_timeout,
        }
    }

    /// 建立新会话，顺便回收空闲会话
    fn open(&self) -> String {
        let purged = self.purge_idle();
        if purged > 0 {
            debug!(purged, "已回收空闲的 Streamable HTTP 会话");
        }

        let id = Uuid::now_v7().simple().to_string();
        self.entries.insert(id.clone(), Instant::now());
        id
    }

    /// 刷新会话的最后访问时间，会话不存在或已超时返回 false
    fn touch(&self, id: &str) -> bool {
        let fresh = match self.entries.get_mut(id) {
            Some(mut seen) if seen.elapsed() <= self.idle_timeout => {
                *seen = Instant::now();
                true
            }
            Some(_) => false,
            None => return false,
        };

        if !fresh {
            self.entries
                .remove_if(id, |_, seen| seen.elapsed() > self.idle_timeout);
        }
        fresh
    }

    fn close(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    fn purge_idle(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| seen.elapsed() <= self.idle_timeout);
        before.saturating_sub(self.entries.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone)]
struct StreamableState {
    handler: McpHandler,
    sessions: Arc<SessionTable>,
}

/// 构建 Streamable HTTP 传输路由
pub fn router(handler: McpHandler) -> Router {
    router_with_idle_timeout(handler, SESSION_IDLE_TIMEOUT)
}

/// 构建 Streamable HTTP 传输路由，并指定会话空闲超时
pub fn router_with_idle_timeout(handler: McpHandler, idle_timeout: Duration) -> Router {
    let state = StreamableState {
        handler,
        sessions: Arc::new(SessionTable::new(idle_timeout)),
    };

    let router = Router::new()
        .route(
            "/mcp",
            post(post_message)
                .delete(delete_session)
                .get(|| async { StatusCode::METHOD_NOT_ALLOWED }),
        )
        .with_state(state);

    http::with_common_layers(router)
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn is_initialize(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("method").and_then(Value::as_str).map(|m| m == "initialize"))
        .unwrap_or(false)
}

async fn post_message(
    State(state): State<StreamableState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(id) = session_id(&headers) {
        if !state.sessions.touch(id) {
            return (StatusCode::NOT_FOUND, "Unknown session").into_response();
        }
    }

    let initialize = is_initialize(&body);
    let Some(payload) = state.handler.handle_message(&body).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        payload,
    )
        .into_response();

    if initialize {
        let id = state.sessions.open();
        match HeaderValue::from_str(&id) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_HEADER, value);
                info!(session_id = %id, "Streamable HTTP 会话已建立");
            }
            Err(_) => {
                state.sessions.close(&id);
            }
        }
    }

    response
}

async fn delete_session(State(state): State<StreamableState>, headers: HeaderMap) -> StatusCode {
    let Some(id) = session_id(&headers) else {
        return StatusCode::BAD_REQUEST;
    };

    if state.sessions.close(id) {
        debug!(session_id = %id, "Streamable HTTP 会话已结束");
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolRegistry;
    use crate::service::RuleOrchestrator;
    use crate::store::MemoryRulesetStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rule_engine::CachedRuleEngine;
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> Router {
        let orchestrator = RuleOrchestrator::new(
            Arc::new(MemoryRulesetStore::new()),
            Arc::new(CachedRuleEngine::default()),
        );
        router(McpHandler::new(orchestrator, ToolRegistry::with_ruleset_tools()))
    }

    fn post_json(body: Value, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/mcp").header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = app();

        let init = app
            .clone()
            .oneshot(post_json(
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(init.status(), StatusCode::OK);
        let session = init.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let ping = app
            .clone()
            .oneshot(post_json(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}), Some(&session)))
            .await
            .unwrap();
        assert_eq!(ping.status(), StatusCode::OK);
        let bytes = to_bytes(ping.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], 2);

        let delete = app
            .clone()
            .oneshot(
                Request::delete("/mcp")
                    .header(SESSION_HEADER, &session)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::OK);

        let stale = app
            .oneshot(post_json(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}), Some(&session)))
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::NOT_FOUND);
    }

    async fn initialize(app: &Router) -> String {
        let init = app
            .clone()
            .oneshot(post_json(
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
                None,
            ))
            .await
            .unwrap();
        init.headers()[SESSION_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let orchestrator = RuleOrchestrator::new(
            Arc::new(MemoryRulesetStore::new()),
            Arc::new(CachedRuleEngine::default()),
        );
        let app = router_with_idle_timeout(
            McpHandler::new(orchestrator, ToolRegistry::with_ruleset_tools()),
            Duration::from_millis(50),
        );

        let session = initialize(&app).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let stale = app
            .oneshot(post_json(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}), Some(&session)))
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_session_table_reclaims_idle_entries() {
        let table = SessionTable::new(Duration::from_millis(30));
        let first = table.open();
        let second = table.open();
        assert_eq!(table.len(), 2);

        std::thread::sleep(Duration::from_millis(60));
        assert!(!table.touch(&first));
        assert_eq!(table.len(), 1);

        // 新会话建立时回收其余空闲会话
        let third = table.open();
        assert_eq!(table.len(), 1);
        assert!(table.touch(&third));
        assert!(!table.close(&second));
    }

    #[test]
    fn test_session_table_touch_keeps_active_entries() {
        let table = SessionTable::new(Duration::from_secs(60));
        let id = table.open();

        assert!(table.touch(&id));
        assert!(!table.touch("unknown"));
        assert_eq!(table.purge_idle(), 0);
        assert!(table.close(&id));
        assert!(!table.touch(&id));
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let response = app()
            .oneshot(post_json(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let response = app()
            .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
