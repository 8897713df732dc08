//! HTTP + SSE 传输
//!
//! `GET /sse` 建立事件流，第一条 `endpoint` 事件告知客户端消息投递地址；
//! `POST /message?sessionId=<id>` 投递 JSON-RPC 消息，响应以 `message`
//! 事件写回对应的事件流。

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use dashmap::DashMap;
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use super::{cancelled, http};
use crate::mcp::McpHandler;

const SESSION_BUFFER: usize = 32;

type Sessions = Arc<DashMap<String, mpsc::Sender<String>>>;

#[derive(Clone)]
struct SseState {
    handler: McpHandler,
    sessions: Sessions,
    shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// 事件流被丢弃时移除会话
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        debug!(session_id = %self.id, "SSE 会话已结束");
    }
}

/// 构建 SSE 传输路由
pub fn router(handler: McpHandler, shutdown: watch::Receiver<bool>) -> Router {
    let state = SseState {
        handler,
        sessions: Arc::new(DashMap::new()),
        shutdown,
    };

    let router = Router::new()
        .route("/sse", get(open_stream))
        .route("/message", post(post_message))
        .with_state(state);

    http::with_common_layers(router)
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::now_v7().simple().to_string();
    let (tx, rx) = mpsc::channel(SESSION_BUFFER);
    state.sessions.insert(id.clone(), tx);
    info!(session_id = %id, "SSE 会话已建立");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?sessionId={id}"));

    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };
    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|message| {
                let event = Event::default().event("message").data(message);
                (Ok::<_, Infallible>(event), (rx, guard))
            })
    });

    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) })
        .chain(messages)
        .take_until(cancelled(state.shutdown));

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(tx) = state
        .sessions
        .get(&query.session_id)
        .map(|entry| entry.value().clone())
    else {
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };

    let handler = state.handler.clone();
    tokio::spawn(async move {
        if let Some(response) = handler.handle_message(&body).await {
            if tx.send(response).await.is_err() {
                debug!("SSE 会话已关闭，丢弃响应");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
