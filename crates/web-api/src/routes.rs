//! HTTP 路由
//!
//! 实时层只暴露两个端点：健康检查和 WebSocket 升级入口。
//! 账号注册、会话管理等 REST 接口由外围服务承担。

use axum::{http::StatusCode, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{state::AppState, websocket};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}
