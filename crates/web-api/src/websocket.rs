//! WebSocket 升级入口
//!
//! 握手阶段只做 IP 限流和令牌解析。令牌缺失或无效时仍然接受
//! 升级，在通道内回一帧 error 再以策略码关闭，保证客户端拿到
//! 结构化的失败原因而不是裸的 HTTP 状态。

use std::net::SocketAddr;

use application::protocol::{codes, ServerEvent};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;

use crate::{state::AppState, ws_connection::WsConnection};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    if state.handshake_limiter.check_attempt(addr.ip()).is_err() {
        tracing::warn!(ip = %addr.ip(), "WebSocket handshake rate limited");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let auth = query
        .token
        .as_deref()
        .and_then(|token| match state.token_validator.validate(token) {
            Ok(auth) => Some(auth),
            Err(err) => {
                tracing::warn!(ip = %addr.ip(), error = %err, "WebSocket token rejected");
                None
            }
        });

    Ok(ws.on_upgrade(move |socket| async move {
        match auth {
            Some(auth) => WsConnection::new(socket, state, auth).run().await,
            None => reject_unauthenticated(socket).await,
        }
    }))
}

/// 升级后的认证拒绝：先发错误帧，再按策略码关闭。
async fn reject_unauthenticated(mut socket: WebSocket) {
    let event = ServerEvent::error(codes::AUTH_TOKEN_INVALID, "missing or invalid token");
    match serde_json::to_string(&event) {
        Ok(payload) => {
            if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                tracing::debug!("对端在认证拒绝送达前已断开");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize auth rejection frame");
        }
    }
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "authentication failed".into(),
        })))
        .await;
    tracing::info!("连接因认证失败被拒绝");
}
