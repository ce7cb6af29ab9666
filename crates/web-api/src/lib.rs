//! Web API 层。
//!
//! 提供 Axum 路由，将 WebSocket 连接委托给应用层的实时投递服务。

mod auth;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use auth::{AuthContext, AuthError, JwtService, TokenValidator};
pub use routes::router;
pub use state::AppState;
