#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::presence::memory::MemoryPresenceStore;
use application::{
    run_relay_listener, BroadcastRouter, CallService, ConnectionRegistry, DeliveryTracker,
    IpRateLimiter, LocalRelay, MessageRateLimiter, MessagingService, NoopPushSender,
    PresenceService, RelayTransport, SystemClock,
};
use domain::{ConversationId, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{
    MemoryConversationRepository, MemoryDeliveryRepository, MemoryMessageRepository,
    MemoryUserRepository,
};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use web_api::{router, AppState, JwtService, TokenValidator};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 跑在随机端口上的完整实时服务，仓储全部用内存实现，
/// 中继走进程内通道。
pub struct TestApp {
    pub addr: SocketAddr,
    pub jwt: Arc<JwtService>,
    pub conversations: Arc<MemoryConversationRepository>,
    pub users: Arc<MemoryUserRepository>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_inner(50, 1000, None).await
    }

    pub async fn spawn_with_message_limit(max_messages: u32) -> Self {
        Self::spawn_inner(max_messages, 1000, None).await
    }

    pub async fn spawn_with_ip_limit(max_attempts: u32) -> Self {
        Self::spawn_inner(50, max_attempts, None).await
    }

    /// 用自定义的令牌验证实现替换默认的 JWT 验证
    pub async fn spawn_with_validator(validator: Arc<dyn TokenValidator>) -> Self {
        Self::spawn_inner(50, 1000, Some(validator)).await
    }

    async fn spawn_inner(
        max_messages: u32,
        max_ip_attempts: u32,
        validator: Option<Arc<dyn TokenValidator>>,
    ) -> Self {
        let messages = Arc::new(MemoryMessageRepository::new());
        let conversations = Arc::new(MemoryConversationRepository::new());
        let deliveries = Arc::new(MemoryDeliveryRepository::new(messages.clone()));
        let users = Arc::new(MemoryUserRepository::new());
        let presence = Arc::new(MemoryPresenceStore::new());
        let relay = Arc::new(LocalRelay::new());
        let clock = Arc::new(SystemClock);

        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(5)));
        let broadcast_router = Arc::new(BroadcastRouter::new(
            registry.clone(),
            relay.clone(),
            Arc::new(NoopPushSender),
            users.clone(),
            presence.clone(),
        ));

        let delivery_tracker = Arc::new(DeliveryTracker::new(
            deliveries.clone(),
            messages.clone(),
            broadcast_router.clone(),
            clock.clone(),
        ));
        let messaging_service = Arc::new(MessagingService::new(
            messages.clone(),
            conversations.clone(),
            deliveries,
            broadcast_router.clone(),
            clock.clone(),
        ));
        let presence_service = Arc::new(PresenceService::new(
            presence.clone(),
            conversations.clone(),
            users.clone(),
            broadcast_router.clone(),
            clock.clone(),
            Duration::from_secs(60),
        ));
        let call_service = Arc::new(CallService::new(presence, broadcast_router, clock));

        let relay_rx = relay.subscribe().await.expect("relay subscribe");
        tokio::spawn(run_relay_listener(relay_rx, registry.clone()));

        let jwt = Arc::new(JwtService::new("test-secret-key"));
        let token_validator = validator.unwrap_or_else(|| jwt.clone() as Arc<dyn TokenValidator>);
        let state = AppState::new(
            registry,
            messaging_service,
            delivery_tracker,
            presence_service,
            call_service,
            token_validator,
            Arc::new(MessageRateLimiter::new(
                Duration::from_secs(10),
                max_messages,
            )),
            Arc::new(IpRateLimiter::new(
                Duration::from_secs(60),
                max_ip_attempts,
            )),
        );

        let app = router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
        });

        // allow server to start
        sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            jwt,
            conversations,
            users,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token_for(&self, user_id: UserId, device: &str) -> String {
        self.jwt.issue_token(user_id, device).expect("issue token")
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    /// 以指定用户和设备建立一条已认证连接
    pub async fn connect(&self, user_id: UserId, device: &str) -> WsStream {
        let token = self.token_for(user_id, device);
        let (ws, _) = connect_async(self.ws_url(&token))
            .await
            .expect("ws connect");
        ws
    }

    /// 登记一个会话及其成员
    pub async fn seed_conversation(&self, member_ids: Vec<UserId>) -> ConversationId {
        let conversation_id = ConversationId::from(Uuid::new_v4());
        self.conversations
            .add_conversation(conversation_id, member_ids)
            .await;
        conversation_id
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 读取下一条文本帧并解析为 JSON，超时视为测试失败
pub async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("ws closed")
            .expect("ws error");
        match message {
            TungsteniteMessage::Text(payload) => {
                return serde_json::from_str(&payload).expect("json frame");
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

/// 读取帧直到出现指定类型；其他类型的帧允许先到，最多跳过十条
pub async fn recv_json_of_type(ws: &mut WsStream, wanted: &str) -> Value {
    for _ in 0..10 {
        let frame = recv_json(ws).await;
        if frame["type"] == wanted {
            return frame;
        }
    }
    panic!("frame of type {wanted} never arrived");
}

pub async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(TungsteniteMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// 断言一段时间内没有任何帧到达
pub async fn assert_silence(ws: &mut WsStream, window: Duration) {
    if let Ok(frame) = timeout(window, ws.next()).await {
        panic!("unexpected frame during silence window: {frame:?}");
    }
}
