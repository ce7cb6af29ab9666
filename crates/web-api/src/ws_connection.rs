use application::error::ApplicationError;
use application::protocol::{codes, ClientFrame, ServerEvent};
use application::{ConnectionHandle, SendMessageRequest};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, DeviceId, DomainError, MessageStatus, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth::AuthContext;
use crate::state::AppState;

/// 出站通道容量。路由扇出写这个通道，写满说明客户端消费太慢，
/// 注册表的带超时写会把这种连接摘除。
const OUTBOUND_BUFFER: usize = 256;

/// WebSocket 连接管理器
///
/// 封装单条已认证连接的完整生命周期，包括：
/// - 注册表登记与注销
/// - 客户端帧的解析与分发
/// - 出站扇出与写命令的统一串行化
/// - 断开时的在线状态与通话清理
pub struct WsConnection {
    socket: Option<WebSocket>,
    state: AppState,
    user_id: UserId,
    device_id: DeviceId,
    connection_id: ConnectionId,
}

impl WsConnection {
    pub fn new(socket: WebSocket, state: AppState, auth: AuthContext) -> Self {
        Self {
            socket: Some(socket),
            state,
            user_id: auth.user_id,
            device_id: auth.device_id,
            connection_id: ConnectionId::generate(),
        }
    }

    /// 运行连接主循环
    ///
    /// 注册到连接注册表后，分成发送和接收两个任务跑到连接断开，
    /// 再做注销和离线清理。
    pub async fn run(mut self) {
        let socket = self.socket.take().expect("Socket should be available");
        let (mut sender, mut incoming) = socket.split();

        tracing::info!(
            user_id = %self.user_id,
            device_id = %self.device_id,
            connection_id = %self.connection_id,
            "WebSocket 连接已建立"
        );

        // 出站通道：注册表持有发送端，路由扇出直接写入
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        self.state
            .registry
            .register(ConnectionHandle {
                id: self.connection_id,
                user_id: self.user_id,
                device_id: self.device_id.clone(),
                sender: out_tx,
            })
            .await;

        // 每条连接建立都宣告在线，多设备时等效于刷新TTL
        if let Err(err) = self.state.presence_service.mark_online(self.user_id).await {
            tracing::warn!(error = %err, user_id = %self.user_id, "Failed to mark user online");
        }

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // 处理来自 mpsc channel 的写命令
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            WsCommand::SendText(text) => {
                                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                                    tracing::warn!("Failed to send text message");
                                    break;
                                }
                            }
                            WsCommand::SendPong(data) => {
                                if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                    tracing::warn!("Failed to send pong message");
                                    break;
                                }
                            }
                        }
                    }
                    // 处理来自广播路由的出站帧
                    payload = out_rx.recv() => {
                        match payload {
                            Some(text) => {
                                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                                    tracing::warn!("Failed to send routed message");
                                    break;
                                }
                            }
                            // 句柄已被注册表摘除，出站通道关闭，连接随之结束
                            None => break,
                        }
                    }
                }
            }
            tracing::info!("WebSocket发送任务结束");
        });

        // 接收任务：处理来自WebSocket客户端的帧
        let recv_state = self.state.clone();
        let recv_user_id = self.user_id;
        let recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if (Self::handle_incoming(message, &recv_state, recv_user_id, &cmd_tx).await)
                    .is_err()
                {
                    break;
                }
            }
            tracing::info!("WebSocket接收任务结束");
        });

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = send_task => {
                tracing::info!("WebSocket发送任务完成");
            }
            _ = recv_task => {
                tracing::info!("WebSocket接收任务完成");
            }
        }

        // 注销连接；只有最后一条连接断开才触发离线转换
        let was_last = self
            .state
            .registry
            .unregister(self.user_id, self.connection_id)
            .await;
        if was_last {
            if let Err(err) = self.state.presence_service.mark_offline(self.user_id).await {
                tracing::error!(error = %err, user_id = %self.user_id, "Failed to mark user offline");
            }
            self.state.message_limiter.remove_user(self.user_id);
            if let Err(err) = self.state.call_service.handle_disconnect(self.user_id).await {
                tracing::warn!(error = %err, user_id = %self.user_id, "Failed to hang up call on disconnect");
            }
        }

        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            was_last,
            "WebSocket连接已断开"
        );
    }

    /// 处理来自客户端的单条 WebSocket 消息
    ///
    /// 返回 Err 表示连接应当结束。协议解析失败不是致命错误，
    /// 回一帧 INVALID_FRAME 后连接继续存活。
    async fn handle_incoming(
        message: WsMessage,
        state: &AppState,
        user_id: UserId,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::info!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                tracing::debug!("收到ping消息，发送pong回应");
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to send pong command");
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::debug!("收到pong消息");
            }
            WsMessage::Binary(_) => {
                tracing::debug!("收到二进制消息，忽略");
            }
            WsMessage::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!(error = %err, "无法解析的客户端帧");
                        Self::send_event(
                            cmd_tx,
                            &ServerEvent::error(codes::INVALID_FRAME, "unrecognized frame"),
                        )
                        .await;
                        return Ok(());
                    }
                };
                Self::dispatch(frame, state, user_id, cmd_tx).await;
            }
        }
        Ok(())
    }

    /// 按帧类型分发到对应的服务
    async fn dispatch(
        frame: ClientFrame,
        state: &AppState,
        user_id: UserId,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) {
        match frame {
            ClientFrame::MessageSend {
                request_id,
                message_id,
                conversation_id,
                content,
                content_type,
                reply_to_id,
                media_url,
                thumbnail_url,
                forwarded_from,
            } => {
                if state.message_limiter.check_message(user_id).is_err() {
                    tracing::warn!(user_id = %user_id, "消息频率超限");
                    Self::send_event(
                        cmd_tx,
                        &ServerEvent::ack_error(
                            request_id,
                            Some(message_id),
                            codes::RATE_LIMITED,
                            "too many messages",
                        ),
                    )
                    .await;
                    return;
                }

                let request = SendMessageRequest {
                    message_id,
                    conversation_id,
                    content,
                    content_type,
                    reply_to_id,
                    media_url,
                    thumbnail_url,
                    forwarded_from,
                };
                let event = match state.messaging_service.send_message(user_id, request).await {
                    Ok(message) => {
                        ServerEvent::ack_ok(request_id, message.id, message.server_timestamp)
                    }
                    Err(err) => {
                        let code = match &err {
                            ApplicationError::Domain(DomainError::NotAMember) => {
                                codes::NOT_A_MEMBER
                            }
                            ApplicationError::Domain(DomainError::DuplicateMessage { .. }) => {
                                codes::MSG_DUPLICATE
                            }
                            _ => codes::MSG_SEND_FAILED,
                        };
                        tracing::warn!(error = %err, message_id = %message_id, "消息发送失败");
                        ServerEvent::ack_error(request_id, Some(message_id), code, err.to_string())
                    }
                };
                Self::send_event(cmd_tx, &event).await;
            }

            ClientFrame::MessageAck {
                message_id,
                conversation_id,
                status,
            } => match status {
                MessageStatus::Delivered => {
                    if let Err(err) = state
                        .delivery_tracker
                        .update_status(message_id, user_id, MessageStatus::Delivered)
                        .await
                    {
                        tracing::warn!(error = %err, message_id = %message_id, "Failed to record delivery");
                    }
                }
                MessageStatus::Read => {
                    if let Err(err) = state
                        .delivery_tracker
                        .mark_conversation_read(conversation_id, user_id)
                        .await
                    {
                        tracing::warn!(error = %err, conversation_id = %conversation_id, "Failed to mark conversation read");
                    }
                }
                MessageStatus::Sent => {
                    tracing::debug!("SENT 状态由服务端落库时设置，忽略客户端上报");
                }
            },

            ClientFrame::PresenceTyping {
                conversation_id,
                is_typing,
            } => {
                // 输入指示是最容易被刷的帧，超限直接丢弃，不回错误
                if state.message_limiter.check_message(user_id).is_err() {
                    tracing::debug!(user_id = %user_id, "输入指示超限，丢弃");
                    return;
                }
                if let Err(err) = state
                    .presence_service
                    .typing(user_id, conversation_id, is_typing)
                    .await
                {
                    tracing::warn!(error = %err, user_id = %user_id, "Failed to relay typing indicator");
                }
            }

            ClientFrame::PresenceOnline => {
                if let Err(err) = state.presence_service.mark_online(user_id).await {
                    tracing::warn!(error = %err, user_id = %user_id, "Failed to mark user online");
                }
            }

            ClientFrame::Ping => {
                if let Err(err) = state.presence_service.refresh(user_id).await {
                    tracing::warn!(error = %err, user_id = %user_id, "Failed to refresh presence");
                }
                Self::send_event(cmd_tx, &ServerEvent::Pong).await;
            }

            ClientFrame::CallInitiate {
                call_id,
                callee_id,
                call_type,
                sdp,
            } => {
                if let Err(err) = state
                    .call_service
                    .initiate(user_id, call_id, callee_id, call_type, sdp)
                    .await
                {
                    tracing::warn!(error = %err, call_id = %call_id, "Failed to initiate call");
                }
            }

            ClientFrame::CallAnswer {
                call_id,
                accepted,
                sdp,
            } => {
                if let Err(err) = state
                    .call_service
                    .answer(user_id, call_id, accepted, sdp)
                    .await
                {
                    tracing::warn!(error = %err, call_id = %call_id, "Failed to answer call");
                }
            }

            ClientFrame::CallEnd { call_id, reason } => {
                if let Err(err) = state.call_service.end(user_id, call_id, reason).await {
                    tracing::warn!(error = %err, call_id = %call_id, "Failed to end call");
                }
            }
        }
    }

    /// 序列化并经写命令通道发出一个服务端事件
    async fn send_event(cmd_tx: &mpsc::Sender<WsCommand>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                if cmd_tx.send(WsCommand::SendText(payload)).await.is_err() {
                    tracing::warn!("Failed to queue outbound frame");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize websocket payload");
            }
        }
    }
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "WsConnection 被销毁"
        );
    }
}
