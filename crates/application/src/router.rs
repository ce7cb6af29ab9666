//! 消息广播路由
//!
//! 单条消息只序列化一次，逐个接收者走两条路径：本实例有连接就地投递，
//! 否则发布到跨实例中继。全局都不在线的接收者额外触发离线推送。
//! 推送与中继的失败只记日志，消息已经落库，发送方不需要感知。

use std::sync::Arc;

use domain::repositories::UserRepository;
use domain::{ConversationId, Message, MessageId, MessageStatus, Timestamp, UserId};

use crate::error::ApplicationError;
use crate::presence::PresenceStore;
use crate::protocol::ServerEvent;
use crate::push::PushSender;
use crate::registry::ConnectionRegistry;
use crate::relay::RelayTransport;

/// 推送标题固定，正文取消息预览
const PUSH_TITLE: &str = "New message";
/// 推送正文最大字符数
const PUSH_PREVIEW_CHARS: usize = 100;

/// 广播路由器
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    relay: Arc<dyn RelayTransport>,
    push: Arc<dyn PushSender>,
    users: Arc<dyn UserRepository>,
    presence: Arc<dyn PresenceStore>,
}

impl BroadcastRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: Arc<dyn RelayTransport>,
        push: Arc<dyn PushSender>,
        users: Arc<dyn UserRepository>,
        presence: Arc<dyn PresenceStore>,
    ) -> Self {
        Self {
            registry,
            relay,
            push,
            users,
            presence,
        }
    }

    /// 把新消息广播给所有接收者
    ///
    /// 本地投递失败的接收者先发中继再查全局在线状态；
    /// 全局也不在线才触发离线推送。只有序列化失败会向上传播。
    pub async fn broadcast_message(
        &self,
        message: &Message,
        recipient_ids: &[UserId],
    ) -> Result<(), ApplicationError> {
        let event = ServerEvent::message_new(message);
        let payload = serde_json::to_string(&event)?;

        let mut remote_ids = Vec::new();
        for &recipient_id in recipient_ids {
            let delivered = self.registry.send_to_user(recipient_id, &payload).await;
            if delivered > 0 {
                tracing::debug!(
                    user_id = %recipient_id,
                    message_id = %message.id,
                    delivered,
                    "消息已投递到本地连接"
                );
                continue;
            }

            if let Err(e) = self.relay.publish(recipient_id, &payload).await {
                tracing::warn!(user_id = %recipient_id, error = %e, "中继发布失败");
            }
            remote_ids.push(recipient_id);
        }

        if remote_ids.is_empty() {
            return Ok(());
        }

        // 全局在线只是提示：查询失败时按全部离线处理，宁可多推一次
        let online_elsewhere = match self.presence.online_user_ids(&remote_ids).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "查询全局在线状态失败");
                Vec::new()
            }
        };

        for recipient_id in remote_ids {
            if online_elsewhere.contains(&recipient_id) {
                continue;
            }
            self.spawn_push(recipient_id, message);
        }

        Ok(())
    }

    /// 把一条状态更新发给消息的发送方
    ///
    /// 接收者不需要看到自己的回执，所以状态事件只走发送方一条路。
    pub async fn broadcast_status(
        &self,
        sender_id: UserId,
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        status: MessageStatus,
        timestamp: Timestamp,
    ) -> Result<(), ApplicationError> {
        let event =
            ServerEvent::status_update(message_id, conversation_id, user_id, status, timestamp);
        self.broadcast_to_user(sender_id, &event).await
    }

    /// 把一个事件发给单个用户，本地优先，否则走中继
    pub async fn broadcast_to_user(
        &self,
        user_id: UserId,
        event: &ServerEvent,
    ) -> Result<(), ApplicationError> {
        let payload = serde_json::to_string(event)?;
        self.dispatch(user_id, &payload).await;
        Ok(())
    }

    /// 把同一个事件发给一组用户，只序列化一次
    pub async fn broadcast_to_users(
        &self,
        event: &ServerEvent,
        user_ids: &[UserId],
    ) -> Result<(), ApplicationError> {
        let payload = serde_json::to_string(event)?;
        for &user_id in user_ids {
            self.dispatch(user_id, &payload).await;
        }
        Ok(())
    }

    async fn dispatch(&self, user_id: UserId, payload: &str) {
        let delivered = self.registry.send_to_user(user_id, payload).await;
        if delivered == 0 {
            if let Err(e) = self.relay.publish(user_id, payload).await {
                tracing::warn!(user_id = %user_id, error = %e, "中继发布失败");
            }
        }
    }

    /// 异步发起离线推送，任何失败都不影响发送路径
    fn spawn_push(&self, recipient_id: UserId, message: &Message) {
        let users = Arc::clone(&self.users);
        let push = Arc::clone(&self.push);
        let message_id = message.id;
        let conversation_id = message.conversation_id;
        let body = message.preview(PUSH_PREVIEW_CHARS);

        tokio::spawn(async move {
            let token = match users.push_token(recipient_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    tracing::debug!(user_id = %recipient_id, "用户没有推送令牌，跳过推送");
                    return;
                }
                Err(e) => {
                    tracing::warn!(user_id = %recipient_id, error = %e, "查询推送令牌失败");
                    return;
                }
            };

            let data = serde_json::json!({
                "conversationId": conversation_id,
                "messageId": message_id,
            });

            if let Err(e) = push.send(&token, PUSH_TITLE, &body, &data).await {
                tracing::warn!(user_id = %recipient_id, error = %e, "离线推送发送失败");
            }
        });
    }
}
