//! 在线状态业务服务
//!
//! 上下线事件扩散给有共同会话的用户；正在输入只发给
//! 当前在线的共同会话成员，从不落库、从不推送。

use std::sync::Arc;
use std::time::Duration;

use domain::repositories::{ConversationRepository, UserRepository};
use domain::{ConversationId, PresenceStatus, UserId};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::PresenceStore;
use crate::protocol::ServerEvent;
use crate::router::BroadcastRouter;

/// 在线状态服务
pub struct PresenceService {
    presence: Arc<dyn PresenceStore>,
    conversations: Arc<dyn ConversationRepository>,
    users: Arc<dyn UserRepository>,
    router: Arc<BroadcastRouter>,
    clock: Arc<dyn Clock>,
    online_ttl: Duration,
}

impl PresenceService {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        conversations: Arc<dyn ConversationRepository>,
        users: Arc<dyn UserRepository>,
        router: Arc<BroadcastRouter>,
        clock: Arc<dyn Clock>,
        online_ttl: Duration,
    ) -> Self {
        Self {
            presence,
            conversations,
            users,
            router,
            clock,
            online_ttl,
        }
    }

    /// 标记上线并把 ONLINE 事件扩散给共同会话成员
    pub async fn mark_online(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.presence.set_online(user_id, self.online_ttl).await?;

        let co_members = self.conversations.co_member_ids(user_id).await?;
        let event = ServerEvent::PresenceUpdate {
            user_id,
            status: PresenceStatus::Online,
            last_seen: None,
            conversation_id: None,
        };
        self.router.broadcast_to_users(&event, &co_members).await
    }

    /// 心跳续期，只刷新TTL，不扩散事件
    pub async fn refresh(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.presence.set_online(user_id, self.online_ttl).await
    }

    /// 标记离线，写入最近在线时间，并扩散 OFFLINE 事件
    pub async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.presence.set_offline(user_id).await?;

        let now = self.clock.now();
        self.users.update_last_seen(user_id, now).await?;

        let co_members = self.conversations.co_member_ids(user_id).await?;
        let event = ServerEvent::PresenceUpdate {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: Some(now),
            conversation_id: None,
        };
        self.router.broadcast_to_users(&event, &co_members).await
    }

    /// 正在输入指示
    ///
    /// 非成员的输入指示静默丢弃。只发给该会话里当前在线的
    /// 其他成员，离线成员错过就错过。
    pub async fn typing(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        if !self.conversations.is_member(conversation_id, user_id).await? {
            tracing::debug!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                "非会话成员的输入指示，丢弃"
            );
            return Ok(());
        }

        let others: Vec<UserId> = self
            .conversations
            .member_ids(conversation_id)
            .await?
            .into_iter()
            .filter(|id| *id != user_id)
            .collect();
        let online_others = self.presence.online_user_ids(&others).await?;
        if online_others.is_empty() {
            return Ok(());
        }

        let status = if is_typing {
            PresenceStatus::Typing
        } else {
            PresenceStatus::Online
        };
        let event = ServerEvent::PresenceUpdate {
            user_id,
            status,
            last_seen: None,
            conversation_id: Some(conversation_id),
        };
        self.router.broadcast_to_users(&event, &online_others).await
    }
}
