//! 送达状态跟踪
//!
//! 每条消息对每个接收者维护 SENT < DELIVERED < READ 三档状态，
//! 只允许向前推进。推进成功才把状态事件发回原发送者，
//! 重复或倒退的上报静默忽略。

use std::sync::Arc;

use domain::repositories::{DeliveryRepository, MessageRepository};
use domain::{ConversationId, MessageId, MessageStatus, UserId};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::router::BroadcastRouter;

/// 送达状态跟踪器
pub struct DeliveryTracker {
    deliveries: Arc<dyn DeliveryRepository>,
    messages: Arc<dyn MessageRepository>,
    router: Arc<BroadcastRouter>,
    clock: Arc<dyn Clock>,
}

impl DeliveryTracker {
    pub fn new(
        deliveries: Arc<dyn DeliveryRepository>,
        messages: Arc<dyn MessageRepository>,
        router: Arc<BroadcastRouter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            deliveries,
            messages,
            router,
            clock,
        }
    }

    /// 推进单条消息对单个接收者的状态
    ///
    /// 未能严格推进（重复上报、状态倒退）是无操作而不是错误；
    /// 客户端重发回执必须是安全的。
    pub async fn update_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatus,
    ) -> Result<(), ApplicationError> {
        let advanced = self.deliveries.advance(message_id, user_id, status).await?;
        if !advanced {
            tracing::debug!(
                message_id = %message_id,
                user_id = %user_id,
                status = %status.as_str(),
                "状态未推进，忽略"
            );
            return Ok(());
        }

        let Some(message) = self.messages.find(message_id).await? else {
            tracing::warn!(message_id = %message_id, "状态已推进但消息不存在，跳过通知");
            return Ok(());
        };

        self.router
            .broadcast_status(
                message.sender_id,
                message_id,
                message.conversation_id,
                user_id,
                status,
                self.clock.now(),
            )
            .await
    }

    /// 把某用户在一个会话里的全部未读消息标记为已读
    ///
    /// 返回实际推进的条数，并为每条向原发送者发一个状态事件。
    pub async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<usize, ApplicationError> {
        let updates = self
            .deliveries
            .mark_conversation_read(conversation_id, user_id)
            .await?;

        let now = self.clock.now();
        for update in &updates {
            self.router
                .broadcast_status(
                    update.sender_id,
                    update.message_id,
                    conversation_id,
                    user_id,
                    MessageStatus::Read,
                    now,
                )
                .await?;
        }

        if !updates.is_empty() {
            tracing::info!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                count = updates.len(),
                "会话消息已批量标记已读"
            );
        }
        Ok(updates.len())
    }
}
