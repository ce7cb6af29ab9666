//! 群事件扩散服务
//!
//! 群的增删改由外围系统落库，这里只负责把既成事实
//! 实时通知到相关用户。

use std::sync::Arc;

use domain::repositories::ConversationRepository;
use domain::{ConversationId, UserId};

use crate::error::ApplicationError;
use crate::protocol::ServerEvent;
use crate::router::BroadcastRouter;

/// 群事件服务
pub struct GroupService {
    conversations: Arc<dyn ConversationRepository>,
    router: Arc<BroadcastRouter>,
}

impl GroupService {
    pub fn new(conversations: Arc<dyn ConversationRepository>, router: Arc<BroadcastRouter>) -> Self {
        Self {
            conversations,
            router,
        }
    }

    /// 新成员入群，通知全体成员（含新成员本人）
    pub async fn notify_member_added(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        by_user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let member_ids = self.conversations.member_ids(conversation_id).await?;
        let event = ServerEvent::GroupMemberAdded {
            conversation_id,
            user_id,
            by_user_id,
        };
        self.router.broadcast_to_users(&event, &member_ids).await
    }

    /// 成员被移出，除剩余成员外还要通知被移出者本人
    pub async fn notify_member_removed(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        by_user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut targets = self.conversations.member_ids(conversation_id).await?;
        if !targets.contains(&user_id) {
            targets.push(user_id);
        }
        let event = ServerEvent::GroupMemberRemoved {
            conversation_id,
            user_id,
            by_user_id,
        };
        self.router.broadcast_to_users(&event, &targets).await
    }

    /// 群信息（标题等）变更
    pub async fn notify_info_updated(
        &self,
        conversation_id: ConversationId,
        title: Option<String>,
    ) -> Result<(), ApplicationError> {
        let member_ids = self.conversations.member_ids(conversation_id).await?;
        let event = ServerEvent::GroupInfoUpdated {
            conversation_id,
            title,
        };
        self.router.broadcast_to_users(&event, &member_ids).await
    }
}
