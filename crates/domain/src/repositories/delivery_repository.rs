//! 投递回执仓储接口

use async_trait::async_trait;

use crate::delivery::{MessageStatus, ReadUpdate};
use crate::repositories::RepositoryResult;
use crate::value_objects::{ConversationId, MessageId, UserId};

/// 投递回执持久化接口。
///
/// 状态推进的单调性在实现内部强制：并发确认不会使状态回退。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// 为一批接收者创建 SENT 回执；已存在的记录保持不变。
    async fn insert_pending(
        &self,
        message_id: MessageId,
        recipients: &[UserId],
    ) -> RepositoryResult<()>;

    /// 尝试将回执推进到目标状态。
    /// 仅在目标状态严格大于当前状态时生效，返回是否发生了推进。
    async fn advance(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatus,
    ) -> RepositoryResult<bool>;

    /// 将用户在会话内所有未读回执批量推进为 READ，
    /// 返回每条被推进回执对应的消息及其发送者。
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Vec<ReadUpdate>>;
}
