//! 会话仓储接口

use async_trait::async_trait;

use crate::repositories::RepositoryResult;
use crate::value_objects::{ConversationId, UserId};

/// 会话成员关系查询接口。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 获取会话全部成员
    async fn member_ids(&self, conversation_id: ConversationId) -> RepositoryResult<Vec<UserId>>;

    /// 检查用户是否为会话成员
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool>;

    /// 获取与指定用户共享至少一个会话的其他用户（去重）。
    /// 用于在线状态变更的定向广播。
    async fn co_member_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>>;
}
