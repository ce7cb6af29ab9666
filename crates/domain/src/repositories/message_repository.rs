//! 消息仓储接口

use async_trait::async_trait;

use crate::message::Message;
use crate::repositories::RepositoryResult;
use crate::value_objects::{MessageContent, MessageId, Timestamp};

/// 消息持久化接口。
///
/// 插入必须以消息ID作为幂等键：同一ID重复插入返回 Conflict。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化一条新消息
    async fn insert(&self, message: &Message) -> RepositoryResult<()>;

    /// 检查消息ID是否已存在（幂等去重）
    async fn exists(&self, id: MessageId) -> RepositoryResult<bool>;

    /// 根据ID查找消息
    async fn find(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 更新消息内容并记录编辑时间
    async fn mark_edited(
        &self,
        id: MessageId,
        content: &MessageContent,
        edited_at: Timestamp,
    ) -> RepositoryResult<()>;

    /// 将消息标记为已删除
    async fn mark_deleted(&self, id: MessageId) -> RepositoryResult<()>;
}
