//! 用户仓储接口

use async_trait::async_trait;

use crate::repositories::RepositoryResult;
use crate::value_objects::{Timestamp, UserId};

/// 用户数据访问接口。本系统只消费投递相关的窄接口。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 持久化用户最近在线时间
    async fn update_last_seen(&self, user_id: UserId, at: Timestamp) -> RepositoryResult<()>;

    /// 获取用户的推送令牌；用户未注册推送时为 None。
    async fn push_token(&self, user_id: UserId) -> RepositoryResult<Option<String>>;
}
