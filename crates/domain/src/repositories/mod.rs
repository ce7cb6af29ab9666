//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，遵循清洁架构原则，内层定义接口，外层实现接口。

use thiserror::Error;

pub use conversation_repository::ConversationRepository;
pub use delivery_repository::DeliveryRepository;
pub use message_repository::MessageRepository;
pub use user_repository::UserRepository;

#[cfg(feature = "testing")]
pub use conversation_repository::MockConversationRepository;
#[cfg(feature = "testing")]
pub use delivery_repository::MockDeliveryRepository;
#[cfg(feature = "testing")]
pub use message_repository::MockMessageRepository;
#[cfg(feature = "testing")]
pub use user_repository::MockUserRepository;

pub mod conversation_repository;
pub mod delivery_repository;
pub mod message_repository;
pub mod user_repository;

/// 数据访问层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// 记录不存在
    #[error("记录不存在")]
    NotFound,

    /// 唯一约束冲突
    #[error("记录已存在")]
    Conflict,

    /// 底层存储错误
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 数据访问层结果类型
pub type RepositoryResult<T> = Result<T, RepositoryError>;
