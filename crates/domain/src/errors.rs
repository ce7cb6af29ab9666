//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

use crate::value_objects::MessageId;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 消息不存在
    #[error("消息不存在: {message_id}")]
    MessageNotFound { message_id: MessageId },

    /// 重复消息（同一消息ID已被持久化）
    #[error("重复消息: {message_id}")]
    DuplicateMessage { message_id: MessageId },

    /// 用户不是会话成员
    #[error("用户不是会话成员")]
    NotAMember,

    /// 只有发送者可以操作自己的消息
    #[error("只有消息发送者可以执行该操作")]
    NotMessageSender,

    /// 消息编辑窗口已过期
    #[error("消息编辑窗口已过期")]
    EditWindowExpired,

    /// 业务规则违反错误
    #[error("业务规则违反: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn business_rule_violation(rule: impl Into<String>) -> Self {
        Self::BusinessRuleViolation { rule: rule.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
