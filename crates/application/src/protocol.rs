//! 实时协议帧定义
//!
//! 双向 JSON 帧，以 `type` 字段区分类型，字段名统一为 camelCase。
//! 未知字段一律忽略，保证向前兼容；未知 `type` 解析失败，
//! 由连接层回以 INVALID_FRAME 错误。

use domain::{
    CallEndReason, CallId, CallType, ContentType, ConversationId, Message, MessageId,
    MessageStatus, PresenceStatus, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

/// 协议错误码
pub mod codes {
    pub const AUTH_TOKEN_INVALID: &str = "AUTH_TOKEN_INVALID";
    pub const MSG_DUPLICATE: &str = "MSG_DUPLICATE";
    pub const MSG_SEND_FAILED: &str = "MSG_SEND_FAILED";
    pub const NOT_A_MEMBER: &str = "NOT_A_MEMBER";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INVALID_FRAME: &str = "INVALID_FRAME";
}

/// 回执状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Ok,
    Error,
}

/// 客户端 -> 服务端 帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// 发送消息。messageId 由客户端生成，作为幂等去重键。
    #[serde(rename = "message.send", rename_all = "camelCase")]
    MessageSend {
        request_id: String,
        message_id: MessageId,
        conversation_id: ConversationId,
        content: String,
        content_type: ContentType,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        thumbnail_url: Option<String>,
        #[serde(default)]
        forwarded_from: Option<MessageId>,
    },

    /// 投递确认。status 仅接受 DELIVERED / READ。
    #[serde(rename = "message.ack", rename_all = "camelCase")]
    MessageAck {
        message_id: MessageId,
        conversation_id: ConversationId,
        status: MessageStatus,
    },

    /// 正在输入指示
    #[serde(rename = "presence.typing", rename_all = "camelCase")]
    PresenceTyping {
        conversation_id: ConversationId,
        is_typing: bool,
    },

    /// 主动宣告在线（重连后使用）
    #[serde(rename = "presence.online")]
    PresenceOnline,

    /// 应用层心跳，刷新在线TTL
    #[serde(rename = "ping")]
    Ping,

    /// 发起通话
    #[serde(rename = "call.initiate", rename_all = "camelCase")]
    CallInitiate {
        call_id: CallId,
        callee_id: UserId,
        call_type: CallType,
        #[serde(default)]
        sdp: Option<String>,
    },

    /// 应答通话
    #[serde(rename = "call.answer", rename_all = "camelCase")]
    CallAnswer {
        call_id: CallId,
        accepted: bool,
        #[serde(default)]
        sdp: Option<String>,
    },

    /// 结束通话
    #[serde(rename = "call.end", rename_all = "camelCase")]
    CallEnd {
        call_id: CallId,
        reason: CallEndReason,
    },
}

/// 服务端 -> 客户端 帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// 新消息
    #[serde(rename = "message.new", rename_all = "camelCase")]
    MessageNew {
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        content_type: ContentType,
        server_timestamp: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forwarded_from: Option<MessageId>,
    },

    /// 投递状态更新，仅发给原消息发送者
    #[serde(rename = "message.status", rename_all = "camelCase")]
    MessageStatusUpdate {
        message_id: MessageId,
        conversation_id: ConversationId,
        /// 状态发生变化的用户（即确认方）
        user_id: UserId,
        status: MessageStatus,
        timestamp: Timestamp,
    },

    /// 请求回执
    #[serde(rename = "ack", rename_all = "camelCase")]
    Ack {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<Timestamp>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// 在线状态更新
    #[serde(rename = "presence.update", rename_all = "camelCase")]
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<Timestamp>,
        /// TYPING 状态时携带所在会话
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },

    /// 群成员加入
    #[serde(rename = "group.member_added", rename_all = "camelCase")]
    GroupMemberAdded {
        conversation_id: ConversationId,
        user_id: UserId,
        by_user_id: UserId,
    },

    /// 群成员移除
    #[serde(rename = "group.member_removed", rename_all = "camelCase")]
    GroupMemberRemoved {
        conversation_id: ConversationId,
        user_id: UserId,
        by_user_id: UserId,
    },

    /// 群信息变更
    #[serde(rename = "group.info_updated", rename_all = "camelCase")]
    GroupInfoUpdated {
        conversation_id: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    /// 消息被删除
    #[serde(rename = "message.deleted", rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
        conversation_id: ConversationId,
    },

    /// 消息被编辑
    #[serde(rename = "message.edited", rename_all = "camelCase")]
    MessageEdited {
        message_id: MessageId,
        conversation_id: ConversationId,
        content: String,
        edited_at: Timestamp,
    },

    /// 消息表情回应
    #[serde(rename = "message.reaction", rename_all = "camelCase")]
    MessageReaction {
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        emoji: String,
        added: bool,
    },

    /// 来电（转发给被叫）
    #[serde(rename = "call.initiate", rename_all = "camelCase")]
    CallInitiate {
        call_id: CallId,
        caller_id: UserId,
        call_type: CallType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp: Option<String>,
    },

    /// 通话应答（转发给主叫）
    #[serde(rename = "call.answer", rename_all = "camelCase")]
    CallAnswer {
        call_id: CallId,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp: Option<String>,
    },

    /// 通话结束
    #[serde(rename = "call.end", rename_all = "camelCase")]
    CallEnd {
        call_id: CallId,
        reason: CallEndReason,
    },

    /// 心跳响应
    #[serde(rename = "pong")]
    Pong,

    /// 协议级错误
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// 由消息实体构造 message.new 事件
    pub fn message_new(message: &Message) -> Self {
        Self::MessageNew {
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.as_str().to_owned(),
            content_type: message.content_type,
            server_timestamp: message.server_timestamp,
            reply_to_id: message.reply_to_id,
            media_url: message.media_url.clone(),
            thumbnail_url: message.thumbnail_url.clone(),
            forwarded_from: message.forwarded_from,
        }
    }

    pub fn status_update(
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        status: MessageStatus,
        timestamp: Timestamp,
    ) -> Self {
        Self::MessageStatusUpdate {
            message_id,
            conversation_id,
            user_id,
            status,
            timestamp,
        }
    }

    pub fn ack_ok(
        request_id: impl Into<String>,
        message_id: MessageId,
        server_timestamp: Timestamp,
    ) -> Self {
        Self::Ack {
            request_id: request_id.into(),
            message_id: Some(message_id),
            status: AckStatus::Ok,
            server_timestamp: Some(server_timestamp),
            error_code: None,
            error_message: None,
        }
    }

    pub fn ack_error(
        request_id: impl Into<String>,
        message_id: Option<MessageId>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::Ack {
            request_id: request_id.into(),
            message_id,
            status: AckStatus::Error,
            server_timestamp: None,
            error_code: Some(code.to_owned()),
            error_message: Some(message.into()),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}
