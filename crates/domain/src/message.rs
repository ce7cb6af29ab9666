//! 消息实体定义
//!
//! 包含消息的核心信息和相关操作。

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 消息内容类型。与线上协议的 contentType 字段一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Text,
    Image,
    Voice,
    Video,
    Document,
    Location,
    Contact,
    Sticker,
    Gif,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Text
    }
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::Voice => "VOICE",
            Self::Video => "VIDEO",
            Self::Document => "DOCUMENT",
            Self::Location => "LOCATION",
            Self::Contact => "CONTACT",
            Self::Sticker => "STICKER",
            Self::Gif => "GIF",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "TEXT" => Ok(Self::Text),
            "IMAGE" => Ok(Self::Image),
            "VOICE" => Ok(Self::Voice),
            "VIDEO" => Ok(Self::Video),
            "DOCUMENT" => Ok(Self::Document),
            "LOCATION" => Ok(Self::Location),
            "CONTACT" => Ok(Self::Contact),
            "STICKER" => Ok(Self::Sticker),
            "GIF" => Ok(Self::Gif),
            _ => Err(DomainError::validation_error(
                "content_type",
                "未知的消息内容类型",
            )),
        }
    }
}

/// 消息编辑窗口。超过该窗口后发送者不能再修改消息内容。
pub const EDIT_WINDOW_MINUTES: i64 = 15;

/// 消息实体
///
/// 消息ID由客户端生成并在服务端用于幂等去重；
/// 服务端时间戳在首次广播前赋值一次，之后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 消息唯一ID（客户端生成）
    pub id: MessageId,
    /// 所属会话ID
    pub conversation_id: ConversationId,
    /// 发送者ID
    pub sender_id: UserId,
    /// 消息内容
    pub content: MessageContent,
    /// 内容类型
    pub content_type: ContentType,
    /// 回复的消息ID（可选）
    pub reply_to_id: Option<MessageId>,
    /// 媒体文件URL（可选）
    pub media_url: Option<String>,
    /// 缩略图URL（可选）
    pub thumbnail_url: Option<String>,
    /// 转发来源消息ID（可选）
    pub forwarded_from: Option<MessageId>,
    /// 服务端时间戳
    pub server_timestamp: Timestamp,
    /// 最后编辑时间（可选）
    pub edited_at: Option<Timestamp>,
    /// 是否已删除
    pub deleted: bool,
}

impl Message {
    /// 创建新消息。内容验证失败时返回错误。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        content_type: ContentType,
        reply_to_id: Option<MessageId>,
        media_url: Option<String>,
        thumbnail_url: Option<String>,
        forwarded_from: Option<MessageId>,
        server_timestamp: Timestamp,
    ) -> DomainResult<Self> {
        let content = MessageContent::new(content)?;

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            content,
            content_type,
            reply_to_id,
            media_url,
            thumbnail_url,
            forwarded_from,
            server_timestamp,
            edited_at: None,
            deleted: false,
        })
    }

    /// 检查给定用户是否为消息发送者
    pub fn is_sent_by(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    /// 检查在指定时刻是否仍在编辑窗口内
    pub fn within_edit_window(&self, now: Timestamp) -> bool {
        now - self.server_timestamp <= Duration::minutes(EDIT_WINDOW_MINUTES)
    }

    /// 获取消息的简短预览（用于推送通知）
    pub fn preview(&self, max_chars: usize) -> String {
        self.content.preview(max_chars)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn sample_message(server_timestamp: Timestamp) -> Message {
        Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            "hello there",
            ContentType::Text,
            None,
            None,
            None,
            None,
            server_timestamp,
        )
        .unwrap()
    }

    #[test]
    fn test_message_creation_validates_content() {
        let result = Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            "",
            ContentType::Text,
            None,
            None,
            None,
            None,
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_edit_window() {
        let now = Utc::now();
        let message = sample_message(now);

        assert!(message.within_edit_window(now + Duration::minutes(14)));
        assert!(message.within_edit_window(now + Duration::minutes(EDIT_WINDOW_MINUTES)));
        assert!(!message.within_edit_window(now + Duration::minutes(16)));
    }

    #[test]
    fn test_content_type_round_trip() {
        for raw in ["TEXT", "IMAGE", "VOICE", "VIDEO", "DOCUMENT"] {
            let parsed: ContentType = raw.parse().unwrap();
            assert_eq!(parsed.as_str(), raw);
        }
        assert!("AUDIOBOOK".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_content_type_serde_uses_screaming_case() {
        let json = serde_json::to_string(&ContentType::Image).unwrap();
        assert_eq!(json, "\"IMAGE\"");
    }
}
