//! 离线推送接口
//!
//! 目标用户在所有实例都不在线时，消息落库之外唯一的触达手段。
//! 推送失败只记日志，不影响消息投递结果。

use crate::error::ApplicationError;

/// 推送发送接口
#[async_trait::async_trait]
pub trait PushSender: Send + Sync {
    /// 向设备令牌发送一条推送。
    ///
    /// `data` 携带客户端点击跳转所需的业务字段。
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<(), ApplicationError>;
}

/// 空实现：只记日志，不实际发送
///
/// 未接入推送网关的环境用它占位。
pub struct NoopPushSender;

#[async_trait::async_trait]
impl PushSender for NoopPushSender {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        _data: &serde_json::Value,
    ) -> Result<(), ApplicationError> {
        tracing::debug!(token, title, body, "推送未接入网关，仅记录");
        Ok(())
    }
}

/// 测试用的记录实现
pub mod memory {
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct RecordedPush {
        pub token: String,
        pub title: String,
        pub body: String,
        pub data: serde_json::Value,
    }

    #[derive(Default)]
    pub struct RecordingPushSender {
        pushes: Mutex<Vec<RecordedPush>>,
    }

    impl RecordingPushSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn recorded(&self) -> Vec<RecordedPush> {
            self.pushes.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl PushSender for RecordingPushSender {
        async fn send(
            &self,
            token: &str,
            title: &str,
            body: &str,
            data: &serde_json::Value,
        ) -> Result<(), ApplicationError> {
            self.pushes.lock().await.push(RecordedPush {
                token: token.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                data: data.clone(),
            });
            Ok(())
        }
    }
}
