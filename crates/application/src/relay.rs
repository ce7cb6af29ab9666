//! 跨实例消息中继
//!
//! 同一用户的连接可能落在不同实例上。发送方实例本地投递失败时，
//! 把已序列化的帧发布到按用户划分的频道；每个实例订阅全部频道，
//! 收到后只投递给本实例在线的用户，其余一律丢弃。

use std::sync::Arc;

use domain::UserId;
use tokio::sync::mpsc;

use crate::registry::ConnectionRegistry;

/// 中继收到的一条消息：目标用户 + 已序列化的帧
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub user_id: UserId,
    pub payload: String,
}

/// 中继错误类型
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("发布失败: {0}")]
    PublishFailed(String),

    #[error("订阅失败: {0}")]
    SubscribeFailed(String),
}

impl RelayError {
    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    pub fn subscribe_failed(msg: impl Into<String>) -> Self {
        Self::SubscribeFailed(msg.into())
    }
}

/// 跨实例中继接口
///
/// 实现者负责频道命名与重连；调用方只关心用户与载荷。
#[async_trait::async_trait]
pub trait RelayTransport: Send + Sync {
    /// 向目标用户的频道发布一帧。
    async fn publish(&self, user_id: UserId, payload: &str) -> Result<(), RelayError>;

    /// 订阅所有用户频道，返回接收端。整个进程生命周期内只调用一次。
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayMessage>, RelayError>;
}

/// 中继监听循环
///
/// 从订阅端逐条读取，目标用户在本实例有连接才投递；
/// 不在线直接丢弃，由发送方实例负责离线推送。
/// 订阅端关闭时返回。
pub async fn run_relay_listener(
    mut rx: mpsc::UnboundedReceiver<RelayMessage>,
    registry: Arc<ConnectionRegistry>,
) {
    tracing::info!("中继监听已启动");

    while let Some(relay_message) = rx.recv().await {
        let user_id = relay_message.user_id;
        if registry.is_online(user_id).await {
            let delivered = registry.send_to_user(user_id, &relay_message.payload).await;
            tracing::debug!(user_id = %user_id, delivered, "中继消息已投递");
        } else {
            tracing::debug!(user_id = %user_id, "中继消息目标不在本实例，丢弃");
        }
    }

    tracing::info!("中继监听已退出");
}
