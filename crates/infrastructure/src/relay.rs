//! Redis Pub/Sub 跨实例中继
//!
//! 每个接收者一个频道（固定前缀 + 用户ID），发布端带重试，
//! 订阅端用模式订阅一次拿下整个前缀命名空间，断线自动重连。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::relay::{RelayError, RelayMessage, RelayTransport};
use domain::UserId;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_PUBLISH_RETRIES: u32 = 3;
const MAX_RECONNECT_RETRIES: u32 = 5;
const RECONNECT_BASE_MS: u64 = 500;

/// Redis 中继
pub struct RedisRelay {
    client: Arc<redis::Client>,
    publish_conn: ConnectionManager,
    channel_prefix: String,
    shutdown: Arc<AtomicBool>,
}

impl RedisRelay {
    /// 建立发布连接并返回中继实例
    pub async fn connect(
        client: Arc<redis::Client>,
        channel_prefix: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let publish_conn = ConnectionManager::new((*client).clone())
            .await
            .map_err(|e| RelayError::publish_failed(format!("创建 Redis 连接失败: {e}")))?;

        let channel_prefix = channel_prefix.into();
        info!(channel_prefix = %channel_prefix, "Redis 中继已连接");

        Ok(Self {
            client,
            publish_conn,
            channel_prefix,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 通知订阅循环退出
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn channel_for(&self, user_id: UserId) -> String {
        format!("{}{}", self.channel_prefix, user_id)
    }

    /// 从频道名还原目标用户ID
    fn user_id_from_channel(prefix: &str, channel: &str) -> Option<UserId> {
        let suffix = channel.strip_prefix(prefix)?;
        Uuid::parse_str(suffix).ok().map(UserId::from)
    }

    async fn open_pubsub(
        client: &redis::Client,
        pattern: &str,
    ) -> Result<redis::aio::PubSub, RelayError> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::subscribe_failed(format!("获取订阅连接失败: {e}")))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| RelayError::subscribe_failed(format!("模式订阅 {pattern} 失败: {e}")))?;
        Ok(pubsub)
    }

    /// 持续从一条订阅连接读消息，直到连接断开或停机。
    /// 返回 false 表示接收端已关闭，整个循环应当终止。
    async fn pump_messages(
        pubsub: &mut redis::aio::PubSub,
        prefix: &str,
        tx: &mpsc::UnboundedSender<RelayMessage>,
        shutdown: &AtomicBool,
    ) -> bool {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }

            // 带超时轮询，停机信号才有机会被看到
            let next = tokio::time::timeout(Duration::from_millis(1000), async {
                pubsub.on_message().next().await
            })
            .await;

            match next {
                Ok(Some(msg)) => {
                    let channel = msg.get_channel_name().to_string();
                    let Some(user_id) = Self::user_id_from_channel(prefix, &channel) else {
                        warn!(channel = %channel, "中继频道名无法解析，丢弃");
                        continue;
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "读取中继载荷失败，丢弃");
                            continue;
                        }
                    };

                    debug!(user_id = %user_id, "收到中继消息");
                    if tx.send(RelayMessage { user_id, payload }).is_err() {
                        info!("中继接收端已关闭，停止订阅");
                        return false;
                    }
                }
                // 流结束，连接断了，交给外层重连
                Ok(None) => return true,
                // 超时，回到循环顶部检查停机信号
                Err(_) => continue,
            }
        }
    }
}

#[async_trait::async_trait]
impl RelayTransport for RedisRelay {
    async fn publish(&self, user_id: UserId, payload: &str) -> Result<(), RelayError> {
        let channel = self.channel_for(user_id);
        let mut conn = self.publish_conn.clone();
        let mut attempt = 0u32;

        loop {
            let result: Result<i64, redis::RedisError> = conn.publish(&channel, payload).await;
            match result {
                Ok(subscriber_count) => {
                    debug!(channel = %channel, subscriber_count, "中继消息已发布");
                    return Ok(());
                }
                Err(e) if attempt < MAX_PUBLISH_RETRIES => {
                    attempt += 1;
                    warn!(channel = %channel, attempt, error = %e, "发布失败，重试");
                    let jitter = rand::random::<u64>() % 50;
                    sleep(Duration::from_millis(
                        100 * 2_u64.pow(attempt - 1) + jitter,
                    ))
                    .await;
                }
                Err(e) => {
                    return Err(RelayError::publish_failed(format!(
                        "频道 {channel} 发布失败: {e}"
                    )));
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayMessage>, RelayError> {
        let pattern = format!("{}*", self.channel_prefix);
        // 首次订阅失败直接报给调用方，启动期的配置错误不应该被吞掉
        let pubsub = Self::open_pubsub(&self.client, &pattern).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::clone(&self.client);
        let prefix = self.channel_prefix.clone();
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);
            let mut retry_count = 0u32;

            while !shutdown.load(Ordering::Relaxed) {
                let mut current = match pubsub.take() {
                    Some(existing) => existing,
                    None => match Self::open_pubsub(&client, &pattern).await {
                        Ok(reopened) => {
                            info!(pattern = %pattern, "中继订阅已重建");
                            retry_count = 0;
                            reopened
                        }
                        Err(e) => {
                            retry_count += 1;
                            if retry_count >= MAX_RECONNECT_RETRIES {
                                error!(error = %e, "中继订阅重连失败次数过多，放弃");
                                break;
                            }
                            let delay = RECONNECT_BASE_MS * 2_u64.pow(retry_count - 1);
                            warn!(error = %e, retry_count, delay_ms = delay, "中继订阅重连失败");
                            sleep(Duration::from_millis(delay)).await;
                            continue;
                        }
                    },
                };

                if !Self::pump_messages(&mut current, &prefix, &tx, &shutdown).await {
                    break;
                }
                warn!("中继订阅连接断开，准备重连");
            }

            info!("中继订阅循环已停止");
        });

        Ok(rx)
    }
}
