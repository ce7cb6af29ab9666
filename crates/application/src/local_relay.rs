//! 进程内中继实现
//!
//! 单实例部署或测试时使用：发布的消息经由进程内广播通道回到订阅端，
//! 行为与跨实例中继一致，只是不出进程。

use tokio::sync::{broadcast, mpsc};

use domain::UserId;

use crate::relay::{RelayError, RelayMessage, RelayTransport};

const CHANNEL_CAPACITY: usize = 1000;

/// 进程内中继
pub struct LocalRelay {
    sender: broadcast::Sender<RelayMessage>,
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRelay {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

#[async_trait::async_trait]
impl RelayTransport for LocalRelay {
    async fn publish(&self, user_id: UserId, payload: &str) -> Result<(), RelayError> {
        // 没有订阅者时发送会失败，对进程内中继来说不算错误
        let _ = self.sender.send(RelayMessage {
            user_id,
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayMessage>, RelayError> {
        let mut broadcast_rx = self.sender.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "进程内中继消费过慢，部分消息被跳过");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
