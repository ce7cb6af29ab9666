//! 消息与握手限流
//!
//! 每用户滑动窗口限制消息频率，防止消息洪水；
//! 另有一个更粗粒度的每IP窗口保护未认证的握手端点。

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use domain::UserId;

/// 单个时间窗口的计数状态
#[derive(Debug, Clone)]
struct Window {
    count: u32,
    window_start: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.window_start = Instant::now();
    }

    fn is_over_limit(&self, max: u32) -> bool {
        self.count >= max
    }

    fn increment(&mut self) {
        self.count += 1;
    }
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded: {current}/{max} in window")]
    RateLimitExceeded { current: u32, max: u32 },

    #[error("rate limiter internal error")]
    Internal,
}

/// 消息限流器
///
/// 窗口到期即整体重置。达到配额后的请求被拒绝，直到窗口重置。
pub struct MessageRateLimiter {
    window_duration: Duration,
    max_messages: u32,
    user_windows: RwLock<HashMap<UserId, Window>>,
}

impl MessageRateLimiter {
    pub fn new(window_duration: Duration, max_messages: u32) -> Self {
        Self {
            window_duration,
            max_messages,
            user_windows: RwLock::new(HashMap::new()),
        }
    }

    /// 检查用户是否可以发送消息，允许则计入本次发送。
    pub fn check_message(&self, user_id: UserId) -> Result<(), RateLimitError> {
        let mut windows = self
            .user_windows
            .write()
            .map_err(|_| RateLimitError::Internal)?;

        let window = windows.entry(user_id).or_insert_with(Window::new);
        let now = Instant::now();

        if now.duration_since(window.window_start) >= self.window_duration {
            window.reset();
        }

        if window.is_over_limit(self.max_messages) {
            return Err(RateLimitError::RateLimitExceeded {
                current: window.count,
                max: self.max_messages,
            });
        }

        window.increment();
        Ok(())
    }

    /// 用户最后一条连接断开时清除其窗口状态。
    pub fn remove_user(&self, user_id: UserId) {
        if let Ok(mut windows) = self.user_windows.write() {
            windows.remove(&user_id);
        }
    }

    /// 清理过期的窗口记录，防止内存泄漏。
    pub fn cleanup_expired(&self) {
        if let Ok(mut windows) = self.user_windows.write() {
            let now = Instant::now();
            let window_duration = self.window_duration;
            windows.retain(|_, w| now.duration_since(w.window_start) < window_duration * 2);
        }
    }
}

/// 握手限流器，按来源IP计数。
pub struct IpRateLimiter {
    window_duration: Duration,
    max_attempts: u32,
    ip_windows: RwLock<HashMap<IpAddr, Window>>,
}

impl IpRateLimiter {
    pub fn new(window_duration: Duration, max_attempts: u32) -> Self {
        Self {
            window_duration,
            max_attempts,
            ip_windows: RwLock::new(HashMap::new()),
        }
    }

    /// 检查来源IP是否可以再次尝试握手。
    pub fn check_attempt(&self, addr: IpAddr) -> Result<(), RateLimitError> {
        let mut windows = self
            .ip_windows
            .write()
            .map_err(|_| RateLimitError::Internal)?;

        let window = windows.entry(addr).or_insert_with(Window::new);
        let now = Instant::now();

        if now.duration_since(window.window_start) >= self.window_duration {
            window.reset();
        }

        if window.is_over_limit(self.max_attempts) {
            return Err(RateLimitError::RateLimitExceeded {
                current: window.count,
                max: self.max_attempts,
            });
        }

        window.increment();
        Ok(())
    }

    pub fn cleanup_expired(&self) {
        if let Ok(mut windows) = self.ip_windows.write() {
            let now = Instant::now();
            let window_duration = self.window_duration;
            windows.retain(|_, w| now.duration_since(w.window_start) < window_duration * 2);
        }
    }
}
