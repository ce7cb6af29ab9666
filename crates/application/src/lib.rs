//! 应用层：实时投递核心
//!
//! 连接注册表、广播路由、跨实例中继、投递状态追踪、
//! 在线状态与限流，以及消息、通话、群组事件等编排服务。

pub mod clock;
pub mod delivery;
pub mod error;
pub mod local_relay;
pub mod presence;
pub mod protocol;
pub mod push;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod router;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use delivery::DeliveryTracker;
pub use error::ApplicationError;
pub use local_relay::LocalRelay;
pub use presence::{PresenceStore, RedisPresenceStore};
pub use protocol::{AckStatus, ClientFrame, ServerEvent};
pub use push::{NoopPushSender, PushSender};
pub use rate_limiter::{IpRateLimiter, MessageRateLimiter, RateLimitError};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use relay::{run_relay_listener, RelayError, RelayMessage, RelayTransport};
pub use router::BroadcastRouter;
pub use services::{
    CallService, GroupService, MessagingService, PresenceService, SendMessageRequest,
};
