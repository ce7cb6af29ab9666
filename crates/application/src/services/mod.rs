//! 业务服务层
//!
//! 每个服务组合仓储、广播路由和在线状态存储，承载一类帧的业务规则。

pub mod call_service;
pub mod group_service;
pub mod messaging_service;
pub mod presence_service;

pub use call_service::CallService;
pub use group_service::GroupService;
pub use messaging_service::{MessagingService, SendMessageRequest};
pub use presence_service::PresenceService;
