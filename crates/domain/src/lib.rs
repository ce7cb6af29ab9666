//! 即时通讯系统核心领域模型
//!
//! 包含消息、会话、投递回执、在线状态等核心类型，
//! 以及访问持久化层的仓储接口。

pub mod call;
pub mod conversation;
pub mod delivery;
pub mod errors;
pub mod message;
pub mod presence;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use call::*;
pub use conversation::*;
pub use delivery::*;
pub use errors::*;
pub use message::*;
pub use presence::*;
pub use repositories::*;
pub use value_objects::*;
