//! 基础设施层实现。
//!
//! 提供数据库仓储、Redis 跨实例中继与内存适配器，实现应用/领域层定义的接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod relay;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use memory::{
    MemoryConversationRepository, MemoryDeliveryRepository, MemoryMessageRepository,
    MemoryUserRepository,
};
pub use migrations::MIGRATOR;
pub use relay::RedisRelay;
pub use repository::{
    create_pg_pool, PgConversationRepository, PgDeliveryRepository, PgMessageRepository, PgStorage,
    PgUserRepository,
};
