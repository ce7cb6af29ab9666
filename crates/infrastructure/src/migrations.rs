//! 数据库迁移脚本，编译期内嵌。

use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
