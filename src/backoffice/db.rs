//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：本 crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// 创建 SQLite 连接池并执行所有未执行的迁移
///
/// 内存数据库（`sqlite::memory:`）每个连接都是独立的库，因此只开一个连接
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))?;

    // 从 `migrations/` 目录读取迁移并执行
    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;
    info!("[DB] SQLite 连接池已就绪: {}", db_url);

    Ok(pool)
}
