//! 离线队列数据访问层（DAO）
//!
//! 负责 `sync_outbox` 表的读写，表结构由 `sqlx::migrate!` 管理。
//! 未配置数据库时使用内存队列，接口相同，只是进程退出后丢失。

use crate::backoffice::sync::models::{PendingOp, PendingOpKind};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// 离线队列存储：SQLite 或内存
pub enum OutboxStore {
    Memory(MemoryOutbox),
    Sqlite(OutboxDao),
}

impl OutboxStore {
    pub fn memory() -> Self {
        OutboxStore::Memory(MemoryOutbox::default())
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, OutboxStore::Sqlite(_))
    }

    pub async fn list(&self) -> Result<Vec<PendingOp>> {
        match self {
            OutboxStore::Memory(m) => Ok(m.list()),
            OutboxStore::Sqlite(dao) => dao.list().await,
        }
    }

    pub async fn get(&self, entity_id: &str) -> Result<Option<PendingOp>> {
        match self {
            OutboxStore::Memory(m) => Ok(m.get(entity_id)),
            OutboxStore::Sqlite(dao) => dao.get(entity_id).await,
        }
    }

    pub async fn upsert(&self, op: &PendingOp) -> Result<()> {
        match self {
            OutboxStore::Memory(m) => {
                m.upsert(op);
                Ok(())
            }
            OutboxStore::Sqlite(dao) => dao.upsert(op).await,
        }
    }

    pub async fn record_failure(&self, entity_id: &str, error: &str) -> Result<()> {
        match self {
            OutboxStore::Memory(m) => {
                m.record_failure(entity_id, error);
                Ok(())
            }
            OutboxStore::Sqlite(dao) => dao.record_failure(entity_id, error).await,
        }
    }

    pub async fn remove(&self, entity_id: &str) -> Result<()> {
        match self {
            OutboxStore::Memory(m) => {
                m.remove(entity_id);
                Ok(())
            }
            OutboxStore::Sqlite(dao) => dao.remove(entity_id).await,
        }
    }

    pub async fn count(&self) -> Result<i64> {
        match self {
            OutboxStore::Memory(m) => Ok(m.list().len() as i64),
            OutboxStore::Sqlite(dao) => dao.count().await,
        }
    }
}

/// 内存离线队列（按入队顺序，同一记录只保留一条）
#[derive(Default)]
pub struct MemoryOutbox {
    ops: Mutex<Vec<PendingOp>>,
}

impl MemoryOutbox {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingOp>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list(&self) -> Vec<PendingOp> {
        self.lock().clone()
    }

    pub fn get(&self, entity_id: &str) -> Option<PendingOp> {
        self.lock().iter().find(|op| op.entity_id == entity_id).cloned()
    }

    /// 覆盖时保留原入队时间和队列位置
    pub fn upsert(&self, op: &PendingOp) {
        let mut ops = self.lock();
        match ops.iter_mut().find(|o| o.entity_id == op.entity_id) {
            Some(slot) => {
                let created_at = slot.created_at;
                *slot = op.clone();
                slot.created_at = created_at;
            }
            None => ops.push(op.clone()),
        }
    }

    pub fn record_failure(&self, entity_id: &str, error: &str) {
        if let Some(op) = self.lock().iter_mut().find(|o| o.entity_id == entity_id) {
            op.attempts += 1;
            op.last_error = Some(error.to_string());
        }
    }

    pub fn remove(&self, entity_id: &str) {
        self.lock().retain(|o| o.entity_id != entity_id);
    }
}

/// 离线队列 DAO（基于 sqlx），每个实例只操作一个集合
#[derive(Clone)]
pub struct OutboxDao {
    db: Pool<Sqlite>,
    collection: String,
}

impl OutboxDao {
    /// 创建新的离线队列 DAO
    pub fn new(db: Pool<Sqlite>, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
        }
    }

    fn row_to_op(&self, row: &sqlx::sqlite::SqliteRow) -> Option<PendingOp> {
        let entity_id: String = row.get("entity_id");
        let op: String = row.get("op");
        let Some(kind) = PendingOpKind::parse(&op) else {
            warn!(
                "[OutboxDAO/{}] 忽略未知操作类型: {}, 记录: {}",
                self.collection, op, entity_id
            );
            return None;
        };
        let payload_str: String = row.get("payload");
        let payload = match serde_json::from_str(&payload_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "[OutboxDAO/{}] 忽略无法解析的 payload，记录: {}, 错误: {:?}",
                    self.collection, entity_id, e
                );
                return None;
            }
        };
        Some(PendingOp {
            entity_id,
            kind,
            payload,
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }

    /// 按入队顺序获取所有待同步操作
    pub async fn list(&self) -> Result<Vec<PendingOp>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, op, payload, attempts, last_error, created_at
            FROM sync_outbox
            WHERE collection = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.db)
        .await
        .context("查询离线队列失败")?;

        let ops: Vec<PendingOp> = rows.iter().filter_map(|r| self.row_to_op(r)).collect();
        debug!(
            "[OutboxDAO/{}] 获取离线队列，共 {} 条",
            self.collection,
            ops.len()
        );
        Ok(ops)
    }

    /// 获取某条记录的待同步操作
    pub async fn get(&self, entity_id: &str) -> Result<Option<PendingOp>> {
        let row = sqlx::query(
            r#"
            SELECT entity_id, op, payload, attempts, last_error, created_at
            FROM sync_outbox
            WHERE collection = ? AND entity_id = ?
            "#,
        )
        .bind(&self.collection)
        .bind(entity_id)
        .fetch_optional(&self.db)
        .await
        .context("查询离线操作失败")?;

        Ok(row.and_then(|r| self.row_to_op(&r)))
    }

    /// 插入或覆盖某条记录的待同步操作（保留原入队时间）
    pub async fn upsert(&self, op: &PendingOp) -> Result<()> {
        let sql = r#"
            INSERT INTO sync_outbox (
                collection, entity_id, op, payload, attempts, last_error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, entity_id) DO UPDATE SET
                op = excluded.op,
                payload = excluded.payload,
                attempts = excluded.attempts,
                last_error = excluded.last_error
        "#;

        sqlx::query(sql)
            .bind(&self.collection)
            .bind(&op.entity_id)
            .bind(op.kind.as_str())
            .bind(op.payload.to_string())
            .bind(op.attempts)
            .bind(op.last_error.as_deref())
            .bind(op.created_at)
            .execute(&self.db)
            .await
            .context("写入离线操作失败")?;
        Ok(())
    }

    /// 记录一次回放失败
    pub async fn record_failure(&self, entity_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_outbox
            SET attempts = attempts + 1, last_error = ?
            WHERE collection = ? AND entity_id = ?
            "#,
        )
        .bind(error)
        .bind(&self.collection)
        .bind(entity_id)
        .execute(&self.db)
        .await
        .context("更新离线操作失败次数失败")?;
        Ok(())
    }

    /// 出队
    pub async fn remove(&self, entity_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM sync_outbox
            WHERE collection = ? AND entity_id = ?
            "#,
        )
        .bind(&self.collection)
        .bind(entity_id)
        .execute(&self.db)
        .await
        .context("删除离线操作失败")?;
        Ok(())
    }

    /// 待同步操作数
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_outbox WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.db)
            .await
            .context("统计离线队列失败")?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoffice::db::create_sqlite_pool_with_migration;
    use serde_json::json;

    fn op(entity_id: &str, kind: PendingOpKind, created_at: i64) -> PendingOp {
        PendingOp {
            entity_id: entity_id.to_string(),
            kind,
            payload: json!({"name": entity_id}),
            attempts: 0,
            last_error: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn queue_is_ordered_and_scoped_per_collection() -> Result<()> {
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let clients = OutboxDao::new(pool.clone(), "clients");
        let products = OutboxDao::new(pool, "products");

        clients.upsert(&op("b", PendingOpKind::Update, 20)).await?;
        clients.upsert(&op("a", PendingOpKind::Create, 10)).await?;
        products.upsert(&op("a", PendingOpKind::Delete, 5)).await?;

        let ids: Vec<String> = clients.list().await?.into_iter().map(|o| o.entity_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(products.count().await?, 1);

        // 覆盖时保留原入队时间
        clients.upsert(&op("a", PendingOpKind::Delete, 99)).await?;
        let a = clients.get("a").await?.unwrap();
        assert_eq!(a.kind, PendingOpKind::Delete);
        assert_eq!(a.created_at, 10);

        clients.record_failure("a", "HTTP 错误 500").await?;
        let a = clients.get("a").await?.unwrap();
        assert_eq!(a.attempts, 1);
        assert_eq!(a.last_error.as_deref(), Some("HTTP 错误 500"));

        clients.remove("a").await?;
        assert!(clients.get("a").await?.is_none());
        assert_eq!(clients.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_semantics() -> Result<()> {
        let store = OutboxStore::memory();
        assert!(!store.is_durable());

        store.upsert(&op("b", PendingOpKind::Update, 20)).await?;
        store.upsert(&op("a", PendingOpKind::Create, 10)).await?;
        store.upsert(&op("b", PendingOpKind::Delete, 99)).await?;

        let ops = store.list().await?;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].entity_id, "b");
        assert_eq!(ops[0].kind, PendingOpKind::Delete);
        assert_eq!(ops[0].created_at, 20);

        store.record_failure("a", "离线").await?;
        assert_eq!(store.get("a").await?.unwrap().attempts, 1);

        store.remove("b").await?;
        assert_eq!(store.count().await?, 1);
        Ok(())
    }
}
