//! 数据源抽象
//!
//! 同步器只通过 `DataSource` 访问数据：远程 REST 接口（`CollectionApi`）
//! 或内存示例数据（`FixtureSource`，演示模式），由配置决定。

use crate::backoffice::catalog::Entity;
use crate::backoffice::serialization::{merge_json, now_rfc3339};
use crate::backoffice::sync::api::CollectionApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// 集合数据源
#[async_trait]
pub trait DataSource<E: Entity>: Send + Sync {
    /// 数据源名称（用于日志）
    fn name(&self) -> &'static str;

    async fn fetch_all(&self) -> Result<Vec<E>>;

    async fn fetch_one(&self, id: &str) -> Result<E>;

    async fn create(&self, payload: &Value) -> Result<E>;

    async fn update(&self, id: &str, payload: &Value) -> Result<E>;

    async fn delete(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<E: Entity> DataSource<E> for CollectionApi<E> {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn fetch_all(&self) -> Result<Vec<E>> {
        self.list().await
    }

    async fn fetch_one(&self, id: &str) -> Result<E> {
        self.get(id).await
    }

    async fn create(&self, payload: &Value) -> Result<E> {
        CollectionApi::create(self, payload).await
    }

    async fn update(&self, id: &str, payload: &Value) -> Result<E> {
        CollectionApi::update(self, id, payload).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        CollectionApi::delete(self, id).await
    }
}

/// 内存示例数据源
///
/// 行为上模拟一个服务器：分配数字 ID、写入 `createdAt`、按字段合并修改。
/// 可以切换为离线状态，此时所有调用都失败。
pub struct FixtureSource<E> {
    records: Mutex<Vec<E>>,
    online: AtomicBool,
}

impl<E: Entity> FixtureSource<E> {
    /// 以内置示例数据初始化
    pub fn new() -> Self {
        Self::with_records(E::fixtures())
    }

    pub fn with_records(records: Vec<E>) -> Self {
        Self {
            records: Mutex::new(records),
            online: AtomicBool::new(true),
        }
    }

    /// 始终失败的数据源（模拟网络中断）
    pub fn offline() -> Self {
        let source = Self::new();
        source.set_online(false);
        source
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// 当前数据快照
    pub fn snapshot(&self) -> Vec<E> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "数据源离线: {}",
                E::schema().collection
            ))
        }
    }

    /// 下一个数字 ID：现有数字 ID 的最大值加一
    fn next_id(records: &[E]) -> String {
        let max = records
            .iter()
            .filter_map(|r| r.id().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }
}

impl<E: Entity> Default for FixtureSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> DataSource<E> for FixtureSource<E> {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_all(&self) -> Result<Vec<E>> {
        self.ensure_online()?;
        Ok(self.snapshot())
    }

    async fn fetch_one(&self, id: &str) -> Result<E> {
        self.ensure_online()?;
        self.snapshot()
            .into_iter()
            .find(|r| r.id() == id)
            .ok_or_else(|| anyhow::anyhow!("记录不存在: {}", id))
    }

    async fn create(&self, payload: &Value) -> Result<E> {
        self.ensure_online()?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let mut value = payload.clone();
        let id = Self::next_id(&records);
        if !merge_json(
            &mut value,
            &serde_json::json!({ "id": id, "createdAt": now_rfc3339() }),
        ) {
            return Err(anyhow::anyhow!("新建记录的 payload 必须是 JSON 对象"));
        }
        let entity: E = serde_json::from_value(value).context("构造记录失败")?;
        debug!(
            "[FixtureSource/{}] 新建记录: {}",
            E::schema().collection,
            entity.id()
        );
        records.push(entity.clone());
        Ok(entity)
    }

    async fn update(&self, id: &str, payload: &Value) -> Result<E> {
        self.ensure_online()?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let slot = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| anyhow::anyhow!("记录不存在: {}", id))?;
        let mut value = serde_json::to_value(&*slot).context("序列化记录失败")?;
        merge_json(&mut value, payload);
        let updated: E = serde_json::from_value(value).context("合并修改失败")?;
        *slot = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_online()?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(anyhow::anyhow!("记录不存在: {}", id));
        }
        Ok(())
    }
}
