//! 实体列表同步服务层
//!
//! 持有一种实体的内存列表，对数据源执行增删改，失败时降级为本地模拟，
//! 并为界面层提供过滤视图。离线操作写入 outbox（SQLite 或内存），由 `flush_outbox` 显式回放。

use crate::backoffice::catalog::{matches_search, CategoryFilter, Entity};
use crate::backoffice::serialization::{generate_local_id, merge_json, now_millis, now_rfc3339};
use crate::backoffice::sync::dao::{OutboxDao, OutboxStore};
use crate::backoffice::sync::listener::{
    EmptySyncListener, Notification, OperationKind, SyncListener,
};
use crate::backoffice::sync::models::{
    FlushReport, LoadOutcome, OpResult, PendingOp, PendingOpKind, Provenance, SyncOutcome,
    SyncerConfig, Tracked,
};
use crate::backoffice::sync::source::DataSource;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// 进行中的操作计数守卫，drop 时自动减一
struct BusyGuard<'a>(&'a AtomicUsize);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 实体列表同步器
pub struct EntitySyncer<E: Entity> {
    /// 同步配置（归属用户随会话切换）
    config: RwLock<SyncerConfig>,
    /// 数据源（远程接口或示例数据）
    source: Arc<dyn DataSource<E>>,
    /// 离线队列（未配置数据库时保存在内存中）
    outbox: OutboxStore,
    /// 同步监听器
    listener: Arc<dyn SyncListener>,
    records: RwLock<Vec<Tracked<E>>>,
    in_flight: AtomicUsize,
}

impl<E: Entity> EntitySyncer<E> {
    /// 创建新的同步器（使用默认空监听器，离线队列保存在内存中）
    pub fn new(config: SyncerConfig, source: Arc<dyn DataSource<E>>) -> Self {
        Self::with_listener(config, source, Arc::new(EmptySyncListener))
    }

    /// 创建新的同步器（带自定义监听器，离线队列保存在内存中）
    pub fn with_listener(
        config: SyncerConfig,
        source: Arc<dyn DataSource<E>>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        info!(
            "[Sync/{}] 创建同步器，数据源: {}",
            E::schema().collection,
            source.name()
        );
        Self {
            config: RwLock::new(config),
            source,
            outbox: OutboxStore::memory(),
            listener,
            records: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// 创建新的同步器（使用共享连接池保存离线队列）
    pub fn with_listener_and_db(
        config: SyncerConfig,
        source: Arc<dyn DataSource<E>>,
        listener: Arc<dyn SyncListener>,
        db: Pool<Sqlite>,
    ) -> Self {
        let mut syncer = Self::with_listener(config, source, listener);
        syncer.outbox = OutboxStore::Sqlite(OutboxDao::new(db, E::schema().collection));
        info!(
            "[Sync/{}] 已启用离线队列（使用共享连接池）",
            E::schema().collection
        );
        syncer
    }

    fn collection(&self) -> &'static str {
        E::schema().collection
    }

    fn begin(&self) -> BusyGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        BusyGuard(&self.in_flight)
    }

    /// 是否有操作正在等待数据源返回（界面据此显示加载状态）
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// 会话切换后更新归属用户（影响之后的新建）
    pub fn set_owner_id(&self, owner_id: Option<String>) {
        debug!(
            "[Sync/{}] 归属用户更新为: {:?}",
            self.collection(),
            owner_id
        );
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .owner_id = owner_id;
    }

    fn fallback_enabled(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fallback_to_fixtures
    }

    fn with_records<R>(&self, f: impl FnOnce(&Vec<Tracked<E>>) -> R) -> R {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn with_records_mut<R>(&self, f: impl FnOnce(&mut Vec<Tracked<E>>) -> R) -> R {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // ========== 查询 ==========

    pub fn len(&self) -> usize {
        self.with_records(|records| records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 完整列表（插入顺序）
    pub fn all(&self) -> Vec<E> {
        self.with_records(|records| records.iter().map(|r| r.entity.clone()).collect())
    }

    /// 完整列表（含来源状态）
    pub fn tracked(&self) -> Vec<Tracked<E>> {
        self.with_records(|records| records.clone())
    }

    pub fn get(&self, id: &str) -> Option<Tracked<E>> {
        self.with_records(|records| records.iter().find(|r| r.entity.id() == id).cloned())
    }

    /// 尚未被服务器确认的本地改动条数
    pub fn pending_count(&self) -> usize {
        self.with_records(|records| {
            records
                .iter()
                .filter(|r| r.provenance.is_pending())
                .count()
        })
    }

    /// 过滤视图：搜索条件 AND 分类条件，保持原顺序，不修改列表
    pub fn filtered_view(&self, search_term: &str, category: &CategoryFilter) -> Vec<E> {
        self.filtered_tracked(search_term, category)
            .into_iter()
            .map(|r| r.entity)
            .collect()
    }

    /// 过滤视图（含来源状态，用于界面标记离线记录）
    pub fn filtered_tracked(&self, search_term: &str, category: &CategoryFilter) -> Vec<Tracked<E>> {
        self.with_records(|records| {
            records
                .iter()
                .filter(|r| matches_search(&r.entity, search_term) && category.matches(&r.entity))
                .cloned()
                .collect()
        })
    }

    // ========== 回调 ==========

    async fn notify_list_changed(&self) {
        let json = self.with_records(|records| serde_json::to_string(records));
        match json {
            Ok(json) => self.listener.on_list_changed(self.collection(), json).await,
            Err(e) => error!("[Sync/{}] 序列化列表失败: {:?}", self.collection(), e),
        }
    }

    async fn notify(&self, operation: OperationKind, outcome: SyncOutcome) {
        let notification = Notification::for_operation(E::schema(), operation, outcome);
        debug!(
            "[Sync/{}] 提示: {} - {}",
            self.collection(),
            notification.title,
            notification.description
        );
        self.listener.on_notification(notification).await;
    }

    // ========== 加载 ==========

    /// 加载全量列表
    ///
    /// 数据源失败且允许降级时，使用内置示例数据（标记为 `Fixture`）
    pub async fn load(&self) -> Result<LoadOutcome> {
        let _busy = self.begin();
        info!(
            "[Sync/{}] 🔄 开始加载列表，数据源: {}",
            self.collection(),
            self.source.name()
        );

        let outcome = match self.source.fetch_all().await {
            Ok(list) => {
                let list = dedupe_by_id(list, self.collection());
                let count = list.len();
                self.replace_all(list, Provenance::Confirmed);
                info!("[Sync/{}] ✅ 加载完成，共 {} 条", self.collection(), count);
                LoadOutcome::Server(count)
            }
            Err(e) => {
                error!("[Sync/{}] 加载列表失败: {:?}", self.collection(), e);
                if !self.fallback_enabled() {
                    return Err(e.context(format!("加载 {} 失败", self.collection())));
                }
                let fixtures = E::fixtures();
                let count = fixtures.len();
                self.replace_all(fixtures, Provenance::Fixture);
                warn!(
                    "[Sync/{}] 已降级为内置示例数据，共 {} 条",
                    self.collection(),
                    count
                );
                self.listener
                    .on_load_fallback(self.collection(), format!("{:#}", e))
                    .await;
                LoadOutcome::Fixtures(count)
            }
        };

        self.restore_pending().await;
        self.notify_list_changed().await;
        Ok(outcome)
    }

    fn replace_all(&self, list: Vec<E>, provenance: Provenance) {
        self.with_records_mut(|records| {
            *records = list
                .into_iter()
                .map(|entity| Tracked::new(provenance, entity))
                .collect();
        });
    }

    /// 把离线队列中尚未同步的操作重新叠加到刚加载的列表上
    async fn restore_pending(&self) {
        let ops = match self.outbox.list().await {
            Ok(ops) => ops,
            Err(e) => {
                error!("[Sync/{}] 读取离线队列失败: {:?}", self.collection(), e);
                return;
            }
        };
        if ops.is_empty() {
            return;
        }

        let collection = self.collection();
        self.with_records_mut(|records| {
            for op in &ops {
                match op.kind {
                    PendingOpKind::Create => {
                        if records.iter().any(|r| r.entity.id() == op.entity_id) {
                            continue;
                        }
                        let created_at = DateTime::from_timestamp_millis(op.created_at)
                            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                            .unwrap_or_else(now_rfc3339);
                        match build_local::<E>(&op.payload, &op.entity_id, &created_at) {
                            Ok(entity) => {
                                records.push(Tracked::new(Provenance::PendingCreate, entity))
                            }
                            Err(e) => warn!(
                                "[Sync/{}] 无法恢复离线新建记录 {}: {:?}",
                                collection, op.entity_id, e
                            ),
                        }
                    }
                    PendingOpKind::Update => {
                        if let Some(slot) =
                            records.iter_mut().find(|r| r.entity.id() == op.entity_id)
                        {
                            match merged(&slot.entity, &op.payload) {
                                Ok(entity) => {
                                    *slot = Tracked::new(Provenance::PendingUpdate, entity)
                                }
                                Err(e) => warn!(
                                    "[Sync/{}] 无法恢复离线修改 {}: {:?}",
                                    collection, op.entity_id, e
                                ),
                            }
                        }
                    }
                    PendingOpKind::Delete => {
                        records.retain(|r| r.entity.id() != op.entity_id);
                    }
                }
            }
        });
        info!(
            "[Sync/{}] 已恢复 {} 条离线操作",
            self.collection(),
            ops.len()
        );
    }

    // ========== 新建 ==========

    /// 新建记录
    ///
    /// 远程失败时在本地生成记录（ID 为当前毫秒时间戳），列表在两种情况下都恰好增加一条
    pub async fn create(&self, draft: E::Draft) -> Result<OpResult<E>> {
        let errors = E::validate_draft(&draft);
        if !errors.is_empty() {
            warn!(
                "[Sync/{}] 表单校验失败: {:?}",
                self.collection(),
                errors
            );
            anyhow::bail!("{} 校验失败: {}", E::schema().label, errors.join("; "));
        }

        let mut payload = serde_json::to_value(&draft).context("序列化表单失败")?;
        self.fill_owner(&mut payload);

        let _busy = self.begin();
        info!("[Sync/{}] ➕ 新建记录", self.collection());

        let (entity, outcome) = match self.source.create(&payload).await {
            Ok(entity) => {
                info!(
                    "[Sync/{}] ✅ 服务器已确认新建，ID: {}",
                    self.collection(),
                    entity.id()
                );
                let collection = self.collection();
                let rekeyed = self.with_records_mut(|records| {
                    let rekeyed = rekey_colliding(records, entity.id(), collection);
                    records.push(Tracked::new(Provenance::Confirmed, entity.clone()));
                    rekeyed
                });
                if let Some((old_id, new_id)) = rekeyed {
                    self.outbox_rename(&old_id, &new_id).await;
                }
                (entity, SyncOutcome::Synced)
            }
            Err(e) => {
                warn!(
                    "[Sync/{}] 远程新建失败，改为本地保存（离线）: {:?}",
                    self.collection(),
                    e
                );
                let created_at = now_rfc3339();
                let entity = self.with_records_mut(|records| -> Result<E> {
                    let id = generate_local_id(|candidate| {
                        records.iter().any(|r| r.entity.id() == candidate)
                    });
                    let entity = build_local::<E>(&payload, &id, &created_at)?;
                    records.push(Tracked::new(Provenance::PendingCreate, entity.clone()));
                    Ok(entity)
                })?;
                self.queue(PendingOp {
                    entity_id: entity.id().to_string(),
                    kind: PendingOpKind::Create,
                    payload,
                    attempts: 0,
                    last_error: None,
                    created_at: now_millis(),
                })
                .await;
                (entity, SyncOutcome::Offline)
            }
        };

        self.notify(OperationKind::Create, outcome).await;
        self.notify_list_changed().await;
        Ok(OpResult { entity, outcome })
    }

    /// 用当前会话用户填充归属字段（表单未提供时）
    fn fill_owner(&self, payload: &mut Value) {
        let owner = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .owner_id
            .clone();
        let (Some(field), Some(owner)) = (E::schema().owner_field, owner) else {
            return;
        };
        if let Some(obj) = payload.as_object_mut() {
            let missing = obj.get(field).map_or(true, Value::is_null);
            if missing {
                obj.insert(field.to_string(), Value::String(owner));
            }
        }
    }

    // ========== 修改 ==========

    /// 修改记录，`id` 不在列表中时不做任何操作并返回 `None`
    pub async fn update(&self, id: &str, patch: E::Patch) -> Result<Option<OpResult<E>>> {
        let patch = serde_json::to_value(&patch).context("序列化修改失败")?;

        let previous = self.with_records_mut(|records| {
            let slot = records.iter_mut().find(|r| r.entity.id() == id)?;
            let previous = slot.provenance;
            if previous != Provenance::PendingCreate {
                slot.provenance = Provenance::PendingUpdate;
            }
            Some(previous)
        });
        let Some(previous) = previous else {
            debug!("[Sync/{}] 修改的记录不存在，忽略: {}", self.collection(), id);
            return Ok(None);
        };

        // 本地新建尚未同步：服务器不认识这个 ID，只合并到本地和排队的新建里
        if previous == Provenance::PendingCreate {
            debug!(
                "[Sync/{}] 记录 {} 尚未同步，修改仅在本地生效",
                self.collection(),
                id
            );
            let Some(entity) = self.merge_local(id, &patch, previous, Provenance::PendingCreate)?
            else {
                return Ok(None);
            };
            self.queue_update(id, &patch).await;
            self.notify(OperationKind::Update, SyncOutcome::Offline).await;
            self.notify_list_changed().await;
            return Ok(Some(OpResult {
                entity,
                outcome: SyncOutcome::Offline,
            }));
        }

        // 之前离线排队的修改与本次修改一起发送
        let queued = self.queued_op(id).await;
        let mut outgoing = patch.clone();
        if let Some(op) = queued.as_ref().filter(|op| op.kind == PendingOpKind::Update) {
            let mut combined = op.payload.clone();
            merge_json(&mut combined, &patch);
            outgoing = combined;
        }

        let _busy = self.begin();
        info!("[Sync/{}] ✏️ 修改记录: {}", self.collection(), id);

        let result = match self.source.update(id, &outgoing).await {
            Ok(server_entity) => {
                info!("[Sync/{}] ✅ 服务器已确认修改: {}", self.collection(), id);
                self.with_records_mut(|records| {
                    if let Some(slot) = records.iter_mut().find(|r| r.entity.id() == id) {
                        *slot = Tracked::new(Provenance::Confirmed, server_entity.clone());
                    }
                });
                if queued.is_some() {
                    self.outbox_remove(id).await;
                }
                OpResult {
                    entity: server_entity,
                    outcome: SyncOutcome::Synced,
                }
            }
            Err(e) => {
                warn!(
                    "[Sync/{}] 远程修改失败，改为本地合并（离线）: {:?}",
                    self.collection(),
                    e
                );
                let keep = if previous == Provenance::Fixture {
                    Provenance::Fixture
                } else {
                    Provenance::PendingUpdate
                };
                let Some(entity) = self.merge_local(id, &patch, previous, keep)? else {
                    return Ok(None);
                };
                if previous != Provenance::Fixture {
                    self.queue_update(id, &patch).await;
                }
                OpResult {
                    entity,
                    outcome: SyncOutcome::Offline,
                }
            }
        };

        self.notify(OperationKind::Update, result.outcome).await;
        self.notify_list_changed().await;
        Ok(Some(result))
    }

    /// 在本地浅合并修改；记录在此期间被删除时返回 `None`，合并失败时恢复原状态
    fn merge_local(
        &self,
        id: &str,
        patch: &Value,
        previous: Provenance,
        provenance: Provenance,
    ) -> Result<Option<E>> {
        self.with_records_mut(|records| {
            let Some(slot) = records.iter_mut().find(|r| r.entity.id() == id) else {
                return Ok(None);
            };
            match merged(&slot.entity, patch) {
                Ok(entity) => {
                    *slot = Tracked::new(provenance, entity.clone());
                    Ok(Some(entity))
                }
                Err(e) => {
                    slot.provenance = previous;
                    Err(e)
                }
            }
        })
    }

    // ========== 删除 ==========

    /// 删除记录：无论远程结果如何，本地列表都立即移除
    ///
    /// 远程失败时删除操作进入离线队列；`id` 不在列表中时返回 `None`
    pub async fn delete(&self, id: &str) -> Result<Option<SyncOutcome>> {
        let removed = self.with_records_mut(|records| {
            let pos = records.iter().position(|r| r.entity.id() == id)?;
            Some(records.remove(pos))
        });
        let Some(removed) = removed else {
            debug!("[Sync/{}] 删除的记录不存在，忽略: {}", self.collection(), id);
            return Ok(None);
        };
        info!("[Sync/{}] 🗑️ 删除记录: {}", self.collection(), id);

        let outcome = if removed.provenance == Provenance::PendingCreate {
            // 服务器从未见过这条记录，取消排队的新建即可
            debug!(
                "[Sync/{}] 记录 {} 尚未同步，取消排队的新建",
                self.collection(),
                id
            );
            self.outbox_remove(id).await;
            SyncOutcome::Synced
        } else {
            let _busy = self.begin();
            match self.source.delete(id).await {
                Ok(()) => {
                    info!("[Sync/{}] ✅ 服务器已确认删除: {}", self.collection(), id);
                    self.outbox_remove(id).await;
                    SyncOutcome::Synced
                }
                Err(e) => {
                    warn!(
                        "[Sync/{}] 远程删除失败，本地已移除，删除操作进入离线队列: {:?}",
                        self.collection(),
                        e
                    );
                    if removed.provenance != Provenance::Fixture {
                        self.queue_delete(id).await;
                    }
                    SyncOutcome::Offline
                }
            }
        };

        self.notify(OperationKind::Delete, outcome).await;
        self.notify_list_changed().await;
        Ok(Some(outcome))
    }

    // ========== 单条刷新 ==========

    /// 从数据源重新获取一条记录
    ///
    /// 本地有未同步改动的记录不会被覆盖
    pub async fn refresh(&self, id: &str) -> Result<E> {
        let _busy = self.begin();
        debug!("[Sync/{}] 刷新记录: {}", self.collection(), id);
        let entity = self
            .source
            .fetch_one(id)
            .await
            .with_context(|| format!("获取记录 {} 失败", id))?;

        let changed = self.with_records_mut(|records| {
            match records.iter_mut().find(|r| r.entity.id() == id) {
                Some(slot) if slot.provenance.is_pending() => false,
                Some(slot) => {
                    *slot = Tracked::new(Provenance::Confirmed, entity.clone());
                    true
                }
                None => {
                    upsert(records, Tracked::new(Provenance::Confirmed, entity.clone()));
                    true
                }
            }
        });
        if changed {
            self.notify_list_changed().await;
        }
        Ok(entity)
    }

    // ========== 离线队列 ==========

    /// 当前离线队列
    pub async fn pending_ops(&self) -> Result<Vec<PendingOp>> {
        self.outbox.list().await
    }

    /// 离线队列长度
    pub async fn queued_count(&self) -> Result<usize> {
        Ok(self.outbox.count().await?.max(0) as usize)
    }

    /// 离线队列是否持久化到数据库
    pub fn has_durable_outbox(&self) -> bool {
        self.outbox.is_durable()
    }

    async fn queued_op(&self, id: &str) -> Option<PendingOp> {
        match self.outbox.get(id).await {
            Ok(op) => op,
            Err(e) => {
                error!("[Sync/{}] 读取离线操作失败: {:?}", self.collection(), e);
                None
            }
        }
    }

    async fn queue(&self, op: PendingOp) {
        debug!(
            "[Sync/{}] 离线操作入队: {} {}",
            self.collection(),
            op.kind.as_str(),
            op.entity_id
        );
        if let Err(e) = self.outbox.upsert(&op).await {
            error!("[Sync/{}] 写入离线队列失败: {:?}", self.collection(), e);
        }
    }

    /// 修改入队：合并到同一记录已排队的新建或修改中
    async fn queue_update(&self, id: &str, patch: &Value) {
        let op = match self.queued_op(id).await {
            Some(mut op) if op.kind != PendingOpKind::Delete => {
                merge_json(&mut op.payload, patch);
                op
            }
            Some(_) => return,
            None => PendingOp {
                entity_id: id.to_string(),
                kind: PendingOpKind::Update,
                payload: patch.clone(),
                attempts: 0,
                last_error: None,
                created_at: now_millis(),
            },
        };
        self.queue(op).await;
    }

    /// 删除入队：覆盖该记录已排队的修改
    async fn queue_delete(&self, id: &str) {
        let created_at = self
            .queued_op(id)
            .await
            .map_or_else(now_millis, |op| op.created_at);
        self.queue(PendingOp {
            entity_id: id.to_string(),
            kind: PendingOpKind::Delete,
            payload: Value::Object(Default::default()),
            attempts: 0,
            last_error: None,
            created_at,
        })
        .await;
    }

    async fn outbox_remove(&self, id: &str) {
        if let Err(e) = self.outbox.remove(id).await {
            error!("[Sync/{}] 移除离线操作失败: {:?}", self.collection(), e);
        }
    }

    /// 记录改用本地 ID 后，把它排队的操作一并改名（保留入队时间）
    async fn outbox_rename(&self, old_id: &str, new_id: &str) {
        let Some(mut op) = self.queued_op(old_id).await else {
            return;
        };
        debug!(
            "[Sync/{}] 离线操作改名: {} -> {}",
            self.collection(),
            old_id,
            new_id
        );
        self.outbox_remove(old_id).await;
        op.entity_id = new_id.to_string();
        self.queue(op).await;
    }

    /// 按入队顺序回放离线队列
    ///
    /// 成功的操作出队并把本地记录标记为已确认；失败的保留并记录失败次数
    pub async fn flush_outbox(&self) -> Result<FlushReport> {
        let ops = self.outbox.list().await?;
        if ops.is_empty() {
            debug!("[Sync/{}] 离线队列为空", self.collection());
            return Ok(FlushReport::default());
        }

        let _busy = self.begin();
        info!(
            "[Sync/{}] 🔄 开始回放离线队列，共 {} 条",
            self.collection(),
            ops.len()
        );

        let collection = self.collection();
        let mut report = FlushReport::default();
        // 回放过程中被改用本地 ID 的记录：旧 ID -> 新 ID
        let mut renamed: HashMap<String, String> = HashMap::new();
        for mut op in ops {
            if let Some(new_id) = renamed.get(&op.entity_id) {
                op.entity_id = new_id.clone();
            }
            let result = match op.kind {
                PendingOpKind::Create => match self.source.create(&op.payload).await {
                    Ok(server) => {
                        info!(
                            "[Sync/{}]   新建已同步: {} -> {}",
                            collection,
                            op.entity_id,
                            server.id()
                        );
                        let rekeyed = self.with_records_mut(|records| {
                            replace_entry(
                                records,
                                &op.entity_id,
                                Tracked::new(Provenance::Confirmed, server),
                                collection,
                            )
                        });
                        if let Some((old_id, new_id)) = rekeyed {
                            self.outbox_rename(&old_id, &new_id).await;
                            renamed.insert(old_id, new_id);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                PendingOpKind::Update => {
                    self.source
                        .update(&op.entity_id, &op.payload)
                        .await
                        .map(|server| {
                            info!("[Sync/{}]   修改已同步: {}", self.collection(), op.entity_id);
                            self.with_records_mut(|records| {
                                if let Some(slot) =
                                    records.iter_mut().find(|r| r.entity.id() == op.entity_id)
                                {
                                    *slot = Tracked::new(Provenance::Confirmed, server);
                                }
                            });
                        })
                }
                PendingOpKind::Delete => self.source.delete(&op.entity_id).await.map(|()| {
                    info!("[Sync/{}]   删除已同步: {}", self.collection(), op.entity_id);
                }),
            };

            match result {
                Ok(()) => {
                    self.outbox.remove(&op.entity_id).await?;
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(
                        "[Sync/{}]   回放失败 {} {}: {:?}",
                        self.collection(),
                        op.kind.as_str(),
                        op.entity_id,
                        e
                    );
                    self.outbox
                        .record_failure(&op.entity_id, &format!("{:#}", e))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.synced > 0 {
            self.notify_list_changed().await;
        }
        info!(
            "[Sync/{}] 离线队列回放完成 - 成功: {}, 失败: {}",
            self.collection(),
            report.synced,
            report.failed
        );
        Ok(report)
    }
}

/// 去掉重复 ID（保留第一次出现的记录）
fn dedupe_by_id<E: Entity>(list: Vec<E>, collection: &str) -> Vec<E> {
    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|entity| {
            let fresh = seen.insert(entity.id().to_string());
            if !fresh {
                warn!("[Sync/{}] 忽略重复 ID 的记录: {}", collection, entity.id());
            }
            fresh
        })
        .collect()
}

/// 按 ID 替换，不存在时追加
fn upsert<E: Entity>(records: &mut Vec<Tracked<E>>, tracked: Tracked<E>) {
    match records
        .iter_mut()
        .find(|r| r.entity.id() == tracked.entity.id())
    {
        Some(slot) => *slot = tracked,
        None => records.push(tracked),
    }
}

/// 用新记录替换 `old_id` 对应的条目（ID 可能变化）
///
/// 新 ID 已被其他条目占用时，那条记录改用本地 ID，返回 (旧ID, 新ID)
fn replace_entry<E: Entity>(
    records: &mut Vec<Tracked<E>>,
    old_id: &str,
    tracked: Tracked<E>,
    collection: &str,
) -> Option<(String, String)> {
    let new_id = tracked.entity.id().to_string();
    let Some(pos) = records.iter().position(|r| r.entity.id() == old_id) else {
        let rekeyed = rekey_colliding(records, &new_id, collection);
        records.push(tracked);
        return rekeyed;
    };
    let rekeyed = if new_id == old_id {
        None
    } else {
        rekey_colliding(records, &new_id, collection)
    };
    records[pos] = tracked;
    rekeyed
}

/// 服务器分配的 ID 已被列表中的条目占用时，把该条目改用新生成的本地 ID
///
/// 返回 (旧ID, 新ID)；没有冲突时返回 `None`
fn rekey_colliding<E: Entity>(
    records: &mut [Tracked<E>],
    id: &str,
    collection: &str,
) -> Option<(String, String)> {
    let pos = records.iter().position(|r| r.entity.id() == id)?;
    let local_id = generate_local_id(|candidate| records.iter().any(|r| r.entity.id() == candidate));
    let slot = &mut records[pos];
    if slot.provenance == Provenance::Confirmed {
        warn!(
            "[Sync/{}] 服务器返回的 ID {} 与已确认的记录冲突，原记录改用本地 ID {}",
            collection, id, local_id
        );
    } else {
        debug!(
            "[Sync/{}] 服务器返回的 ID {} 与本地记录冲突（{:?}），原记录改用 {}",
            collection, id, slot.provenance, local_id
        );
    }
    match merged(&slot.entity, &serde_json::json!({ "id": local_id })) {
        Ok(entity) => {
            slot.entity = entity;
            Some((id.to_string(), local_id))
        }
        Err(e) => {
            error!(
                "[Sync/{}] 无法为冲突记录 {} 分配本地 ID: {:?}",
                collection, id, e
            );
            None
        }
    }
}

/// 浅合并修改后重新构造实体
fn merged<E: Entity>(entity: &E, patch: &Value) -> Result<E> {
    let mut value = serde_json::to_value(entity).context("序列化记录失败")?;
    if !merge_json(&mut value, patch) {
        anyhow::bail!("修改内容必须是 JSON 对象");
    }
    serde_json::from_value(value).context("合并修改后的记录不合法")
}

/// 由表单 payload 构造本地记录
fn build_local<E: Entity>(payload: &Value, id: &str, created_at: &str) -> Result<E> {
    let mut value = payload.clone();
    let stamped = serde_json::json!({ "id": id, "createdAt": created_at });
    if !merge_json(&mut value, &stamped) {
        anyhow::bail!("新建内容必须是 JSON 对象");
    }
    serde_json::from_value(value).context("构造本地记录失败")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoffice::catalog::{
        Client, ClientDraft, ClientPatch, ClientStatus, Product, ProductCategory, ProductDetails,
        ProductDraft, ALL_CATEGORIES,
    };
    use crate::backoffice::db::create_sqlite_pool_with_migration;
    use crate::backoffice::sync::listener::NotificationKind;
    use crate::backoffice::sync::source::FixtureSource;
    use async_trait::async_trait;
    use std::sync::{Mutex, Once};

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer = EnvFilter::new("info,optivision_sdk_core=debug,sqlx=warn");

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });
    }

    #[derive(Default)]
    struct RecordingListener {
        notifications: Mutex<Vec<Notification>>,
        fallbacks: Mutex<Vec<String>>,
        list_changes: Mutex<usize>,
    }

    impl RecordingListener {
        fn last(&self) -> Notification {
            self.notifications.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl SyncListener for RecordingListener {
        async fn on_list_changed(&self, _collection: &str, _entities_json: String) {
            *self.list_changes.lock().unwrap() += 1;
        }

        async fn on_notification(&self, notification: Notification) {
            self.notifications.lock().unwrap().push(notification);
        }

        async fn on_load_fallback(&self, collection: &str, _reason: String) {
            self.fallbacks.lock().unwrap().push(collection.to_string());
        }
    }

    fn draft(name: &str) -> ClientDraft {
        ClientDraft {
            name: name.to_string(),
            surname: "Test".to_string(),
            email: format!("{}@email.com", name.to_lowercase()),
            phone: "+33 6 00 00 00 00".to_string(),
            address: None,
            statut: ClientStatus::Actif,
        }
    }

    async fn loaded_clients(
        source: Arc<FixtureSource<Client>>,
    ) -> (EntitySyncer<Client>, Arc<RecordingListener>) {
        init_test_logger();
        let listener = Arc::new(RecordingListener::default());
        let syncer =
            EntitySyncer::with_listener(SyncerConfig::default(), source, listener.clone());
        syncer.load().await.unwrap();
        (syncer, listener)
    }

    #[tokio::test]
    async fn load_replaces_list_with_source_data() {
        let source = Arc::new(FixtureSource::<Client>::with_records(vec![
            Client::fixtures()[1].clone(),
            Client::fixtures()[1].clone(),
        ]));
        let listener = Arc::new(RecordingListener::default());
        let syncer =
            EntitySyncer::with_listener(SyncerConfig::default(), source, listener.clone());

        assert_eq!(syncer.load().await.unwrap(), LoadOutcome::Server(1));
        assert_eq!(syncer.all(), vec![Client::fixtures()[1].clone()]);
        assert_eq!(syncer.tracked()[0].provenance, Provenance::Confirmed);
        assert!(listener.fallbacks.lock().unwrap().is_empty());
        assert!(!syncer.is_busy());
    }

    #[tokio::test]
    async fn load_failure_falls_back_to_fixtures() {
        let source = Arc::new(FixtureSource::<Client>::with_records(Vec::new()));
        source.set_online(false);
        let listener = Arc::new(RecordingListener::default());
        let syncer =
            EntitySyncer::with_listener(SyncerConfig::default(), source, listener.clone());

        assert_eq!(syncer.load().await.unwrap(), LoadOutcome::Fixtures(3));
        assert_eq!(syncer.all(), Client::fixtures());
        assert!(syncer
            .tracked()
            .iter()
            .all(|r| r.provenance == Provenance::Fixture));
        assert_eq!(*listener.fallbacks.lock().unwrap(), vec!["clients"]);
    }

    #[tokio::test]
    async fn load_failure_without_fallback_is_an_error() {
        let config = SyncerConfig {
            fallback_to_fixtures: false,
            ..Default::default()
        };
        let syncer = EntitySyncer::new(config, Arc::new(FixtureSource::<Client>::offline()));
        assert!(syncer.load().await.is_err());
        assert!(syncer.is_empty());
    }

    #[tokio::test]
    async fn create_grows_list_by_one_on_both_paths() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, listener) = loaded_clients(source.clone()).await;

        let online = syncer.create(draft("Leroy")).await.unwrap();
        assert_eq!(online.outcome, SyncOutcome::Synced);
        assert_eq!(online.entity.id, "4");
        assert_eq!(syncer.len(), 4);
        assert_eq!(listener.last().title, "Client ajouté");

        source.set_online(false);
        let offline = syncer.create(draft("Test")).await.unwrap();
        assert_eq!(offline.outcome, SyncOutcome::Offline);
        assert_eq!(syncer.len(), 5);
        assert!(offline.entity.id.parse::<i64>().is_ok());
        assert!(!offline.entity.created_at.is_empty());
        assert_eq!(
            syncer.get(&offline.entity.id).unwrap().provenance,
            Provenance::PendingCreate
        );

        let notice = listener.last();
        assert_eq!(notice.kind, NotificationKind::Offline);
        assert_eq!(notice.title, "Client ajouté (hors ligne)");
    }

    #[tokio::test]
    async fn local_ids_stay_unique_for_back_to_back_creates() {
        let (syncer, _) = loaded_clients(Arc::new(FixtureSource::<Client>::offline())).await;

        let a = syncer.create(draft("Alpha")).await.unwrap().entity.id;
        let b = syncer.create(draft("Beta")).await.unwrap().entity.id;
        assert_ne!(a, b);
        assert_eq!(syncer.len(), 5);
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected() {
        let (syncer, listener) = loaded_clients(Arc::new(FixtureSource::<Client>::new())).await;
        let mut bad = draft("Leroy");
        bad.email = "nope".to_string();

        let err = syncer.create(bad).await.unwrap_err();
        assert!(err.to_string().contains("Email invalide"));
        assert_eq!(syncer.len(), 3);
        assert!(listener.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_update_merges_only_the_target() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, listener) = loaded_clients(source.clone()).await;
        let before = syncer.all();
        source.set_online(false);

        let result = syncer
            .update(
                "2",
                ClientPatch {
                    statut: Some(ClientStatus::Inactif),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Offline);

        let after = syncer.all();
        let expected = Client {
            statut: ClientStatus::Inactif,
            ..before[1].clone()
        };
        assert_eq!(after[1], expected);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(
            syncer.get("2").unwrap().provenance,
            Provenance::PendingUpdate
        );
        assert_eq!(listener.last().title, "Client modifié (hors ligne)");
    }

    #[tokio::test]
    async fn online_update_takes_server_entity() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, _) = loaded_clients(source.clone()).await;

        let result = syncer
            .update(
                "1",
                ClientPatch {
                    phone: Some("+33 1 00 00 00 00".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Synced);
        assert_eq!(syncer.get("1").unwrap().provenance, Provenance::Confirmed);
        assert_eq!(syncer.get("1").unwrap().entity, source.snapshot()[0]);
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_a_noop() {
        let (syncer, listener) = loaded_clients(Arc::new(FixtureSource::<Client>::new())).await;
        let before = syncer.tracked();
        assert!(syncer
            .update("404", ClientPatch::default())
            .await
            .unwrap()
            .is_none());
        assert_eq!(syncer.tracked(), before);
        assert!(listener.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_entry_even_when_remote_fails() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, listener) = loaded_clients(source.clone()).await;

        assert_eq!(
            syncer.delete("1").await.unwrap(),
            Some(SyncOutcome::Synced)
        );
        source.set_online(false);
        assert_eq!(
            syncer.delete("3").await.unwrap(),
            Some(SyncOutcome::Offline)
        );

        assert!(syncer.get("1").is_none());
        assert!(syncer.get("3").is_none());
        assert_eq!(syncer.len(), 1);
        let notice = listener.last();
        assert!(notice.destructive);
        assert_eq!(notice.title, "Client supprimé (hors ligne)");
        assert_eq!(syncer.delete("3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn filtered_view_is_pure_subset_in_order() {
        let (syncer, _) = loaded_clients(Arc::new(FixtureSource::<Client>::new())).await;
        let before = syncer.tracked();

        let first = syncer.filtered_view("dupont", &CategoryFilter::All);
        let second = syncer.filtered_view("dupont", &CategoryFilter::All);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "1");
        assert_eq!(syncer.tracked(), before);

        // "e" 出现在所有记录中，顺序与原列表一致
        let ids: Vec<String> = syncer
            .filtered_view("E", &CategoryFilter::All)
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        assert_eq!(syncer.filtered_view("", &CategoryFilter::All), syncer.all());
        assert!(syncer
            .filtered_view("zzz", &CategoryFilter::All)
            .is_empty());
    }

    #[tokio::test]
    async fn product_category_filter_and_sentinel() {
        let syncer: EntitySyncer<Product> = EntitySyncer::new(
            SyncerConfig::default(),
            Arc::new(FixtureSource::<Product>::new()),
        );
        syncer.load().await.unwrap();

        let all = CategoryFilter::parse(ALL_CATEGORIES);
        assert_eq!(syncer.filtered_view("", &all).len(), 3);
        assert_eq!(syncer.filtered_view("ray", &all).len(), 1);

        let verre = CategoryFilter::parse("Verre");
        let hits = syncer.filtered_view("", &verre);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, ProductCategory::Verre);
        assert!(syncer.filtered_view("acuvue", &verre).is_empty());
    }

    #[tokio::test]
    async fn product_owner_comes_from_session_user() {
        let source = Arc::new(FixtureSource::<Product>::offline());
        let config = SyncerConfig {
            owner_id: Some("opticien-42".to_string()),
            ..Default::default()
        };
        let syncer = EntitySyncer::new(config, source);
        syncer.load().await.unwrap();

        let created = syncer
            .create(ProductDraft {
                name: "Spray nettoyant".to_string(),
                description: None,
                price: 9.9,
                image: None,
                stock: 40,
                category: ProductCategory::Verre,
                opticien_id: None,
                offres: Vec::new(),
                details: ProductDetails::Accessoire {
                    accessory_type: Some("Spray".to_string()),
                    compatibilite: None,
                },
            })
            .await
            .unwrap();
        assert_eq!(created.outcome, SyncOutcome::Offline);
        assert_eq!(created.entity.opticien_id, "opticien-42");
        assert_eq!(created.entity.details.kind(), "Accessoire");
    }

    #[tokio::test]
    async fn offline_work_is_queued_coalesced_and_flushed() -> Result<()> {
        init_test_logger();
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let source = Arc::new(FixtureSource::<Client>::new());
        let listener = Arc::new(RecordingListener::default());
        let syncer = EntitySyncer::with_listener_and_db(
            SyncerConfig::default(),
            source.clone(),
            listener.clone(),
            pool,
        );
        syncer.load().await?;
        source.set_online(false);

        let local = syncer.create(draft("Offline")).await?.entity;
        syncer
            .update(
                &local.id,
                ClientPatch {
                    phone: Some("+33 7 11 11 11 11".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        syncer.delete("2").await?;

        let ops = syncer.pending_ops().await?;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, PendingOpKind::Create);
        assert_eq!(ops[0].payload["phone"], "+33 7 11 11 11 11");
        assert_eq!(ops[1].kind, PendingOpKind::Delete);
        assert_eq!(ops[1].entity_id, "2");

        // 仍然离线：回放失败，队列保留
        let report = syncer.flush_outbox().await?;
        assert_eq!(report, FlushReport { synced: 0, failed: 2 });
        assert_eq!(syncer.pending_ops().await?[0].attempts, 1);

        source.set_online(true);
        let report = syncer.flush_outbox().await?;
        assert_eq!(report, FlushReport { synced: 2, failed: 0 });
        assert!(syncer.pending_ops().await?.is_empty());

        assert!(syncer.get(&local.id).is_none());
        let confirmed = syncer.get("4").unwrap();
        assert_eq!(confirmed.provenance, Provenance::Confirmed);
        assert_eq!(confirmed.entity.phone, "+33 7 11 11 11 11");
        assert_eq!(syncer.pending_count(), 0);

        let server_ids: Vec<String> = source.snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(server_ids, vec!["1", "3", "4"]);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_pending_create_cancels_it() -> Result<()> {
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let source = Arc::new(FixtureSource::<Client>::offline());
        let syncer = EntitySyncer::with_listener_and_db(
            SyncerConfig::default(),
            source,
            Arc::new(EmptySyncListener),
            pool,
        );
        syncer.load().await?;

        let local = syncer.create(draft("Ephemere")).await?.entity;
        assert_eq!(syncer.pending_ops().await?.len(), 1);

        assert_eq!(
            syncer.delete(&local.id).await?,
            Some(SyncOutcome::Synced)
        );
        assert!(syncer.pending_ops().await?.is_empty());
        assert_eq!(syncer.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn reload_reapplies_pending_operations() -> Result<()> {
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let source = Arc::new(FixtureSource::<Client>::new());
        let syncer = EntitySyncer::with_listener_and_db(
            SyncerConfig::default(),
            source.clone(),
            Arc::new(EmptySyncListener),
            pool.clone(),
        );
        syncer.load().await?;
        source.set_online(false);
        let local = syncer.create(draft("Persistant")).await?.entity;
        syncer
            .update(
                "1",
                ClientPatch {
                    statut: Some(ClientStatus::Inactif),
                    ..Default::default()
                },
            )
            .await?;
        syncer.delete("3").await?;

        // 模拟重启：新的同步器共享同一个数据库
        source.set_online(true);
        let restarted = EntitySyncer::with_listener_and_db(
            SyncerConfig::default(),
            source,
            Arc::new(EmptySyncListener),
            pool,
        );
        assert_eq!(restarted.load().await?, LoadOutcome::Server(3));

        let ids: Vec<String> = restarted.all().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string(), local.id.clone()]);
        assert_eq!(
            restarted.get("1").unwrap().provenance,
            Provenance::PendingUpdate
        );
        assert_eq!(restarted.get("1").unwrap().entity.statut, ClientStatus::Inactif);
        assert_eq!(
            restarted.get(&local.id).unwrap().provenance,
            Provenance::PendingCreate
        );
        assert_eq!(restarted.pending_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_keeps_unsynced_local_changes() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, _) = loaded_clients(source.clone()).await;
        source.set_online(false);
        syncer
            .update(
                "2",
                ClientPatch {
                    name: Some("Martin-Local".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        source.set_online(true);

        let server = syncer.refresh("2").await.unwrap();
        assert_eq!(server.name, "Martin");
        assert_eq!(syncer.get("2").unwrap().entity.name, "Martin-Local");

        let server = syncer.refresh("1").await.unwrap();
        assert_eq!(syncer.get("1").unwrap().entity, server);
        assert!(syncer.refresh("404").await.is_err());
    }

    /// 包装示例数据源：记录修改请求体，加载可被挂起
    struct InstrumentedSource {
        inner: FixtureSource<Client>,
        updates: Mutex<Vec<(String, Value)>>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl InstrumentedSource {
        fn new(gate: Option<Arc<tokio::sync::Notify>>) -> Self {
            Self {
                inner: FixtureSource::new(),
                updates: Mutex::new(Vec::new()),
                gate,
            }
        }
    }

    #[async_trait]
    impl DataSource<Client> for InstrumentedSource {
        fn name(&self) -> &'static str {
            "instrumented"
        }

        async fn fetch_all(&self) -> Result<Vec<Client>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.inner.fetch_all().await
        }

        async fn fetch_one(&self, id: &str) -> Result<Client> {
            self.inner.fetch_one(id).await
        }

        async fn create(&self, payload: &Value) -> Result<Client> {
            DataSource::create(&self.inner, payload).await
        }

        async fn update(&self, id: &str, payload: &Value) -> Result<Client> {
            self.updates
                .lock()
                .unwrap()
                .push((id.to_string(), payload.clone()));
            DataSource::update(&self.inner, id, payload).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            DataSource::delete(&self.inner, id).await
        }
    }

    #[tokio::test]
    async fn server_id_colliding_with_fixture_still_grows_list() {
        let source = Arc::new(FixtureSource::<Client>::with_records(Vec::new()));
        source.set_online(false);
        let (syncer, _) = loaded_clients(source.clone()).await;
        assert_eq!(syncer.len(), 3);
        source.set_online(true);

        // 服务器是空的，分配的 ID "1" 与示例数据中的 Dupont 冲突
        let created = syncer.create(draft("Leroy")).await.unwrap();
        assert_eq!(created.outcome, SyncOutcome::Synced);
        assert_eq!(created.entity.id, "1");
        assert_eq!(syncer.len(), 4);

        let ids: HashSet<String> = syncer.all().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 4);

        let confirmed = syncer.get("1").unwrap();
        assert_eq!(confirmed.provenance, Provenance::Confirmed);
        assert_eq!(confirmed.entity.name, "Leroy");

        let dupont = syncer
            .tracked()
            .into_iter()
            .find(|r| r.entity.name == "Dupont")
            .unwrap();
        assert_ne!(dupont.entity.id, "1");
        assert_eq!(dupont.provenance, Provenance::Fixture);
    }

    #[tokio::test]
    async fn flushed_create_moves_colliding_pending_create_aside() -> Result<()> {
        let source = Arc::new(FixtureSource::<Client>::with_records(Vec::new()));
        source.set_online(false);
        let (syncer, _) = loaded_clients(source.clone()).await;

        let first = syncer.create(draft("Alpha")).await?.entity;
        let second = syncer.create(draft("Beta")).await?.entity;
        assert_eq!(syncer.queued_count().await?, 2);

        source.set_online(true);
        let report = syncer.flush_outbox().await?;
        assert_eq!(report, FlushReport { synced: 2, failed: 0 });
        assert!(syncer.pending_ops().await?.is_empty());
        assert!(syncer.get(&first.id).is_none());
        assert!(syncer.get(&second.id).is_none());

        // 三条示例数据 + 两条已确认的新建，没有记录被覆盖
        assert_eq!(syncer.len(), 5);
        let ids: HashSet<String> = syncer.all().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(syncer.get("1").unwrap().entity.name, "Alpha");
        assert_eq!(syncer.get("2").unwrap().entity.name, "Beta");
        Ok(())
    }

    #[tokio::test]
    async fn offline_edit_survives_online_update_without_database() {
        let source = Arc::new(FixtureSource::<Client>::new());
        let (syncer, _) = loaded_clients(source.clone()).await;
        assert!(!syncer.has_durable_outbox());

        source.set_online(false);
        syncer
            .update(
                "2",
                ClientPatch {
                    name: Some("Martin-Local".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(syncer.queued_count().await.unwrap(), 1);

        source.set_online(true);
        let result = syncer
            .update(
                "2",
                ClientPatch {
                    phone: Some("+33 1 22 22 22 22".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Synced);

        let local = syncer.get("2").unwrap();
        assert_eq!(local.provenance, Provenance::Confirmed);
        assert_eq!(local.entity.name, "Martin-Local");
        assert_eq!(local.entity.phone, "+33 1 22 22 22 22");
        assert_eq!(source.snapshot()[1].name, "Martin-Local");
        assert!(syncer.pending_ops().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_patch_is_sent_with_next_online_update() -> Result<()> {
        init_test_logger();
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let source = Arc::new(InstrumentedSource::new(None));
        let syncer = EntitySyncer::with_listener_and_db(
            SyncerConfig::default(),
            source.clone(),
            Arc::new(EmptySyncListener),
            pool,
        );
        syncer.load().await?;

        source.inner.set_online(false);
        syncer
            .update(
                "2",
                ClientPatch {
                    name: Some("Martin-Local".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(syncer.queued_count().await?, 1);

        source.inner.set_online(true);
        syncer
            .update(
                "2",
                ClientPatch {
                    phone: Some("+33 1 22 22 22 22".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let updates = source.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 2);
        let (id, body) = &updates[1];
        assert_eq!(id, "2");
        assert_eq!(
            body,
            &serde_json::json!({ "name": "Martin-Local", "phone": "+33 1 22 22 22 22" })
        );
        assert_eq!(syncer.queued_count().await?, 0);
        assert_eq!(syncer.get("2").unwrap().provenance, Provenance::Confirmed);
        Ok(())
    }

    #[tokio::test]
    async fn is_busy_while_source_is_suspended() -> Result<()> {
        init_test_logger();
        let gate = Arc::new(tokio::sync::Notify::new());
        let syncer: EntitySyncer<Client> = EntitySyncer::new(
            SyncerConfig::default(),
            Arc::new(InstrumentedSource::new(Some(gate.clone()))),
        );
        assert!(!syncer.is_busy());

        let watch = async {
            tokio::time::timeout(std::time::Duration::from_secs(5), async {
                while !syncer.is_busy() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("加载没有进入进行中状态");
            assert!(syncer.is_busy());
            gate.notify_one();
        };
        let (loaded, ()) = tokio::join!(syncer.load(), watch);

        assert_eq!(loaded?, LoadOutcome::Server(3));
        assert!(!syncer.is_busy());
        Ok(())
    }
}
