//! 同步模块的模型定义

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 记录来源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
    /// 服务器确认过（拉取或增改接口返回）
    Confirmed,
    /// 本地新建，服务器尚未确认（本地临时 ID）
    PendingCreate,
    /// 本地已修改，服务器尚未确认
    PendingUpdate,
    /// 内置示例数据（演示模式或加载失败降级）
    Fixture,
}

impl Provenance {
    /// 是否有尚未同步到服务器的本地改动
    pub fn is_pending(&self) -> bool {
        matches!(self, Provenance::PendingCreate | Provenance::PendingUpdate)
    }
}

/// 带来源状态的实体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tracked<E> {
    pub provenance: Provenance,
    pub entity: E,
}

impl<E> Tracked<E> {
    pub fn new(provenance: Provenance, entity: E) -> Self {
        Self { provenance, entity }
    }
}

/// 单次操作与服务器的同步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 服务器已确认
    Synced,
    /// 远程调用失败，已在本地模拟（离线）
    Offline,
}

/// 增改操作的结果
#[derive(Debug, Clone, PartialEq)]
pub struct OpResult<E> {
    pub entity: E,
    pub outcome: SyncOutcome,
}

/// 加载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// 使用数据源返回的数据，参数为条数
    Server(usize),
    /// 数据源失败，已降级到内置示例数据
    Fixtures(usize),
}

/// 数据源选择
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceMode {
    /// 远程 REST 接口
    #[default]
    Remote,
    /// 内存示例数据（演示模式，不访问网络）
    Fixture,
}

/// 同步器配置
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// 当前会话用户 ID，用于填充 schema 中的归属字段
    pub owner_id: Option<String>,
    /// 加载失败时是否降级到内置示例数据
    pub fallback_to_fixtures: bool,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            owner_id: None,
            fallback_to_fixtures: true,
        }
    }
}

/// 离线队列中的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOpKind {
    Create,
    Update,
    Delete,
}

impl PendingOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingOpKind::Create => "create",
            PendingOpKind::Update => "update",
            PendingOpKind::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(PendingOpKind::Create),
            "update" => Some(PendingOpKind::Update),
            "delete" => Some(PendingOpKind::Delete),
            _ => None,
        }
    }
}

/// 离线队列中的一条待同步操作
///
/// 同一集合中的同一记录最多一条：新建后再修改会合并进新建的 payload，
/// 新建后删除则直接出队。
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOp {
    pub entity_id: String,
    pub kind: PendingOpKind,
    /// create：完整表单（不含 id / createdAt）；update：累积的修改字段；delete：空对象
    pub payload: Value,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// 入队时间（毫秒）
    pub created_at: i64,
}

/// 离线队列回放结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub synced: usize,
    pub failed: usize,
}
