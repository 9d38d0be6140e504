//! 同步监听器回调接口
//!
//! 界面层通过它接收列表变更和操作提示（toast）。

use crate::backoffice::catalog::EntitySchema;
use crate::backoffice::sync::models::SyncOutcome;
use async_trait::async_trait;

/// 触发提示的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// 服务器已确认
    Success,
    /// 仅在本地生效（hors ligne）
    Offline,
}

/// 一条操作提示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub collection: &'static str,
    pub operation: OperationKind,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    /// 删除类提示以醒目样式展示
    pub destructive: bool,
}

impl Notification {
    /// 按 schema 文案生成提示，例如 "Produit ajouté (hors ligne)"
    pub fn for_operation(
        schema: &EntitySchema,
        operation: OperationKind,
        outcome: SyncOutcome,
    ) -> Self {
        let stem = match operation {
            OperationKind::Create => "ajouté",
            OperationKind::Update => "modifié",
            OperationKind::Delete => "supprimé",
        };
        let participle = if schema.feminine {
            format!("{}e", stem)
        } else {
            stem.to_string()
        };

        let (kind, title, description) = match outcome {
            SyncOutcome::Synced => (
                NotificationKind::Success,
                format!("{} {}", schema.label, participle),
                format!("{} a été {} avec succès.", schema.article, participle),
            ),
            SyncOutcome::Offline => (
                NotificationKind::Offline,
                format!("{} {} (hors ligne)", schema.label, participle),
                format!("{} a été {} localement.", schema.article, participle),
            ),
        };

        Self {
            collection: schema.collection,
            operation,
            kind,
            title,
            description,
            destructive: operation == OperationKind::Delete,
        }
    }
}

/// 同步监听器
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 列表发生变更，参数为集合名和当前完整列表的 JSON 数组字符串
    async fn on_list_changed(&self, collection: &str, entities_json: String);

    /// 增删改操作完成（成功或离线降级）
    async fn on_notification(&self, notification: Notification);

    /// 加载失败，已降级到内置示例数据
    async fn on_load_fallback(&self, collection: &str, reason: String);
}

/// 默认空实现（无操作）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_list_changed(&self, _collection: &str, _entities_json: String) {}
    async fn on_notification(&self, _notification: Notification) {}
    async fn on_load_fallback(&self, _collection: &str, _reason: String) {}
}
