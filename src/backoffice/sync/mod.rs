//! 实体列表同步模块
//!
//! 一份内存列表对应一个 REST 集合：加载、增删改、离线降级和过滤视图。
//! 客户、商品、处方共用同一套实现，通过 `catalog::Entity` 参数化。

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod service;
pub mod source;

// 重新导出主要类型
pub use api::CollectionApi;
pub use dao::{MemoryOutbox, OutboxDao, OutboxStore};
pub use listener::{EmptySyncListener, Notification, NotificationKind, OperationKind, SyncListener};
pub use models::{
    FlushReport, LoadOutcome, OpResult, PendingOp, PendingOpKind, Provenance, SourceMode,
    SyncOutcome, SyncerConfig, Tracked,
};
pub use service::EntitySyncer;
pub use source::{DataSource, FixtureSource};
