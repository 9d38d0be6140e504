pub mod backoffice;

// 重新导出常用类型和函数，方便外部使用
pub use backoffice::{
    auth::{login_async, Role, Session, SessionHttpClient, SessionState, User},
    catalog::{CategoryFilter, Client, Entity, EntitySchema, Prescription, Product},
    client::{Backoffice, BackofficeConfig},
    sync::{EntitySyncer, Provenance, SourceMode, SyncListener, SyncOutcome, SyncerConfig},
};
