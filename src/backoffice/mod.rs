pub mod auth;
pub mod catalog;
pub mod client;
pub mod db;
pub mod serialization;
pub mod sync;
pub mod types;

// 重新导出认证相关函数
pub use auth::login_async;

// 重新导出同步相关类型
pub use sync::{EntitySyncer, SyncListener, SyncerConfig};
