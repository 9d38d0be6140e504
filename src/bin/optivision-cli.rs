//! OptiVision 后台 CLI
//!
//! 加载一个集合并打印过滤后的列表，可选回放离线队列。

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use optivision_sdk_core::backoffice::catalog::{Entity, ALL_CATEGORIES};
use optivision_sdk_core::backoffice::sync::{Notification, Tracked};
use optivision_sdk_core::{
    Backoffice, BackofficeConfig, CategoryFilter, EntitySyncer, Session, SourceMode,
    SyncListener,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Collection {
    Clients,
    Products,
    Prescriptions,
}

/// OptiVision 后台 CLI
#[derive(Parser, Debug)]
#[command(name = "optivision-cli")]
#[command(about = "OptiVision 后台 CLI - 加载并过滤实体列表", long_about = None)]
struct Args {
    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:3000")]
    api_base_url: String,

    /// 使用内置示例数据，不访问网络
    #[arg(long)]
    fixtures: bool,

    /// 要展示的集合
    #[arg(short, long, value_enum, default_value = "clients")]
    collection: Collection,

    /// 搜索关键字（不区分大小写）
    #[arg(short, long, default_value = "")]
    search: String,

    /// 商品分类（仅对商品有效）
    #[arg(long, default_value = ALL_CATEGORIES)]
    category: String,

    /// 离线队列数据库 URL，例如 sqlite://optivision.db?mode=rwc
    #[arg(long)]
    outbox_db: Option<String>,

    /// 加载后回放离线队列
    #[arg(long)]
    flush: bool,

    /// 会话持久化文件
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// 登录邮箱（与 --password 一起使用）
    #[arg(long, requires = "password")]
    email: Option<String>,

    /// 登录密码
    #[arg(long, requires = "email")]
    password: Option<String>,

    /// 日志级别（默认: info,optivision_sdk_core=debug）
    #[arg(long, default_value = "info,optivision_sdk_core=debug")]
    log_level: String,

    /// 日志文件（追加模式），不指定时只输出到控制台
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// 初始化日志（输出到 stderr，可同时写入文件）
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 列表打印到 stdout，日志走 stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path.display());
    }
    Ok(())
}

/// 把提示和降级事件打到日志里
struct CliListener;

#[async_trait::async_trait]
impl SyncListener for CliListener {
    async fn on_list_changed(&self, collection: &str, entities_json: String) {
        tracing::debug!("[CLI/{}] 🔄 列表变更: {}", collection, entities_json);
    }

    async fn on_notification(&self, notification: Notification) {
        info!(
            "[CLI/{}] 🔔 {} - {}",
            notification.collection, notification.title, notification.description
        );
    }

    async fn on_load_fallback(&self, collection: &str, reason: String) {
        warn!(
            "[CLI/{}] ⚠️ 服务器不可用，显示示例数据: {}",
            collection, reason
        );
    }
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按 schema 列打印过滤后的列表，最后一列是来源状态
fn print_table<E: Entity>(
    syncer: &EntitySyncer<E>,
    search: &str,
    category: &CategoryFilter,
    queued: usize,
) -> Result<()> {
    let schema = E::schema();
    let rows: Vec<Tracked<E>> = syncer.filtered_tracked(search, category);

    let mut header: Vec<&str> = vec!["id"];
    header.extend(schema.columns.iter().copied());
    header.push("provenance");
    println!("{}", header.join("\t"));

    for row in &rows {
        let json = serde_json::to_value(&row.entity).context("序列化记录失败")?;
        let mut line = vec![row.entity.id().to_string()];
        line.extend(schema.columns.iter().map(|c| cell(&json[*c])));
        line.push(format!("{:?}", row.provenance));
        println!("{}", line.join("\t"));
    }
    println!(
        "-- {} / {} {}, 离线队列: {}",
        rows.len(),
        syncer.len(),
        schema.collection,
        queued
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_ref())?;

    let session = Session::init_from_persisted(args.session_file.clone()).await;
    let config = BackofficeConfig {
        source_mode: if args.fixtures {
            SourceMode::Fixture
        } else {
            SourceMode::Remote
        },
        outbox_db_url: args.outbox_db.clone(),
        session_path: args.session_file.clone(),
        ..BackofficeConfig::new(args.api_base_url.clone())
    };
    let mut backoffice = Backoffice::with_listener(config, session, Arc::new(CliListener)).await?;
    if let (Some(email), Some(password)) = (&args.email, &args.password) {
        backoffice.login(email, password).await?;
    }

    let category = CategoryFilter::parse(&args.category);
    match args.collection {
        Collection::Clients => show(&backoffice.clients(), &args, &category).await,
        Collection::Products => show(&backoffice.products(), &args, &category).await,
        Collection::Prescriptions => show(&backoffice.prescriptions(), &args, &category).await,
    }
}

async fn show<E: Entity>(
    syncer: &EntitySyncer<E>,
    args: &Args,
    category: &CategoryFilter,
) -> Result<()> {
    syncer.load().await?;
    if args.flush {
        let report = syncer.flush_outbox().await?;
        info!("[CLI] 离线队列回放: {:?}", report);
    }
    let queued = syncer.queued_count().await?;
    if queued > 0 && !syncer.has_durable_outbox() {
        warn!("[CLI] 离线队列未持久化（未指定 --outbox-db），退出后丢失 {} 条操作", queued);
    }
    print_table(syncer, &args.search, category, queued)
}
