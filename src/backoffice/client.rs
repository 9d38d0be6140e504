//! 后台客户端门面
//!
//! 持有配置、会话和三个集合（客户、商品、处方）的同步器。

use crate::backoffice::auth::{login_async, Session, SessionHttpClient, User};
use crate::backoffice::catalog::{Client, Entity, Prescription, Product};
use crate::backoffice::db::create_sqlite_pool_with_migration;
use crate::backoffice::sync::{
    CollectionApi, DataSource, EmptySyncListener, EntitySyncer, FixtureSource, FlushReport,
    LoadOutcome, SourceMode, SyncListener, SyncerConfig,
};
use anyhow::Result;
use futures_util::future::join3;
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct BackofficeConfig {
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 数据源：远程接口或内置示例数据
    pub source_mode: SourceMode,
    /// 远程加载失败时是否降级到内置示例数据
    pub fallback_to_fixtures: bool,
    /// 离线队列使用的 SQLite 数据库 URL，None 时不持久化离线操作
    ///
    /// 例如：`sqlite://optivision.db?mode=rwc`
    pub outbox_db_url: Option<String>,
    /// 单次 HTTP 请求超时，None 时使用 reqwest 默认（不超时）
    pub request_timeout: Option<Duration>,
    /// 会话持久化文件
    pub session_path: Option<PathBuf>,
}

impl BackofficeConfig {
    /// 创建默认配置
    pub fn new(api_base_url: String) -> Self {
        Self {
            api_base_url,
            source_mode: SourceMode::Remote,
            fallback_to_fixtures: true,
            outbox_db_url: None,
            request_timeout: None,
            session_path: None,
        }
    }
}

/// 三个集合的加载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub clients: LoadOutcome,
    pub products: LoadOutcome,
    pub prescriptions: LoadOutcome,
}

/// 后台客户端
pub struct Backoffice {
    config: BackofficeConfig,
    session: Session,
    /// 远程模式下所有集合共享的 HTTP 客户端，随登录/登出更新认证头
    http: Option<SessionHttpClient>,
    clients: Arc<EntitySyncer<Client>>,
    products: Arc<EntitySyncer<Product>>,
    prescriptions: Arc<EntitySyncer<Prescription>>,
}

impl Backoffice {
    /// 创建客户端（使用默认空监听器）
    pub async fn new(config: BackofficeConfig, session: Session) -> Result<Self> {
        Self::with_listener(config, session, Arc::new(EmptySyncListener)).await
    }

    /// 创建客户端（所有集合共用一个监听器）
    pub async fn with_listener(
        config: BackofficeConfig,
        session: Session,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        info!(
            "[Backoffice] 🚀 初始化客户端，API: {}, 数据源: {:?}",
            config.api_base_url, config.source_mode
        );

        let db = match &config.outbox_db_url {
            Some(url) => Some(create_sqlite_pool_with_migration(url).await?),
            None => None,
        };
        let http = match config.source_mode {
            SourceMode::Remote => Some(SessionHttpClient::for_session(
                &session,
                config.request_timeout,
            )?),
            SourceMode::Fixture => None,
        };
        let syncer_config = SyncerConfig {
            owner_id: session.user().map(|u| u.id.clone()),
            fallback_to_fixtures: config.fallback_to_fixtures,
        };

        let builder = SyncerBuilder {
            config: &config,
            syncer_config,
            http: http.clone(),
            db,
            listener,
        };
        let clients = builder.build::<Client>();
        let products = builder.build::<Product>();
        let prescriptions = builder.build::<Prescription>();

        Ok(Self {
            config,
            session,
            http,
            clients,
            products,
            prescriptions,
        })
    }

    /// 从 `session_path` 恢复会话后创建客户端
    pub async fn open(config: BackofficeConfig, listener: Arc<dyn SyncListener>) -> Result<Self> {
        let session = Session::init_from_persisted(config.session_path.clone()).await;
        Self::with_listener(config, session, listener).await
    }

    pub fn config(&self) -> &BackofficeConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// 用邮箱和密码登录
    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let user = login_async(&self.config.api_base_url, email, password).await?;
        self.login_as(user).await
    }

    /// 以已验证的用户登录，之后的请求带新用户的认证头，新建记录归属新用户
    pub async fn login_as(&mut self, user: User) -> Result<()> {
        self.session.login(user).await?;
        self.apply_session()
    }

    /// 登出（列表保持不变，离线队列保留到下次登录后回放）
    ///
    /// 之后的请求不再带认证头
    pub async fn logout(&mut self) -> Result<()> {
        self.session.logout().await?;
        self.apply_session()
    }

    /// 把会话当前状态同步到 HTTP 客户端和各同步器
    fn apply_session(&self) -> Result<()> {
        if let Some(http) = &self.http {
            http.reauthorize(&self.session)?;
        }
        let owner_id = self.session.user().map(|u| u.id.clone());
        self.clients.set_owner_id(owner_id.clone());
        self.products.set_owner_id(owner_id.clone());
        self.prescriptions.set_owner_id(owner_id);
        info!(
            "[Backoffice] 🔐 会话已更新，认证: {}",
            self.session.is_authenticated()
        );
        Ok(())
    }

    pub fn clients(&self) -> Arc<EntitySyncer<Client>> {
        self.clients.clone()
    }

    pub fn products(&self) -> Arc<EntitySyncer<Product>> {
        self.products.clone()
    }

    pub fn prescriptions(&self) -> Arc<EntitySyncer<Prescription>> {
        self.prescriptions.clone()
    }

    /// 并发加载三个集合
    pub async fn load_all(&self) -> Result<LoadSummary> {
        let (clients, products, prescriptions) = join3(
            self.clients.load(),
            self.products.load(),
            self.prescriptions.load(),
        )
        .await;
        let summary = LoadSummary {
            clients: clients?,
            products: products?,
            prescriptions: prescriptions?,
        };
        info!("[Backoffice] ✅ 全部集合加载完成: {:?}", summary);
        Ok(summary)
    }

    /// 依次回放三个集合的离线队列
    pub async fn flush_all(&self) -> Result<FlushReport> {
        let mut total = FlushReport::default();
        for report in [
            self.clients.flush_outbox().await?,
            self.products.flush_outbox().await?,
            self.prescriptions.flush_outbox().await?,
        ] {
            total.synced += report.synced;
            total.failed += report.failed;
        }
        Ok(total)
    }
}

struct SyncerBuilder<'a> {
    config: &'a BackofficeConfig,
    syncer_config: SyncerConfig,
    http: Option<SessionHttpClient>,
    db: Option<Pool<Sqlite>>,
    listener: Arc<dyn SyncListener>,
}

impl SyncerBuilder<'_> {
    fn build<E: Entity>(&self) -> Arc<EntitySyncer<E>> {
        let source: Arc<dyn DataSource<E>> = match &self.http {
            Some(http) => Arc::new(CollectionApi::<E>::new(
                http.clone(),
                self.config.api_base_url.clone(),
            )),
            None => Arc::new(FixtureSource::<E>::new()),
        };
        let syncer = match &self.db {
            Some(db) => EntitySyncer::with_listener_and_db(
                self.syncer_config.clone(),
                source,
                self.listener.clone(),
                db.clone(),
            ),
            None => EntitySyncer::with_listener(
                self.syncer_config.clone(),
                source,
                self.listener.clone(),
            ),
        };
        Arc::new(syncer)
    }
}
