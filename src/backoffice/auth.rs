//! 登录与会话
//!
//! 会话对象显式传递：从持久化文件恢复 -> 登录 -> 登出。
//! 持久化格式为 `{"user": {...}, "isAuthenticated": true}`。

use crate::backoffice::types::handle_http_response;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Opticien,
    Admin,
}

/// 登录用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nom: String,
    pub prenom: String,
    pub email: String,
    #[serde(default)]
    pub telephone: String,
    #[serde(default)]
    pub cin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boutique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adresse: Option<String>,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub user: User,
}

/// 登录，返回服务器上的用户信息
pub async fn login_async(api_base_url: &str, email: &str, password: &str) -> Result<User> {
    let client = reqwest::Client::new();
    let operation_id = Uuid::new_v4().to_string();
    let url = format!("{}/api/auth/login", api_base_url.trim_end_matches('/'));

    info!("[Auth] 🔐 正在登录...");
    debug!("[Auth]   URL: {}", url);
    debug!("[Auth]   邮箱: {}", email);
    debug!("[Auth]   OperationID: {}", operation_id);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&LoginRequest { email, password })
        .send()
        .await
        .context("请求失败")?;

    let login: LoginResponse = handle_http_response(response, "登录").await?;
    info!("[Auth] ✅ 登录成功，用户ID: {}", login.user.id);
    Ok(login.user)
}

/// 会话状态
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// 未登录（首次启动，或持久化文件缺失/损坏）
    Anonymous,
    Authenticated(User),
    /// 已主动登出
    LoggedOut,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedAuth {
    user: Option<User>,
    is_authenticated: bool,
}

/// 用户会话
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    /// 持久化文件路径，None 时只保存在内存
    path: Option<PathBuf>,
}

impl Session {
    /// 内存会话（不持久化）
    pub fn anonymous() -> Self {
        Self {
            state: SessionState::Anonymous,
            path: None,
        }
    }

    /// 从持久化文件恢复会话，文件缺失或内容无法解析时为匿名
    pub async fn init_from_persisted(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::anonymous();
        };

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<PersistedAuth>(&text) {
                Ok(PersistedAuth {
                    user: Some(user),
                    is_authenticated: true,
                }) => {
                    info!("[Session] 已恢复会话，用户ID: {}", user.id);
                    SessionState::Authenticated(user)
                }
                Ok(_) => SessionState::Anonymous,
                Err(e) => {
                    warn!(
                        "[Session] 会话文件无法解析，按未登录处理: {}, 错误: {:?}",
                        path.display(),
                        e
                    );
                    SessionState::Anonymous
                }
            },
            Err(e) => {
                debug!("[Session] 未找到会话文件 {}: {}", path.display(), e);
                SessionState::Anonymous
            }
        };

        Self {
            state,
            path: Some(path),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn user(&self) -> Option<&User> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    /// 占位令牌：直接使用用户 ID
    pub fn bearer_token(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }

    /// 登录成功后保存用户并写入持久化文件
    pub async fn login(&mut self, user: User) -> Result<()> {
        if let Some(path) = &self.path {
            let persisted = PersistedAuth {
                user: Some(user.clone()),
                is_authenticated: true,
            };
            let text = serde_json::to_string(&persisted).context("序列化会话失败")?;
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("创建会话目录失败: {}", dir.display()))?;
            }
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("写入会话文件失败: {}", path.display()))?;
        }
        info!("[Session] 用户已登录: {} ({:?})", user.email, user.role);
        self.state = SessionState::Authenticated(user);
        Ok(())
    }

    /// 登出并删除持久化文件
    pub async fn logout(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("删除会话文件失败: {}", path.display()))
                }
            }
        }
        info!("[Session] 用户已登出");
        self.state = SessionState::LoggedOut;
        Ok(())
    }

    /// 构造带认证头的 HTTP 客户端（未登录时不带认证头）
    pub fn authorized_http_client(&self, timeout: Option<Duration>) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.bearer_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("无效的认证令牌")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().context("创建 HTTP 客户端失败")
    }
}

/// 跟随会话切换认证头的 HTTP 客户端句柄
///
/// 所有集合共享同一个句柄；登录或登出后调用 `reauthorize`，之后的请求使用新的认证头
#[derive(Clone, Debug)]
pub struct SessionHttpClient {
    inner: Arc<RwLock<reqwest::Client>>,
    timeout: Option<Duration>,
}

impl SessionHttpClient {
    pub fn for_session(session: &Session, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(session.authorized_http_client(timeout)?)),
            timeout,
        })
    }

    /// 当前客户端（reqwest::Client 内部是 Arc，克隆开销很小）
    pub fn current(&self) -> reqwest::Client {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 按会话当前状态重建客户端
    pub fn reauthorize(&self, session: &Session) -> Result<()> {
        let client = session.authorized_http_client(self.timeout)?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = client;
        debug!(
            "[Session] HTTP 客户端已更新，认证: {}",
            session.is_authenticated()
        );
        Ok(())
    }
}

impl From<reqwest::Client> for SessionHttpClient {
    fn from(client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(RwLock::new(client)),
            timeout: None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            nom: "Benali".to_string(),
            prenom: "Sami".to_string(),
            email: "sami@optivision.tn".to_string(),
            telephone: "+216 20 000 000".to_string(),
            cin: "01234567".to_string(),
            boutique: Some("Optique Centre".to_string()),
            adresse: None,
            role: Role::Opticien,
        }
    }

    fn temp_session_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("optivision-session-{}", Uuid::new_v4()))
            .join("auth.json")
    }

    #[tokio::test]
    async fn session_round_trips_through_its_file() {
        let path = temp_session_path();

        let mut session = Session::init_from_persisted(Some(path.clone())).await;
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(session.bearer_token().is_none());

        session.login(user()).await.unwrap();
        assert_eq!(session.bearer_token(), Some("u-1"));

        let text = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["isAuthenticated"], true);
        assert_eq!(raw["user"]["role"], "opticien");

        let restored = Session::init_from_persisted(Some(path.clone())).await;
        assert_eq!(restored.user(), Some(&user()));

        session.logout().await.unwrap();
        assert_eq!(session.state(), &SessionState::LoggedOut);
        assert!(!path.exists());
        assert!(!Session::init_from_persisted(Some(path)).await.is_authenticated());
    }

    #[tokio::test]
    async fn corrupt_file_means_anonymous() {
        let path = temp_session_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let session = Session::init_from_persisted(Some(path)).await;
        assert_eq!(session.state(), &SessionState::Anonymous);
    }

    #[test]
    fn authorized_client_builds_with_and_without_user() {
        assert!(Session::anonymous().authorized_http_client(None).is_ok());
        let session = Session {
            state: SessionState::Authenticated(user()),
            path: None,
        };
        assert!(session
            .authorized_http_client(Some(Duration::from_secs(5)))
            .is_ok());
    }

    #[tokio::test]
    async fn shared_client_follows_session_changes() {
        let mut session = Session::anonymous();
        let handle = SessionHttpClient::for_session(&session, None).unwrap();
        let shared = handle.clone();

        session.login(user()).await.unwrap();
        handle.reauthorize(&session).unwrap();
        assert!(Arc::ptr_eq(&handle.inner, &shared.inner));

        session.logout().await.unwrap();
        assert!(shared.reauthorize(&session).is_ok());
    }
}
