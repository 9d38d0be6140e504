//! 集合 HTTP API 客户端
//!
//! 负责 `/api/{collection}` 的所有 REST 请求

use crate::backoffice::auth::SessionHttpClient;
use crate::backoffice::catalog::Entity;
use crate::backoffice::types::{ensure_http_success, handle_http_response, ListBody};
use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::Value;
use std::marker::PhantomData;
use tracing::{debug, info};
use uuid::Uuid;

/// 单个实体集合的 HTTP API 客户端
pub struct CollectionApi<E> {
    client: SessionHttpClient,
    api_base_url: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> CollectionApi<E> {
    /// 创建新的集合 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头（见 `SessionHttpClient`），
    /// 每次请求时取当前客户端，会话切换后无需重建
    pub fn new(client: impl Into<SessionHttpClient>, api_base_url: String) -> Self {
        Self {
            client: client.into(),
            api_base_url,
            _entity: PhantomData,
        }
    }

    fn collection(&self) -> &'static str {
        E::schema().collection
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/api/{}",
            self.api_base_url.trim_end_matches('/'),
            self.collection()
        )
    }

    /// 单条记录地址，ID 作为路径段编码
    fn item_url(&self, id: &str) -> Result<Url> {
        let base = self.collection_url();
        let mut url = Url::parse(&base).with_context(|| format!("无效的 API 地址: {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API 地址不能作为基础路径: {}", base))?
            .push(id);
        Ok(url)
    }

    fn log_request(&self, action: &str, url: &str, operation_id: &str) {
        info!("[CollectionAPI/{}] 📡 {}", self.collection(), action);
        debug!(
            "[CollectionAPI/{}]   请求URL: {}, 操作ID: {}",
            self.collection(),
            url,
            operation_id
        );
    }

    /// 获取全量列表
    pub async fn list(&self) -> Result<Vec<E>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.collection_url();
        self.log_request("请求全量列表", &url, &operation_id);

        let response = self
            .client
            .current()
            .get(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let body: ListBody<E> = handle_http_response(response, "全量列表").await?;
        info!(
            "[CollectionAPI/{}] ✅ 全量列表响应，条目数: {}",
            self.collection(),
            body.items.len()
        );
        Ok(body.items)
    }

    /// 获取单条记录
    pub async fn get(&self, id: &str) -> Result<E> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.item_url(id)?;
        self.log_request("请求单条记录", url.as_str(), &operation_id);

        let response = self
            .client
            .current()
            .get(url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        handle_http_response(response, "单条记录").await
    }

    /// 新建记录，返回服务器分配 ID 和时间戳后的实体
    pub async fn create(&self, payload: &Value) -> Result<E> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.collection_url();
        self.log_request("请求新建记录", &url, &operation_id);

        let response = self
            .client
            .current()
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(payload)
            .send()
            .await
            .context("请求失败")?;

        handle_http_response(response, "新建记录").await
    }

    /// 修改记录（部分字段），返回服务器上的完整实体
    pub async fn update(&self, id: &str, payload: &Value) -> Result<E> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.item_url(id)?;
        self.log_request("请求修改记录", url.as_str(), &operation_id);

        let response = self
            .client
            .current()
            .put(url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(payload)
            .send()
            .await
            .context("请求失败")?;

        handle_http_response(response, "修改记录").await
    }

    /// 删除记录，只看 HTTP 状态
    pub async fn delete(&self, id: &str) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.item_url(id)?;
        self.log_request("请求删除记录", url.as_str(), &operation_id);

        let response = self
            .client
            .current()
            .delete(url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        ensure_http_success(response, "删除记录").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoffice::catalog::{Client, Prescription};

    #[test]
    fn urls_follow_collection_contract() {
        let api: CollectionApi<Prescription> =
            CollectionApi::new(reqwest::Client::new(), "http://localhost:8080/".to_string());
        assert_eq!(api.collection_url(), "http://localhost:8080/api/ordonnances");
        assert_eq!(
            api.item_url("42").unwrap().as_str(),
            "http://localhost:8080/api/ordonnances/42"
        );
    }

    #[test]
    fn item_ids_are_path_encoded() {
        let api: CollectionApi<Client> =
            CollectionApi::new(reqwest::Client::new(), "http://localhost:8080".to_string());
        assert_eq!(
            api.item_url("a/b c").unwrap().as_str(),
            "http://localhost:8080/api/clients/a%2Fb%20c"
        );
    }
}
