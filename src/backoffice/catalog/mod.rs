//! 实体目录模块
//!
//! 每种实体（客户、商品、处方）的 schema 表：集合名、提示文案、可搜索字段、
//! 分类字段、表单校验和内置示例数据。同步器只依赖这里的 `Entity` trait。

pub mod client;
pub mod prescription;
pub mod product;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub use client::{Client, ClientDraft, ClientPatch, ClientStatus};
pub use prescription::{Prescription, PrescriptionDraft, PrescriptionPatch};
pub use product::{
    Genre, Product, ProductCategory, ProductDetails, ProductDraft, ProductPatch,
};

/// 分类过滤器中表示"不过滤"的哨兵值
pub const ALL_CATEGORIES: &str = "Toutes catégories";

/// 实体 schema（每种实体一份静态配置）
#[derive(Debug)]
pub struct EntitySchema {
    /// REST 集合名，对应 `/api/{collection}`
    pub collection: &'static str,
    /// 提示标题中的名词，例如 "Produit"
    pub label: &'static str,
    /// 提示描述中带冠词的名词，例如 "Le produit"
    pub article: &'static str,
    /// 法语阴性名词（过去分词加 e）
    pub feminine: bool,
    /// 创建时由当前会话用户填充的归属字段（例如 `opticienId`）
    pub owner_field: Option<&'static str>,
    /// 分类字段名；为 None 时分类过滤不生效
    pub category_field: Option<&'static str>,
    /// 列表展示列（JSON 字段名）
    pub columns: &'static [&'static str],
}

/// 可同步实体
pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 新建时提交的字段（不含 id 和时间戳）
    type Draft: Serialize + Debug + Send + Sync;
    /// 修改时提交的字段（未设置的字段不发送）
    type Patch: Serialize + Debug + Send + Sync;

    fn schema() -> &'static EntitySchema;

    fn id(&self) -> &str;

    /// 参与搜索的文本字段
    fn search_values(&self) -> Vec<&str>;

    fn category(&self) -> Option<&str> {
        None
    }

    /// 内置示例数据（演示模式或加载失败时使用）
    fn fixtures() -> Vec<Self>;

    /// 表单校验，返回错误信息列表，空列表表示通过
    fn validate_draft(_draft: &Self::Draft) -> Vec<String> {
        Vec::new()
    }
}

/// 分类过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(String),
}

impl CategoryFilter {
    /// 从下拉框取值解析；哨兵值或空字符串表示不过滤
    pub fn parse(value: &str) -> Self {
        if value.is_empty() || value == ALL_CATEGORIES {
            CategoryFilter::All
        } else {
            CategoryFilter::Only(value.to_string())
        }
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(_) if E::schema().category_field.is_none() => true,
            CategoryFilter::Only(wanted) => entity.category() == Some(wanted.as_str()),
        }
    }
}

impl From<&str> for CategoryFilter {
    fn from(value: &str) -> Self {
        CategoryFilter::parse(value)
    }
}

/// 搜索条件：任一搜索字段包含关键字（不区分大小写）即匹配，空关键字匹配全部
pub fn matches_search<E: Entity>(entity: &E, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    entity
        .search_values()
        .iter()
        .any(|value| value.to_lowercase().contains(&needle))
}

/// 判断必填字符串
pub(crate) fn require(value: &str, message: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_is_case_insensitive_substring() {
        let clients = Client::fixtures();
        let hits: Vec<_> = clients
            .iter()
            .filter(|c| matches_search(*c, "dupont"))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");

        // 匹配 email 字段
        assert!(matches_search(&clients[1], "PIERRE.MARTIN@"));
        assert!(clients.iter().all(|c| matches_search(c, "")));
    }

    #[test]
    fn category_sentinel_disables_filter() {
        assert_eq!(CategoryFilter::parse(ALL_CATEGORIES), CategoryFilter::All);
        assert_eq!(CategoryFilter::parse(""), CategoryFilter::All);

        let products = Product::fixtures();
        let lentilles = CategoryFilter::from("Lentille");
        let hits: Vec<_> = products.iter().filter(|p| lentilles.matches(*p)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Lentilles Acuvue");

        assert!(products.iter().all(|p| CategoryFilter::All.matches(p)));
    }

    #[test]
    fn category_filter_ignored_for_kinds_without_category() {
        let filter = CategoryFilter::from("Lentille");
        assert!(Client::fixtures().iter().all(|c| filter.matches(c)));
    }
}
