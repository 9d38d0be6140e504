//! 客户实体

use crate::backoffice::catalog::{require, Entity, EntitySchema};
use serde::{Deserialize, Serialize};

static CLIENT_SCHEMA: EntitySchema = EntitySchema {
    collection: "clients",
    label: "Client",
    article: "Le client",
    feminine: false,
    owner_field: None,
    category_field: None,
    columns: &["name", "surname", "email", "phone", "statut"],
};

/// 客户状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    #[default]
    Actif,
    Inactif,
}

/// 客户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    /// 姓
    pub name: String,
    /// 名
    pub surname: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub statut: ClientStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// 新建客户表单
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDraft {
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub statut: ClientStatus,
}

/// 修改客户（只发送设置了的字段）
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statut: Option<ClientStatus>,
}

impl Entity for Client {
    type Draft = ClientDraft;
    type Patch = ClientPatch;

    fn schema() -> &'static EntitySchema {
        &CLIENT_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn search_values(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.surname.as_str(), self.email.as_str()]
    }

    fn fixtures() -> Vec<Self> {
        let client = |id: &str,
                      name: &str,
                      surname: &str,
                      email: &str,
                      phone: &str,
                      address: &str,
                      statut: ClientStatus,
                      created_at: &str| Client {
            id: id.to_string(),
            name: name.to_string(),
            surname: surname.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            address: Some(address.to_string()),
            statut,
            created_at: created_at.to_string(),
            updated_at: None,
        };
        vec![
            client(
                "1",
                "Dupont",
                "Marie",
                "marie.dupont@email.com",
                "+33 6 12 34 56 78",
                "123 Rue de la Paix, Paris",
                ClientStatus::Actif,
                "2023-01-15T00:00:00Z",
            ),
            client(
                "2",
                "Martin",
                "Pierre",
                "pierre.martin@email.com",
                "+33 6 98 76 54 32",
                "456 Avenue des Champs, Lyon",
                ClientStatus::Actif,
                "2023-03-22T00:00:00Z",
            ),
            client(
                "3",
                "Bernard",
                "Sophie",
                "sophie.bernard@email.com",
                "+33 6 45 67 89 01",
                "789 Boulevard Central, Marseille",
                ClientStatus::Inactif,
                "2023-02-10T00:00:00Z",
            ),
        ]
    }

    fn validate_draft(draft: &ClientDraft) -> Vec<String> {
        let mut errors = Vec::new();
        require(&draft.name, "Le nom est requis", &mut errors);
        require(&draft.surname, "Le prénom est requis", &mut errors);
        if !looks_like_email(&draft.email) {
            errors.push("Email invalide".to_string());
        }
        require(&draft.phone, "Le téléphone est requis", &mut errors);
        errors
    }
}

/// 粗略的邮箱格式检查：`local@domain.tld`
fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}
