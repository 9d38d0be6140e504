//! 处方（ordonnance）实体

use crate::backoffice::catalog::{require, Entity, EntitySchema};
use serde::{Deserialize, Serialize};

static PRESCRIPTION_SCHEMA: EntitySchema = EntitySchema {
    collection: "ordonnances",
    label: "Ordonnance",
    article: "L'ordonnance",
    feminine: true,
    owner_field: None,
    category_field: None,
    columns: &["numeroOrdonnance", "client", "medecin", "dateValidite", "statut"],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: String,
    pub numero_ordonnance: String,
    /// 患者姓名
    pub client: String,
    pub date_creation: String,
    pub date_validite: String,
    /// 开具医生
    pub medecin: String,
    /// 例如 "Valide"、"Expire bientôt"
    #[serde(default)]
    pub statut: String,
    /// 视力类型，例如 "Vision de près"、"Progressif"
    #[serde(rename = "type", default)]
    pub vision_type: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionDraft {
    pub numero_ordonnance: String,
    pub client: String,
    pub date_creation: String,
    pub date_validite: String,
    pub medecin: String,
    pub statut: String,
    #[serde(rename = "type")]
    pub vision_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numero_ordonnance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_creation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_validite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medecin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statut: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub vision_type: Option<String>,
}

impl Entity for Prescription {
    type Draft = PrescriptionDraft;
    type Patch = PrescriptionPatch;

    fn schema() -> &'static EntitySchema {
        &PRESCRIPTION_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn search_values(&self) -> Vec<&str> {
        vec![
            self.numero_ordonnance.as_str(),
            self.client.as_str(),
            self.medecin.as_str(),
        ]
    }

    fn fixtures() -> Vec<Self> {
        let ordonnance = |id: &str,
                          numero: &str,
                          client: &str,
                          (created, valid): (&str, &str),
                          medecin: &str,
                          statut: &str,
                          vision_type: &str| Prescription {
            id: id.to_string(),
            numero_ordonnance: numero.to_string(),
            client: client.to_string(),
            date_creation: created.to_string(),
            date_validite: valid.to_string(),
            medecin: medecin.to_string(),
            statut: statut.to_string(),
            vision_type: vision_type.to_string(),
            created_at: format!("{}T00:00:00Z", created),
        };
        vec![
            ordonnance(
                "1",
                "ORD-001",
                "Marie Dupont",
                ("2023-11-15", "2024-11-15"),
                "Dr. Lemaire",
                "Valide",
                "Vision de près",
            ),
            ordonnance(
                "2",
                "ORD-002",
                "Pierre Martin",
                ("2023-11-10", "2024-11-10"),
                "Dr. Rousseau",
                "Valide",
                "Progressif",
            ),
            ordonnance(
                "3",
                "ORD-003",
                "Sophie Bernard",
                ("2023-08-20", "2024-08-20"),
                "Dr. Moreau",
                "Expire bientôt",
                "Vision de loin",
            ),
        ]
    }

    fn validate_draft(draft: &PrescriptionDraft) -> Vec<String> {
        let mut errors = Vec::new();
        require(
            &draft.numero_ordonnance,
            "Le numéro d'ordonnance est requis",
            &mut errors,
        );
        require(&draft.client, "Le client est requis", &mut errors);
        require(&draft.medecin, "Le médecin est requis", &mut errors);
        errors
    }
}
