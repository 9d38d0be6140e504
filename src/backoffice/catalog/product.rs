//! 商品实体
//!
//! 商品按 `kind` 区分为镜片（Lentille）、配件（Accessoire）和眼镜（Lunette），
//! 各自带有额外字段，JSON 中与公共字段平铺在同一层。

use crate::backoffice::catalog::{require, Entity, EntitySchema};
use serde::{Deserialize, Serialize};

static PRODUCT_SCHEMA: EntitySchema = EntitySchema {
    collection: "products",
    label: "Produit",
    article: "Le produit",
    feminine: false,
    owner_field: Some("opticienId"),
    category_field: Some("category"),
    columns: &["name", "category", "kind", "price", "stock"],
};

/// 商品分类（对应筛选下拉框的选项）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCategory {
    #[serde(rename = "Montres optique")]
    MontresOptique,
    #[serde(rename = "Lentille")]
    Lentille,
    #[serde(rename = "Verre")]
    Verre,
    #[serde(rename = "Monture Solaire")]
    MontureSolaire,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::MontresOptique => "Montres optique",
            ProductCategory::Lentille => "Lentille",
            ProductCategory::Verre => "Verre",
            ProductCategory::MontureSolaire => "Monture Solaire",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Genre {
    Homme,
    Femme,
    Enfant,
    Mixte,
}

/// 按 `kind` 区分的商品详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProductDetails {
    Lentille {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        lens_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dioptrie: Option<f64>,
        #[serde(rename = "dureeVie", default, skip_serializing_if = "Option::is_none")]
        duree_vie: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        couleur: Option<String>,
    },
    Accessoire {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        accessory_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compatibilite: Option<String>,
    },
    Lunette {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        frame_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        couleur: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forme: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matiere: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        genre: Option<Genre>,
        #[serde(rename = "model3d", default, skip_serializing_if = "Option::is_none")]
        model_3d: Option<String>,
    },
}

impl ProductDetails {
    pub fn kind(&self) -> &'static str {
        match self {
            ProductDetails::Lentille { .. } => "Lentille",
            ProductDetails::Accessoire { .. } => "Accessoire",
            ProductDetails::Lunette { .. } => "Lunette",
        }
    }
}

/// 商品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub stock: u32,
    pub category: ProductCategory,
    #[serde(default)]
    pub opticien_id: String,
    /// 关联的优惠 ID 列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offres: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(flatten)]
    pub details: ProductDetails,
}

/// 新建商品表单
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub stock: u32,
    pub category: ProductCategory,
    /// 为空时由当前会话用户填充
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opticien_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offres: Vec<String>,
    #[serde(flatten)]
    pub details: ProductDetails,
}

/// 修改商品（只发送设置了的字段）
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ProductCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offres: Option<Vec<String>>,
    #[serde(flatten)]
    pub details: Option<ProductDetails>,
}

impl Entity for Product {
    type Draft = ProductDraft;
    type Patch = ProductPatch;

    fn schema() -> &'static EntitySchema {
        &PRODUCT_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn search_values(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }

    fn category(&self) -> Option<&str> {
        Some(self.category.as_str())
    }

    fn fixtures() -> Vec<Self> {
        vec![
            Product {
                id: "1".to_string(),
                name: "Monture Ray-Ban".to_string(),
                description: Some("Monture élégante pour usage quotidien".to_string()),
                price: 450.0,
                image: None,
                stock: 25,
                category: ProductCategory::MontureSolaire,
                opticien_id: "opticien1".to_string(),
                offres: Vec::new(),
                created_at: "2023-05-15T00:00:00Z".to_string(),
                details: ProductDetails::Lunette {
                    frame_type: Some("Solaire".to_string()),
                    couleur: Some("Noir".to_string()),
                    forme: Some("Aviateur".to_string()),
                    matiere: Some("Métal".to_string()),
                    genre: Some(Genre::Mixte),
                    model_3d: None,
                },
            },
            Product {
                id: "2".to_string(),
                name: "Verres progressifs Essilor".to_string(),
                description: Some("Verres de haute qualité pour presbytie".to_string()),
                price: 320.0,
                image: None,
                stock: 15,
                category: ProductCategory::Verre,
                opticien_id: "opticien1".to_string(),
                offres: Vec::new(),
                created_at: "2023-06-20T00:00:00Z".to_string(),
                details: ProductDetails::Accessoire {
                    accessory_type: Some("Progressif".to_string()),
                    compatibilite: Some("Toutes montures".to_string()),
                },
            },
            Product {
                id: "3".to_string(),
                name: "Lentilles Acuvue".to_string(),
                description: Some("Lentilles journalières confortables".to_string()),
                price: 28.0,
                image: None,
                stock: 100,
                category: ProductCategory::Lentille,
                opticien_id: "opticien1".to_string(),
                offres: Vec::new(),
                created_at: "2023-07-10T00:00:00Z".to_string(),
                details: ProductDetails::Lentille {
                    lens_type: Some("souple".to_string()),
                    dioptrie: Some(-2.5),
                    duree_vie: Some("1 jour".to_string()),
                    couleur: Some("Transparent".to_string()),
                },
            },
        ]
    }

    fn validate_draft(draft: &ProductDraft) -> Vec<String> {
        let mut errors = Vec::new();
        require(&draft.name, "Le nom est requis", &mut errors);
        if !draft.price.is_finite() || draft.price < 0.0 {
            errors.push("Le prix doit être positif".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_fields_are_flattened() {
        let json = serde_json::to_value(&Product::fixtures()[2]).unwrap();
        assert_eq!(json["kind"], "Lentille");
        assert_eq!(json["dioptrie"], -2.5);
        assert_eq!(json["dureeVie"], "1 jour");
        assert_eq!(json["opticienId"], "opticien1");
        assert_eq!(json["category"], "Lentille");

        let decoded: Product = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, Product::fixtures()[2]);
    }

    #[test]
    fn decodes_server_product_with_missing_optionals() {
        let product: Product = serde_json::from_value(json!({
            "id": "64f0",
            "name": "Étui rigide",
            "price": 12.5,
            "category": "Monture Solaire",
            "kind": "Accessoire"
        }))
        .unwrap();
        assert_eq!(product.stock, 0);
        assert_eq!(product.details.kind(), "Accessoire");
        assert_eq!(product.category(), Some("Monture Solaire"));
    }

    #[test]
    fn negative_price_is_rejected() {
        let draft = ProductDraft {
            name: "".to_string(),
            description: None,
            price: -1.0,
            image: None,
            stock: 1,
            category: ProductCategory::Verre,
            opticien_id: None,
            offres: Vec::new(),
            details: ProductDetails::Accessoire {
                accessory_type: None,
                compatibilite: None,
            },
        };
        assert_eq!(
            Product::validate_draft(&draft),
            vec!["Le nom est requis", "Le prix doit être positif"]
        );
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        assert_eq!(
            serde_json::to_value(ProductPatch::default()).unwrap(),
            json!({})
        );
        let patch = ProductPatch {
            stock: Some(3),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(patch).unwrap(), json!({"stock": 3}));
    }
}
