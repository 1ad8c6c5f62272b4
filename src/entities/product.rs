use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, Select};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "unavailable")]
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub status: ProductStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::merchant::Entity",
        from = "Column::MerchantId",
        to = "super::merchant::Column::Id"
    )]
    Merchant,
    #[sea_orm(
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::Id"
    )]
    Category,
}

impl Related<super::merchant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Merchant.def()
    }
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Entity {
    /// Find by id, excluding soft-deleted rows.
    pub fn find_active_by_id(id: Uuid) -> Select<Entity> {
        Self::find_by_id(id).filter(Column::DeletedAt.is_null())
    }

    /// Find by id including soft-deleted rows.
    pub fn find_any_by_id(id: Uuid) -> Select<Entity> {
        Self::find_by_id(id)
    }

    /// All non-deleted products for a merchant's storefront.
    pub fn find_active_for_merchant(merchant_id: Uuid) -> Select<Entity> {
        Self::find()
            .filter(Column::MerchantId.eq(merchant_id))
            .filter(Column::DeletedAt.is_null())
    }
}

impl Model {
    /// Orderable right now: listed and not withdrawn.
    pub fn is_orderable(&self) -> bool {
        self.status == ProductStatus::Active && self.deleted_at.is_none()
    }
}
