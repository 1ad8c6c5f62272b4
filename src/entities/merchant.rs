use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, Select};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Merchant account lifecycle. Only `Active` merchants accept checkout
/// sessions; `PendingApproval` merchants wait in the admin queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum MerchantStatus {
    #[sea_orm(string_value = "pending_approval")]
    PendingApproval,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "suspended")]
    Suspended,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "merchants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub business_name: String,
    pub status: MerchantStatus,

    pub delivery_enabled: bool,
    pub pickup_enabled: bool,
    /// Base delivery fee applied when no zone entry overrides it
    pub delivery_fee: Decimal,
    /// Subtotal threshold above which delivery is free
    pub free_delivery_above: Option<Decimal>,
    pub minimum_order: Decimal,
    /// Kitchen preparation lead time in minutes
    pub preparation_minutes: i32,

    pub address_line1: String,
    pub postal_code: String,
    /// Optional zoned fee table, serialized `Vec<DeliveryZone>`
    pub delivery_zones: Option<Json>,
    /// Delivery radius for distance-based quoting; None disables it
    pub max_delivery_distance_km: Option<f64>,
    /// Surcharge per km beyond the base fee for distance-based quotes
    pub per_km_fee: Option<Decimal>,

    pub email_notifications: bool,
    pub whatsapp_notifications: bool,
    /// Override address for order notifications; account email otherwise
    pub order_notification_email: Option<String>,
    pub order_notification_phone: Option<String>,
    pub contact_email: String,
    pub contact_phone: Option<String>,

    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product::Entity")]
    Products,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Entity {
    /// Find by id, excluding soft-deleted rows. The soft-delete filter is
    /// explicit at every call site; use `find_any_by_id` to include
    /// deleted rows.
    pub fn find_active_by_id(id: Uuid) -> Select<Entity> {
        Self::find_by_id(id).filter(Column::DeletedAt.is_null())
    }

    /// Find by id including soft-deleted rows (admin/audit reads).
    pub fn find_any_by_id(id: Uuid) -> Select<Entity> {
        Self::find_by_id(id)
    }
}

impl Model {
    /// A merchant accepts new checkout sessions only while approved and
    /// offering at least one fulfilment method.
    pub fn is_accepting_orders(&self) -> bool {
        self.status == MerchantStatus::Active && (self.delivery_enabled || self.pickup_enabled)
    }
}
