use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, QueryOrder, Select};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::order::OrderStatus;

/// Append-only audit trail of order status transitions. The status column
/// on `orders` is the current value; history is reconstructed from these
/// rows, never from overwrites.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "order_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    /// Who triggered the transition, e.g. `merchant:<uuid>`, `system`
    pub actor: String,
    /// None for the creation event
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    /// Optional structured payload (rejection reason, proof id, ...)
    pub data: Option<Json>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Entity {
    /// Full trail for an order, oldest first.
    pub fn find_for_order(order_id: Uuid) -> Select<Entity> {
        Self::find()
            .filter(Column::OrderId.eq(order_id))
            .order_by_asc(Column::CreatedAt)
    }
}
