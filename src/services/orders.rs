//! Order queries, the status state machine, and the unpaid-order sweep.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{
    order::{self, OrderStatus},
    order_event, order_item, payment, Order, OrderEvent, OrderItem, Payment,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Who performed a transition, recorded verbatim in the audit trail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Customer(Uuid),
    Merchant(Uuid),
    Admin(Uuid),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Customer(id) => write!(f, "customer:{id}"),
            Actor::Merchant(id) => write!(f, "merchant:{id}"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
            Actor::System => write!(f, "system"),
        }
    }
}

/// An order with its line items and payment record.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: Option<payment::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        self.load_detail(order).await
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_order_number(order_number)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_number} not found")))?;
        self.load_detail(order).await
    }

    async fn load_detail(&self, order: order::Model) -> Result<OrderDetail, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;
        Ok(OrderDetail {
            order,
            items,
            payment,
        })
    }

    /// Merchant's order list, newest first.
    pub async fn list_for_merchant(
        &self,
        merchant_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = Order::find()
            .filter(order::Column::MerchantId.eq(merchant_id))
            .order_by_desc(order::Column::PlacedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Audit trail, oldest first.
    pub async fn list_events(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_event::Model>, ServiceError> {
        Ok(OrderEvent::find_for_order(order_id).all(&*self.db).await?)
    }

    /// Apply one state-machine transition.
    ///
    /// The status write is a conditional update on the expected current
    /// status; a concurrent transition makes it match zero rows and the
    /// whole attempt fails without an audit row. Status write and audit
    /// append commit together.
    #[instrument(skip(self, data), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &Actor,
        data: Option<serde_json::Value>,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status, order.delivery_method) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot move order from {old_status} to {new_status}"
            )));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race; drop the transaction without an audit row.
            return Err(ServiceError::InvalidTransition(format!(
                "order {order_id} was updated concurrently; expected status {old_status}"
            )));
        }

        let event = order_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            actor: Set(actor.to_string()),
            from_status: Set(Some(old_status)),
            to_status: Set(new_status),
            data: Set(data),
            created_at: Set(now),
        };
        event.insert(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        info!(%order_id, %old_status, %new_status, "order status changed");

        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))
    }

    /// Cancel an order from any pre-completed state, recording the reason.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            OrderStatus::Cancelled,
            actor,
            Some(serde_json::json!({ "reason": reason })),
        )
        .await
    }

    /// Cancel PENDING orders older than `older_than` that never saw a
    /// payment proof. Invoked by an external scheduler through the admin
    /// surface; this service never schedules itself. Per-order failures
    /// are logged and skipped so one bad row cannot wedge the sweep.
    #[instrument(skip(self))]
    pub async fn cancel_stale_unpaid(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let cutoff = Utc::now() - older_than;

        let stale = Order::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PlacedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut cancelled = Vec::with_capacity(stale.len());
        for order in stale {
            match self
                .cancel(order.id, &Actor::System, "unpaid order timed out")
                .await
            {
                Ok(_) => cancelled.push(order.id),
                Err(err) => {
                    error!(order_id = %order.id, %err, "failed to cancel stale order");
                }
            }
        }

        info!(count = cancelled.len(), "stale unpaid orders cancelled");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::DeliveryMethod;
    use rstest::rstest;

    #[test]
    fn actor_audit_labels() {
        let id = Uuid::nil();
        assert_eq!(
            Actor::Merchant(id).to_string(),
            "merchant:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Actor::System.to_string(), "system");
    }

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::PaymentSubmitted)]
    #[case(OrderStatus::Pending, OrderStatus::Confirmed)]
    #[case(OrderStatus::PaymentSubmitted, OrderStatus::Confirmed)]
    #[case(OrderStatus::Confirmed, OrderStatus::Preparing)]
    #[case(OrderStatus::Preparing, OrderStatus::Ready)]
    #[case(OrderStatus::OutForDelivery, OrderStatus::Completed)]
    fn forward_transitions_allowed(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        assert!(from.can_transition_to(to, DeliveryMethod::Delivery));
    }

    #[rstest]
    #[case(OrderStatus::Confirmed, OrderStatus::Pending)]
    #[case(OrderStatus::Preparing, OrderStatus::Confirmed)]
    #[case(OrderStatus::Completed, OrderStatus::Preparing)]
    #[case(OrderStatus::Ready, OrderStatus::Completed)]
    #[case(OrderStatus::Pending, OrderStatus::Preparing)]
    fn backward_and_skipping_transitions_rejected(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
    ) {
        assert!(!from.can_transition_to(to, DeliveryMethod::Delivery));
    }

    #[test]
    fn ready_forks_by_fulfilment_method() {
        assert!(OrderStatus::Ready
            .can_transition_to(OrderStatus::OutForDelivery, DeliveryMethod::Delivery));
        assert!(!OrderStatus::Ready
            .can_transition_to(OrderStatus::OutForDelivery, DeliveryMethod::Pickup));
        assert!(OrderStatus::Ready
            .can_transition_to(OrderStatus::ReadyForPickup, DeliveryMethod::Pickup));
        assert!(!OrderStatus::Ready
            .can_transition_to(OrderStatus::ReadyForPickup, DeliveryMethod::Delivery));
    }

    #[rstest]
    #[case(OrderStatus::Pending)]
    #[case(OrderStatus::PaymentSubmitted)]
    #[case(OrderStatus::Confirmed)]
    #[case(OrderStatus::Preparing)]
    #[case(OrderStatus::Ready)]
    #[case(OrderStatus::OutForDelivery)]
    #[case(OrderStatus::ReadyForPickup)]
    fn every_pre_completed_state_can_cancel(#[case] from: OrderStatus) {
        assert!(from.can_transition_to(OrderStatus::Cancelled, DeliveryMethod::Delivery));
    }

    #[test]
    fn terminal_states_cannot_move() {
        for to in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Cancelled,
        ] {
            assert!(!OrderStatus::Completed.can_transition_to(to, DeliveryMethod::Pickup));
            assert!(!OrderStatus::Cancelled.can_transition_to(to, DeliveryMethod::Pickup));
        }
    }

    #[test]
    fn same_status_is_not_a_transition() {
        assert!(!OrderStatus::Preparing.can_transition_to(OrderStatus::Preparing, DeliveryMethod::Pickup));
    }
}
