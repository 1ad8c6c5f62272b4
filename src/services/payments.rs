//! Payment-proof workflow: proof upload, merchant confirmation, rejection.
//!
//! Proof uploads never change the payment status; only the explicit
//! confirmation action does, through a conditional update that makes the
//! PENDING -> COMPLETED transition exactly-once under concurrent calls.

use bytes::Bytes;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{
    order::{self, OrderStatus},
    order_event,
    payment::{self, PaymentStatus},
    payment_proof, Order, Payment,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::providers::ProofStorage;
use crate::services::orders::{Actor, OrderService};

/// Accepted proof content types: bank-app screenshots and PDF receipts.
pub const ALLOWED_PROOF_CONTENT_TYPES: &[&str] =
    &["image/jpeg", "image/png", "application/pdf"];

#[derive(Clone, Debug)]
pub struct ProofUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub transaction_reference: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    storage: Arc<dyn ProofStorage>,
    orders: Arc<OrderService>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        storage: Arc<dyn ProofStorage>,
        orders: Arc<OrderService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            storage,
            orders,
            config,
        }
    }

    /// Attach an uploaded transfer proof to an order.
    ///
    /// Size and type are gated before anything is stored. Retries are
    /// expected (blurry screenshots), so an order accumulates proof rows;
    /// the payment row stays PENDING until a merchant confirms. The first
    /// upload moves the order PENDING -> PAYMENT_SUBMITTED.
    #[instrument(skip(self, upload), fields(order_number = %order_number, file = %upload.file_name))]
    pub async fn upload_proof(
        &self,
        order_number: &str,
        upload: ProofUpload,
    ) -> Result<payment_proof::Model, ServiceError> {
        let size = upload.bytes.len() as u64;
        if size > self.config.payment_proof_max_bytes {
            return Err(ServiceError::FileTooLarge(format!(
                "proof is {size} bytes; the limit is {} bytes",
                self.config.payment_proof_max_bytes
            )));
        }

        let content_type = normalize_content_type(&upload.content_type);
        if !ALLOWED_PROOF_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(ServiceError::UnsupportedFileType(format!(
                "{} is not accepted; upload a JPEG, PNG or PDF",
                upload.content_type
            )));
        }

        let order = Order::find_by_order_number(order_number)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_number} not found")))?;

        let payment = self.load_payment(&*self.db, order.id).await?;
        match payment.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Completed => {
                return Err(ServiceError::AlreadyConfirmed(format!(
                    "payment for order {order_number} has already been confirmed"
                )))
            }
            status => {
                return Err(ServiceError::ValidationError(format!(
                    "payment for order {order_number} is {status}; no further proof accepted"
                )))
            }
        }

        let file_url = self
            .storage
            .store(order_number, &upload.file_name, &content_type, &upload.bytes)
            .await?;

        let proof = payment_proof::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            file_url: Set(file_url),
            file_name: Set(upload.file_name),
            content_type: Set(content_type),
            size_bytes: Set(size as i64),
            transaction_reference: Set(upload.transaction_reference),
            uploaded_at: Set(Utc::now()),
        };
        let proof = proof.insert(&*self.db).await?;

        if order.status == OrderStatus::Pending {
            let actor = order
                .customer_id
                .map(Actor::Customer)
                .unwrap_or(Actor::System);
            // A concurrent first upload may win this transition; the proof
            // itself is already recorded, so losing the race is fine.
            if let Err(err) = self
                .orders
                .transition(
                    order.id,
                    OrderStatus::PaymentSubmitted,
                    &actor,
                    Some(serde_json::json!({ "proof_id": proof.id })),
                )
                .await
            {
                match err {
                    ServiceError::InvalidTransition(_) => {
                        warn!(order_id = %order.id, "order left pending state during proof upload");
                    }
                    other => return Err(other),
                }
            }
        }

        self.event_sender
            .send_or_log(Event::PaymentProofUploaded {
                order_id: order.id,
                proof_id: proof.id,
            })
            .await;

        info!(order_id = %order.id, proof_id = %proof.id, "payment proof uploaded");
        Ok(proof)
    }

    /// Merchant confirmation of an out-of-band transfer.
    ///
    /// Payment PENDING -> COMPLETED and order -> CONFIRMED commit in one
    /// transaction. The payment update is conditioned on the current
    /// status, so a duplicate call fails `AlreadyConfirmed` before any
    /// notification is emitted.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let payment = self.load_payment(&txn, order_id).await?;

        let updated = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Completed))
            .col_expr(payment::Column::ConfirmedAt, Expr::value(Some(now)))
            .col_expr(payment::Column::ConfirmedBy, Expr::value(actor_uuid(actor)))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(match payment.status {
                PaymentStatus::Completed => ServiceError::AlreadyConfirmed(format!(
                    "payment for order {order_id} has already been confirmed"
                )),
                status => ServiceError::ValidationError(format!(
                    "payment for order {order_id} is {status} and cannot be confirmed"
                )),
            });
        }

        self.move_order(&txn, order_id, OrderStatus::Confirmed, actor, None, now)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentConfirmed { order_id })
            .await;

        info!(%order_id, "payment confirmed");
        self.load_payment(&*self.db, order_id).await
    }

    /// Merchant rejection of a transfer that never arrived or does not
    /// match. Terminal: payment FAILED, order CANCELLED, reason kept for
    /// audit on both the payment row and the order trail.
    #[instrument(skip(self))]
    pub async fn reject_payment(
        &self,
        order_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let payment = self.load_payment(&txn, order_id).await?;

        let updated = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(
                payment::Column::RejectedReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(match payment.status {
                PaymentStatus::Completed => ServiceError::AlreadyConfirmed(format!(
                    "payment for order {order_id} has already been confirmed"
                )),
                status => ServiceError::ValidationError(format!(
                    "payment for order {order_id} is {status} and cannot be rejected"
                )),
            });
        }

        self.move_order(
            &txn,
            order_id,
            OrderStatus::Cancelled,
            actor,
            Some(serde_json::json!({ "reason": reason })),
            now,
        )
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRejected {
                order_id,
                reason: reason.to_string(),
            })
            .await;

        info!(%order_id, %reason, "payment rejected");
        self.load_payment(&*self.db, order_id).await
    }

    async fn load_payment<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no payment for order {order_id}")))
    }

    /// Conditional order transition inside the caller's transaction, so
    /// the payment and order writes commit or roll back together.
    async fn move_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &Actor,
        data: Option<serde_json::Value>,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status, order.delivery_method) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot move order from {old_status} to {new_status}"
            )));
        }

        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
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
        event.insert(conn).await?;

        Ok(())
    }
}

fn actor_uuid(actor: &Actor) -> Option<Uuid> {
    match actor {
        Actor::Customer(id) | Actor::Merchant(id) | Actor::Admin(id) => Some(*id),
        Actor::System => None,
    }
}

fn normalize_content_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    // Some bank apps report JPEGs with the legacy subtype
    if lowered == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        lowered
    }
}
