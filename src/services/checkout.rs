//! Checkout session lifecycle and order placement.
//!
//! A session is the server-side draft of an order. It is created from the
//! client cart, updated with a fulfilment choice, and consumed exactly once
//! by [`CheckoutService::complete`], which snapshots current catalog prices
//! into an immutable order inside a single transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::entities::{
    checkout_session::{self, SessionStatus},
    merchant,
    order::{self, DeliveryMethod, OrderStatus},
    order_event, order_item,
    payment::{self, PaymentMethod, PaymentStatus},
    CheckoutSession, Merchant, Product,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::delivery::{DeliveryProfile, DeliveryQuote, DeliveryService, PostalCode};

/// One line of a checkout session: a product reference and a quantity.
/// Prices are deliberately absent; they are re-read at placement time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct DeliveryAddress {
    #[validate(length(min = 1, message = "address line is required"))]
    pub line1: String,
    pub line2: Option<String>,
    pub postal_code: String,
    #[serde(default = "default_city")]
    pub city: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub notes: Option<String>,
}

fn default_city() -> String {
    "Singapore".to_string()
}

fn default_country() -> String {
    "SG".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ContactInfo {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "valid email is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "valid phone number is required"))]
    pub phone: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateSessionInput {
    pub merchant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub items: Vec<SessionLine>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompleteCheckoutInput {
    pub contact: ContactInfo,
    pub customer_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// Result of a successful placement.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CompletedOrder {
    pub order_id: Uuid,
    pub order_number: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    delivery: Arc<DeliveryService>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        delivery: Arc<DeliveryService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            delivery,
            config,
        }
    }

    /// Start a checkout session from cart contents.
    ///
    /// Verifies the merchant is approved and accepting orders and that
    /// every referenced product belongs to it and is currently orderable.
    #[instrument(skip(self, input), fields(merchant_id = %input.merchant_id))]
    pub async fn create_session(
        &self,
        input: CreateSessionInput,
    ) -> Result<checkout_session::Model, ServiceError> {
        let lines = merge_lines(input.items)?;

        let merchant = self.load_accepting_merchant(input.merchant_id).await?;

        let products = self
            .load_orderable_products(&merchant, &lines, |name| {
                ServiceError::ProductUnavailable(name)
            })
            .await?;
        debug_assert_eq!(products.len(), lines.len());

        let now = Utc::now();
        let session = checkout_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            merchant_id: Set(merchant.id),
            customer_id: Set(input.customer_id),
            status: Set(SessionStatus::Open),
            items: Set(serde_json::to_value(&lines)?),
            delivery_method: Set(None),
            delivery_address: Set(None),
            contact: Set(None),
            order_id: Set(None),
            expires_at: Set(now + self.config.session_ttl()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let session = session.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                session_id: session.id,
                merchant_id: merchant.id,
            })
            .await;

        info!(session_id = %session.id, "checkout session created");
        Ok(session)
    }

    /// Set the fulfilment method, with an address when delivering.
    #[instrument(skip(self, address))]
    pub async fn update_delivery(
        &self,
        session_id: Uuid,
        method: DeliveryMethod,
        address: Option<DeliveryAddress>,
    ) -> Result<checkout_session::Model, ServiceError> {
        let session = self.load_open_session(session_id).await?;

        let merchant = self.load_accepting_merchant(session.merchant_id).await?;

        let address_json = match method {
            DeliveryMethod::Delivery => {
                if !merchant.delivery_enabled {
                    return Err(ServiceError::ValidationError(
                        "merchant does not offer delivery".to_string(),
                    ));
                }
                let address = address.ok_or_else(|| {
                    ServiceError::InvalidAddress(
                        "a delivery address is required for delivery orders".to_string(),
                    )
                })?;
                address.validate()?;
                PostalCode::parse(&address.postal_code)?;
                Some(serde_json::to_value(&address)?)
            }
            DeliveryMethod::Pickup => {
                if !merchant.pickup_enabled {
                    return Err(ServiceError::ValidationError(
                        "merchant does not offer pickup".to_string(),
                    ));
                }
                None
            }
        };

        let mut active: checkout_session::ActiveModel = session.into();
        active.delivery_method = Set(Some(method));
        active.delivery_address = Set(address_json);
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<checkout_session::Model, ServiceError> {
        CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::SessionNotFound(format!("session {session_id} not found")))
    }

    /// Convert the session into an order.
    ///
    /// Prices, names and SKUs are re-read from the catalog here — never
    /// reused from session-creation time — so a price edit between the two
    /// moments is reflected, and a product withdrawal fails the placement
    /// naming the product. Order, items, payment and the initial audit
    /// event commit in one transaction; no partial order is ever visible.
    #[instrument(skip(self, input))]
    pub async fn complete(
        &self,
        session_id: Uuid,
        input: CompleteCheckoutInput,
    ) -> Result<CompletedOrder, ServiceError> {
        input.contact.validate()?;

        let session = self.load_open_session(session_id).await?;

        let Some(method) = session.delivery_method else {
            return Err(ServiceError::ValidationError(
                "choose delivery or pickup before completing checkout".to_string(),
            ));
        };

        let merchant = self.load_accepting_merchant(session.merchant_id).await?;

        let lines: Vec<SessionLine> = serde_json::from_value(session.items.clone())?;
        let products = self
            .load_orderable_products(&merchant, &lines, |name| {
                ServiceError::ProductNoLongerAvailable(name)
            })
            .await?;

        // Fresh snapshot: price/name/sku as of right now.
        let mut snapshots = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        for line in &lines {
            let product = &products[&line.product_id];
            let line_total = (product.price * Decimal::from(line.quantity)).round_dp(2);
            subtotal += line_total;
            snapshots.push((product.clone(), line.quantity, line_total));
        }
        let subtotal = subtotal.round_dp(2);

        if subtotal < merchant.minimum_order {
            return Err(ServiceError::MinimumOrderNotMet(format!(
                "order subtotal {} is below the merchant minimum of {}",
                subtotal, merchant.minimum_order
            )));
        }

        let delivery_fee = match method {
            DeliveryMethod::Pickup => Decimal::ZERO,
            DeliveryMethod::Delivery => {
                let address: DeliveryAddress = session
                    .delivery_address
                    .clone()
                    .map(serde_json::from_value)
                    .transpose()?
                    .ok_or_else(|| {
                        ServiceError::InvalidAddress(
                            "a delivery address is required for delivery orders".to_string(),
                        )
                    })?;
                let postal = PostalCode::parse(&address.postal_code)?;
                let profile = DeliveryProfile::from_merchant(&merchant);
                match self
                    .delivery
                    .quote_for_profile(&profile, &postal, Some(subtotal))
                    .await?
                {
                    DeliveryQuote::Quote { fee, .. } => fee,
                    DeliveryQuote::NotDeliverable { reason } => {
                        return Err(ServiceError::InvalidAddress(reason))
                    }
                }
            }
        };

        let total = (subtotal + delivery_fee).round_dp(2);
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number(order_id, now);
        let customer_id = input.customer_id.or(session.customer_id);

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            merchant_id: Set(merchant.id),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending),
            delivery_method: Set(method),
            subtotal: Set(subtotal),
            delivery_fee: Set(delivery_fee),
            total: Set(total),
            currency: Set(self.config.currency.clone()),
            contact_name: Set(input.contact.name.clone()),
            contact_email: Set(input.contact.email.clone()),
            contact_phone: Set(input.contact.phone.clone()),
            delivery_address: Set(session.delivery_address.clone()),
            notes: Set(input.notes.clone()),
            placed_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        };
        order_model.insert(&txn).await?;

        for (product, quantity, line_total) in &snapshots {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                product_sku: Set(product.sku.clone()),
                product_price: Set(product.price),
                quantity: Set(*quantity),
                line_total: Set(*line_total),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        let payment_model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(total),
            method: Set(PaymentMethod::Paynow),
            status: Set(PaymentStatus::Pending),
            confirmed_at: Set(None),
            confirmed_by: Set(None),
            rejected_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        payment_model.insert(&txn).await?;

        let created_event = order_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            actor: Set(customer_id
                .map(|id| format!("customer:{id}"))
                .unwrap_or_else(|| "guest".to_string())),
            from_status: Set(None),
            to_status: Set(OrderStatus::Pending),
            data: Set(Some(serde_json::json!({ "order_number": order_number }))),
            created_at: Set(now),
        };
        created_event.insert(&txn).await?;

        // Consume the session; later references must see it as gone.
        let mut session_update: checkout_session::ActiveModel = session.into();
        session_update.status = Set(SessionStatus::Completed);
        session_update.order_id = Set(Some(order_id));
        session_update.contact = Set(Some(serde_json::to_value(&input.contact)?));
        session_update.updated_at = Set(now);
        session_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        info!(%order_id, %order_number, "order placed");
        Ok(CompletedOrder {
            order_id,
            order_number,
        })
    }

    /// Load a session that is still open and unexpired. Consumed sessions
    /// are reported as not found; expired ones are marked expired as a
    /// side effect.
    async fn load_open_session(
        &self,
        session_id: Uuid,
    ) -> Result<checkout_session::Model, ServiceError> {
        let session = CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::SessionNotFound(format!("session {session_id} not found"))
            })?;

        match session.status {
            SessionStatus::Open => {}
            SessionStatus::Completed | SessionStatus::Expired => {
                return Err(ServiceError::SessionNotFound(format!(
                    "session {session_id} has already been used"
                )))
            }
        }

        if session.is_expired(Utc::now()) {
            let mut active: checkout_session::ActiveModel = session.into();
            active.status = Set(SessionStatus::Expired);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
            return Err(ServiceError::SessionExpired(format!(
                "session {session_id} expired"
            )));
        }

        Ok(session)
    }

    async fn load_accepting_merchant(
        &self,
        merchant_id: Uuid,
    ) -> Result<merchant::Model, ServiceError> {
        let merchant = Merchant::find_active_by_id(merchant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidMerchant(format!("merchant {merchant_id} not found"))
            })?;

        if !merchant.is_accepting_orders() {
            return Err(ServiceError::InvalidMerchant(format!(
                "{} is not currently accepting orders",
                merchant.business_name
            )));
        }

        Ok(merchant)
    }

    /// Fetch every referenced product and require each to belong to the
    /// merchant and be orderable. The failing product is named in the
    /// error built by `unavailable`; lines are never silently dropped.
    async fn load_orderable_products(
        &self,
        merchant: &merchant::Model,
        lines: &[SessionLine],
        unavailable: impl Fn(String) -> ServiceError,
    ) -> Result<HashMap<Uuid, crate::entities::product::Model>, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let found = Product::find_active_for_merchant(merchant.id)
            .filter(crate::entities::product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?;

        let by_id: HashMap<Uuid, _> = found.into_iter().map(|p| (p.id, p)).collect();

        for line in lines {
            match by_id.get(&line.product_id) {
                Some(product) if product.is_orderable() => {}
                Some(product) => {
                    return Err(unavailable(format!(
                        "{} is not currently available",
                        product.name
                    )))
                }
                None => {
                    return Err(unavailable(format!(
                        "product {} is not available from {}",
                        line.product_id, merchant.business_name
                    )))
                }
            }
        }

        Ok(by_id)
    }
}

/// Collapse duplicate product references and reject non-positive
/// quantities and empty item lists.
fn merge_lines(items: Vec<SessionLine>) -> Result<Vec<SessionLine>, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "checkout requires at least one item".to_string(),
        ));
    }

    let mut merged: Vec<SessionLine> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }
        match merged.iter_mut().find(|l| l.product_id == item.product_id) {
            Some(existing) => existing.quantity += item.quantity,
            None => merged.push(item),
        }
    }
    Ok(merged)
}

/// `KC-YYYYMMDD-XXXXXX`: date for humans, id fragment for uniqueness.
fn generate_order_number(order_id: Uuid, placed_at: DateTime<Utc>) -> String {
    let fragment: String = order_id
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase();
    format!("KC-{}-{}", placed_at.format("%Y%m%d"), fragment)
}
