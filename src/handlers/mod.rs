pub mod checkout;
pub mod common;
pub mod merchants;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::providers::{Geocoder, ProofStorage};
use crate::services::checkout::CheckoutService;
use crate::services::delivery::DeliveryService;
use crate::services::merchants::MerchantService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub delivery: Arc<DeliveryService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub merchants: Arc<MerchantService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        geocoder: Arc<dyn Geocoder>,
        proof_storage: Arc<dyn ProofStorage>,
    ) -> Self {
        let delivery = Arc::new(DeliveryService::new(db.clone(), geocoder));
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            delivery.clone(),
            config.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            event_sender,
            proof_storage,
            orders.clone(),
            config,
        ));
        let merchants = Arc::new(MerchantService::new(db));

        Self {
            checkout,
            delivery,
            orders,
            payments,
            merchants,
        }
    }
}
