//! Notification fan-out.
//!
//! Every notification is a variant of [`NotificationEvent`] with its own
//! typed payload — there is no free-form template bag. The single entry
//! point is [`Notifier::notify`]; adding a new kind means adding a variant
//! and a render arm, nothing stringly-typed.
//!
//! Dispatch is fire-and-forget: failures are logged and never surface to
//! the operation whose transition triggered them.

use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::{
    merchant,
    order::{self, OrderStatus},
    Merchant, Order,
};
use crate::events::Event;
use crate::providers::{EmailSender, WhatsAppSender};

/// Condensed order facts shared by every notification kind.
#[derive(Clone, Debug)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub order_number: String,
    pub merchant_name: String,
    pub total: Decimal,
    pub currency: String,
}

impl OrderSummary {
    fn from_order(order: &order::Model, merchant_name: &str) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            merchant_name: merchant_name.to_string(),
            total: order.total,
            currency: order.currency.clone(),
        }
    }
}

/// Merchant-side recipient with channel opt-in flags.
#[derive(Clone, Debug)]
pub struct MerchantRecipient {
    pub email: String,
    pub phone: Option<String>,
    pub email_enabled: bool,
    pub whatsapp_enabled: bool,
}

impl MerchantRecipient {
    fn from_merchant(m: &merchant::Model) -> Self {
        Self {
            email: m
                .order_notification_email
                .clone()
                .unwrap_or_else(|| m.contact_email.clone()),
            phone: m.order_notification_phone.clone().or_else(|| m.contact_phone.clone()),
            email_enabled: m.email_notifications,
            whatsapp_enabled: m.whatsapp_notifications,
        }
    }
}

/// Customer-side recipient, taken from the order's contact snapshot.
/// Email is always present; WhatsApp rides on the phone number.
#[derive(Clone, Debug)]
pub struct CustomerRecipient {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl CustomerRecipient {
    fn from_order(order: &order::Model) -> Self {
        Self {
            name: order.contact_name.clone(),
            email: order.contact_email.clone(),
            phone: (!order.contact_phone.is_empty()).then(|| order.contact_phone.clone()),
        }
    }
}

/// The tagged union of everything this system can tell somebody.
#[derive(Clone, Debug)]
pub enum NotificationEvent {
    OrderPlaced {
        order: OrderSummary,
        merchant: MerchantRecipient,
    },
    PaymentProofSubmitted {
        order: OrderSummary,
        merchant: MerchantRecipient,
    },
    PaymentConfirmed {
        order: OrderSummary,
        customer: CustomerRecipient,
    },
    PaymentRejected {
        order: OrderSummary,
        customer: CustomerRecipient,
        reason: String,
    },
    OrderProgress {
        order: OrderSummary,
        customer: CustomerRecipient,
        new_status: OrderStatus,
    },
}

pub struct Notifier {
    db: Arc<DatabaseConnection>,
    email: Arc<dyn EmailSender>,
    whatsapp: Arc<dyn WhatsAppSender>,
}

impl Notifier {
    pub fn new(
        db: Arc<DatabaseConnection>,
        email: Arc<dyn EmailSender>,
        whatsapp: Arc<dyn WhatsAppSender>,
    ) -> Self {
        Self {
            db,
            email,
            whatsapp,
        }
    }

    /// Translate a domain event into notifications. Load failures are
    /// logged and swallowed; this path must never influence order state.
    pub async fn handle(&self, event: &Event) {
        let result = match event {
            Event::CheckoutSessionCreated { session_id, .. } => {
                debug!(%session_id, "checkout session created; no notification");
                Ok(())
            }
            Event::OrderCreated(order_id) => self.on_order_created(*order_id).await,
            Event::PaymentProofUploaded { order_id, .. } => {
                self.on_proof_uploaded(*order_id).await
            }
            Event::PaymentConfirmed { order_id } => self.on_payment_confirmed(*order_id).await,
            Event::PaymentRejected { order_id, reason } => {
                self.on_payment_rejected(*order_id, reason).await
            }
            Event::OrderStatusChanged {
                order_id,
                new_status,
                ..
            } => self.on_status_changed(*order_id, *new_status).await,
        };

        if let Err(err) = result {
            warn!(?event, %err, "notification fan-out skipped");
        }
    }

    /// Single dispatch entry point for a typed notification.
    pub async fn notify(&self, event: NotificationEvent) {
        match &event {
            NotificationEvent::OrderPlaced { order, merchant } => {
                let subject = format!("New order {}", order.order_number);
                let body = format!(
                    "You have a new order {} totalling {} {}. Confirm the PayNow transfer once it arrives.",
                    order.order_number, order.currency, order.total
                );
                self.dispatch_merchant(merchant, &subject, &body).await;
            }
            NotificationEvent::PaymentProofSubmitted { order, merchant } => {
                let subject = format!("Payment proof for {}", order.order_number);
                let body = format!(
                    "The customer uploaded a transfer proof for order {}. Verify it against your bank app.",
                    order.order_number
                );
                self.dispatch_merchant(merchant, &subject, &body).await;
            }
            NotificationEvent::PaymentConfirmed { order, customer } => {
                let subject = format!("Order {} confirmed", order.order_number);
                let body = format!(
                    "Hi {}, {} has confirmed your payment of {} {}. Your food is on the way to being prepared!",
                    customer.name, order.merchant_name, order.currency, order.total
                );
                self.dispatch_customer(customer, &subject, &body).await;
            }
            NotificationEvent::PaymentRejected {
                order,
                customer,
                reason,
            } => {
                let subject = format!("Order {} cancelled", order.order_number);
                let body = format!(
                    "Hi {}, {} could not verify your payment for order {} ({reason}). The order has been cancelled.",
                    customer.name, order.merchant_name, order.order_number
                );
                self.dispatch_customer(customer, &subject, &body).await;
            }
            NotificationEvent::OrderProgress {
                order,
                customer,
                new_status,
            } => {
                let Some(line) = progress_line(*new_status) else {
                    return;
                };
                let subject = format!("Order {} update", order.order_number);
                let body = format!("Hi {}, {line}", customer.name);
                self.dispatch_customer(customer, &subject, &body).await;
            }
        }
    }

    async fn on_order_created(&self, order_id: Uuid) -> Result<(), String> {
        let (order, merchant) = self.load_order_and_merchant(order_id).await?;
        self.notify(NotificationEvent::OrderPlaced {
            order: OrderSummary::from_order(&order, &merchant.business_name),
            merchant: MerchantRecipient::from_merchant(&merchant),
        })
        .await;
        Ok(())
    }

    async fn on_proof_uploaded(&self, order_id: Uuid) -> Result<(), String> {
        let (order, merchant) = self.load_order_and_merchant(order_id).await?;
        self.notify(NotificationEvent::PaymentProofSubmitted {
            order: OrderSummary::from_order(&order, &merchant.business_name),
            merchant: MerchantRecipient::from_merchant(&merchant),
        })
        .await;
        Ok(())
    }

    async fn on_payment_confirmed(&self, order_id: Uuid) -> Result<(), String> {
        let (order, merchant) = self.load_order_and_merchant(order_id).await?;
        self.notify(NotificationEvent::PaymentConfirmed {
            order: OrderSummary::from_order(&order, &merchant.business_name),
            customer: CustomerRecipient::from_order(&order),
        })
        .await;
        Ok(())
    }

    async fn on_payment_rejected(&self, order_id: Uuid, reason: &str) -> Result<(), String> {
        let (order, merchant) = self.load_order_and_merchant(order_id).await?;
        self.notify(NotificationEvent::PaymentRejected {
            order: OrderSummary::from_order(&order, &merchant.business_name),
            customer: CustomerRecipient::from_order(&order),
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    async fn on_status_changed(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<(), String> {
        let (order, merchant) = self.load_order_and_merchant(order_id).await?;

        // Proof submission notifies the merchant; everything after
        // confirmation is customer-facing progress.
        if new_status == OrderStatus::PaymentSubmitted {
            self.notify(NotificationEvent::PaymentProofSubmitted {
                order: OrderSummary::from_order(&order, &merchant.business_name),
                merchant: MerchantRecipient::from_merchant(&merchant),
            })
            .await;
        } else {
            self.notify(NotificationEvent::OrderProgress {
                order: OrderSummary::from_order(&order, &merchant.business_name),
                customer: CustomerRecipient::from_order(&order),
                new_status,
            })
            .await;
        }
        Ok(())
    }

    async fn load_order_and_merchant(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, merchant::Model), String> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("order {order_id} not found"))?;

        let merchant = Merchant::find_any_by_id(order.merchant_id)
            .one(&*self.db)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("merchant {} not found", order.merchant_id))?;

        Ok((order, merchant))
    }

    async fn dispatch_merchant(&self, recipient: &MerchantRecipient, subject: &str, body: &str) {
        if recipient.email_enabled {
            let receipt = self.email.send(&recipient.email, subject, body).await;
            if !receipt.success {
                warn!(
                    to = %recipient.email,
                    error = receipt.error.as_deref().unwrap_or("unknown"),
                    "merchant email notification failed"
                );
            }
        }
        if recipient.whatsapp_enabled {
            if let Some(phone) = &recipient.phone {
                let receipt = self.whatsapp.send(phone, subject, body).await;
                if !receipt.success {
                    warn!(
                        to = %phone,
                        error = receipt.error.as_deref().unwrap_or("unknown"),
                        "merchant whatsapp notification failed"
                    );
                }
            } else {
                warn!("merchant enabled whatsapp notifications without a phone number");
            }
        }
    }

    async fn dispatch_customer(&self, recipient: &CustomerRecipient, subject: &str, body: &str) {
        let receipt = self.email.send(&recipient.email, subject, body).await;
        if !receipt.success {
            warn!(
                to = %recipient.email,
                error = receipt.error.as_deref().unwrap_or("unknown"),
                "customer email notification failed"
            );
        }
        if let Some(phone) = &recipient.phone {
            let receipt = self.whatsapp.send(phone, subject, body).await;
            if !receipt.success {
                warn!(
                    to = %phone,
                    error = receipt.error.as_deref().unwrap_or("unknown"),
                    "customer whatsapp notification failed"
                );
            }
        }
    }
}

/// Customer-facing line per progress state; None means the state has no
/// customer notification.
fn progress_line(status: OrderStatus) -> Option<String> {
    match status {
        OrderStatus::Preparing => Some("your order is being prepared.".to_string()),
        OrderStatus::Ready => Some("your order is ready.".to_string()),
        OrderStatus::OutForDelivery => Some("your order is out for delivery.".to_string()),
        OrderStatus::ReadyForPickup => Some("your order is ready for pickup.".to_string()),
        OrderStatus::Completed => Some("your order is completed. Enjoy!".to_string()),
        OrderStatus::Cancelled => Some("your order has been cancelled.".to_string()),
        OrderStatus::Pending | OrderStatus::PaymentSubmitted | OrderStatus::Confirmed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DeliveryReceipt;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailSender for RecordingEmail {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> DeliveryReceipt {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            if self.fail {
                DeliveryReceipt::failed("smtp down")
            } else {
                DeliveryReceipt::accepted("msg-1")
            }
        }
    }

    #[derive(Default)]
    struct RecordingWhatsApp {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WhatsAppSender for RecordingWhatsApp {
        async fn send(&self, to_phone: &str, _title: &str, _message: &str) -> DeliveryReceipt {
            self.sent.lock().unwrap().push(to_phone.to_string());
            DeliveryReceipt::accepted("wa-1")
        }
    }

    fn summary() -> OrderSummary {
        OrderSummary {
            order_id: Uuid::new_v4(),
            order_number: "KC-20250301-ABC123".to_string(),
            merchant_name: "Ah Hock Kitchen".to_string(),
            total: dec!(22.00),
            currency: "SGD".to_string(),
        }
    }

    fn notifier_with(
        email: Arc<RecordingEmail>,
        whatsapp: Arc<RecordingWhatsApp>,
    ) -> Notifier {
        Notifier::new(Arc::new(DatabaseConnection::default()), email, whatsapp)
    }

    #[tokio::test]
    async fn merchant_channel_flags_are_honoured() {
        let email = Arc::new(RecordingEmail::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let notifier = notifier_with(email.clone(), whatsapp.clone());

        notifier
            .notify(NotificationEvent::OrderPlaced {
                order: summary(),
                merchant: MerchantRecipient {
                    email: "orders@ahhock.sg".to_string(),
                    phone: Some("+6591234567".to_string()),
                    email_enabled: true,
                    whatsapp_enabled: false,
                },
            })
            .await;

        assert_eq!(email.sent.lock().unwrap().len(), 1);
        assert!(whatsapp.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn whatsapp_only_merchant_gets_no_email() {
        let email = Arc::new(RecordingEmail::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let notifier = notifier_with(email.clone(), whatsapp.clone());

        notifier
            .notify(NotificationEvent::PaymentProofSubmitted {
                order: summary(),
                merchant: MerchantRecipient {
                    email: "orders@ahhock.sg".to_string(),
                    phone: Some("+6591234567".to_string()),
                    email_enabled: false,
                    whatsapp_enabled: true,
                },
            })
            .await;

        assert!(email.sent.lock().unwrap().is_empty());
        assert_eq!(whatsapp.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn customer_without_phone_gets_email_only() {
        let email = Arc::new(RecordingEmail::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let notifier = notifier_with(email.clone(), whatsapp.clone());

        notifier
            .notify(NotificationEvent::PaymentConfirmed {
                order: summary(),
                customer: CustomerRecipient {
                    name: "Mei".to_string(),
                    email: "mei@example.com".to_string(),
                    phone: None,
                },
            })
            .await;

        assert_eq!(email.sent.lock().unwrap().len(), 1);
        assert!(whatsapp.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_does_not_propagate() {
        let email = Arc::new(RecordingEmail {
            fail: true,
            ..Default::default()
        });
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let notifier = notifier_with(email.clone(), whatsapp);

        // Must complete without panicking or returning an error
        notifier
            .notify(NotificationEvent::PaymentRejected {
                order: summary(),
                customer: CustomerRecipient {
                    name: "Mei".to_string(),
                    email: "mei@example.com".to_string(),
                    phone: None,
                },
                reason: "amount mismatch".to_string(),
            })
            .await;

        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn intermediate_states_have_no_customer_line() {
        assert!(progress_line(OrderStatus::Pending).is_none());
        assert!(progress_line(OrderStatus::Confirmed).is_none());
        assert!(progress_line(OrderStatus::OutForDelivery).is_some());
    }
}
