use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::services::notifications::Notifier;

/// Domain events emitted by the services after their transaction commits.
/// Consumers must tolerate events for rows they cannot load (the emitting
/// transaction is already durable, but consumers run at-most-once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutSessionCreated {
        session_id: Uuid,
        merchant_id: Uuid,
    },
    OrderCreated(Uuid),
    PaymentProofUploaded {
        order_id: Uuid,
        proof_id: Uuid,
    },
    PaymentConfirmed {
        order_id: Uuid,
    },
    PaymentRejected {
        order_id: Uuid,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {e}"))
    }

    /// Sends an event, logging channel failure instead of returning it.
    /// Event delivery is fire-and-forget relative to the operation that
    /// emitted it; a full or closed channel never fails the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event.clone()).await {
            warn!(?event, %err, "dropping event");
        }
    }
}

/// Drains the event channel, fanning each event out to notifications.
/// Spawned once at startup; ends when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<Notifier>) {
    info!("event processing loop started");

    while let Some(event) = rx.recv().await {
        // Notification failures are logged inside the notifier and never
        // propagate; a lost notification must not affect order state.
        notifier.handle(&event).await;
    }

    warn!("event processing loop ended");
}
