//! Payment proof workflow tests: upload gates, idempotent confirmation,
//! rejection, and the notification fan-out that follows.

mod common;

use assert_matches::assert_matches;
use axum::http::Method;
use base64::Engine;
use bytes::Bytes;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use kitchencloud_api::entities::{
    order::{DeliveryMethod, OrderStatus},
    payment::PaymentStatus,
    payment_proof, PaymentProof,
};
use kitchencloud_api::errors::ServiceError;
use kitchencloud_api::services::checkout::{
    CompleteCheckoutInput, ContactInfo, CreateSessionInput, SessionLine,
};
use kitchencloud_api::services::orders::Actor;
use kitchencloud_api::services::payments::ProofUpload;

const CUSTOMER_EMAIL: &str = "mei@example.com";

fn jpeg_upload(size: usize) -> ProofUpload {
    ProofUpload {
        file_name: "transfer.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: Bytes::from(vec![0xFFu8; size]),
        transaction_reference: Some("PAYNOW-2025-0301".to_string()),
    }
}

/// Place a pickup order and return (order_id, order_number, merchant_id).
async fn place_order(app: &TestApp) -> (Uuid, String, Uuid) {
    let merchant = app.seed_merchant().await;
    let product = app
        .seed_product(merchant.id, "Chicken Rice", "CR-01", dec!(8.50))
        .await;

    let session = app
        .state
        .services
        .checkout
        .create_session(CreateSessionInput {
            merchant_id: merchant.id,
            customer_id: None,
            items: vec![SessionLine {
                product_id: product.id,
                quantity: 2,
            }],
        })
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .update_delivery(session.id, DeliveryMethod::Pickup, None)
        .await
        .unwrap();
    let completed = app
        .state
        .services
        .checkout
        .complete(
            session.id,
            CompleteCheckoutInput {
                contact: ContactInfo {
                    name: "Mei Lin".to_string(),
                    email: CUSTOMER_EMAIL.to_string(),
                    phone: "+6598765432".to_string(),
                },
                customer_id: None,
                notes: None,
            },
        )
        .await
        .unwrap();

    (completed.order_id, completed.order_number, merchant.id)
}

async fn payment_status(app: &TestApp, order_id: Uuid) -> PaymentStatus {
    app.state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .payment
        .unwrap()
        .status
}

// ==================== Scenario C: upload gates ====================

#[tokio::test]
async fn oversized_upload_is_rejected_and_payment_stays_pending() {
    let app = TestApp::new().await;
    let (order_id, order_number, _) = place_order(&app).await;

    // 12 MB JPEG, above the 10 MiB ceiling
    let result = app
        .state
        .services
        .payments
        .upload_proof(&order_number, jpeg_upload(12 * 1024 * 1024))
        .await;
    assert_matches!(result, Err(ServiceError::FileTooLarge(_)));

    assert_eq!(payment_status(&app, order_id).await, PaymentStatus::Pending);
    let proofs = PaymentProof::find()
        .filter(payment_proof::Column::OrderId.eq(order_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(proofs, 0);
}

#[tokio::test]
async fn unsupported_file_type_is_rejected() {
    let app = TestApp::new().await;
    let (order_id, order_number, _) = place_order(&app).await;

    let result = app
        .state
        .services
        .payments
        .upload_proof(
            &order_number,
            ProofUpload {
                file_name: "transfer.gif".to_string(),
                content_type: "image/gif".to_string(),
                bytes: Bytes::from_static(b"GIF89a"),
                transaction_reference: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::UnsupportedFileType(_)));
    assert_eq!(payment_status(&app, order_id).await, PaymentStatus::Pending);
}

// ==================== Upload semantics ====================

#[tokio::test]
async fn first_upload_moves_order_to_payment_submitted() {
    let app = TestApp::new().await;
    let (order_id, order_number, _) = place_order(&app).await;

    let proof = app
        .state
        .services
        .payments
        .upload_proof(&order_number, jpeg_upload(64 * 1024))
        .await
        .unwrap();
    assert_eq!(proof.order_id, order_id);
    assert_eq!(proof.content_type, "image/jpeg");
    assert_eq!(
        proof.transaction_reference.as_deref(),
        Some("PAYNOW-2025-0301")
    );

    let detail = app.state.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::PaymentSubmitted);
    // Upload alone never completes the payment
    assert_eq!(detail.payment.unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn retried_uploads_accumulate_without_status_changes() {
    let app = TestApp::new().await;
    let (order_id, order_number, _) = place_order(&app).await;

    app.state
        .services
        .payments
        .upload_proof(&order_number, jpeg_upload(1024))
        .await
        .unwrap();
    app.state
        .services
        .payments
        .upload_proof(&order_number, jpeg_upload(2048))
        .await
        .unwrap();

    let proofs = PaymentProof::find()
        .filter(payment_proof::Column::OrderId.eq(order_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(proofs, 2);

    let detail = app.state.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::PaymentSubmitted);
    assert_eq!(detail.payment.unwrap().status, PaymentStatus::Pending);
}

// ==================== Scenario D: confirmation ====================

#[tokio::test]
async fn confirmation_completes_payment_and_notifies_customer() {
    let app = TestApp::new().await;
    let (order_id, order_number, merchant_id) = place_order(&app).await;

    let payment = app
        .state
        .services
        .payments
        .confirm_payment(order_id, &Actor::Merchant(merchant_id))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.confirmed_at.is_some());
    assert_eq!(payment.confirmed_by, Some(merchant_id));

    let detail = app.state.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Confirmed);

    // A notification request is recorded for the customer
    app.settle().await;
    let to_customer = app.email.to_address(CUSTOMER_EMAIL);
    assert_eq!(to_customer.len(), 1);
    assert!(to_customer[0].subject.contains(&order_number));
}

#[tokio::test]
async fn confirmation_is_idempotent_and_does_not_double_notify() {
    let app = TestApp::new().await;
    let (order_id, _, merchant_id) = place_order(&app).await;
    let actor = Actor::Merchant(merchant_id);

    app.state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await
        .unwrap();

    let second = app
        .state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await;
    assert_matches!(second, Err(ServiceError::AlreadyConfirmed(_)));

    // Payment remains COMPLETED after the duplicate attempt
    assert_eq!(
        payment_status(&app, order_id).await,
        PaymentStatus::Completed
    );

    app.settle().await;
    let to_customer = app.email.to_address(CUSTOMER_EMAIL);
    assert_eq!(to_customer.len(), 1, "duplicate confirm must not re-notify");
}

#[tokio::test]
async fn rejection_fails_payment_and_cancels_order() {
    let app = TestApp::new().await;
    let (order_id, _, merchant_id) = place_order(&app).await;

    let payment = app
        .state
        .services
        .payments
        .reject_payment(order_id, "transfer never arrived", &Actor::Merchant(merchant_id))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(
        payment.rejected_reason.as_deref(),
        Some("transfer never arrived")
    );

    let detail = app.state.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Cancelled);

    // The audit trail keeps the reason
    let events = app.state.services.orders.list_events(order_id).await.unwrap();
    let cancel_event = events
        .iter()
        .find(|e| e.to_status == OrderStatus::Cancelled)
        .expect("cancellation audited");
    assert_eq!(
        cancel_event.data.as_ref().unwrap()["reason"],
        "transfer never arrived"
    );
}

#[tokio::test]
async fn upload_after_confirmation_is_rejected() {
    let app = TestApp::new().await;
    let (order_id, order_number, merchant_id) = place_order(&app).await;

    app.state
        .services
        .payments
        .confirm_payment(order_id, &Actor::Merchant(merchant_id))
        .await
        .unwrap();

    let result = app
        .state
        .services
        .payments
        .upload_proof(&order_number, jpeg_upload(1024))
        .await;
    assert_matches!(result, Err(ServiceError::AlreadyConfirmed(_)));
}

// ==================== HTTP surface ====================

#[tokio::test]
async fn http_upload_and_merchant_confirmation() {
    let app = TestApp::new().await;
    let (order_id, order_number, merchant_id) = place_order(&app).await;

    let content = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake image bytes");
    let upload = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/proofs/{order_number}"),
            Some(json!({
                "file_name": "transfer.png",
                "content_type": "image/png",
                "content_base64": content,
            })),
            &[],
        )
        .await;
    assert_eq!(upload.status(), 201);

    // A stranger merchant cannot confirm
    let stranger = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{order_id}/confirm"),
            None,
            &TestApp::merchant_headers(Uuid::new_v4()),
        )
        .await;
    assert_eq!(stranger.status(), 403);

    let confirm = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{order_id}/confirm"),
            None,
            &TestApp::merchant_headers(merchant_id),
        )
        .await;
    assert_eq!(confirm.status(), 200);
    let body = response_json(confirm).await;
    assert_eq!(body["data"]["status"], "completed");

    // Second confirmation conflicts
    let again = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{order_id}/confirm"),
            None,
            &TestApp::merchant_headers(merchant_id),
        )
        .await;
    assert_eq!(again.status(), 409);
    let body = response_json(again).await;
    assert_eq!(body["kind"], "already_confirmed");
}
