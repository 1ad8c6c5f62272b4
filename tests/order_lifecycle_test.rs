//! Order lifecycle tests: the fulfilment state machine, audit trail,
//! unpaid-order sweep, and the merchant approval workflow.

mod common;

use assert_matches::assert_matches;
use axum::http::Method;
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use uuid::Uuid;

use kitchencloud_api::entities::{
    merchant::MerchantStatus,
    order::{self, DeliveryMethod, OrderStatus},
    Order,
};
use kitchencloud_api::errors::ServiceError;
use kitchencloud_api::services::checkout::{
    CompleteCheckoutInput, ContactInfo, CreateSessionInput, DeliveryAddress, SessionLine,
};
use kitchencloud_api::services::merchants::OnboardMerchantInput;
use kitchencloud_api::services::orders::Actor;

fn contact() -> ContactInfo {
    ContactInfo {
        name: "Mei Lin".to_string(),
        email: "mei@example.com".to_string(),
        phone: "+6598765432".to_string(),
    }
}

async fn place_order(app: &TestApp, method: DeliveryMethod) -> (Uuid, Uuid) {
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
                quantity: 1,
            }],
        })
        .await
        .unwrap();

    let address = (method == DeliveryMethod::Delivery).then(|| DeliveryAddress {
        line1: "Blk 201 Tampines St 21".to_string(),
        line2: None,
        postal_code: "520123".to_string(),
        city: "Singapore".to_string(),
        country: "SG".to_string(),
        notes: None,
    });
    app.state
        .services
        .checkout
        .update_delivery(session.id, method, address)
        .await
        .unwrap();

    let completed = app
        .state
        .services
        .checkout
        .complete(
            session.id,
            CompleteCheckoutInput {
                contact: contact(),
                customer_id: None,
                notes: None,
            },
        )
        .await
        .unwrap();

    (completed.order_id, merchant.id)
}

// ==================== Full workflow walks ====================

#[tokio::test]
async fn delivery_order_walks_the_full_workflow() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Delivery).await;
    let actor = Actor::Merchant(merchant_id);

    app.state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await
        .unwrap();

    for status in [
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OutForDelivery,
        OrderStatus::Completed,
    ] {
        let order = app
            .state
            .services
            .orders
            .transition(order_id, status, &actor, None)
            .await
            .unwrap();
        assert_eq!(order.status, status);
    }

    // The audit trail reconstructs the whole journey in order
    let events = app.state.services.orders.list_events(order_id).await.unwrap();
    let trail: Vec<(Option<OrderStatus>, OrderStatus)> = events
        .iter()
        .map(|e| (e.from_status, e.to_status))
        .collect();
    assert_eq!(
        trail,
        vec![
            (None, OrderStatus::Pending),
            (Some(OrderStatus::Pending), OrderStatus::Confirmed),
            (Some(OrderStatus::Confirmed), OrderStatus::Preparing),
            (Some(OrderStatus::Preparing), OrderStatus::Ready),
            (Some(OrderStatus::Ready), OrderStatus::OutForDelivery),
            (Some(OrderStatus::OutForDelivery), OrderStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn pickup_order_takes_the_pickup_branch() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Pickup).await;
    let actor = Actor::Merchant(merchant_id);

    app.state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await
        .unwrap();
    app.state
        .services
        .orders
        .transition(order_id, OrderStatus::Preparing, &actor, None)
        .await
        .unwrap();
    app.state
        .services
        .orders
        .transition(order_id, OrderStatus::Ready, &actor, None)
        .await
        .unwrap();

    // The delivery branch is closed to pickup orders
    let wrong_branch = app
        .state
        .services
        .orders
        .transition(order_id, OrderStatus::OutForDelivery, &actor, None)
        .await;
    assert_matches!(wrong_branch, Err(ServiceError::InvalidTransition(_)));

    app.state
        .services
        .orders
        .transition(order_id, OrderStatus::ReadyForPickup, &actor, None)
        .await
        .unwrap();
    let order = app
        .state
        .services
        .orders
        .transition(order_id, OrderStatus::Completed, &actor, None)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}

// ==================== Transition guards ====================

#[tokio::test]
async fn preparation_cannot_start_before_confirmation() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Pickup).await;

    let result = app
        .state
        .services
        .orders
        .transition(
            order_id,
            OrderStatus::Preparing,
            &Actor::Merchant(merchant_id),
            None,
        )
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn completed_orders_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Pickup).await;
    let actor = Actor::Merchant(merchant_id);

    app.state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await
        .unwrap();
    for status in [
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::ReadyForPickup,
        OrderStatus::Completed,
    ] {
        app.state
            .services
            .orders
            .transition(order_id, status, &actor, None)
            .await
            .unwrap();
    }

    let result = app
        .state
        .services
        .orders
        .cancel(order_id, &actor, "changed my mind")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn pre_completed_orders_can_cancel_with_reason() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Pickup).await;

    let order = app
        .state
        .services
        .orders
        .cancel(order_id, &Actor::Merchant(merchant_id), "out of stock")
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let events = app.state.services.orders.list_events(order_id).await.unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.to_status, OrderStatus::Cancelled);
    assert_eq!(last.data.as_ref().unwrap()["reason"], "out of stock");
    assert_eq!(last.actor, format!("merchant:{merchant_id}"));
}

// ==================== Unpaid-order sweep ====================

#[tokio::test]
async fn sweep_cancels_only_stale_pending_orders() {
    let app = TestApp::new().await;
    let (stale_id, _) = place_order(&app, DeliveryMethod::Pickup).await;
    let (fresh_id, _) = place_order(&app, DeliveryMethod::Pickup).await;
    let (submitted_id, _) = place_order(&app, DeliveryMethod::Pickup).await;

    // Backdate the stale and proof-submitted orders past the timeout
    for id in [stale_id, submitted_id] {
        let row = Order::find_by_id(id)
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap();
        let mut edit: order::ActiveModel = row.into();
        edit.placed_at = Set(Utc::now() - Duration::hours(2));
        edit.update(&*app.state.db).await.unwrap();
    }

    // The submitted order has a proof on file, so it is not "unpaid idle"
    let submitted_number = Order::find_by_id(submitted_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .order_number;
    app.state
        .services
        .payments
        .upload_proof(
            &submitted_number,
            kitchencloud_api::services::payments::ProofUpload {
                file_name: "transfer.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                bytes: bytes::Bytes::from_static(&[0xFF; 16]),
                transaction_reference: None,
            },
        )
        .await
        .unwrap();

    let cancelled = app
        .state
        .services
        .orders
        .cancel_stale_unpaid(Duration::minutes(60))
        .await
        .unwrap();

    assert_eq!(cancelled, vec![stale_id]);

    let stale = app.state.services.orders.get_order(stale_id).await.unwrap();
    assert_eq!(stale.order.status, OrderStatus::Cancelled);
    let fresh = app.state.services.orders.get_order(fresh_id).await.unwrap();
    assert_eq!(fresh.order.status, OrderStatus::Pending);
    let submitted = app
        .state
        .services
        .orders
        .get_order(submitted_id)
        .await
        .unwrap();
    assert_eq!(submitted.order.status, OrderStatus::PaymentSubmitted);
}

// ==================== Merchant approval workflow ====================

#[tokio::test]
async fn merchants_accept_orders_only_after_approval() {
    let app = TestApp::new().await;

    let merchant = app
        .state
        .services
        .merchants
        .onboard(OnboardMerchantInput {
            business_name: "Siti Home Kitchen".to_string(),
            contact_email: "siti@example.com".to_string(),
            contact_phone: None,
            address_line1: "Blk 12 Bedok North".to_string(),
            postal_code: "460012".to_string(),
            delivery_enabled: false,
            pickup_enabled: true,
            delivery_fee: None,
            minimum_order: None,
            preparation_minutes: None,
        })
        .await
        .unwrap();
    assert_eq!(merchant.status, MerchantStatus::PendingApproval);

    let product = app
        .seed_product(merchant.id, "Rendang", "RD-01", dec!(9.00))
        .await;

    let before = app
        .state
        .services
        .checkout
        .create_session(CreateSessionInput {
            merchant_id: merchant.id,
            customer_id: None,
            items: vec![SessionLine {
                product_id: product.id,
                quantity: 1,
            }],
        })
        .await;
    assert_matches!(before, Err(ServiceError::InvalidMerchant(_)));

    app.state.services.merchants.approve(merchant.id).await.unwrap();

    app.state
        .services
        .checkout
        .create_session(CreateSessionInput {
            merchant_id: merchant.id,
            customer_id: None,
            items: vec![SessionLine {
                product_id: product.id,
                quantity: 1,
            }],
        })
        .await
        .unwrap();

    // Suspension closes the storefront again
    app.state.services.merchants.suspend(merchant.id).await.unwrap();
    let after = app
        .state
        .services
        .checkout
        .create_session(CreateSessionInput {
            merchant_id: merchant.id,
            customer_id: None,
            items: vec![SessionLine {
                product_id: product.id,
                quantity: 1,
            }],
        })
        .await;
    assert_matches!(after, Err(ServiceError::InvalidMerchant(_)));
}

#[tokio::test]
async fn approving_an_active_merchant_conflicts() {
    let app = TestApp::new().await;
    let merchant = app.seed_merchant().await;

    let result = app.state.services.merchants.approve(merchant.id).await;
    assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
}

// ==================== HTTP surface ====================

#[tokio::test]
async fn http_admin_approval_flow() {
    let app = TestApp::new().await;

    let onboard = app
        .request(
            Method::POST,
            "/api/v1/merchants",
            Some(json!({
                "business_name": "Siti Home Kitchen",
                "contact_email": "siti@example.com",
                "address_line1": "Blk 12 Bedok North",
                "postal_code": "460012",
                "pickup_enabled": true,
            })),
            &[],
        )
        .await;
    assert_eq!(onboard.status(), 201);
    let body = response_json(onboard).await;
    let merchant_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "pending_approval");

    // Customers cannot approve
    let forbidden = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/merchants/{merchant_id}/approve"),
            None,
            &[
                ("x-user-id".to_string(), Uuid::new_v4().to_string()),
                ("x-user-role".to_string(), "customer".to_string()),
            ],
        )
        .await;
    assert_eq!(forbidden.status(), 403);

    let approve = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/merchants/{merchant_id}/approve"),
            None,
            &TestApp::admin_headers(),
        )
        .await;
    assert_eq!(approve.status(), 200);
    let body = response_json(approve).await;
    assert_eq!(body["data"]["status"], "active");

    // The pending queue is empty again
    let list = app
        .request(
            Method::GET,
            "/api/v1/admin/merchants?status=pending_approval",
            None,
            &TestApp::admin_headers(),
        )
        .await;
    assert_eq!(list.status(), 200);
    let body = response_json(list).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn http_merchant_status_transition_and_events() {
    let app = TestApp::new().await;
    let (order_id, merchant_id) = place_order(&app, DeliveryMethod::Pickup).await;
    let headers = TestApp::merchant_headers(merchant_id);

    let confirm = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{order_id}/confirm"),
            None,
            &headers,
        )
        .await;
    assert_eq!(confirm.status(), 200);

    let transition = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "preparing" })),
            &headers,
        )
        .await;
    assert_eq!(transition.status(), 200);
    let body = response_json(transition).await;
    assert_eq!(body["data"]["status"], "preparing");

    // Skipping ahead is a conflict
    let skip = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "completed" })),
            &headers,
        )
        .await;
    assert_eq!(skip.status(), 409);
    let body = response_json(skip).await;
    assert_eq!(body["kind"], "invalid_transition");

    let events = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}/events"),
            None,
            &headers,
        )
        .await;
    assert_eq!(events.status(), 200);
    let body = response_json(events).await;
    let trail = body["data"].as_array().unwrap();
    assert_eq!(trail.len(), 3); // placed, confirmed, preparing
}
