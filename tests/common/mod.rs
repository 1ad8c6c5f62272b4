//! Shared harness for integration tests: an application state backed by an
//! in-memory SQLite database with the embedded migrator applied, plus
//! recording notification fakes so fan-out can be asserted.

// Each test binary compiles this module separately and uses a different
// subset of the helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use kitchencloud_api::{
    api_v1_routes,
    auth::{USER_ID_HEADER, USER_ROLE_HEADER},
    config::AppConfig,
    db,
    entities::{
        merchant::{self, MerchantStatus},
        product::{self, ProductStatus},
    },
    events::{self, EventSender},
    handlers::AppServices,
    providers::{
        DeliveryReceipt, EmailSender, LocalProofStorage, NullGeocoder, WhatsAppSender,
    },
    services::notifications::Notifier,
    AppState,
};

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmail {
    pub fn to_address(&self, address: &str) -> Vec<SentEmail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryReceipt {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        DeliveryReceipt::accepted("test-email")
    }
}

#[derive(Default)]
pub struct RecordingWhatsApp {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl WhatsAppSender for RecordingWhatsApp {
    async fn send(&self, to_phone: &str, title: &str, _message: &str) -> DeliveryReceipt {
        self.sent
            .lock()
            .unwrap()
            .push((to_phone.to_string(), title.to_string()));
        DeliveryReceipt::accepted("test-whatsapp")
    }
}

/// Helper harness spinning up application state on in-memory SQLite.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub email: Arc<RecordingEmail>,
    pub whatsapp: Arc<RecordingWhatsApp>,
    _proof_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let proof_dir = TempDir::new().expect("temp proof dir");

        let mut cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 18080, "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_proof_storage_dir = proof_dir.path().to_string_lossy().into_owned();
        let cfg = Arc::new(cfg);

        let db = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("sqlite connection");
        db::run_migrations(&db).await.expect("migrations");
        let db = Arc::new(db);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);

        let email = Arc::new(RecordingEmail::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let notifier = Arc::new(Notifier::new(
            db.clone(),
            email.clone(),
            whatsapp.clone(),
        ));
        let event_task = tokio::spawn(events::process_events(event_rx, notifier));

        let services = AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            cfg.clone(),
            Arc::new(NullGeocoder),
            Arc::new(LocalProofStorage::new(proof_dir.path())),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state.clone());

        Self {
            state,
            router,
            email,
            whatsapp,
            _proof_dir: proof_dir,
            _event_task: event_task,
        }
    }

    /// Seed an approved merchant accepting both fulfilment methods, flat
    /// $5.00 delivery fee, no minimum order.
    pub async fn seed_merchant(&self) -> merchant::Model {
        self.seed_merchant_with(|_| {}).await
    }

    pub async fn seed_merchant_with(
        &self,
        customize: impl FnOnce(&mut merchant::ActiveModel),
    ) -> merchant::Model {
        let now = Utc::now();
        let mut model = merchant::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_name: Set("Ah Hock Kitchen".to_string()),
            status: Set(MerchantStatus::Active),
            delivery_enabled: Set(true),
            pickup_enabled: Set(true),
            delivery_fee: Set(Decimal::new(500, 2)),
            free_delivery_above: Set(None),
            minimum_order: Set(Decimal::ZERO),
            preparation_minutes: Set(30),
            address_line1: Set("Blk 85 Lorong 4 Toa Payoh".to_string()),
            postal_code: Set("310085".to_string()),
            delivery_zones: Set(None),
            max_delivery_distance_km: Set(None),
            per_km_fee: Set(None),
            email_notifications: Set(true),
            whatsapp_notifications: Set(false),
            order_notification_email: Set(None),
            order_notification_phone: Set(None),
            contact_email: Set("orders@ahhock.sg".to_string()),
            contact_phone: Set(Some("+6591234567".to_string())),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        customize(&mut model);
        model.insert(&*self.state.db).await.expect("seed merchant")
    }

    pub async fn seed_product(
        &self,
        merchant_id: Uuid,
        name: &str,
        sku: &str,
        price: Decimal,
    ) -> product::Model {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            merchant_id: Set(merchant_id),
            category_id: Set(None),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            description: Set(None),
            price: Set(price),
            image_url: Set(None),
            status: Set(ProductStatus::Active),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        model.insert(&*self.state.db).await.expect("seed product")
    }

    /// Fire an HTTP request at the router. Headers are (name, value)
    /// pairs; a JSON body sets the content type automatically.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(String, String)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        self.router.clone().oneshot(request).await.expect("response")
    }

    pub fn merchant_headers(merchant_id: Uuid) -> [(String, String); 2] {
        [
            (USER_ID_HEADER.to_string(), merchant_id.to_string()),
            (USER_ROLE_HEADER.to_string(), "merchant".to_string()),
        ]
    }

    pub fn admin_headers() -> [(String, String); 2] {
        [
            (USER_ID_HEADER.to_string(), Uuid::new_v4().to_string()),
            (USER_ROLE_HEADER.to_string(), "admin".to_string()),
        ]
    }

    /// Give the spawned event loop a moment to drain pending events.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Parse a response body as JSON.
pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
