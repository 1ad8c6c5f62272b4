use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use kitchencloud_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("loading configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    let cfg = Arc::new(cfg);

    // Init DB
    let db = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db);

    // Event channel feeding the notification fan-out
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);

    // External collaborators; unconfigured providers fall back to
    // log-only / null implementations so development needs no secrets.
    let email: Arc<dyn api::providers::EmailSender> =
        match (cfg.email_api_url.clone(), cfg.email_api_key.clone()) {
            (Some(url), Some(key)) => Arc::new(api::providers::HttpEmailSender::new(url, key)),
            _ => {
                info!("email provider not configured; using log-only sender");
                Arc::new(api::providers::LogOnlyEmailSender)
            }
        };
    let whatsapp: Arc<dyn api::providers::WhatsAppSender> =
        match (cfg.whatsapp_api_url.clone(), cfg.whatsapp_api_key.clone()) {
            (Some(url), Some(key)) => Arc::new(api::providers::HttpWhatsAppSender::new(url, key)),
            _ => {
                info!("whatsapp provider not configured; using log-only sender");
                Arc::new(api::providers::LogOnlyWhatsAppSender)
            }
        };
    let geocoder: Arc<dyn api::providers::Geocoder> = match cfg.geocoding_base_url.clone() {
        Some(url) => Arc::new(api::providers::OneMapGeocoder::new(url)),
        None => {
            info!("geocoder not configured; distance-based quoting disabled");
            Arc::new(api::providers::NullGeocoder)
        }
    };
    let proof_storage: Arc<dyn api::providers::ProofStorage> = Arc::new(
        api::providers::LocalProofStorage::new(cfg.payment_proof_storage_dir.clone()),
    );

    // Spawn the notification fan-out loop
    let notifier = Arc::new(api::services::notifications::Notifier::new(
        db.clone(),
        email,
        whatsapp,
    ));
    tokio::spawn(api::events::process_events(event_rx, notifier));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db.clone(),
        Arc::new(event_sender.clone()),
        cfg.clone(),
        geocoder,
        proof_storage,
    );

    let app_state = api::AppState {
        db: db.clone(),
        config: cfg.clone(),
        event_sender,
        services,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!("using permissive CORS (development or explicit override)");
        CorsLayer::permissive()
    } else {
        error!("missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        anyhow::bail!(
            "missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
        );
    };

    let app = Router::<api::AppState>::new()
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("kitchencloud-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
