//! Boundary contracts for external collaborators: messaging providers,
//! geocoding, and proof file storage. The core talks to these through
//! traits so tests can substitute recording fakes and so no provider
//! failure can leak transactional state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Outcome of a single message dispatch attempt.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub success: bool,
    /// Provider-assigned message id when accepted
    pub provider_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReceipt {
    pub fn accepted(provider_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_id: Some(provider_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryReceipt;
}

#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    async fn send(&self, to_phone: &str, title: &str, message: &str) -> DeliveryReceipt;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a 6-digit postal code to coordinates; `Ok(None)` when the
    /// code is unknown to the provider.
    async fn locate(&self, postal_code: &str) -> Result<Option<LatLng>, ServiceError>;
}

#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Persist an uploaded proof and return a durable URL for it.
    async fn store(
        &self,
        order_number: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, ServiceError>;
}

// ---------------------------------------------------------------------------
// Production implementations
// ---------------------------------------------------------------------------

/// JSON POST to a transactional email API.
pub struct HttpEmailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmailSender {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ProviderAck {
    id: Option<String>,
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryReceipt {
        let payload = serde_json::json!({
            "to": to,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let id = resp
                    .json::<ProviderAck>()
                    .await
                    .ok()
                    .and_then(|ack| ack.id)
                    .unwrap_or_default();
                DeliveryReceipt::accepted(id)
            }
            Ok(resp) => DeliveryReceipt::failed(format!("email provider returned {}", resp.status())),
            Err(err) => DeliveryReceipt::failed(format!("email provider unreachable: {err}")),
        }
    }
}

/// JSON POST to a WhatsApp Business API gateway.
pub struct HttpWhatsAppSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpWhatsAppSender {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl WhatsAppSender for HttpWhatsAppSender {
    async fn send(&self, to_phone: &str, title: &str, message: &str) -> DeliveryReceipt {
        let payload = serde_json::json!({
            "phone": to_phone,
            "title": title,
            "message": message,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let id = resp
                    .json::<ProviderAck>()
                    .await
                    .ok()
                    .and_then(|ack| ack.id)
                    .unwrap_or_default();
                DeliveryReceipt::accepted(id)
            }
            Ok(resp) => {
                DeliveryReceipt::failed(format!("whatsapp provider returned {}", resp.status()))
            }
            Err(err) => DeliveryReceipt::failed(format!("whatsapp provider unreachable: {err}")),
        }
    }
}

/// OneMap-compatible postal code search.
pub struct OneMapGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl OneMapGeocoder {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct OneMapResponse {
    results: Vec<OneMapResult>,
}

#[derive(Deserialize)]
struct OneMapResult {
    #[serde(rename = "LATITUDE")]
    latitude: String,
    #[serde(rename = "LONGITUDE")]
    longitude: String,
}

#[async_trait]
impl Geocoder for OneMapGeocoder {
    async fn locate(&self, postal_code: &str) -> Result<Option<LatLng>, ServiceError> {
        let url = format!(
            "{}/api/common/elastic/search?searchVal={}&returnGeom=Y&getAddrDetails=N",
            self.base_url, postal_code
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("geocoder: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "geocoder returned {}",
                response.status()
            )));
        }

        let body: OneMapResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("geocoder payload: {e}")))?;

        let Some(first) = body.results.into_iter().next() else {
            return Ok(None);
        };

        match (first.latitude.parse::<f64>(), first.longitude.parse::<f64>()) {
            (Ok(latitude), Ok(longitude)) => Ok(Some(LatLng { latitude, longitude })),
            _ => Ok(None),
        }
    }
}

/// Writes proofs under a local directory and returns a `file://`-style
/// relative URL. Swapped for an object-store implementation in deployments
/// that need one.
pub struct LocalProofStorage {
    root: PathBuf,
}

impl LocalProofStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }
}

#[async_trait]
impl ProofStorage for LocalProofStorage {
    async fn store(
        &self,
        order_number: &str,
        file_name: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<String, ServiceError> {
        let dir = self.root.join(Self::sanitize(order_number));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServiceError::InternalError(format!("proof storage: {e}")))?;

        let stored_name = format!("{}-{}", Uuid::new_v4().simple(), Self::sanitize(file_name));
        let path = dir.join(&stored_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ServiceError::InternalError(format!("proof storage: {e}")))?;

        Ok(path.to_string_lossy().into_owned())
    }
}

// ---------------------------------------------------------------------------
// Development fallbacks
// ---------------------------------------------------------------------------

/// Logs instead of sending. Used when no email provider is configured.
pub struct LogOnlyEmailSender;

#[async_trait]
impl EmailSender for LogOnlyEmailSender {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> DeliveryReceipt {
        info!(%to, %subject, "email provider not configured; logging only");
        DeliveryReceipt::accepted("log-only")
    }
}

/// Logs instead of sending. Used when no WhatsApp provider is configured.
pub struct LogOnlyWhatsAppSender;

#[async_trait]
impl WhatsAppSender for LogOnlyWhatsAppSender {
    async fn send(&self, to_phone: &str, title: &str, _message: &str) -> DeliveryReceipt {
        info!(%to_phone, %title, "whatsapp provider not configured; logging only");
        DeliveryReceipt::accepted("log-only")
    }
}

/// Resolves nothing. Zone-table quoting still works; distance-based
/// quoting reports not-deliverable.
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn locate(&self, postal_code: &str) -> Result<Option<LatLng>, ServiceError> {
        warn!(%postal_code, "geocoder not configured");
        Ok(None)
    }
}
