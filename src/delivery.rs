//! Fan-out of a finished card to its destinations.
//!
//! This module separates *how* a message reaches one destination (the
//! [`DeliveryTransport`] trait) from the fan-out policy
//! ([`DeliveryCoordinator`]):
//! - every destination is attempted independently and in order
//! - a failed destination is logged and never retried
//! - the card file is deleted once all attempts are done, whatever their outcome
//!
//! # Transports
//!
//! - [`WebhookTransport`]: JSON `POST` to a local bot bridge; the bridge reads
//!   the image from `image_path`, so it must share the filesystem
//! - [`DryRunTransport`]: logs the message and reports success

use crate::error::{Error, Result};
use crate::models::CollectionEntry;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{error, info, instrument, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// A rendered card waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardArtifact {
    /// Image file produced by the rasterizer.
    pub path: PathBuf,
    /// Entry the card was rendered from.
    pub entry: CollectionEntry,
}

/// One message as handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryMessage {
    pub text: String,
    pub image_path: PathBuf,
}

impl DeliveryMessage {
    /// Caption plus image for `artifact`.
    pub fn for_artifact(artifact: &CardArtifact) -> Self {
        Self {
            text: format!("📚 Daily card: {}", artifact.entry.primary_text),
            image_path: artifact.path.clone(),
        }
    }
}

/// Sends one message to one destination.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Deliver `message` to `destination`.
    ///
    /// # Arguments
    ///
    /// * `destination` - Opaque destination identifier (chat, group, channel)
    /// * `message` - Caption and image to send
    ///
    /// # Returns
    ///
    /// `Ok(())` once the destination accepted the message, or
    /// [`Error::Delivery`] describing why it did not.
    async fn send(&self, destination: &str, message: &DeliveryMessage) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    text: &'a str,
    image_path: String,
}

/// Posts each message as JSON to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    #[instrument(level = "info", skip_all, fields(destination = %destination))]
    async fn send(&self, destination: &str, message: &DeliveryMessage) -> Result<()> {
        let t0 = Instant::now();
        let payload = WebhookPayload {
            destination,
            text: &message.text,
            image_path: message.image_path.display().to_string(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::delivery(destination, e.to_string()))?;

        let status = response.status();
        let elapsed_ms = t0.elapsed().as_millis();
        if !status.is_success() {
            warn!(%status, elapsed_ms, "Webhook rejected message");
            return Err(Error::delivery(destination, format!("webhook returned {status}")));
        }
        info!(%status, elapsed_ms, "Webhook accepted message");
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct DryRunTransport;

#[async_trait]
impl DeliveryTransport for DryRunTransport {
    async fn send(&self, destination: &str, message: &DeliveryMessage) -> Result<()> {
        info!(
            destination,
            text = %message.text,
            image = %message.image_path.display(),
            "Dry run: message not sent"
        );
        Ok(())
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub succeeded: Vec<String>,
    /// Destination and failure reason.
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Delivers cards to every destination, then deletes the card file.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    transport: Arc<dyn DeliveryTransport>,
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator").finish_non_exhaustive()
    }
}

impl DeliveryCoordinator {
    pub fn new(transport: Arc<dyn DeliveryTransport>) -> Self {
        Self { transport }
    }

    /// Send `artifact` to each destination independently.
    ///
    /// Takes ownership of the artifact: the caller has already dropped its
    /// cached reference, and the image file is removed before returning.
    /// A card whose file has disappeared is not sent anywhere.
    #[instrument(level = "info", skip_all, fields(entry = %artifact.entry.id, destinations = destinations.len()))]
    pub async fn deliver(&self, artifact: CardArtifact, destinations: &[String]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if !fs::try_exists(&artifact.path).await.unwrap_or(false) {
            warn!(path = %artifact.path.display(), "Card file is missing; nothing to deliver");
            return report;
        }

        let message = DeliveryMessage::for_artifact(&artifact);
        for destination in destinations {
            match self.transport.send(destination, &message).await {
                Ok(()) => {
                    info!(destination = %destination, "Delivered");
                    report.succeeded.push(destination.clone());
                }
                Err(e) => {
                    error!(destination = %destination, error = %e, "Delivery failed");
                    report.failed.push((destination.clone(), e.to_string()));
                }
            }
        }

        remove_artifact(&artifact.path).await;
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Delivery pass complete"
        );
        report
    }
}

/// Delete a card file, logging rather than failing.
pub async fn remove_artifact(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete card file");
        }
    }
}
