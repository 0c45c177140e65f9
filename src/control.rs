//! Local control endpoint of the serving process.
//!
//! `serve` listens on the configured loopback address and runs every command
//! it receives against its own [`CardService`]. Manual commands therefore
//! share the cycle lock, the live settings and the progress stores of the
//! scheduler instead of racing them from a second process. The CLI tries the
//! endpoint first and only runs a command in-process when nothing listens.
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `GET` | `/health` | | `{"status": "ok", ...}` |
//! | `POST` | `/command` | [`Command`] as JSON | [`CommandOutcome`] as JSON |

use crate::cli::Command;
use crate::error::Result;
use crate::service::{CardService, CommandOutcome};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one command against `service`.
///
/// `serve` itself is refused: the receiving process is already serving.
pub async fn dispatch(service: &CardService, command: Command) -> CommandOutcome {
    match command {
        Command::Serve => CommandOutcome::fail("The scheduler is already running"),
        Command::Preview { word } => service.preview(word.as_deref()).await,
        Command::Card => service.select_and_preview().await,
        Command::Status => service.status().await,
        Command::Now => service.run_full_cycle_now().await,
        Command::Register { destination } => service.register_destination(&destination).await,
        Command::Unregister { destination } => service.unregister_destination(&destination).await,
        Command::Use { collection: Some(id) } => service.switch_active_collection(&id).await,
        Command::Use { collection: None } | Command::List => service.list_collections().await,
        Command::Test { destination, delay } => {
            service
                .run_test_cycle(&destination, Duration::from_secs(delay))
                .await
        }
        Command::Commands => CardService::help(),
    }
}

pub fn router(service: Arc<CardService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/command", post(run_command))
        .with_state(service)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn run_command(
    State(service): State<Arc<CardService>>,
    Json(command): Json<Command>,
) -> Json<CommandOutcome> {
    let t0 = Instant::now();
    debug!(?command, "Command received");
    let outcome = dispatch(&service, command).await;
    info!(
        ok = outcome.ok,
        elapsed_ms = t0.elapsed().as_millis(),
        "Command handled"
    );
    Json(outcome)
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve the control endpoint until `cancel` fires.
///
/// In-flight commands finish before this returns.
#[instrument(level = "info", skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve_control(
    listener: TcpListener,
    service: Arc<CardService>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Control endpoint listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Control endpoint stopped");
    Ok(())
}

/// Hands commands to a running `serve`.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(addr: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://{addr}"),
        })
    }

    /// Run `command` in the serving process.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when nothing listens on the control address, so the caller
    /// can run the command itself; otherwise the server's outcome.
    #[instrument(level = "info", skip_all, fields(addr = %self.base_url))]
    pub async fn send(&self, command: &Command) -> Result<Option<CommandOutcome>> {
        let sent = self
            .client
            .post(format!("{}/command", self.base_url))
            .json(command)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                debug!(error = %e, "No server listening");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let outcome: CommandOutcome = response.error_for_status()?.json().await?;
        info!(ok = outcome.ok, "Command handled by the running server");
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::card_service;

    #[tokio::test]
    async fn test_commands_run_in_serving_process() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(card_service(tmp.path()).await);

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_control(listener, service.clone(), cancel.clone()));

        let client = ControlClient::new(&addr).unwrap();
        let outcome = client
            .send(&Command::Register {
                destination: "group-a".into(),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.ok, "{}", outcome.message);
        assert_eq!(service.config_snapshot().await.destinations, vec!["group-a"]);

        let status = client.send(&Command::Status).await.unwrap().unwrap();
        assert!(status.message.contains("destinations:  1"));

        let refused = client.send(&Command::Serve).await.unwrap().unwrap();
        assert!(!refused.ok);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_nothing_listening_yields_none() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = ControlClient::new(&addr).unwrap();
        assert!(client.send(&Command::Status).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_lists_collections() {
        let tmp = tempfile::tempdir().unwrap();
        let service = card_service(tmp.path()).await;
        let outcome = dispatch(&service, Command::Use { collection: None }).await;
        assert!(outcome.ok);
        assert!(outcome.message.contains("* english - English"));
    }
}
