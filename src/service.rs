//! The card service: daily generate/push phases and the manual command surface.
//!
//! [`CardService`] owns everything a cycle needs: the settings, the active
//! collection with its progress, the scheduler state holding the cached card,
//! and the rendering and delivery collaborators. The [`DailyScheduler`] drives
//! it through the [`DailyJob`] trait; the CLI calls the command methods, each
//! of which reports back as a [`CommandOutcome`] instead of an error.
//!
//! [`DailyScheduler`]: crate::scheduler::DailyScheduler

use crate::collections::{CollectionHandler, CollectionRegistry};
use crate::config::AppConfig;
use crate::delivery::{CardArtifact, DeliveryCoordinator, DeliveryReport, DeliveryTransport, remove_artifact};
use crate::error::Result;
use crate::models::CollectionEntry;
use crate::progress::ProgressStore;
use crate::render::{BackgroundPolicy, CardRenderer, Rasterizer};
use crate::scheduler::{Clock, DailyJob, DailySchedule, SchedulerPhase, SharedSchedulerState};
use crate::selection::SelectionEngine;
use crate::utils::{date_string, parse_clock_time, slugify, truncate_for_log};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};

/// Collection used when the configured one cannot be loaded at startup.
pub const FALLBACK_COLLECTION: &str = "english";

/// Result of a manual command: success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub message: String,
    /// Card image produced by the command, if any was kept on disk.
    pub image: Option<PathBuf>,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            image: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            image: None,
        }
    }

    fn with_image(mut self, image: PathBuf) -> Self {
        self.image = Some(image);
        self
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(image) = &self.image {
            write!(f, "\nimage: {}", image.display())?;
        }
        Ok(())
    }
}

/// Progress summary of the active collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub collection: String,
    pub total: usize,
    /// Delivered ids that still exist in the collection.
    pub delivered: usize,
    /// `YYYY-MM-DD`, empty if nothing was delivered yet.
    pub last_date: String,
    pub destinations: usize,
    pub phase: SchedulerPhase,
    pub card_pending: bool,
}

impl StatusReport {
    pub fn percent(&self) -> usize {
        (self.delivered * 100).checked_div(self.total).unwrap_or(0)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = if self.last_date.is_empty() { "never" } else { &self.last_date };
        writeln!(f, "Progress for '{}'", self.collection)?;
        writeln!(f, "  delivered:     {} / {} ({}%)", self.delivered, self.total, self.percent())?;
        writeln!(f, "  last delivery: {last}")?;
        writeln!(f, "  destinations:  {}", self.destinations)?;
        write!(
            f,
            "  scheduler:     {:?}{}",
            self.phase,
            if self.card_pending { " (card waiting to be pushed)" } else { "" }
        )
    }
}

/// The collection currently feeding the daily cycle.
#[derive(Debug)]
pub struct ActiveCollection {
    pub id: String,
    pub handler: Arc<CollectionHandler>,
    pub entries: Vec<CollectionEntry>,
    pub progress: ProgressStore,
}

/// Rendering, delivery and timing collaborators of a [`CardService`].
pub struct ServiceParts {
    pub renderer: Arc<dyn CardRenderer>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub transport: Arc<dyn DeliveryTransport>,
    pub backgrounds: BackgroundPolicy,
    pub clock: Arc<dyn Clock>,
}

pub struct CardService {
    config: Mutex<AppConfig>,
    config_path: PathBuf,
    registry: CollectionRegistry,
    active: RwLock<Arc<ActiveCollection>>,
    state: SharedSchedulerState,
    /// Serializes generate and push phases across the scheduler and commands.
    cycle_lock: Mutex<()>,
    /// Destinations added for a test cycle; never saved.
    temporary_destinations: Mutex<Vec<String>>,
    renderer: Arc<dyn CardRenderer>,
    rasterizer: Arc<dyn Rasterizer>,
    coordinator: DeliveryCoordinator,
    backgrounds: BackgroundPolicy,
    clock: Arc<dyn Clock>,
}

impl CardService {
    /// Activate the configured collection and assemble the service.
    ///
    /// If the configured collection cannot be loaded, the English collection
    /// is tried instead; only when that fails too is startup aborted.
    #[instrument(level = "info", skip_all, fields(collection = %config.current_collection))]
    pub async fn start(
        mut config: AppConfig,
        config_path: PathBuf,
        registry: CollectionRegistry,
        parts: ServiceParts,
    ) -> Result<Self> {
        let requested = config.current_collection.clone();
        let active = match activate(&registry, &config, &requested).await {
            Ok(active) => active,
            Err(e) if requested != FALLBACK_COLLECTION => {
                warn!(
                    requested = %requested,
                    fallback = FALLBACK_COLLECTION,
                    error = %e,
                    "Configured collection unusable; falling back"
                );
                config.current_collection = FALLBACK_COLLECTION.to_string();
                activate(&registry, &config, FALLBACK_COLLECTION).await?
            }
            Err(e) => return Err(e),
        };
        info!(
            active = %active.id,
            entries = active.entries.len(),
            destinations = config.destinations.len(),
            "Card service ready"
        );

        Ok(Self {
            config: Mutex::new(config),
            config_path,
            registry,
            active: RwLock::new(Arc::new(active)),
            state: SharedSchedulerState::default(),
            cycle_lock: Mutex::new(()),
            temporary_destinations: Mutex::new(Vec::new()),
            renderer: parts.renderer,
            rasterizer: parts.rasterizer,
            coordinator: DeliveryCoordinator::new(parts.transport),
            backgrounds: parts.backgrounds,
            clock: parts.clock,
        })
    }

    /// State shared with the scheduler (daily flags, cached card, phase).
    pub fn scheduler_state(&self) -> SharedSchedulerState {
        self.state.clone()
    }

    pub async fn active(&self) -> Arc<ActiveCollection> {
        self.active.read().await.clone()
    }

    pub async fn config_snapshot(&self) -> AppConfig {
        self.config.lock().await.clone()
    }

    /// Pick up settings another process saved to the settings file.
    ///
    /// A missing or unreadable file keeps the settings in memory. If the
    /// saved active collection differs it is activated; when that fails the
    /// current collection stays active.
    #[instrument(level = "info", skip_all, fields(path = %self.config_path.display()))]
    pub async fn reload_settings(&self) {
        if !tokio::fs::try_exists(&self.config_path).await.unwrap_or(false) {
            return;
        }
        let mut loaded = match AppConfig::load(&self.config_path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Settings unreadable; keeping the current ones");
                return;
            }
        };

        let mut config = self.config.lock().await;
        let active_id = self.active().await.id.clone();
        if loaded.current_collection != active_id {
            match activate(&self.registry, &loaded, &loaded.current_collection).await {
                Ok(next) => {
                    info!(from = %active_id, to = %next.id, "Active collection changed on disk");
                    *self.active.write().await = Arc::new(next);
                }
                Err(e) => {
                    warn!(requested = %loaded.current_collection, error = %e, "Saved collection unusable; keeping the current one");
                    loaded.current_collection = active_id;
                }
            }
        }
        *config = loaded;
    }

    /// Saved destinations followed by any temporary test destinations.
    async fn current_destinations(&self) -> Vec<String> {
        let mut destinations = self.config.lock().await.destinations.clone();
        for extra in self.temporary_destinations.lock().await.iter() {
            if !destinations.contains(extra) {
                destinations.push(extra.clone());
            }
        }
        destinations
    }

    async fn selection_engine(&self) -> SelectionEngine {
        let config = self.config.lock().await;
        SelectionEngine::new(config.learning_mode, config.reset_on_complete)
    }

    /// Generate phase: select, render, cache, then mark the entry delivered.
    ///
    /// A card still waiting from an earlier generate is replaced and its file
    /// removed. Returns `None` when the active collection has no entries.
    #[instrument(level = "info", skip_all)]
    pub async fn generate_daily_card(&self) -> Result<Option<CardArtifact>> {
        let _cycle = self.cycle_lock.lock().await;
        let active = self.active().await;

        let engine = self.selection_engine().await;
        let Some(entry) = engine.select(&active.entries, &active.progress).await? else {
            warn!(collection = %active.id, "Nothing to generate");
            return Ok(None);
        };

        let path = self.render_card(&active, &entry, "daily").await?;
        let artifact = CardArtifact { path, entry };

        let previous = self.state.lock().await.cached.replace(artifact.clone());
        if let Some(old) = previous.filter(|old| old.path != artifact.path) {
            warn!(entry = %old.entry.id, "Replacing a card that was never pushed");
            remove_artifact(&old.path).await;
        }

        let today = date_string(&self.clock.now());
        active.progress.mark_delivered(&artifact.entry.id, &today).await?;
        info!(entry = %artifact.entry.id, path = %artifact.path.display(), "Daily card generated");
        Ok(Some(artifact))
    }

    /// Push phase: hand the cached card to every destination.
    ///
    /// The cache is cleared before delivery starts, so a card is pushed at
    /// most once whatever the outcome. Returns `None` if no card was cached.
    #[instrument(level = "info", skip_all)]
    pub async fn push_daily_card(&self) -> Option<DeliveryReport> {
        let _cycle = self.cycle_lock.lock().await;
        let Some(artifact) = self.state.lock().await.cached.take() else {
            warn!("No generated card to push");
            return None;
        };
        let destinations = self.current_destinations().await;
        if destinations.is_empty() {
            warn!("No destinations registered; discarding card");
        }
        Some(self.coordinator.deliver(artifact, &destinations).await)
    }

    /// Render `entry` of `active` into an image under the artifacts directory.
    async fn render_card(
        &self,
        active: &ActiveCollection,
        entry: &CollectionEntry,
        purpose: &str,
    ) -> Result<PathBuf> {
        let handler = &active.handler;
        let context = {
            let mut rng = rand::rng();
            self.backgrounds
                .context_for(entry, &handler.config().theme_colors, &mut rng)
        };
        let fields = handler.render_input(entry, &context);
        let markup = self.renderer.render(handler.template_id(), &fields).await?;

        let (scale, dir) = {
            let config = self.config.lock().await;
            (config.render_scale, config.artifacts_dir.clone())
        };
        let stamp = self.clock.now().format("%Y%m%d%H%M%S");
        let output = dir.join(format!(
            "{purpose}-{}-{}-{stamp}.png",
            active.id,
            slugify(&entry.id)
        ));
        self.rasterizer
            .rasterize(&markup, handler.config().card_size, scale, &output)
            .await
    }

    /// Select an entry and render it without marking it delivered.
    async fn preview_card(&self, active: &ActiveCollection) -> Result<Option<(CollectionEntry, PathBuf)>> {
        let engine = self.selection_engine().await;
        let Some(entry) = engine.select(&active.entries, &active.progress).await? else {
            return Ok(None);
        };
        let path = self.render_card(active, &entry, "preview").await?;
        Ok(Some((entry, path)))
    }

    /// Render one card now without marking it delivered.
    ///
    /// Selecting from an exhausted collection with auto-reset on still
    /// resets its progress, as the daily cycle would.
    #[instrument(level = "info", skip_all)]
    pub async fn select_and_preview(&self) -> CommandOutcome {
        let active = self.active().await;
        match self.preview_card(&active).await {
            Ok(Some((entry, path))) => {
                CommandOutcome::ok(format!("Card for '{}'", entry.primary_text)).with_image(path)
            }
            Ok(None) => CommandOutcome::fail(format!("Collection '{}' has no entries", active.id)),
            Err(e) => {
                error!(error = %e, "Preview failed");
                CommandOutcome::fail(format!("Card generation failed: {e}"))
            }
        }
    }

    /// Show an entry's details and render its card.
    ///
    /// With `word`, the entry is looked up case-insensitively by id or
    /// headline; without it, one is selected as for the daily card. Nothing
    /// is marked delivered and the cached daily card is not touched; the
    /// selection may still reset an exhausted collection.
    #[instrument(level = "info", skip_all, fields(word = ?word))]
    pub async fn preview(&self, word: Option<&str>) -> CommandOutcome {
        let active = self.active().await;
        let entry = match word.map(str::trim).filter(|w| !w.is_empty()) {
            Some(word) => {
                let wanted = word.to_lowercase();
                match active.entries.iter().find(|e| {
                    e.id.to_lowercase() == wanted || e.primary_text.to_lowercase() == wanted
                }) {
                    Some(entry) => entry.clone(),
                    None => return CommandOutcome::fail(format!("No entry matching '{word}'")),
                }
            }
            None => {
                let engine = self.selection_engine().await;
                match engine.select(&active.entries, &active.progress).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => {
                        return CommandOutcome::fail(format!("Collection '{}' has no entries", active.id));
                    }
                    Err(e) => return CommandOutcome::fail(format!("Selection failed: {e}")),
                }
            }
        };

        let details = describe_entry(&entry);
        match self.render_card(&active, &entry, "preview").await {
            Ok(path) => CommandOutcome::ok(details).with_image(path),
            Err(e) => {
                error!(entry = %entry.id, error = %e, "Preview failed");
                CommandOutcome::fail(format!("{details}\nCard generation failed: {e}"))
            }
        }
    }

    pub async fn status_report(&self) -> StatusReport {
        let active = self.active().await;
        let record = active.progress.snapshot().await;
        let ids: HashSet<&str> = active.entries.iter().map(|e| e.id.as_str()).collect();
        let delivered = record
            .delivered_ids
            .iter()
            .filter(|id| ids.contains(id.as_str()))
            .count();
        let (phase, card_pending) = {
            let state = self.state.lock().await;
            (state.phase, state.cached.is_some())
        };

        StatusReport {
            collection: active.id.clone(),
            total: ids.len(),
            delivered,
            last_date: record.last_delivery_date,
            destinations: self.config.lock().await.destinations.len(),
            phase,
            card_pending,
        }
    }

    pub async fn status(&self) -> CommandOutcome {
        CommandOutcome::ok(self.status_report().await.to_string())
    }

    /// Make `id` the active collection and persist the choice.
    ///
    /// On failure the previous collection stays active.
    #[instrument(level = "info", skip_all, fields(collection = %id))]
    pub async fn switch_active_collection(&self, id: &str) -> CommandOutcome {
        if !self.registry.is_registered(id) {
            return CommandOutcome::fail(format!(
                "Collection '{id}' is not registered; see the collection list"
            ));
        }

        let mut config = self.config.lock().await;
        let next = match activate(&self.registry, &config, id).await {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Switch failed");
                return CommandOutcome::fail(format!("Could not switch to '{id}': {e}"));
            }
        };
        let count = next.entries.len();
        *self.active.write().await = Arc::new(next);
        config.current_collection = id.to_string();
        let saved = self.save_locked(&config).await;

        info!(entries = count, "Active collection switched");
        CommandOutcome::ok(format!("Switched to '{id}' ({count} entries){saved}"))
    }

    /// Registered collections, marking the active one.
    pub async fn list_collections(&self) -> CommandOutcome {
        let active = self.active().await;
        let lines: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .map(|c| {
                let marker = if c.id == active.id { "*" } else { " " };
                format!("{marker} {} - {}", c.id, c.display_name)
            })
            .collect();
        CommandOutcome::ok(format!("Collections:\n{}", lines.join("\n")))
    }

    #[instrument(level = "info", skip_all, fields(destination = %destination))]
    pub async fn register_destination(&self, destination: &str) -> CommandOutcome {
        let destination = destination.trim();
        if destination.is_empty() {
            return CommandOutcome::fail("Destination must not be empty");
        }
        let mut config = self.config.lock().await;
        if config.destinations.iter().any(|d| d == destination) {
            return CommandOutcome::ok(format!("'{destination}' is already registered"));
        }
        config.destinations.push(destination.to_string());
        let saved = self.save_locked(&config).await;
        info!(total = config.destinations.len(), "Destination registered");
        CommandOutcome::ok(format!(
            "Registered '{destination}'; cards are pushed daily at {}{saved}",
            config.push_time
        ))
    }

    #[instrument(level = "info", skip_all, fields(destination = %destination))]
    pub async fn unregister_destination(&self, destination: &str) -> CommandOutcome {
        let destination = destination.trim();
        let mut config = self.config.lock().await;
        let before = config.destinations.len();
        config.destinations.retain(|d| d != destination);
        if config.destinations.len() == before {
            return CommandOutcome::fail(format!("'{destination}' is not registered"));
        }
        let saved = self.save_locked(&config).await;
        info!(total = config.destinations.len(), "Destination unregistered");
        CommandOutcome::ok(format!("Unregistered '{destination}'{saved}"))
    }

    /// Generate and push immediately, as the scheduler would.
    #[instrument(level = "info", skip_all)]
    pub async fn run_full_cycle_now(&self) -> CommandOutcome {
        let destinations = self.config.lock().await.destinations.len();
        if destinations == 0 {
            return CommandOutcome::fail("No destinations registered; register one first");
        }
        self.generate_then_push().await
    }

    /// Exercise delivery to `destination`.
    ///
    /// With a zero delay a freshly rendered card goes to that destination
    /// only, without marking it delivered. Otherwise the destination is
    /// added in memory for the duration of the test, the full generate and
    /// push cycle runs after `delay`, and the temporary destination is
    /// dropped again. The saved destination list is never changed.
    #[instrument(level = "info", skip_all, fields(destination = %destination, ?delay))]
    pub async fn run_test_cycle(&self, destination: &str, delay: Duration) -> CommandOutcome {
        let destination = destination.trim();
        if destination.is_empty() {
            return CommandOutcome::fail("Destination must not be empty");
        }
        if delay.is_zero() {
            return self.send_test_card(destination).await;
        }

        let temporary = {
            let registered = self
                .config
                .lock()
                .await
                .destinations
                .iter()
                .any(|d| d == destination);
            let mut temporary = self.temporary_destinations.lock().await;
            let absent = !registered && !temporary.iter().any(|d| d == destination);
            if absent {
                temporary.push(destination.to_string());
            }
            absent
        };
        if temporary {
            info!("Temporarily registered destination");
        }

        self.clock.sleep(delay).await;
        let outcome = self.generate_then_push().await;

        if temporary {
            self.temporary_destinations
                .lock()
                .await
                .retain(|d| d != destination);
            info!("Temporary destination removed");
        }
        outcome
    }

    async fn send_test_card(&self, destination: &str) -> CommandOutcome {
        let active = self.active().await;
        let (entry, path) = match self.preview_card(&active).await {
            Ok(Some(card)) => card,
            Ok(None) => return CommandOutcome::fail(format!("Collection '{}' has no entries", active.id)),
            Err(e) => return CommandOutcome::fail(format!("Card generation failed: {e}")),
        };
        let artifact = CardArtifact { path, entry };
        let label = artifact.entry.primary_text.clone();
        let report = self
            .coordinator
            .deliver(artifact, &[destination.to_string()])
            .await;
        match report.failed.first() {
            None if report.attempted() > 0 => CommandOutcome::ok(format!("Test card '{label}' sent to '{destination}'")),
            None => CommandOutcome::fail("Test card file vanished before delivery"),
            Some((_, reason)) => CommandOutcome::fail(format!("Test delivery failed: {reason}")),
        }
    }

    async fn generate_then_push(&self) -> CommandOutcome {
        let artifact = match self.generate_daily_card().await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return CommandOutcome::fail("Active collection has no entries"),
            Err(e) => {
                error!(error = %e, "Generate failed");
                return CommandOutcome::fail(format!("Card generation failed: {e}"));
            }
        };
        let label = artifact.entry.primary_text.clone();

        let Some(report) = self.push_daily_card().await else {
            return CommandOutcome::fail("Card was generated but is no longer cached");
        };
        let mut message = format!(
            "Card '{label}' delivered to {}/{} destinations",
            report.succeeded.len(),
            report.attempted()
        );
        for (destination, reason) in &report.failed {
            message.push_str(&format!("\n  {destination}: {}", truncate_for_log(reason, 120)));
        }
        CommandOutcome {
            ok: report.failed.is_empty(),
            message,
            image: None,
        }
    }

    /// Save settings while the caller holds the config lock.
    ///
    /// Returns a suffix for the command message; empty on success.
    async fn save_locked(&self, config: &AppConfig) -> String {
        match config.save(&self.config_path).await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Failed to save settings");
                format!(" (warning: settings not saved: {e})")
            }
        }
    }

    pub fn help() -> CommandOutcome {
        CommandOutcome::ok(HELP_TEXT)
    }
}

const HELP_TEXT: &str = "\
Daily card commands
  serve                    run the daily scheduler (default)
  preview [WORD]           show an entry and render its card
  now                      generate and push a card immediately
  status                   show progress of the active collection
  register <DESTINATION>   receive the daily card
  unregister <DESTINATION> stop receiving the daily card
  test <DESTINATION> [--delay SECONDS]
                           send a test card, or run a full cycle after a delay
  use [COLLECTION]         switch collection, or list them
  list                     list registered collections
  commands                 show this help";

#[async_trait]
impl DailyJob for CardService {
    async fn schedule(&self) -> DailySchedule {
        let config = self.config.lock().await;
        DailySchedule {
            generate_at: parse_clock_time(&config.generate_time),
            push_at: parse_clock_time(&config.push_time),
        }
    }

    async fn generate(&self) -> Result<()> {
        self.reload_settings().await;
        self.generate_daily_card().await.map(|_| ())
    }

    async fn push(&self) -> Result<()> {
        self.reload_settings().await;
        if let Some(report) = self.push_daily_card().await {
            info!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "Daily push finished"
            );
        }
        Ok(())
    }
}

/// Load a collection's entries and progress.
async fn activate(registry: &CollectionRegistry, config: &AppConfig, id: &str) -> Result<ActiveCollection> {
    let handler = registry.get_handler(id)?;
    let entries = handler.load(config.level_filter()).await?;
    if entries.is_empty() {
        warn!(collection = id, "Collection loaded but has no usable entries");
    }
    let progress = ProgressStore::open(&config.data_dir, id).await?;
    Ok(ActiveCollection {
        id: id.to_string(),
        handler,
        entries,
        progress,
    })
}

fn describe_entry(entry: &CollectionEntry) -> String {
    let mut lines = vec![format!("Entry: {}", entry.primary_text)];
    if let Some(phonetic) = &entry.phonetic {
        lines.push(format!("Reading: {phonetic}"));
    }
    if let Some(category) = &entry.category {
        lines.push(format!("Type: {category}"));
    }
    lines.push(format!("Meaning: {}", entry.body));
    if let Some(example) = &entry.example {
        lines.push(format!("Example: {}", truncate_for_log(example, 50)));
    }
    lines.join("\n")
}
