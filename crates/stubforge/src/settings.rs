//! Server settings and the shared context handed to every component.
//!
//! Nothing here is global: tests construct as many independent
//! [`ServerContext`] values as they need.

use crate::journal::{RequestJournal, DEFAULT_LOG_CAPACITY};
use crate::mapping::MappingStore;
use crate::scenario::ScenarioEngine;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Runtime-adjustable server behavior. Updated wholesale via the admin
/// settings endpoint.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Added to every response after any per-mapping delay.
    pub global_delay: Option<Duration>,
    /// Status served when no mapping matches.
    pub fallback_status: u16,
    /// Journal bound; `None` keeps every entry.
    pub request_log_capacity: Option<usize>,
    /// Accept the best nonzero-scoring mapping even below the threshold.
    pub allow_partial: bool,
    /// Minimum score for a mapping to win outright.
    pub partial_match_threshold: f64,
    /// Artificial delay before a served request becomes visible in the
    /// journal.
    pub request_logging_delay: Option<Duration>,
    /// Whether the `/__admin` surface answers.
    pub admin_enabled: bool,
    /// Directory of mapping JSON files loaded at startup.
    pub static_mappings_dir: Option<std::path::PathBuf>,
    /// Re-read the static mapping directory whenever mappings are reset.
    pub watch_static_mappings: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            global_delay: None,
            fallback_status: 404,
            request_log_capacity: Some(DEFAULT_LOG_CAPACITY),
            allow_partial: false,
            partial_match_threshold: 1.0,
            request_logging_delay: None,
            admin_enabled: true,
            static_mappings_dir: None,
            watch_static_mappings: false,
        }
    }
}

/// Shared state for one server instance: the mapping store, scenario
/// table, request journal, settings, and the outbound client. Passed
/// explicitly wherever it is needed.
pub struct ServerContext {
    pub store: MappingStore,
    pub scenarios: ScenarioEngine,
    pub journal: RequestJournal,
    settings: RwLock<ServerSettings>,
    http_client: OnceLock<reqwest::Client>,
    shutdown: broadcast::Sender<()>,
}

impl ServerContext {
    pub fn new(settings: ServerSettings) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(16);
        Arc::new(Self {
            store: MappingStore::new(),
            scenarios: ScenarioEngine::new(),
            journal: RequestJournal::new(settings.request_log_capacity),
            settings: RwLock::new(settings),
            http_client: OnceLock::new(),
            shutdown,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(ServerSettings::default())
    }

    pub fn settings(&self) -> ServerSettings {
        self.settings.read().clone()
    }

    /// Swap in new settings, propagating the journal bound.
    pub fn apply_settings(&self, settings: ServerSettings) {
        self.journal.set_capacity(settings.request_log_capacity);
        debug!(?settings, "settings updated");
        *self.settings.write() = settings;
    }

    /// Shared outbound client for proxying and webhooks, built on first
    /// use.
    pub fn http_client(&self) -> &reqwest::Client {
        self.http_client.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default()
        })
    }

    /// Subscribe to the stop signal; fired once at teardown.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Drop every mapping, scenario state, and journal entry.
    pub fn reset_all(&self) {
        self.store.reset();
        self.scenarios.reset();
        self.journal.reset();
    }
}
