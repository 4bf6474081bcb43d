//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Signal Engine (rule triggers, copy-trade)
//! - Telemetry stream (snapshots, position events)
//! - Outbound event queue (collector delivery)
//! - API Server (status)
//!
//! # Lifecycle
//!
//! 1. Acquire the instance marker (fatal on failure)
//! 2. Load rules and the position filter into the engine
//! 3. Start API server and event delivery
//! 4. Read the telemetry stream until cancelled
//! 5. Stop delivery, release the marker

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tripwire_connectors::{probe_all, CollectorClient, FrameHandler, StreamClient};
use tripwire_domain::{Credentials, PositionEvent, Snapshot, TriggerEvent};
use tripwire_exec::{
    BrokerPort, CredentialSource, EndpointGuard, SignalEngine, StaticCredentials, StubBroker,
};
use tripwire_store::{FileRuleStore, FilterStore, RuleRepository};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::{Lifecycle, PidFileLifecycle};
use crate::outbound::{run_delivery, QueueSink, EVENT_QUEUE_CAPACITY};

/// Concurrent upstream probes at startup.
const HEALTH_PROBE_CONCURRENCY: usize = 4;

// =============================================================================
// Daemon
// =============================================================================

/// The main tripwire daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Signal engine
    engine: Arc<SignalEngine>,
    /// Broker adapter
    broker: Arc<dyn BrokerPort>,
    /// Credential source for the stream handshake
    credentials: Arc<dyn CredentialSource>,
    /// Outbound queue receiver, taken by the delivery worker
    events: Option<mpsc::Receiver<TriggerEvent>>,
    /// Rule documents
    rules: FileRuleStore,
    /// Position filter document
    filters: FilterStore,
    /// Single-instance marker
    lifecycle: PidFileLifecycle,
}

impl Daemon {
    /// Create a new daemon with the stub broker (for testing/development).
    pub fn new_stub(config: Config) -> Self {
        let broker = Arc::new(StubBroker::with_endpoint(config.broker.endpoint.clone()));
        Self::new(config, broker)
    }

    /// Create a new daemon around a broker adapter.
    pub fn new(config: Config, broker: Arc<dyn BrokerPort>) -> Self {
        let (sink, events) = QueueSink::new(EVENT_QUEUE_CAPACITY);
        let engine = Arc::new(SignalEngine::new(
            config.engine.clone(),
            broker.clone(),
            Arc::new(sink),
            EndpointGuard::new(config.broker.allowed_endpoint.clone()),
        ));
        let credentials = Arc::new(StaticCredentials::new(Credentials::new(
            config.profile.clone(),
            config.stream.token.clone(),
        )));

        Self {
            rules: FileRuleStore::new(config.rules_dir(), config.rule_owner()),
            filters: FilterStore::new(config.filter_path()),
            lifecycle: PidFileLifecycle::new(config.state_dir.clone()),
            config,
            engine,
            broker,
            credentials,
            events: Some(events),
        }
    }

    /// Replace the credential source.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn engine(&self) -> Arc<SignalEngine> {
        self.engine.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the daemon until SIGINT/SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            trigger.cancel();
        });

        self.run_until(cancel).await
    }

    /// Run the daemon until `cancel` fires.
    pub async fn run_until(mut self, cancel: CancellationToken) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            profile = %self.config.profile,
            dry_run = self.config.engine.dry_run,
            "Starting tripwire daemon"
        );

        // 1. Instance marker
        let handle = self.lifecycle.acquire_exclusive(&self.config.profile)?;

        let result = self.serve(&cancel).await;

        // 5. Release
        if let Err(e) = self.lifecycle.release(&handle) {
            error!(error = %e, "Failed to release instance marker");
        }
        result
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> DaemonResult<()> {
        // 2. Rules and filter
        self.load_state().await;

        if let Err(e) = self.broker.connect().await {
            warn!(error = %e, endpoint = self.broker.endpoint(), "Broker connect failed");
        }

        // 3. API server and delivery
        match self.start_api_server(cancel.clone()).await {
            Ok(api_addr) => info!(%api_addr, "API server started"),
            Err(e) => warn!(error = %e, "API server unavailable, continuing without it"),
        }

        let worker_cancel = CancellationToken::new();
        let worker = self.events.take().map(|events| {
            let collector = self.config.collector_url.as_deref().map(CollectorClient::new);
            tokio::spawn(run_delivery(events, collector, worker_cancel.clone()))
        });

        self.spawn_health_probes();

        // 4. Stream
        let credentials = match self.credentials.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Credentials unavailable, connecting without token");
                Credentials::new(self.config.profile.clone(), "")
            }
        };
        let handler = Arc::new(EngineHandler {
            engine: self.engine.clone(),
        });
        let mut stream = StreamClient::new(self.config.stream.url.clone(), credentials, handler);
        stream.run(cancel.clone()).await;

        // Graceful shutdown
        info!("Initiating graceful shutdown");
        worker_cancel.cancel();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Event delivery task failed");
            }
        }

        let status = self.engine.status().await;
        info!(
            session_orders = status.session_orders,
            tracked_positions = status.tracked_positions,
            "Shutdown complete"
        );
        Ok(())
    }

    /// Load rule documents and the position filter into the engine.
    ///
    /// Invalid rule documents are logged and left out; an unreadable rules
    /// directory leaves the engine with no rules. An invalid filter
    /// document leaves copy-trading disabled.
    pub async fn load_state(&self) {
        if let Err(e) = self.config.ensure_dirs() {
            error!(error = %e, profile_dir = %self.config.profile_dir().display(), "Cannot create profile directories");
        }

        match self.rules.load_all().await {
            Ok(report) => self.engine.set_rules(report.rules).await,
            Err(e) => {
                error!(error = %e, dir = %self.rules.dir().display(), "Rules unreadable, starting with no rules");
                self.engine.set_rules(Vec::new()).await;
            }
        }

        match self.filters.load().await {
            Ok(filter) => self.engine.set_filter(filter).await,
            Err(e) => warn!(error = %e, path = %self.filters.path().display(), "Position filter rejected, copy-trade disabled"),
        }
    }

    /// Start the API server; it stops when `cancel` fires.
    async fn start_api_server(&self, cancel: CancellationToken) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            engine: self.engine.clone(),
            profile: self.config.profile.clone(),
            started_at: Utc::now(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        // Spawn the server task
        tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await });
            if let Err(e) = server.await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    fn spawn_health_probes(&self) {
        if self.config.health_targets.is_empty() {
            return;
        }
        let targets = self.config.health_targets.clone();
        tokio::spawn(async move {
            let results = probe_all(&reqwest::Client::new(), &targets, HEALTH_PROBE_CONCURRENCY).await;
            for result in &results {
                if result.healthy {
                    info!(target_url = %result.target, latency_ms = result.latency_ms, "Upstream healthy");
                } else {
                    warn!(
                        target_url = %result.target,
                        status = ?result.status,
                        error = ?result.error,
                        "Upstream unhealthy"
                    );
                }
            }
        });
    }
}

// =============================================================================
// Frame dispatch
// =============================================================================

/// Routes stream frames into the engine.
struct EngineHandler {
    engine: Arc<SignalEngine>,
}

#[async_trait]
impl FrameHandler for EngineHandler {
    async fn on_snapshot(&self, snapshot: Snapshot) {
        let events = self.engine.evaluate(snapshot).await;
        debug!(events = events.len(), "Snapshot evaluated");
    }

    async fn on_position_events(&self, positions: Vec<PositionEvent>) {
        let events = self.engine.process_position_events(positions).await;
        debug!(events = events.len(), "Position events processed");
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating graceful shutdown"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "SIGINT handler unavailable");
            }
            info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
