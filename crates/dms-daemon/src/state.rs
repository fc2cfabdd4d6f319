//! Shared runtime state for dms-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The progression
//! registry lives here and is the only thing that starts or stops tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dms_config::{DaemonConfig, StoreBackend};
use dms_db::{MemoryOrderStore, OrderStore, PgOrderStore};
use dms_progression::{lifecycle, BroadcastNotifier, ProgressionConfig, ProgressionRegistry};
use dms_schemas::OrderUpdate;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    OrderUpdate(OrderUpdate),
}

impl From<OrderUpdate> for BusMsg {
    fn from(u: OrderUpdate) -> Self {
        BusMsg::OrderUpdate(u)
    }
}

/// Notifier the registry publishes through: one `BusMsg::OrderUpdate` per update.
pub type BusNotifier = BroadcastNotifier<BusMsg>;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub store: Arc<dyn OrderStore>,
    pub progression: ProgressionRegistry,
    started: Instant,
    /// Flipped once on shutdown; open SSE streams end when they see it.
    closing: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        progression: ProgressionConfig,
        bus_capacity: usize,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(bus_capacity.max(1));
        let notifier = Arc::new(BusNotifier::new(bus.clone()));
        let registry = ProgressionRegistry::new(Arc::clone(&store), notifier, progression);
        let (closing, _rx) = watch::channel(false);

        Self {
            bus,
            build: BuildInfo {
                service: "dms-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            progression: registry,
            started: Instant::now(),
            closing,
        }
    }

    /// In-memory store with the given progression config. For local runs and tests.
    pub fn in_memory(progression: ProgressionConfig) -> Self {
        Self::new(Arc::new(MemoryOrderStore::new()), progression, 1024)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Ask every open event stream to finish so graceful shutdown can complete.
    pub fn close_streams(&self) {
        self.closing.send_replace(true);
    }

    pub fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Boot helpers
// ---------------------------------------------------------------------------

/// Open the configured order store, migrating Postgres first when asked.
pub async fn open_store(cfg: &DaemonConfig) -> Result<Arc<dyn OrderStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            warn!("memory order store: orders do not survive a restart");
            Ok(Arc::new(MemoryOrderStore::new()))
        }
        StoreBackend::Postgres => {
            let url = dms_config::resolve_database_url(cfg)?;
            let pool = dms_db::connect(url.expose(), cfg.database.max_connections)
                .await
                .with_context(|| format!("connect via {}", url.source_var))?;
            if cfg.database.migrate_on_boot {
                dms_db::migrate(&pool).await?;
            }
            Ok(Arc::new(PgOrderStore::new(pool)))
        }
    }
}

/// Restart progression for every order stored mid-lifecycle.
///
/// Returns the number of tasks spawned.
pub async fn resume_in_flight(st: &AppState) -> Result<usize> {
    let pending: Vec<_> = lifecycle::LIFECYCLE
        .iter()
        .copied()
        .filter(|s| !s.is_terminal())
        .collect();
    let orders = st
        .store
        .list_orders_in_status(&pending)
        .await
        .context("list in-flight orders")?;
    let spawned = st.progression.resume(orders.iter().map(|o| o.id));
    info!(found = orders.len(), spawned, "resumed in-flight orders");
    Ok(spawned)
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    })
}
