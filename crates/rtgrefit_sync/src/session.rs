//! Sync Session - the project context of one signed-in (or anonymous) user.
//!
//! Wires the store, multiplexer, executor and aggregator together and owns
//! the transitions between data sources:
//!
//! | Mode     | Source                        | Writes                 |
//! |----------|-------------------------------|------------------------|
//! | `Idle`   | nothing loaded                | rejected (no scope)    |
//! | `Live`   | remote feeds                  | remote gateway         |
//! | `Cached` | local cache (remote disabled) | rolled back            |
//! | `Demo`   | fallback dataset              | in-memory gateway      |
//!
//! Every transition closes all feeds and bumps the store epoch before the new
//! source is attached.

use crate::aggregator::ZoneAggregator;
use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::executor::MutationExecutor;
use crate::fallback::{self, FallbackDataset, DEMO_SCOPE};
use crate::gateway::{MemoryGateway, OfflineGateway, RemoteGateway};
use crate::multiplexer::{SnapshotTap, SubscriptionMultiplexer};
use crate::notices::NoticeBoard;
use crate::store::{SharedStore, StoreEvent};
use rtgrefit_protocol::{EntityKind, Record, ScopeKey, SyncError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Live { scope: ScopeKey },
    Cached { scope: ScopeKey },
    Demo { scope: ScopeKey },
}

impl SessionMode {
    pub fn scope(&self) -> Option<&ScopeKey> {
        match self {
            SessionMode::Idle => None,
            SessionMode::Live { scope }
            | SessionMode::Cached { scope }
            | SessionMode::Demo { scope } => Some(scope),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Idle => "idle",
            SessionMode::Live { .. } => "live",
            SessionMode::Cached { .. } => "cached",
            SessionMode::Demo { .. } => "demo",
        }
    }
}

/// Authentication signal consumed from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn { scope: Option<ScopeKey> },
}

pub struct SyncSession {
    config: SyncConfig,
    store: SharedStore,
    remote: Arc<dyn RemoteGateway>,
    multiplexer: SubscriptionMultiplexer,
    executor: Arc<MutationExecutor>,
    notices: NoticeBoard,
    cache: Option<LocalCache>,
    mode: Mutex<SessionMode>,
}

impl SyncSession {
    /// A session talking to `gateway`. When the remote is disabled in `config`
    /// the gateway is ignored and every scope is served from the cache.
    pub fn new(config: SyncConfig, gateway: Arc<dyn RemoteGateway>) -> Self {
        let remote: Arc<dyn RemoteGateway> = if config.remote.enabled {
            gateway
        } else {
            info!("Remote disabled; sessions run from the local cache");
            Arc::new(OfflineGateway)
        };
        let store = SharedStore::new();
        let notices = NoticeBoard::new();
        let multiplexer = SubscriptionMultiplexer::new(store.clone(), remote.clone());
        let executor = Arc::new(MutationExecutor::new(
            store.clone(),
            remote.clone(),
            notices.clone(),
        ));
        Self {
            config,
            store,
            remote,
            multiplexer,
            executor,
            notices,
            cache: None,
            mode: Mutex::new(SessionMode::Idle),
        }
    }

    /// Persist accepted Unit and Work Order snapshots to `cache`, and use it
    /// as the data source while the remote is disabled.
    pub fn with_cache(mut self, cache: LocalCache) -> Self {
        let tap = snapshot_writer(cache.clone());
        let multiplexer = SubscriptionMultiplexer::new(self.store.clone(), self.remote.clone());
        self.multiplexer = multiplexer.with_tap(tap);
        self.cache = Some(cache);
        self
    }

    /// Open the cache under the configured home when caching is enabled.
    pub fn with_configured_cache(self) -> anyhow::Result<Self> {
        if !self.config.cache.enabled {
            return Ok(self);
        }
        let cache = LocalCache::new(self.config.cache_dir())?;
        Ok(self.with_cache(cache))
    }

    fn mode_lock(&self) -> MutexGuard<'_, SessionMode> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_mode(&self, mode: SessionMode) {
        info!("Session mode: {}", mode.as_str());
        *self.mode_lock() = mode;
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// React to a sign-in state change. Signed-out users get the demo
    /// project; signed-in users without a selection resume the last
    /// persisted scope, if any.
    pub fn apply_auth(&self, auth: AuthState) -> Vec<SyncError> {
        match auth {
            AuthState::SignedOut => {
                self.enter_demo();
                Vec::new()
            }
            AuthState::SignedIn { scope: Some(scope) } => self.select_scope(&scope),
            AuthState::SignedIn { scope: None } => match self.restore_scope() {
                Some(errors) => errors,
                None => {
                    self.clear_scope();
                    Vec::new()
                }
            },
        }
    }

    /// Switch to `scope`. Feed failures are returned and raised as notices;
    /// their slices stay unloaded.
    pub fn select_scope(&self, scope: &ScopeKey) -> Vec<SyncError> {
        self.executor.set_gateway(self.remote.clone());
        let errors = if self.config.remote.enabled {
            let errors = self.multiplexer.switch_scope(Some(scope));
            self.executor.reset();
            self.set_mode(SessionMode::Live {
                scope: scope.clone(),
            });
            errors
        } else {
            self.multiplexer.detach(Some(scope));
            self.executor.reset();
            let errors = self.load_cached(scope);
            self.set_mode(SessionMode::Cached {
                scope: scope.clone(),
            });
            errors
        };

        for err in &errors {
            self.notices.push(err);
        }
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.save_scope(scope) {
                warn!("Failed to persist scope {}: {:#}", scope, err);
            }
        }
        errors
    }

    fn load_cached(&self, scope: &ScopeKey) -> Vec<SyncError> {
        let mut errors = Vec::new();
        let mut slices: Vec<(EntityKind, Vec<Record>)> = Vec::new();
        for kind in EntityKind::FEEDS {
            let records = match (&self.cache, kind.is_cached()) {
                (Some(cache), true) => match cache.load_snapshot(scope, kind) {
                    Ok(Some(snapshot)) => {
                        debug!(
                            "Loaded {} cached {} (saved {})",
                            snapshot.records.len(),
                            kind,
                            snapshot.saved_at
                        );
                        snapshot.records
                    }
                    Ok(None) => Vec::new(),
                    Err(err) => {
                        errors.push(SyncError::Cache(format!("{:#}", err)));
                        Vec::new()
                    }
                },
                _ => Vec::new(),
            };
            slices.push((kind, records));
        }
        self.store.write(|s| {
            for (kind, records) in slices {
                s.replace(kind, records);
            }
        });
        errors
    }

    /// Drop the selected scope. Nothing stays loaded.
    pub fn clear_scope(&self) {
        self.multiplexer.detach(None);
        self.executor.reset();
        self.executor.set_gateway(self.remote.clone());
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear_scope() {
                warn!("Failed to clear persisted scope: {:#}", err);
            }
        }
        self.set_mode(SessionMode::Idle);
    }

    /// Load the deterministic demo project. Edits are accepted by an
    /// in-memory gateway seeded with the same data.
    pub fn enter_demo(&self) -> FallbackDataset {
        let dataset = fallback::generate(&self.config.seed_config());
        let scope = ScopeKey::from(DEMO_SCOPE);
        self.multiplexer.detach(Some(&scope));
        self.executor.reset();

        let slices = dataset.slices();
        let demo = MemoryGateway::new();
        demo.seed(slices.iter().flat_map(|(_, records)| records.iter().cloned()));
        self.executor.set_gateway(Arc::new(demo));

        self.store.write(|s| {
            for (kind, records) in slices {
                s.replace(kind, records);
            }
        });
        self.set_mode(SessionMode::Demo { scope });
        dataset
    }

    /// Re-select the scope persisted in the cache. `None` when there is
    /// nothing to restore.
    pub fn restore_scope(&self) -> Option<Vec<SyncError>> {
        let cache = self.cache.as_ref()?;
        match cache.load_scope() {
            Ok(Some(scope)) => {
                info!("Restoring scope {}", scope);
                Some(self.select_scope(&scope))
            }
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read persisted scope: {:#}", err);
                None
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn mode(&self) -> SessionMode {
        self.mode_lock().clone()
    }

    pub fn require_scope(&self) -> Result<ScopeKey, SyncError> {
        self.store.scope().ok_or(SyncError::ScopeMissing)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn executor(&self) -> Arc<MutationExecutor> {
        self.executor.clone()
    }

    pub fn aggregator(&self) -> ZoneAggregator {
        ZoneAggregator::new(self.store.clone())
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }
}

/// Tap persisting every accepted cacheable snapshot into `cache`.
fn snapshot_writer(cache: LocalCache) -> SnapshotTap {
    Arc::new(move |kind: EntityKind, scope: &ScopeKey, records: &[Record]| {
        if let Err(err) = cache.save_snapshot(scope, kind, records) {
            warn!("Failed to cache {} snapshot for {}: {:#}", kind, scope, err);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Reply;
    use crate::testing::{unit, work_order, zone};
    use rtgrefit_protocol::{EquipmentUnit, UnitId, UnitStatus, WorkOrder};
    use tempfile::TempDir;

    fn config(home: &std::path::Path, remote: bool) -> SyncConfig {
        let mut config = SyncConfig {
            home: home.to_path_buf(),
            ..SyncConfig::default()
        };
        config.remote.enabled = remote;
        config.fallback.units = 2;
        config
    }

    fn live(temp: &TempDir) -> (MemoryGateway, SyncSession) {
        let gateway = MemoryGateway::new();
        gateway.seed([
            unit("P1", "U1").into(),
            zone("P1", "U1", "Z1", 0).into(),
            work_order("P1", "U1", "wo1").into(),
        ]);
        let session = SyncSession::new(config(temp.path(), true), Arc::new(gateway.clone()))
            .with_configured_cache()
            .unwrap();
        (gateway, session)
    }

    fn unit_status(session: &SyncSession, id: &str) -> UnitStatus {
        let unit = session.store().entity::<EquipmentUnit>(id).unwrap();
        unit.status
    }

    #[test]
    fn test_starts_idle_without_scope() {
        let temp = TempDir::new().unwrap();
        let (_gateway, session) = live(&temp);
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(session.require_scope(), Err(SyncError::ScopeMissing));
    }

    #[test]
    fn test_select_scope_goes_live_and_caches() {
        let temp = TempDir::new().unwrap();
        let (_gateway, session) = live(&temp);
        let p1 = ScopeKey::from("P1");
        let errors = session.select_scope(&p1);
        assert!(errors.is_empty());
        assert_eq!(session.mode(), SessionMode::Live { scope: p1.clone() });
        assert_eq!(session.store().entities::<EquipmentUnit>().len(), 1);

        let cache = LocalCache::new(session.config().cache_dir()).unwrap();
        let cached = cache.load_snapshot(&p1, EntityKind::Units).unwrap();
        assert_eq!(cached.unwrap().records.len(), 1);
        let zones = cache.load_snapshot(&p1, EntityKind::Zones).unwrap();
        assert!(zones.is_none());
        assert_eq!(cache.load_scope().unwrap(), Some(p1));
    }

    #[test]
    fn test_feed_failure_raises_notice() {
        let temp = TempDir::new().unwrap();
        let (gateway, session) = live(&temp);
        gateway.fail_feed(EntityKind::Inspections);
        let errors = session.select_scope(&ScopeKey::from("P1"));
        assert_eq!(errors.len(), 1);
        assert_eq!(session.notices().active().len(), 1);
        assert!(session.store().get(EntityKind::Inspections).is_none());
        assert!(session.store().get(EntityKind::Units).is_some());
    }

    #[test]
    fn test_cached_mode_reads_cache_and_rejects_writes() {
        let temp = TempDir::new().unwrap();
        {
            let (_gateway, session) = live(&temp);
            session.select_scope(&ScopeKey::from("P1"));
        }

        let session = SyncSession::new(config(temp.path(), false), Arc::new(MemoryGateway::new()))
            .with_configured_cache()
            .unwrap();
        let errors = session.apply_auth(AuthState::SignedIn { scope: None });
        assert!(errors.is_empty());
        let p1 = ScopeKey::from("P1");
        assert_eq!(session.mode(), SessionMode::Cached { scope: p1 });
        assert_eq!(session.store().entities::<EquipmentUnit>().len(), 1);
        assert_eq!(session.store().entities::<WorkOrder>().len(), 1);
        assert_eq!(session.store().get(EntityKind::Zones), Some(Vec::new()));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let executor = session.executor();
        let u1 = UnitId::from("U1");
        let write = executor.set_unit_status(&u1, UnitStatus::Cleaning);
        let err = rt.block_on(write).unwrap_err();
        assert!(err.to_string().contains("remote disabled"));
        assert_eq!(unit_status(&session, "U1"), UnitStatus::Pending);
    }

    #[tokio::test]
    async fn test_signed_out_enters_demo_with_local_edits() {
        let temp = TempDir::new().unwrap();
        let (gateway, session) = live(&temp);
        session.select_scope(&ScopeKey::from("P1"));
        gateway.script_writes([Reply::fail("must not reach the live remote")]);

        session.apply_auth(AuthState::SignedOut);
        let demo = ScopeKey::from(DEMO_SCOPE);
        assert_eq!(session.mode(), SessionMode::Demo { scope: demo });
        assert_eq!(session.multiplexer().open_handles().len(), 0);
        for kind in EntityKind::ALL {
            assert!(session.store().get(kind).is_some(), "{} not loaded", kind);
        }

        let units = session.store().entities::<EquipmentUnit>();
        assert_eq!(units.len(), 2);
        session
            .executor()
            .set_unit_status(&units[0].id, UnitStatus::InProgress)
            .await
            .unwrap();
        let status = unit_status(&session, units[0].id.as_str());
        assert_eq!(status, UnitStatus::InProgress);
        assert_eq!(gateway.write_count(), 0);
    }

    #[test]
    fn test_clear_scope_unloads_everything() {
        let temp = TempDir::new().unwrap();
        let (_gateway, session) = live(&temp);
        session.select_scope(&ScopeKey::from("P1"));
        let mut events = session.changes();

        session.clear_scope();
        assert_eq!(session.mode(), SessionMode::Idle);
        assert!(session.store().get(EntityKind::Units).is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::ScopeChanged { scope: None, .. }
        ));
        assert!(session.restore_scope().is_none());
    }
}
