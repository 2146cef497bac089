//! C6: reservable fleet of supervised sessions keyed by config
//! compatibility.
//!
//! A single pool mutex guards both the session map and each entry's
//! mutable fields (`state`, `last_used`, `use_count`) — the core never has
//! more than one writer contending for an entry's fields independent of
//! the map itself, so the spec's separate "per-session mutex" collapses
//! into this one lock without losing any serialization guarantee.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_core::{compatible, FleetError, ResourceCaps, Session, SessionConfig, SessionId, SessionState};
use fleet_process::{ProcessConfig, ProcessSupervisor};
use tokio::sync::{broadcast, Mutex};

use crate::spawner_factory::SpawnerFactory;
use crate::types::{PoolConfig, SessionEvent, SessionEventKind};

const EVENT_BUS_CAPACITY: usize = 256;

struct Entry {
    session: Session,
    supervisor: Arc<ProcessSupervisor>,
}

struct Inner {
    sessions: BTreeMap<SessionId, Entry>,
}

pub struct SessionPool {
    config: PoolConfig,
    spawner_factory: Arc<dyn SpawnerFactory>,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// A legal `(from, to)` edge per the session state table.
fn transition(session: &mut Session, to: SessionState) -> Result<(), FleetError> {
    if !SessionState::EDGES.contains(&(session.state, to)) {
        return Err(FleetError::InvalidTransition {
            from: format!("{:?}", session.state),
            to: format!("{to:?}"),
        });
    }
    session.state = to;
    Ok(())
}

fn session_valid(entry: &Entry) -> bool {
    !entry.session.state.is_terminal() && entry.session.state != SessionState::Closing && entry.supervisor.is_running()
}

impl SessionPool {
    #[must_use]
    pub fn new(config: PoolConfig, spawner_factory: Arc<dyn SpawnerFactory>) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            spawner_factory,
            inner: Mutex::new(Inner {
                sessions: BTreeMap::new(),
            }),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn next_session_id(&self) -> SessionId {
        format!("sess-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn emit(&self, session_id: &SessionId, kind: SessionEventKind, now: DateTime<Utc>) {
        let _ = self.events.send(SessionEvent {
            session_id: session_id.clone(),
            kind,
            timestamp: now,
            data: None,
            error: None,
        });
    }

    /// Reuse an idle compatible session, or spawn one — evicting the
    /// oldest idle session first if the pool is at capacity. Fails with
    /// `PoolExhausted` only when every slot is genuinely occupied by an
    /// active session.
    pub async fn acquire_session(
        &self,
        now: DateTime<Utc>,
        requested: &SessionConfig,
        process_config: ProcessConfig,
    ) -> Result<SessionId, FleetError> {
        let mut inner = self.inner.lock().await;

        if let Some(id) = Self::find_reusable(&mut inner, requested, now) {
            self.emit(&id, SessionEventKind::StateChanged, now);
            return Ok(id);
        }

        if inner.sessions.len() as u32 >= self.config.max_sessions {
            Self::evict_oldest_idle(&mut inner)
                .ok_or(FleetError::PoolExhausted)?;
        }

        let id = self.next_session_id();
        let supervisor = Arc::new(ProcessSupervisor::new(self.spawner_factory.make()));
        let mut session = Session::new(id.clone(), requested.clone(), now);
        transition(&mut session, SessionState::Ready)?;
        supervisor.start(process_config).await.map_err(|err| {
            let _ = transition(&mut session, SessionState::Error);
            err
        })?;
        session.pid = supervisor.pid();
        transition(&mut session, SessionState::Active)?;
        session.last_used = now;
        session.use_count = 1;

        inner.sessions.insert(
            id.clone(),
            Entry {
                session,
                supervisor,
            },
        );
        drop(inner);
        self.emit(&id, SessionEventKind::Created, now);
        Ok(id)
    }

    fn find_reusable(inner: &mut Inner, requested: &SessionConfig, now: DateTime<Utc>) -> Option<SessionId> {
        let candidate = inner
            .sessions
            .values()
            .find(|entry| entry.session.state == SessionState::Idle && session_valid(entry) && compatible(&entry.session.config, requested))
            .map(|entry| entry.session.id.clone())?;

        let entry = inner.sessions.get_mut(&candidate)?;
        transition(&mut entry.session, SessionState::Active).ok()?;
        entry.session.last_used = now;
        entry.session.use_count += 1;
        Some(candidate)
    }

    fn evict_oldest_idle(inner: &mut Inner) -> Option<SessionId> {
        let victim = inner
            .sessions
            .values()
            .filter(|e| e.session.state == SessionState::Idle)
            .min_by_key(|e| e.session.last_used)
            .map(|e| e.session.id.clone())?;
        inner.sessions.remove(&victim);
        Some(victim)
    }

    pub async fn release_session(&self, id: &SessionId, now: DateTime<Utc>) -> Result<(), FleetError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.sessions.get_mut(id).ok_or_else(|| FleetError::UnknownSession(id.clone()))?;
        if entry.session.state != SessionState::Active {
            return Err(FleetError::NotInUse(id.clone()));
        }
        transition(&mut entry.session, SessionState::Idle)?;
        entry.session.last_used = now;
        drop(inner);
        self.emit(id, SessionEventKind::StateChanged, now);
        Ok(())
    }

    pub async fn remove_session(&self, id: &SessionId) -> Result<(), FleetError> {
        let mut inner = self.inner.lock().await;
        let mut entry = inner.sessions.remove(id).ok_or_else(|| FleetError::UnknownSession(id.clone()))?;
        let _ = transition(&mut entry.session, SessionState::Closing);
        entry.supervisor.kill().await?;
        drop(inner);
        self.emit(id, SessionEventKind::Closed, Utc::now());
        Ok(())
    }

    /// Snapshot every session currently tracked by the pool, for listing
    /// and status reporting. Order follows the `SessionId` ordering of
    /// the underlying map.
    pub async fn list(&self) -> Vec<Session> {
        self.inner.lock().await.sessions.values().map(|e| e.session.clone()).collect()
    }

    /// Snapshot `(id, supervisor, resource_caps)` triples, for wiring a
    /// health checker's `SessionRegistry` boundary (and the scaler's
    /// resource sampling) against this pool.
    pub async fn session_supervisors(&self) -> Vec<(SessionId, Arc<ProcessSupervisor>, ResourceCaps)> {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .map(|e| (e.session.id.clone(), e.supervisor.clone(), e.session.config.resource_caps.clone()))
            .collect()
    }

    pub async fn stats(&self) -> fleet_core::PoolStats {
        let inner = self.inner.lock().await;
        let total = inner.sessions.len() as u32;
        let active = inner.sessions.values().filter(|e| e.session.state == SessionState::Active).count() as u32;
        let idle = inner.sessions.values().filter(|e| e.session.state == SessionState::Idle).count() as u32;
        fleet_core::PoolStats {
            total,
            active,
            idle,
            max_capacity: self.config.max_sessions,
        }
    }

    /// Scale to `target`: spawn idle sessions with `default_config` /
    /// `default_process_config` when growing, or close idle-preferred
    /// sessions (highest `now - last_used`, ties broken by lowest
    /// `use_count`) when shrinking. Active sessions are never closed here.
    pub async fn resize(
        &self,
        target: u32,
        now: DateTime<Utc>,
        default_config: &SessionConfig,
        default_process_config: impl Fn() -> ProcessConfig,
    ) -> Result<(), FleetError> {
        loop {
            let current = self.inner.lock().await.sessions.len() as u32;
            if current >= target {
                break;
            }
            let id = self.next_session_id();
            let supervisor = Arc::new(ProcessSupervisor::new(self.spawner_factory.make()));
            let mut session = Session::new(id.clone(), default_config.clone(), now);
            transition(&mut session, SessionState::Ready)?;
            supervisor.start(default_process_config()).await?;
            session.pid = supervisor.pid();
            let mut inner = self.inner.lock().await;
            inner.sessions.insert(id.clone(), Entry { session, supervisor });
            drop(inner);
            self.emit(&id, SessionEventKind::Created, now);
        }

        loop {
            let mut inner = self.inner.lock().await;
            if inner.sessions.len() as u32 <= target {
                break;
            }
            let victim = inner
                .sessions
                .values()
                .filter(|e| e.session.state == SessionState::Idle)
                .min_by(|a, b| {
                    let age_a = now - a.session.last_used;
                    let age_b = now - b.session.last_used;
                    age_b.cmp(&age_a).then(a.session.use_count.cmp(&b.session.use_count))
                })
                .map(|e| e.session.id.clone());
            let Some(id) = victim else {
                break;
            };
            let mut entry = inner.sessions.remove(&id).expect("just matched");
            drop(inner);
            let _ = transition(&mut entry.session, SessionState::Closing);
            let _ = entry.supervisor.kill().await;
            self.emit(&id, SessionEventKind::Closed, now);
        }
        Ok(())
    }

    /// Close sessions past their idle/lifetime limit or that fail
    /// validation. Active sessions are left alone — an in-flight
    /// reservation should never be yanked out from under its caller.
    pub async fn reap(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let stale: Vec<SessionId> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .values()
                .filter(|e| e.session.state != SessionState::Active)
                .filter(|e| {
                    let idle_for = now - e.session.last_used;
                    let age = now - e.session.created_at;
                    idle_for > chrono::Duration::from_std(self.config.max_idle_time).unwrap_or(chrono::Duration::MAX)
                        || age > chrono::Duration::from_std(self.config.max_lifetime).unwrap_or(chrono::Duration::MAX)
                        || !session_valid(e)
                })
                .map(|e| e.session.id.clone())
                .collect()
        };
        for id in &stale {
            let _ = self.remove_session(id).await;
        }
        stale
    }
}
