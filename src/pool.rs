//! Bounded pool of page-rendering sessions.
//!
//! The pool lends out at most `capacity` pages of a [`BrowserEngine`] at a
//! time. Callers past capacity wait for a release notification until the
//! acquire timeout elapses. The engine itself is started lazily on first
//! use, and a disconnected engine puts the pool back into its uninitialized
//! state so the next acquire launches a fresh one.
//!
//! Leases return themselves when dropped, so a caller whose future is
//! cancelled mid-fetch never strands a slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::engine::BrowserEngine;
use crate::error::{EngineError, PoolError};

/// Pool sizing and timing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of sessions that may exist at once
    pub capacity: usize,

    /// How long `acquire` waits for a free session before giving up
    pub acquire_timeout: Duration,

    /// Idle sessions older than this are destroyed by the reaper
    pub idle_max_age: Duration,

    /// How often the reaper runs
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_max_age: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A page leased from the pool.
///
/// Dropping the lease hands the page back; [`ResourcePool::release`] does the
/// same thing explicitly.
pub struct Session<P> {
    id: SessionId,
    page: Arc<P>,
    created_at: Instant,
    acquired_at: Instant,
    home: Weak<Shared<P>>,
}

impl<P> Session<P> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Mark the session idle in its pool. False if the pool no longer knows it.
    fn check_in(&mut self) -> bool {
        match std::mem::take(&mut self.home).upgrade() {
            Some(shared) => shared.check_in(self.id),
            None => false,
        }
    }
}

impl<P> Drop for Session<P> {
    fn drop(&mut self) {
        self.check_in();
    }
}

impl<P> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub initialized: bool,
    pub closed: bool,
}

struct SessionEntry<P> {
    page: Arc<P>,
    in_use: bool,
    created_at: Instant,
    last_used_at: Instant,
}

struct PoolState<P> {
    sessions: HashMap<SessionId, SessionEntry<P>>,
    /// Slots reserved by callers currently opening a page
    opening: usize,
    /// Bumped on every reset so openers from a dead engine can tell
    generation: u64,
    closed: bool,
}

impl<P> PoolState<P> {
    fn clear(&mut self) -> Vec<Arc<P>> {
        self.opening = 0;
        self.generation += 1;
        self.sessions.drain().map(|(_, e)| e.page).collect()
    }
}

/// Session table plus the wakeup for callers waiting on it. Leases and
/// reservations point back here so they can settle on drop.
struct Shared<P> {
    state: Mutex<PoolState<P>>,
    released: Notify,
}

impl<P> Shared<P> {
    // Never held across an await, so a plain mutex is enough.
    fn lock(&self) -> MutexGuard<'_, PoolState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_in(&self, id: SessionId) -> bool {
        let mut state = self.lock();
        match state.sessions.get_mut(&id) {
            Some(entry) => {
                entry.in_use = false;
                entry.last_used_at = Instant::now();
                drop(state);
                self.released.notify_one();
                true
            }
            None => false,
        }
    }
}

/// A capacity slot held while a page is being opened.
///
/// Settled under the table lock once the open finishes; if the opener is
/// dropped first, the slot is handed back on drop.
struct Reservation<'a, P> {
    shared: &'a Shared<P>,
    generation: u64,
    settled: bool,
}

impl<P> Reservation<'_, P> {
    /// Give the slot back. False if a reset already discarded it.
    fn settle(&mut self, state: &mut PoolState<P>) -> bool {
        self.settled = true;
        let current = state.generation == self.generation;
        if current {
            state.opening -= 1;
        }
        current
    }
}

impl<P> Drop for Reservation<'_, P> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let shared = self.shared;
        let mut state = shared.lock();
        if self.settle(&mut state) {
            log::debug!("Page open abandoned, slot returned");
        }
        drop(state);
        shared.released.notify_one();
    }
}

enum Checkout<P> {
    Leased(Session<P>),
    Reserved(u64),
    Full,
}

pub struct ResourcePool<E: BrowserEngine> {
    engine: Arc<E>,
    config: PoolConfig,
    shared: Arc<Shared<E::Page>>,
    /// Serializes engine start-up; holds whether the engine is running
    init: tokio::sync::Mutex<bool>,
    ready: AtomicBool,
    next_id: AtomicU64,
}

impl<E: BrowserEngine> ResourcePool<E> {
    pub fn new(engine: Arc<E>, config: PoolConfig) -> Self {
        Self {
            engine,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    sessions: HashMap::new(),
                    opening: 0,
                    generation: 0,
                    closed: false,
                }),
                released: Notify::new(),
            }),
            init: tokio::sync::Mutex::new(false),
            ready: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Lease a session, starting the engine if needed.
    ///
    /// Reuses an idle session when there is one, opens a new page while under
    /// capacity, and otherwise waits for a release. Fails with
    /// [`PoolError::Exhausted`] once `acquire_timeout` has passed.
    pub async fn acquire(&self) -> Result<Session<E::Page>, PoolError> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;

        loop {
            self.ensure_initialized().await?;

            // Register interest before inspecting the table so a release
            // between the check and the wait is not lost.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.checkout()? {
                Checkout::Leased(session) => {
                    log::debug!("Reusing {}", session.id);
                    return Ok(session);
                }
                Checkout::Reserved(generation) => return self.open_reserved(generation).await,
                Checkout::Full => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let waited = started.elapsed();
                log::warn!(
                    "Pool exhausted: no session freed within {:?} (capacity {})",
                    waited,
                    self.config.capacity
                );
                return Err(PoolError::Exhausted { waited });
            }
        }
    }

    /// Return a session to the pool. Unknown sessions are ignored.
    pub async fn release(&self, mut session: Session<E::Page>) {
        if !session.check_in() {
            log::debug!("Release of unknown {} ignored", session.id);
        }
    }

    /// Destroy idle sessions unused for longer than `max_age`. Returns how many.
    pub async fn cleanup_idle(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<E::Page>> = {
            let mut state = self.shared.lock();
            let ids: Vec<SessionId> = state
                .sessions
                .iter()
                .filter(|(_, e)| !e.in_use && now.duration_since(e.last_used_at) > max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| state.sessions.remove(id))
                .map(|e| e.page)
                .collect()
        };

        for page in &expired {
            self.engine.close_page(page).await;
        }

        if !expired.is_empty() {
            log::debug!("Closed {} idle session(s)", expired.len());
            // Freed capacity lets blocked callers open fresh pages.
            self.shared.released.notify_waiters();
        }

        expired.len()
    }

    /// Run [`cleanup_idle`](Self::cleanup_idle) periodically until shutdown.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.reap_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.is_closed().await {
                    break;
                }
                let reaped = pool.cleanup_idle(pool.config.idle_max_age).await;
                if reaped > 0 {
                    log::info!("Reaped {} idle session(s)", reaped);
                }
            }
        })
    }

    /// Close every session, stop the engine and refuse further acquires.
    pub async fn shutdown(&self) {
        let pages = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.clear()
        };

        self.shared.released.notify_waiters();

        for page in &pages {
            self.engine.close_page(page).await;
        }

        let mut running = self.init.lock().await;
        if *running {
            self.engine.stop().await;
            *running = false;
            self.ready.store(false, Ordering::SeqCst);
        }

        log::info!("Pool shut down, {} session(s) closed", pages.len());
    }

    /// Forget all sessions after the engine went away.
    ///
    /// The next acquire starts a new engine. Outstanding leases become
    /// unknown to the pool and their release is a no-op.
    pub async fn handle_disconnect(&self) {
        let mut running = self.init.lock().await;
        self.reset_sessions();
        *running = false;
        self.ready.store(false, Ordering::SeqCst);
        drop(running);
        self.shared.released.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let in_use = state.sessions.values().filter(|e| e.in_use).count();
        PoolStatus {
            capacity: self.config.capacity,
            total: state.sessions.len(),
            in_use,
            idle: state.sessions.len() - in_use,
            initialized: self.ready.load(Ordering::SeqCst),
            closed: state.closed,
        }
    }

    async fn ensure_initialized(&self) -> Result<(), PoolError> {
        let mut running = self.init.lock().await;

        if self.shared.lock().closed {
            return Err(PoolError::Closed);
        }

        if *running && !self.engine.is_connected() {
            log::warn!("Rendering engine disconnected, dropping all sessions");
            self.reset_sessions();
            *running = false;
            self.ready.store(false, Ordering::SeqCst);
            self.shared.released.notify_waiters();
        }

        if !*running {
            log::info!("Starting rendering engine (capacity {})", self.config.capacity);
            self.engine.start().await?;
            *running = true;
            self.ready.store(true, Ordering::SeqCst);
        }

        Ok(())
    }

    fn reset_sessions(&self) {
        let dropped = self.shared.lock().clear();
        if !dropped.is_empty() {
            log::debug!("Dropped {} session(s) from a dead engine", dropped.len());
        }
    }

    fn checkout(&self) -> Result<Checkout<E::Page>, PoolError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        let now = Instant::now();
        if let Some((id, entry)) = state.sessions.iter_mut().find(|(_, e)| !e.in_use) {
            entry.in_use = true;
            entry.last_used_at = now;
            return Ok(Checkout::Leased(Session {
                id: *id,
                page: Arc::clone(&entry.page),
                created_at: entry.created_at,
                acquired_at: now,
                home: Arc::downgrade(&self.shared),
            }));
        }

        if state.sessions.len() + state.opening < self.config.capacity {
            state.opening += 1;
            return Ok(Checkout::Reserved(state.generation));
        }

        Ok(Checkout::Full)
    }

    async fn open_reserved(&self, generation: u64) -> Result<Session<E::Page>, PoolError> {
        let mut reservation = Reservation {
            shared: &self.shared,
            generation,
            settled: false,
        };

        let opened = self.engine.open_page().await;

        let (page, closed) = {
            let mut state = self.shared.lock();
            let current = reservation.settle(&mut state);

            let page = match opened {
                Ok(page) => page,
                Err(e) => {
                    drop(state);
                    self.shared.released.notify_one();
                    return Err(e.into());
                }
            };

            if !(state.closed || !current) {
                let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let now = Instant::now();
                let page = Arc::new(page);
                state.sessions.insert(
                    id,
                    SessionEntry {
                        page: Arc::clone(&page),
                        in_use: true,
                        created_at: now,
                        last_used_at: now,
                    },
                );
                log::debug!("Opened {} ({}/{})", id, state.sessions.len(), self.config.capacity);

                return Ok(Session {
                    id,
                    page,
                    created_at: now,
                    acquired_at: now,
                    home: Arc::downgrade(&self.shared),
                });
            }
            let closed = state.closed;
            drop(state);
            (page, closed)
        };
        self.engine.close_page(&page).await;
        Err(if closed {
            PoolError::Closed
        } else {
            EngineError::Disconnected.into()
        })
    }
}
