//! Session controller
//!
//! Owns one trading session per `(user, market)`. Each session runs on its own
//! scheduler task:
//!
//! - The first cycle starts immediately, then one per `interval`
//! - A cycle still in flight when the next one is due causes that tick to be
//!   skipped and recorded, never queued
//! - Rate-limited cycles are retried once after the indicated delay; network
//!   failures are retried once only if no order was being submitted
//! - An authentication failure moves the session to `ERROR` and halts its
//!   scheduler until `stop` is called
//!
//! `stop` halts the scheduler, waits for the in-flight cycle, drops the
//! credentials and marks the session `STOPPED`. The last snapshot of a stopped
//! session is retained so `stop` and `status` stay idempotent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TradingConfig;
use crate::cycle::{
    CycleEngine, CycleError, CycleOutcome, CycleReport, CycleState, DecisionRecord, PaperAccount,
};
use crate::error::{ErrorKind, TradingError, TradingResult};
use crate::exchange::Exchange;
use crate::risk::RiskManager;
use crate::types::{Market, Position};
use crate::upbit::Credentials;

/// Entries kept in a session's event journal
pub const MAX_EVENTS: usize = 50;

/// Delay before retrying a rate-limited cycle when the exchange sent no hint
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub market: Market,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, market: Market) -> Self {
        Self {
            user_id: user_id.into(),
            market,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Started,
    CycleSkipped,
    OrderSubmitted,
    OrderRejected,
    ForcedExit,
    Retry,
    CycleFailed,
    Halted,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a session, as reported by the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub market: Market,
    pub status: SessionStatus,
    pub is_running: bool,
    pub test_mode: bool,
    pub config: TradingConfig,
    pub created_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_decision: Option<DecisionRecord>,
    pub open_position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_account: Option<PaperAccount>,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub last_error: Option<LastError>,
    pub events: VecDeque<SessionEvent>,
}

impl SessionSnapshot {
    fn new(key: &SessionKey, config: &TradingConfig, paper: Option<PaperAccount>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: key.user_id.clone(),
            market: key.market.clone(),
            status: SessionStatus::Running,
            is_running: true,
            test_mode: config.test_mode,
            config: config.clone(),
            created_at: Utc::now(),
            last_cycle_at: None,
            last_decision: None,
            open_position: None,
            paper_account: paper,
            cycles_completed: 0,
            cycles_skipped: 0,
            cycles_failed: 0,
            orders_submitted: 0,
            orders_rejected: 0,
            last_error: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    fn push_event(&mut self, kind: EventKind, message: impl Into<String>) {
        if self.events.len() == MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SessionEvent {
            at: Utc::now(),
            kind,
            message: message.into(),
        });
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.is_running = status == SessionStatus::Running;
    }
}

/// State a cycle needs exclusive access to; locked for the whole cycle
struct SessionRuntime {
    credentials: Option<Credentials>,
    config: TradingConfig,
    risk: RiskManager,
    state: CycleState,
}

struct SessionHandle {
    key: SessionKey,
    /// `Credentials::fingerprint` of the key that started the session
    owner: String,
    interval: Duration,
    view: Mutex<SessionSnapshot>,
    runtime: Arc<AsyncMutex<SessionRuntime>>,
    halt_tx: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    fn snapshot(&self) -> SessionSnapshot {
        self.view.lock().clone()
    }

    fn is_halted(&self) -> bool {
        *self.halt_tx.borrow()
    }

    fn halt(&self) {
        self.halt_tx.send_replace(true);
    }

    fn record_skip(&self) {
        let mut view = self.view.lock();
        view.cycles_skipped += 1;
        view.push_event(EventKind::CycleSkipped, "previous cycle still running");
    }

    fn record_event(&self, kind: EventKind, message: impl Into<String>) {
        self.view.lock().push_event(kind, message);
    }

    fn record_report(&self, report: CycleReport, state: &CycleState) {
        let mut view = self.view.lock();
        view.cycles_completed += 1;
        view.last_cycle_at = Some(Utc::now());
        view.open_position = state.position.clone();
        view.paper_account = state.paper;

        match &report.outcome {
            CycleOutcome::Held => {}
            CycleOutcome::Rejected(reason) => {
                view.orders_rejected += 1;
                view.push_event(EventKind::OrderRejected, reason.to_string());
            }
            CycleOutcome::Submitted {
                order,
                order_id,
                exit,
            } => {
                view.orders_submitted += 1;
                if let Some(reason) = exit {
                    view.push_event(
                        EventKind::ForcedExit,
                        format!("{reason} at {}", report.decision.price),
                    );
                }
                let amount = order.volume.or(order.price).unwrap_or_default();
                view.push_event(
                    EventKind::OrderSubmitted,
                    format!(
                        "{} {} {} ({})",
                        order.side.as_wire(),
                        order.wire_ord_type(),
                        amount,
                        order_id
                    ),
                );
            }
        }
        view.last_decision = Some(report.decision);
    }

    /// Record a failed cycle; returns true when the session must halt
    fn record_failure(&self, failure: &CycleError) -> bool {
        let mut view = self.view.lock();
        view.cycles_failed += 1;
        view.last_cycle_at = Some(Utc::now());
        view.last_error = Some(LastError {
            kind: failure.error.kind(),
            message: failure.error.to_string(),
            at: Utc::now(),
        });
        view.push_event(EventKind::CycleFailed, failure.to_string());

        if matches!(failure.error, TradingError::Auth { .. }) {
            view.set_status(SessionStatus::Error);
            view.push_event(
                EventKind::Halted,
                "credentials rejected; scheduling halted until stop",
            );
            return true;
        }
        false
    }
}

/// Last snapshot of a stopped session
struct RetainedSession {
    owner: String,
    snapshot: SessionSnapshot,
}

/// Registry and lifecycle of all trading sessions
pub struct SessionController<E: Exchange> {
    engine: Arc<CycleEngine<E>>,
    sessions: AsyncMutex<HashMap<SessionKey, Arc<SessionHandle>>>,
    retained: Mutex<HashMap<SessionKey, RetainedSession>>,
}

impl<E: Exchange> SessionController<E> {
    pub fn new(exchange: Arc<E>) -> Self {
        Self {
            engine: Arc::new(CycleEngine::new(exchange)),
            sessions: AsyncMutex::new(HashMap::new()),
            retained: Mutex::new(HashMap::new()),
        }
    }

    /// Create a RUNNING session and schedule its first cycle immediately.
    ///
    /// Fails with `Conflict` while any session (running or errored) exists
    /// for the same user and market.
    pub async fn start(
        &self,
        user_id: &str,
        market: Market,
        credentials: Credentials,
        config: TradingConfig,
    ) -> TradingResult<SessionSnapshot> {
        if credentials.is_anonymous() {
            return Err(TradingError::Auth {
                status: 401,
                message: "accessKey and secretKey are required".to_string(),
            });
        }
        config.validate()?;
        let risk = RiskManager::new(config.risk_management.clone())?;

        let key = SessionKey::new(user_id, market);
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&key) {
            return Err(TradingError::Conflict {
                user_id: key.user_id,
                market: key.market.to_string(),
            });
        }

        let state = CycleState::new(&config);
        let mut view = SessionSnapshot::new(&key, &config, state.paper);
        view.push_event(
            EventKind::Started,
            format!(
                "every {}ms, {}",
                config.interval,
                if config.test_mode { "paper" } else { "live" }
            ),
        );
        let snapshot = view.clone();

        let (halt_tx, halt_rx) = watch::channel(false);
        let handle = Arc::new(SessionHandle {
            key: key.clone(),
            owner: credentials.fingerprint(),
            interval: config.interval(),
            view: Mutex::new(view),
            runtime: Arc::new(AsyncMutex::new(SessionRuntime {
                credentials: Some(credentials),
                config,
                risk,
                state,
            })),
            halt_tx,
            scheduler: Mutex::new(None),
        });

        let task = tokio::spawn(run_scheduler(
            Arc::clone(&handle),
            Arc::clone(&self.engine),
            halt_rx,
        ));
        *handle.scheduler.lock() = Some(task);

        sessions.insert(key.clone(), handle);
        self.retained.lock().remove(&key);

        info!(
            session_id = %snapshot.id,
            user_id = %key.user_id,
            market = %key.market,
            test_mode = snapshot.test_mode,
            "Trading session started"
        );
        Ok(snapshot)
    }

    /// Stop a session. Stopping an already stopped session returns its last
    /// snapshot; a key that never had a session is `NotFound`.
    pub async fn stop(&self, user_id: &str, market: &Market) -> TradingResult<SessionSnapshot> {
        let key = SessionKey::new(user_id, market.clone());
        let handle = self.sessions.lock().await.get(&key).cloned();

        let Some(handle) = handle else {
            return self
                .retained
                .lock()
                .get(&key)
                .map(|retained| retained.snapshot.clone())
                .ok_or_else(|| not_found(&key));
        };

        handle.halt();
        let scheduler = handle.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.await {
                error!(market = %key.market, "Scheduler task ended abnormally: {}", e);
            }
        }

        // waits for an in-flight cycle to finish
        let mut runtime = handle.runtime.lock().await;
        runtime.credentials = None;
        let snapshot = {
            let mut view = handle.view.lock();
            if view.status != SessionStatus::Stopped {
                view.set_status(SessionStatus::Stopped);
                view.push_event(EventKind::Stopped, "stopped on request");
            }
            view.clone()
        };
        drop(runtime);

        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                sessions.remove(&key);
            }
        }
        self.retained.lock().insert(
            key.clone(),
            RetainedSession {
                owner: handle.owner.clone(),
                snapshot: snapshot.clone(),
            },
        );

        info!(
            session_id = %snapshot.id,
            user_id = %key.user_id,
            market = %key.market,
            cycles = snapshot.cycles_completed,
            "Trading session stopped"
        );
        Ok(snapshot)
    }

    /// Current snapshot of a live session, or the retained one of a stopped session
    pub async fn status(&self, user_id: &str, market: &Market) -> TradingResult<SessionSnapshot> {
        let key = SessionKey::new(user_id, market.clone());
        if let Some(handle) = self.sessions.lock().await.get(&key) {
            return Ok(handle.snapshot());
        }
        self.retained
            .lock()
            .get(&key)
            .map(|retained| retained.snapshot.clone())
            .ok_or_else(|| not_found(&key))
    }

    /// Reject `credentials` whose access key differs from the one that
    /// started the session on `market`. Users are keyed by an access key
    /// prefix, so two keys can map to the same user id. Passes when there
    /// is no session.
    pub async fn verify_owner(
        &self,
        credentials: &Credentials,
        market: &Market,
    ) -> TradingResult<()> {
        let key = SessionKey::new(credentials.user_id(), market.clone());
        let owner = match self.sessions.lock().await.get(&key) {
            Some(handle) => Some(handle.owner.clone()),
            None => self
                .retained
                .lock()
                .get(&key)
                .map(|retained| retained.owner.clone()),
        };

        match owner {
            Some(owner) if owner != credentials.fingerprint() => {
                warn!(user_id = %key.user_id, market = %key.market, "Access key does not own session");
                Err(TradingError::Auth {
                    status: 403,
                    message: "access key does not own this session".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Live sessions of one user
    pub async fn sessions_for(&self, user_id: &str) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().await;
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .iter()
            .filter(|(key, _)| key.user_id == user_id)
            .map(|(_, handle)| handle.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.market.as_str().cmp(b.market.as_str()));
        snapshots
    }

    /// The market a request without one refers to: the user's only live
    /// session, else their only retained one. Several candidates is a
    /// validation error; none is `Ok(None)`.
    pub async fn sole_market(&self, user_id: &str) -> TradingResult<Option<Market>> {
        let live: Vec<Market> = self
            .sessions_for(user_id)
            .await
            .into_iter()
            .map(|s| s.market)
            .collect();
        let candidates = if live.is_empty() {
            self.retained
                .lock()
                .keys()
                .filter(|key| key.user_id == user_id)
                .map(|key| key.market.clone())
                .collect()
        } else {
            live
        };

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.into_iter().next()),
            n => Err(TradingError::validation(format!(
                "{n} sessions found; specify a market"
            ))),
        }
    }

    pub async fn live_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Force-stop every live session
    pub async fn shutdown(&self) {
        let keys: Vec<SessionKey> = self.sessions.lock().await.keys().cloned().collect();
        if keys.is_empty() {
            return;
        }

        info!("Stopping {} trading session(s)", keys.len());
        for key in keys {
            if let Err(e) = self.stop(&key.user_id, &key.market).await {
                warn!(market = %key.market, "Failed to stop session: {}", e);
            }
        }
    }
}

fn not_found(key: &SessionKey) -> TradingError {
    TradingError::NotFound {
        user_id: key.user_id.clone(),
        market: key.market.to_string(),
    }
}

async fn run_scheduler<E: Exchange>(
    handle: Arc<SessionHandle>,
    engine: Arc<CycleEngine<E>>,
    mut halt_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(handle.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = halt_rx.changed() => {
                if changed.is_err() || *halt_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match Arc::clone(&handle.runtime).try_lock_owned() {
                    Ok(guard) => {
                        tokio::spawn(run_cycle(Arc::clone(&handle), Arc::clone(&engine), guard));
                    }
                    Err(_) => {
                        warn!(
                            market = %handle.key.market,
                            user_id = %handle.key.user_id,
                            "Previous cycle still running; skipping this tick"
                        );
                        handle.record_skip();
                    }
                }
            }
        }
    }

    debug!(market = %handle.key.market, "Scheduler halted");
}

async fn run_cycle<E: Exchange>(
    handle: Arc<SessionHandle>,
    engine: Arc<CycleEngine<E>>,
    mut guard: OwnedMutexGuard<SessionRuntime>,
) {
    if handle.is_halted() {
        return;
    }

    let SessionRuntime {
        credentials,
        config,
        risk,
        state,
    } = &mut *guard;
    let Some(credentials) = credentials.as_ref() else {
        return;
    };
    let market = &handle.key.market;

    let mut result = engine.run(market, config, risk, credentials, state).await;

    if let Err(failure) = &result {
        if let Some(delay) = retry_delay(failure, handle.interval) {
            warn!(
                %market,
                delay_ms = delay.as_millis() as u64,
                "Cycle failed ({}); retrying once",
                failure
            );
            handle.record_event(
                EventKind::Retry,
                format!("{failure}; retrying in {}ms", delay.as_millis()),
            );
            sleep(delay).await;
            if handle.is_halted() {
                return;
            }
            result = engine.run(market, config, risk, credentials, state).await;
        }
    }

    match result {
        Ok(report) => handle.record_report(report, state),
        Err(failure) => {
            if handle.record_failure(&failure) {
                error!(
                    %market,
                    user_id = %handle.key.user_id,
                    "Session halted: {}",
                    failure
                );
                handle.halt();
            } else {
                warn!(%market, "Cycle failed: {}", failure);
            }
        }
    }
}

/// Backoff before the single retry of a failed cycle, if it may be retried
fn retry_delay(failure: &CycleError, interval: Duration) -> Option<Duration> {
    match &failure.error {
        TradingError::RateLimit { retry_after } => {
            Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF).min(interval))
        }
        TradingError::Network(_) if !failure.during_submission() => Some(NETWORK_RETRY_DELAY),
        _ => None,
    }
}
