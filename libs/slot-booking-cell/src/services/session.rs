use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use shared_config::BookingConfig;
use shared_models::{ClassifiedError, ErrorKind};

use crate::models::{SessionPhase, SessionSnapshot};
use crate::services::classifier::ErrorClassifier;

/// Callbacks for one booking session. Each runs on the session's own task.
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// The session has gone `remaining` without activity before expiring.
    async fn on_warning(&self, _session_id: &str, _remaining: Duration) {}

    /// Fired once; the session is gone by the time this runs.
    async fn on_expiry(&self, _session_id: &str) {}

    /// Persist in-progress state. Failures are classified, logged and shown on
    /// the session snapshot; the timer keeps going.
    async fn on_autosave(&self, _session_id: &str, _payload: Option<Value>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub timeout: Duration,
    pub warning_lead: Duration,
    pub autosave_interval: Duration,
}

impl From<&BookingConfig> for SessionTimings {
    fn from(config: &BookingConfig) -> Self {
        Self {
            timeout: config.session_timeout,
            warning_lead: config.session_warning_lead,
            autosave_interval: config.autosave_interval,
        }
    }
}

#[derive(Debug)]
enum SessionSignal {
    Activity,
    Progress(Value),
    Close,
}

#[derive(Debug)]
struct SessionEntry {
    generation: u64,
    control: mpsc::UnboundedSender<SessionSignal>,
}

/// Caller's reference to a session. Stale handles (from an earlier session
/// with the same id) are ignored by the monitor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    generation: u64,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.state.borrow()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    /// Resolves once the session has expired or ended.
    pub async fn closed(&mut self) -> SessionPhase {
        let finished = self
            .state
            .wait_for(|snapshot| !snapshot.phase.is_usable())
            .await
            .map(|snapshot| snapshot.phase);
        match finished {
            Ok(phase) => phase,
            Err(_) => self.state.borrow().phase,
        }
    }
}

/// Tracks in-progress booking sessions. Each session is driven by one task
/// that owns its timers: active -> warned -> expired, with any activity
/// returning it to active.
pub struct SessionActivityMonitor {
    sessions: Arc<DashMap<String, SessionEntry>>,
    timings: SessionTimings,
    next_generation: AtomicU64,
}

impl SessionActivityMonitor {
    pub fn new(timings: SessionTimings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            timings,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(SessionTimings::from(config))
    }

    /// Must be called from within a Tokio runtime.
    pub fn begin_session(
        &self,
        session_id: impl Into<String>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<SessionHandle, ClassifiedError> {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            return Err(ClassifiedError::validation("Session id must not be empty"));
        }

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(ClassifiedError::validation(format!(
                "Session {} is already active",
                session_id
            ))),
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let (control, signals) = mpsc::unbounded_channel();
                let (state_tx, state_rx) = watch::channel(SessionSnapshot {
                    phase: SessionPhase::Active,
                    last_activity: started,
                    expires_at: started + self.timings.timeout,
                    autosave_error: None,
                });

                let driver = SessionDriver {
                    session_id: session_id.clone(),
                    generation,
                    listener,
                    timings: self.timings.clone(),
                    signals,
                    state: state_tx,
                    sessions: Arc::downgrade(&self.sessions),
                    autosave_error: None,
                };
                tokio::spawn(driver.run(started));
                vacant.insert(SessionEntry { generation, control });

                info!(session_id = %session_id, "Booking session started");
                Ok(SessionHandle {
                    session_id,
                    generation,
                    state: state_rx,
                })
            }
        }
    }

    /// Record activity. Returns false once the session has expired or ended.
    pub fn touch(&self, handle: &SessionHandle) -> bool {
        self.signal(handle, SessionSignal::Activity)
    }

    /// Store the autosave payload; counts as activity.
    pub fn save_progress(&self, handle: &SessionHandle, payload: Value) -> bool {
        self.signal(handle, SessionSignal::Progress(payload))
    }

    pub fn end_session(&self, handle: &SessionHandle) -> bool {
        match self
            .sessions
            .remove_if(&handle.session_id, |_, entry| entry.generation == handle.generation)
        {
            Some((_, entry)) => {
                let _ = entry.control.send(SessionSignal::Close);
                true
            }
            None => false,
        }
    }

    pub fn time_remaining(&self, handle: &SessionHandle) -> Option<Duration> {
        let snapshot = handle.snapshot();
        snapshot
            .phase
            .is_usable()
            .then(|| snapshot.expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// End every session. Runs on drop as well.
    pub fn shutdown(&self) {
        let mut closed = 0;
        self.sessions.retain(|_, entry| {
            let _ = entry.control.send(SessionSignal::Close);
            closed += 1;
            false
        });
        if closed > 0 {
            info!(closed, "Closed booking sessions on shutdown");
        }
    }

    fn signal(&self, handle: &SessionHandle, signal: SessionSignal) -> bool {
        match self.sessions.get(&handle.session_id) {
            Some(entry) if entry.generation == handle.generation => entry.control.send(signal).is_ok(),
            _ => false,
        }
    }
}

impl Drop for SessionActivityMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Wake {
    Signal(Option<SessionSignal>),
    Warning,
    Expiry,
    Autosave,
}

struct SessionDriver {
    session_id: String,
    generation: u64,
    listener: Arc<dyn SessionListener>,
    timings: SessionTimings,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    state: watch::Sender<SessionSnapshot>,
    sessions: Weak<DashMap<String, SessionEntry>>,
    autosave_error: Option<ErrorKind>,
}

impl SessionDriver {
    async fn run(mut self, started: Instant) {
        let mut phase = SessionPhase::Active;
        let mut last_activity = started;
        let mut payload: Option<Value> = None;

        let period = self.timings.autosave_interval.max(Duration::from_millis(1));
        let mut autosave = interval_at(started + period, period);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let expires_at = last_activity + self.timings.timeout;
            let warn_at = last_activity + self.timings.timeout.saturating_sub(self.timings.warning_lead);

            let wake = tokio::select! {
                biased;
                signal = self.signals.recv() => Wake::Signal(signal),
                _ = sleep_until(expires_at) => Wake::Expiry,
                _ = sleep_until(warn_at), if phase == SessionPhase::Active => Wake::Warning,
                _ = autosave.tick() => Wake::Autosave,
            };

            match wake {
                Wake::Signal(Some(SessionSignal::Activity)) => {
                    last_activity = self.resume(phase);
                    phase = SessionPhase::Active;
                }
                Wake::Signal(Some(SessionSignal::Progress(value))) => {
                    payload = Some(value);
                    last_activity = self.resume(phase);
                    phase = SessionPhase::Active;
                }
                Wake::Signal(Some(SessionSignal::Close)) | Wake::Signal(None) => {
                    self.forget();
                    self.publish(SessionPhase::Ended, last_activity);
                    info!(session_id = %self.session_id, "Booking session ended");
                    return;
                }
                Wake::Warning => {
                    phase = SessionPhase::Warned;
                    self.publish(phase, last_activity);
                    let remaining = expires_at.saturating_duration_since(Instant::now());
                    warn!(session_id = %self.session_id, remaining_secs = remaining.as_secs(), "Booking session about to expire");
                    self.listener.on_warning(&self.session_id, remaining).await;
                }
                Wake::Expiry => {
                    self.forget();
                    self.publish(SessionPhase::Expired, last_activity);
                    warn!(session_id = %self.session_id, "Booking session expired");
                    self.listener.on_expiry(&self.session_id).await;
                    return;
                }
                Wake::Autosave => {
                    self.autosave_error = match self.listener.on_autosave(&self.session_id, payload.clone()).await {
                        Ok(()) => {
                            debug!(session_id = %self.session_id, "Autosaved booking session");
                            None
                        }
                        Err(e) => {
                            let classified = ErrorClassifier::classify_any(&e);
                            warn!(session_id = %self.session_id, kind = %classified.kind(), error = %e, "Autosave failed");
                            Some(classified.kind())
                        }
                    };
                    self.publish(phase, last_activity);
                }
            }
        }
    }

    fn resume(&self, phase: SessionPhase) -> Instant {
        let now = Instant::now();
        if phase == SessionPhase::Warned {
            info!(session_id = %self.session_id, "Booking session resumed after warning");
        }
        self.publish(SessionPhase::Active, now);
        now
    }

    fn publish(&self, phase: SessionPhase, last_activity: Instant) {
        self.state.send_replace(SessionSnapshot {
            phase,
            last_activity,
            expires_at: last_activity + self.timings.timeout,
            autosave_error: self.autosave_error,
        });
    }

    fn forget(&self) {
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove_if(&self.session_id, |_, entry| entry.generation == self.generation);
        }
    }
}
