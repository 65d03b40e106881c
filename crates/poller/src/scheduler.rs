//! Poll task driven by `PollState`
//!
//! One tokio task per subscription. Controls (`enabled`, `visible`) travel
//! over a `watch` channel so a change wakes the task mid-wait: going
//! inactive cancels the pending invocation, and becoming active again
//! dispatches immediately.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::{PollConfig, PollState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Controls {
    enabled: bool,
    visible: bool,
}

impl Controls {
    fn active(self) -> bool {
        self.enabled && self.visible
    }
}

struct Shared {
    state: Mutex<PollState>,
    runs: AtomicU64,
}

/// Point-in-time view of a poller, for health reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub name: String,
    pub current_interval: Duration,
    pub consecutive_errors: u32,
    pub enabled: bool,
    pub visible: bool,
    pub runs: u64,
}

/// A named poll subscription, ready to spawn.
pub struct Poller {
    name: String,
    config: PollConfig,
}

impl Poller {
    pub fn new(name: impl Into<String>, config: PollConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Start polling on the current tokio runtime.
    ///
    /// `action` runs immediately if `enabled`, then after each interval the
    /// state machine picks. An `Err` counts as a failure and backs off.
    pub fn spawn<F, Fut, E>(self, enabled: bool, action: F) -> PollerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(PollState::new(self.config)),
            runs: AtomicU64::new(0),
        });
        let (controls, receiver) = watch::channel(Controls {
            enabled,
            visible: true,
        });

        let task = tokio::spawn(run(
            self.name.clone(),
            Arc::clone(&shared),
            receiver,
            action,
        ));

        PollerHandle {
            name: self.name,
            shared,
            controls,
            task,
        }
    }
}

/// Control handle for a running poller. Dropping it stops the poller.
pub struct PollerHandle {
    name: String,
    shared: Arc<Shared>,
    controls: watch::Sender<Controls>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Disabling cancels the pending invocation. Re-enabling dispatches
    /// immediately and keeps the current backoff state.
    pub fn set_enabled(&self, enabled: bool) {
        self.controls.send_if_modified(|controls| {
            let changed = controls.enabled != enabled;
            controls.enabled = enabled;
            changed
        });
    }

    /// Hiding stops scheduling new invocations; showing dispatches immediately.
    pub fn set_visible(&self, visible: bool) {
        self.controls.send_if_modified(|controls| {
            let changed = controls.visible != visible;
            controls.visible = visible;
            changed
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.controls.borrow().enabled
    }

    /// Collapse interval and error streak back to base.
    pub async fn reset(&self) {
        self.shared.state.lock().await.reset();
    }

    pub async fn snapshot(&self) -> PollSnapshot {
        let controls = *self.controls.borrow();
        let state = self.shared.state.lock().await;
        PollSnapshot {
            name: self.name.clone(),
            current_interval: state.current_interval(),
            consecutive_errors: state.consecutive_errors(),
            enabled: controls.enabled,
            visible: controls.visible,
            runs: self.shared.runs.load(Ordering::Relaxed),
        }
    }

    /// Abort the poll task, including any in-flight action.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F, Fut, E>(
    name: String,
    shared: Arc<Shared>,
    mut controls: watch::Receiver<Controls>,
    mut action: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut delay = Duration::ZERO;

    loop {
        let current = *controls.borrow_and_update();
        if !current.active() {
            debug!(target_name = %name, enabled = current.enabled, visible = current.visible, "polling paused");
            if controls.changed().await.is_err() {
                return;
            }
            delay = Duration::ZERO;
            continue;
        }

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = controls.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    delay = Duration::ZERO;
                    continue;
                }
            }
        }

        let outcome = action().await;
        shared.runs.fetch_add(1, Ordering::Relaxed);

        let mut state = shared.state.lock().await;
        delay = match outcome {
            Ok(()) => state.record_success(),
            Err(e) => {
                let next = state.record_failure();
                warn!(
                    target_name = %name,
                    consecutive_errors = state.consecutive_errors(),
                    interval_ms = next.as_millis() as u64,
                    error = %e,
                    "poll failed, backing off"
                );
                next
            }
        };
    }
}
