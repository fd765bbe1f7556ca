//! Coalescing of change bursts into a single deferred trigger.
//!
//! `Idle -> Armed` on the first [`DebounceScheduler::notify`]; every further
//! notify while armed restarts the window. When the window elapses without
//! another notify the scheduler returns to `Idle` and the callback fires
//! exactly once.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Callback invoked when a debounce window closes.
pub type DebounceCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug)]
enum DebounceState {
    Idle,
    Armed {
        generation: u64,
        deadline: Instant,
        token: CancellationToken,
    },
}

#[derive(Debug)]
struct Inner {
    state: DebounceState,
    next_generation: u64,
}

/// A restartable one-shot timer with an explicit `Idle`/`Armed` state.
pub struct DebounceScheduler {
    window: Duration,
    inner: Arc<Mutex<Inner>>,
    callback: DebounceCallback,
}

impl DebounceScheduler {
    /// Creates an idle scheduler firing `callback` after `window` of quiet.
    pub fn new(window: Duration, callback: DebounceCallback) -> Self {
        Self {
            window,
            inner: Arc::new(Mutex::new(Inner {
                state: DebounceState::Idle,
                next_generation: 0,
            })),
            callback,
        }
    }

    /// Arms the scheduler or restarts its window.
    ///
    /// Returns true if this call opened a new window. Must be called within
    /// a tokio runtime.
    pub fn notify(&self) -> bool {
        let token = CancellationToken::new();
        let deadline = Instant::now() + self.window;

        let (opened, generation) = {
            let mut inner = self.inner.lock();
            let opened = match std::mem::replace(&mut inner.state, DebounceState::Idle) {
                DebounceState::Armed { token: previous, .. } => {
                    previous.cancel();
                    false
                }
                DebounceState::Idle => true,
            };
            let generation = inner.next_generation;
            inner.next_generation += 1;
            inner.state = DebounceState::Armed {
                generation,
                deadline,
                token: token.clone(),
            };
            (opened, generation)
        };

        let inner = Arc::clone(&self.inner);
        let callback = Arc::clone(&self.callback);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let fire = {
                let mut inner = inner.lock();
                let current = matches!(
                    inner.state,
                    DebounceState::Armed { generation: g, .. } if g == generation
                );
                if current {
                    inner.state = DebounceState::Idle;
                }
                current
            };
            if fire {
                callback();
            }
        });

        opened
    }

    /// Returns true while a window is open.
    pub fn is_armed(&self) -> bool {
        matches!(self.inner.lock().state, DebounceState::Armed { .. })
    }

    /// Returns when the open window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        match self.inner.lock().state {
            DebounceState::Armed { deadline, .. } => Some(deadline),
            DebounceState::Idle => None,
        }
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        if let DebounceState::Armed { token, .. } = &self.inner.lock().state {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for DebounceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceScheduler")
            .field("window", &self.window)
            .field("armed", &self.is_armed())
            .finish()
    }
}
