//! The long-running service.
//!
//! One loop owns every event source: alarms, closed debounce windows, live
//! cookie changes, storage changes and caller commands. Cookie changes are
//! handled inline so merges of one identity apply in arrival order; pushes,
//! keep-alive cycles and commands run as spawned tasks.

use crate::alarm::Alarm;
use crate::command::{Command, Response};
use crate::engine::{Engine, EngineEvents};
use crate::error::{SyncError, SyncResult};
use crate::persist::Bucket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE_CAPACITY: usize = 64;

type Request = (Command, oneshot::Sender<Response>);

/// Sends commands to a running [`CookieSyncService`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: mpsc::Sender<Request>,
}

impl ServiceHandle {
    /// Sends `command` and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ServiceStopped`] if the service is not running.
    pub async fn send(&self, command: Command) -> SyncResult<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send((command, reply_tx))
            .await
            .map_err(|_| SyncError::ServiceStopped)?;
        reply_rx.await.map_err(|_| SyncError::ServiceStopped)
    }
}

/// Drives an [`Engine`] from its event sources.
pub struct CookieSyncService {
    engine: Engine,
    events: EngineEvents,
    commands: mpsc::Receiver<Request>,
    handle: ServiceHandle,
    shutdown: CancellationToken,
}

impl CookieSyncService {
    /// Creates a service around `engine` and its events.
    pub fn new(engine: Engine, events: EngineEvents) -> Self {
        let (sender, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        Self {
            engine,
            events,
            commands,
            handle: ServiceHandle { sender },
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a handle for sending commands.
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Returns the token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Startup sequence: integrity check, recovery of a leftover retry
    /// queue, keep-alive alarm setup. Failures are logged, not returned.
    pub async fn start(&self) {
        let engine = &self.engine;
        engine.log().info("Service started.");

        if let Err(e) = engine.maintenance().integrity_check() {
            tracing::warn!(error = %e, "startup integrity check failed");
        }
        if let Err(e) = engine.maintenance().recover_pending().await {
            tracing::warn!(error = %e, "startup recovery push failed");
        }
        if let Err(e) = engine.keep_alive().setup_alarm() {
            engine
                .log()
                .error(format!("Keep-alive alarm setup failed: {e}"));
        }
    }

    /// Runs the event loop until the shutdown token is cancelled.
    pub async fn run(self) {
        let Self {
            engine,
            mut events,
            mut commands,
            handle,
            shutdown,
        } = self;
        // Dropped so `recv` reports closure once every handle is gone.
        drop(handle);
        let mut cookie_changes = engine.cookies().subscribe();
        let mut storage_changes = engine.state().subscribe();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("service stopping");
                    break;
                }
                Some(alarm) = events.alarms.recv() => on_alarm(&engine, alarm),
                Some(()) = events.debounce.recv() => {
                    engine.log().info("Sync window closed; pushing.");
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        // Failures are logged and re-armed by the push itself.
                        let _ = engine.sync().push_now().await;
                    });
                }
                change = cookie_changes.recv() => match change {
                    Ok(change) => {
                        if let Err(e) = engine.watcher().handle(&change) {
                            engine
                                .log()
                                .error(format!("Cookie change could not be staged: {e}"));
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "cookie change feed lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::warn!("cookie change feed closed");
                        cookie_changes = engine.cookies().subscribe();
                    }
                },
                bucket = storage_changes.recv() => match bucket {
                    Ok(bucket) => on_storage_change(&engine, Some(bucket)),
                    Err(RecvError::Lagged(_)) => on_storage_change(&engine, None),
                    Err(RecvError::Closed) => break,
                },
                Some((command, reply)) = commands.recv() => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let response = engine.dispatch(command).await;
                        // The caller may have stopped waiting.
                        let _ = reply.send(response);
                    });
                }
            }
        }
    }
}

fn on_alarm(engine: &Engine, alarm: Alarm) {
    tracing::debug!(alarm = alarm.name(), "alarm fired");
    let engine = engine.clone();
    match alarm {
        Alarm::KeepAlive => {
            tokio::spawn(async move {
                engine.keep_alive().run_scheduled().await;
            });
        }
        Alarm::SyncRetry => {
            engine.log().info("Retrying failed push.");
            tokio::spawn(async move {
                let _ = engine.sync().push_now().await;
            });
        }
    }
}

/// `None` means notifications were missed.
fn on_storage_change(engine: &Engine, bucket: Option<Bucket>) {
    if matches!(bucket, None | Some(Bucket::SyncList)) {
        if let Err(e) = engine.watcher().refresh() {
            tracing::warn!(error = %e, "monitored set refresh failed");
        }
    }
    if matches!(bucket, None | Some(Bucket::Settings)) {
        if let Err(e) = engine.keep_alive().setup_alarm() {
            engine
                .log()
                .error(format!("Keep-alive alarm setup failed: {e}"));
        }
    }
}

impl std::fmt::Debug for CookieSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSyncService")
            .field("engine", &self.engine)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
