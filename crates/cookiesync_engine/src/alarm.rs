//! Named one-shot and periodic alarms.
//!
//! Each alarm runs as a tokio task guarded by a [`CancellationToken`].
//! Creating an alarm replaces any existing alarm of the same name. Firing
//! delivers the alarm name on the channel returned by [`AlarmScheduler::new`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// The alarms the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alarm {
    /// Periodic keep-alive cycle.
    KeepAlive,
    /// One-shot retry of a failed push.
    SyncRetry,
}

impl Alarm {
    /// Alarm name.
    pub fn name(&self) -> &'static str {
        match self {
            Alarm::KeepAlive => "cookieKeepAlive",
            Alarm::SyncRetry => "syncRetryAlarm",
        }
    }
}

/// Description of a scheduled alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmInfo {
    /// When the alarm fires next.
    pub scheduled_time: Instant,
    /// Period of a recurring alarm.
    pub period: Option<Duration>,
}

struct Slot {
    info: AlarmInfo,
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Slots {
    active: HashMap<Alarm, Slot>,
    next_generation: u64,
}

/// Host timer service.
pub struct AlarmScheduler {
    slots: Arc<Mutex<Slots>>,
    sender: mpsc::UnboundedSender<Alarm>,
}

impl AlarmScheduler {
    /// Creates a scheduler and the receiver its alarms fire on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alarm>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            sender,
        };
        (scheduler, receiver)
    }

    /// Schedules `alarm` to fire once after `delay`.
    ///
    /// Must be called within a tokio runtime.
    pub fn create_once(&self, alarm: Alarm, delay: Duration) {
        self.create(alarm, delay, None);
    }

    /// Schedules `alarm` to fire after `delay` and then every `period`.
    ///
    /// Must be called within a tokio runtime.
    pub fn create_periodic(&self, alarm: Alarm, delay: Duration, period: Duration) {
        self.create(alarm, delay, Some(period));
    }

    /// Cancels `alarm`. Returns true if it was scheduled.
    pub fn clear(&self, alarm: Alarm) -> bool {
        match self.slots.lock().active.remove(&alarm) {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns the schedule of `alarm`, if any.
    pub fn get(&self, alarm: Alarm) -> Option<AlarmInfo> {
        self.slots.lock().active.get(&alarm).map(|slot| slot.info)
    }

    /// Cancels every alarm.
    pub fn clear_all(&self) {
        for (_, slot) in self.slots.lock().active.drain() {
            slot.token.cancel();
        }
    }

    fn create(&self, alarm: Alarm, delay: Duration, period: Option<Duration>) {
        let token = CancellationToken::new();
        let start = Instant::now() + delay;
        let generation = {
            let mut slots = self.slots.lock();
            let generation = slots.next_generation;
            slots.next_generation += 1;
            let slot = Slot {
                info: AlarmInfo {
                    scheduled_time: start,
                    period,
                },
                generation,
                token: token.clone(),
            };
            if let Some(previous) = slots.active.insert(alarm, slot) {
                previous.token.cancel();
            }
            generation
        };
        tracing::debug!(alarm = alarm.name(), ?delay, ?period, "alarm scheduled");

        let slots = Arc::clone(&self.slots);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            match period {
                None => {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep_until(start) => {}
                    }
                    {
                        let mut slots = slots.lock();
                        if slots.active.get(&alarm).map(|s| s.generation) == Some(generation) {
                            slots.active.remove(&alarm);
                        }
                    }
                    let _ = sender.send(alarm);
                }
                Some(period) => {
                    let mut ticker = tokio::time::interval_at(start, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = ticker.tick() => {}
                        }
                        if let Some(slot) = slots.lock().active.get_mut(&alarm) {
                            if slot.generation == generation {
                                slot.info.scheduled_time = Instant::now() + period;
                            }
                        }
                        if sender.send(alarm).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        self.clear_all();
    }
}

impl std::fmt::Debug for AlarmScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active: Vec<_> = self.slots.lock().active.keys().map(|a| a.name()).collect();
        f.debug_struct("AlarmScheduler").field("active", &active).finish()
    }
}
