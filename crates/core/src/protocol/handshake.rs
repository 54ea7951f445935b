//! Authentication handshake state and the expiry timer

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where the connection is in the authentication exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    #[default]
    Unauthenticated,
    /// Request sent, waiting for the server's verdict
    Authenticating,
    Authenticated,
}

/// What the server reports about itself after a successful handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub installation_id: String,
    pub device_name: String,
    pub system_version: String,
    pub software_version: String,
}

#[derive(Debug, Default)]
struct TimerSlot {
    /// Bumped on every arm and cancel; a task only fires for its own generation
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Single-slot timer that fires if the server never answers the handshake.
///
/// The slot holds at most one armed task. Arming replaces (and aborts) the
/// previous task; `cancel` takes the task out so it is aborted exactly once.
#[derive(Debug, Clone, Default)]
pub struct HandshakeTimer {
    slot: Arc<Mutex<TimerSlot>>,
}

fn lock_slot(slot: &Mutex<TimerSlot>) -> MutexGuard<'_, TimerSlot> {
    // A poisoned slot still holds a valid handle
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HandshakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer on the current tokio runtime. Returns `false` when no
    /// runtime is available, in which case the handshake simply never expires.
    pub fn arm<F>(&self, timeout: Duration, on_expire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("⏱️ No tokio runtime, handshake timeout disabled");
                return false;
            }
        };

        // Held until the new task is stored, so the task can never observe
        // the slot before it is armed
        let mut guard = lock_slot(&self.slot);
        guard.generation = guard.generation.wrapping_add(1);
        let generation = guard.generation;

        let slot = Arc::clone(&self.slot);
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let armed = {
                let mut guard = lock_slot(&slot);
                if guard.generation == generation {
                    guard.task.take().is_some()
                } else {
                    false
                }
            };
            if armed {
                debug!("⏱️ Handshake timed out after {:?}", timeout);
                on_expire();
            }
        });

        if let Some(previous) = guard.task.replace(task) {
            previous.abort();
        }
        true
    }

    /// Disarm the timer. Returns `true` if an armed task was aborted.
    pub fn cancel(&self) -> bool {
        let mut guard = lock_slot(&self.slot);
        guard.generation = guard.generation.wrapping_add(1);
        match guard.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        lock_slot(&self.slot).task.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_arm_without_runtime_is_noop() {
        let timer = HandshakeTimer::new();
        assert!(!timer.arm(Duration::from_millis(1), || {}));
        assert!(!timer.is_armed());
        assert!(!timer.cancel());
    }

    #[tokio::test]
    async fn test_timer_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = HandshakeTimer::new();

        let counter = Arc::clone(&fired);
        assert!(timer.arm(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
        assert!(!timer.cancel());
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = HandshakeTimer::new();

        let counter = Arc::clone(&fired);
        timer.arm(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_expiry_on_multi_thread_runtime() {
        for _ in 0..50 {
            let fired = Arc::new(AtomicUsize::new(0));
            let timer = HandshakeTimer::new();

            let counter = Arc::clone(&fired);
            assert!(timer.arm(Duration::ZERO, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

            for _ in 0..200 {
                if fired.load(Ordering::SeqCst) == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            assert_eq!(fired.load(Ordering::SeqCst), 1);
            assert!(!timer.is_armed());
        }
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = HandshakeTimer::new();

        let first = Arc::clone(&fired);
        timer.arm(Duration::from_millis(10), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        timer.arm(Duration::from_millis(20), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_default_state_is_unauthenticated() {
        assert_eq!(HandshakeState::default(), HandshakeState::Unauthenticated);
    }
}
