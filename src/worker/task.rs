//! Periodic background thread with an explicit Stopped/Running state.
//!
//! The thread runs `tick`, then waits one interval on a stop channel.
//! Stopping drops the channel's sender, which wakes the wait immediately,
//! and then joins the thread.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::warn;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum TaskState {
    Stopped,
    Running {
        stop_tx: Sender<()>,
        handle: JoinHandle<()>,
    },
}

/// A named, restartable periodic thread
pub struct CyclicTask {
    name: String,
    state: Mutex<TaskState>,
}

impl CyclicTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TaskState::Stopped),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), TaskState::Running { .. })
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the thread. Returns `Ok(false)` if it was already running.
    pub fn start<F>(&self, interval: Duration, mut tick: F) -> std::io::Result<bool>
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.state();
        if matches!(*state, TaskState::Running { .. }) {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || loop {
            tick();
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;

        *state = TaskState::Running { stop_tx, handle };
        Ok(true)
    }

    /// Signal the thread and wait for it. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state(), TaskState::Stopped);
        match previous {
            TaskState::Stopped => false,
            TaskState::Running { stop_tx, handle } => {
                drop(stop_tx);
                if handle.join().is_err() {
                    warn!("Task '{}' panicked before stopping", self.name);
                }
                true
            }
        }
    }
}

impl Drop for CyclicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_stop_before_start_is_noop() {
        let task = CyclicTask::new("idle");
        assert!(!task.stop());
        assert!(!task.stop());
        assert!(!task.is_running());
    }

    #[test]
    fn test_start_runs_ticks_until_stopped() {
        let ticks = Arc::new(AtomicU64::new(0));
        let task = CyclicTask::new("ticker");
        let counter = Arc::clone(&ticks);
        assert!(task
            .start(Duration::from_millis(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap());
        assert!(task.is_running());

        while ticks.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.stop());
        assert!(!task.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        assert!(!task.stop());
    }

    #[test]
    fn test_second_start_is_ignored() {
        let task = CyclicTask::new("once");
        assert!(task.start(Duration::from_millis(5), || {}).unwrap());
        assert!(!task.start(Duration::from_millis(5), || {}).unwrap());
        task.stop();
    }

    #[test]
    fn test_stop_interrupts_long_interval() {
        let task = CyclicTask::new("slow");
        task.start(Duration::from_secs(60), || {}).unwrap();
        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_restart_after_stop() {
        let ticks = Arc::new(AtomicU64::new(0));
        let task = CyclicTask::new("restart");
        for _ in 0..2 {
            let counter = Arc::clone(&ticks);
            task.start(Duration::from_millis(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            task.stop();
        }
        // Every start ticks at least once before checking for stop
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
