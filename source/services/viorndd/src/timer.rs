// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One-shot timers on a dedicated worker thread.
//!
//! Callbacks run one at a time on the worker with the facility lock released.
//! `cancel` of a callback that is already running waits for it to return.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use viornd_hal::{TimerCallback, TimerFacility, TimerId};

#[derive(Default)]
struct TimerState {
    next: u64,
    pending: BTreeMap<(Instant, TimerId), TimerCallback>,
    deadlines: HashMap<TimerId, Instant>,
    running: Option<TimerId>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
    finished: Condvar,
}

/// Threaded [`TimerFacility`].
pub struct ThreadTimers {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimers {
    /// Spawns the worker thread.
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("viorndd-timer".into())
            .spawn(move || run(&worker_shared))?;
        Ok(Self { shared, worker: Mutex::new(Some(worker)) })
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Stops the worker. Pending timers are dropped without running.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.pending.clear();
            state.deadlines.clear();
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                debug!("viorndd: timer worker panicked");
            }
        }
    }
}

impl Drop for ThreadTimers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(&(deadline, id)) = state.pending.keys().next() else {
            shared.wake.wait(&mut state);
            continue;
        };
        if deadline > Instant::now() {
            shared.wake.wait_until(&mut state, deadline);
            continue;
        }
        let Some(callback) = state.pending.remove(&(deadline, id)) else {
            continue;
        };
        state.deadlines.remove(&id);
        state.running = Some(id);
        trace!("viorndd: timer {} firing", id.0);
        MutexGuard::unlocked(&mut state, callback);
        state.running = None;
        shared.finished.notify_all();
    }
}

impl TimerFacility for ThreadTimers {
    fn arm_once(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let mut state = self.shared.state.lock();
        state.next += 1;
        let id = TimerId(state.next);
        let deadline = Instant::now() + delay;
        state.pending.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        drop(state);
        self.shared.wake.notify_one();
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(deadline) = state.deadlines.remove(&id) {
            state.pending.remove(&(deadline, id));
            return true;
        }
        while state.running == Some(id) {
            self.shared.finished.wait(&mut state);
        }
        false
    }
}
