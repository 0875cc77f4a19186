// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harvest scheduler.
//!
//! One one-shot timer at a time. It is armed at bring-up and by the completion
//! handler, so the interval runs from completion to the next request. Its own
//! callback re-arms only after the queue refused a request.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, warn};
use viornd_hal::{TimerFacility, TimerId};

use crate::error::ChannelError;
use crate::lifecycle::Device;
use crate::state::LifecycleState;

pub(crate) struct HarvestScheduler {
    interval: Duration,
    armed: Option<TimerId>,
}

impl HarvestScheduler {
    pub(crate) fn new(interval: Duration) -> Self {
        Self { interval, armed: None }
    }

    /// Schedules one future harvest. The callback only holds a weak reference.
    pub(crate) fn arm(&mut self, timers: &dyn TimerFacility, device: Weak<Device>) {
        debug_assert!(self.armed.is_none(), "harvest timer armed twice");
        let id = timers.arm_once(
            self.interval,
            Box::new(move || {
                if let Some(device) = device.upgrade() {
                    device.on_timer_fire();
                }
            }),
        );
        self.armed = Some(id);
    }

    /// The armed timer has fired and is no longer pending.
    pub(crate) fn fired(&mut self) {
        self.armed = None;
    }

    /// Detaches the armed timer so the caller can cancel it outside the device lock.
    pub(crate) fn take(&mut self) -> Option<TimerId> {
        self.armed.take()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Device {
    /// Timer callback: issue the next request.
    ///
    /// Busy means a completion will re-arm; closed means teardown owns the
    /// schedule. A request the queue refused is retried one interval later.
    pub fn on_timer_fire(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.scheduler.fired();
        match self.submit_locked(&mut inner) {
            Ok(()) => {}
            Err(ChannelError::Transport(_)) if inner.state == LifecycleState::Running => {
                inner.scheduler.arm(self.ctx.timers.as_ref(), Arc::downgrade(self));
                debug!("viornd: {}: request refused, retrying next interval", self.attachment);
            }
            Err(_) => {
                debug!("viornd: {}: harvest skipped in state {}", self.attachment, inner.state);
            }
        }
    }
}

/// Cancels `id`, logging when the callback was already running.
pub(crate) fn cancel_timer(timers: &dyn TimerFacility, id: TimerId, device: &Device) {
    if !timers.cancel(id) {
        warn!("viornd: {}: harvest timer fired during teardown", device.attachment);
    }
}
