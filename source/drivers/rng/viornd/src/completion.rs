// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Completion handler (interrupt context).
//!
//! The transport calls back with an attachment id; the device is recovered
//! through the driver's weak lookup table, never through a pointer the handler
//! owns. A device that is gone, draining, or has nothing outstanding absorbs the
//! interrupt without touching the sink or the schedule.

use std::sync::Arc;

use log::{debug, trace, warn};
use viornd_hal::{AttachmentId, IrqReturn};

use crate::lifecycle::{Device, DeviceTable};
use crate::state::LifecycleState;

/// Host entropy pool.
pub trait EntropySink: Send + Sync {
    /// Mixes `bytes` into the pool, crediting `entropy_bits`. Best effort.
    fn add_entropy(&self, bytes: &[u8], entropy_bits: u32);
}

/// Conservative entropy credit for `len` bytes.
pub fn estimate_entropy_bits(len: usize, bits_per_byte: u8) -> u32 {
    let bits = (len as u64).saturating_mul(u64::from(bits_per_byte));
    u32::try_from(bits).unwrap_or(u32::MAX)
}

/// Entry point installed with the transport.
pub(crate) fn dispatch_interrupt(table: &DeviceTable, attachment: AttachmentId) -> IrqReturn {
    match table.lookup(attachment) {
        Some(device) => device.on_queue_interrupt(),
        None => {
            trace!("viornd: {attachment}: interrupt with no live device");
            IrqReturn::Unclaimed
        }
    }
}

impl Device {
    /// Queue interrupt: collect the completed buffer, feed the pool, re-arm.
    pub fn on_queue_interrupt(self: &Arc<Self>) -> IrqReturn {
        let mut inner = self.inner.lock();
        let Some(channel) = inner.channel.as_mut() else {
            inner.stats.spurious_interrupts += 1;
            return IrqReturn::Unclaimed;
        };

        let queue = channel.queue();
        let mut harvest = None;
        let mut stray = 0u64;
        while let Some(used) = self.transport.pop_used(queue) {
            match channel.complete(used) {
                Ok(done) => harvest = Some(done),
                Err(_) => stray += 1,
            }
        }
        inner.stats.stray_completions += stray;

        let Some(harvest) = harvest else {
            if stray == 0 {
                inner.stats.spurious_interrupts += 1;
                return IrqReturn::Unclaimed;
            }
            debug!("viornd: {}: dropped {stray} stray completion(s)", self.attachment);
            return IrqReturn::Claimed;
        };

        if inner.state != LifecycleState::Running {
            inner.stats.discarded_completions += 1;
            debug!("viornd: {}: completion during {}, discarded", self.attachment, inner.state);
            self.drained.notify_all();
            return IrqReturn::Claimed;
        }

        let bits = estimate_entropy_bits(harvest.len(), inner.bits_per_byte);
        inner.stats.record_harvest(harvest.len(), bits, harvest.latency());
        if !inner.scheduler.is_armed() {
            inner.scheduler.arm(self.ctx.timers.as_ref(), Arc::downgrade(self));
        }
        drop(inner);

        if harvest.len() == 0 {
            warn!("viornd: {}: device completed with no data", self.attachment);
        } else {
            self.ctx.sink.add_entropy(harvest.as_slice(), bits);
            debug!(
                "viornd: {}: harvested {} bytes ({bits} bits) in {:?}",
                self.attachment,
                harvest.len(),
                harvest.latency()
            );
        }
        IrqReturn::Claimed
    }
}
