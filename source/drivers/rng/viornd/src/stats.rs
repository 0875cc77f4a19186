// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Per-device harvest counters. Never contains entropy bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HarvestStats {
    /// Completions delivered to the sink (including empty ones).
    pub harvests: u64,
    /// Bytes handed to the sink.
    pub bytes_delivered: u64,
    /// Entropy bits credited.
    pub entropy_bits: u64,
    /// Interrupts with no completion to collect.
    pub spurious_interrupts: u64,
    /// Used buffers that did not match the outstanding request.
    pub stray_completions: u64,
    /// Submissions the queue refused.
    pub submit_failures: u64,
    /// Completions that arrived while draining.
    pub discarded_completions: u64,
    /// Requests still in flight when teardown gave up waiting.
    pub abandoned_requests: u64,
    /// Submission-to-completion time of the last harvest.
    pub last_latency: Option<Duration>,
}

impl HarvestStats {
    pub(crate) fn record_harvest(&mut self, len: usize, bits: u32, latency: Duration) {
        self.harvests += 1;
        self.bytes_delivered += len as u64;
        self.entropy_bits += u64::from(bits);
        self.last_latency = Some(latency);
    }
}
