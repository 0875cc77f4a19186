// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host entropy pool.
//!
//! Deliveries are folded into a SHA-256 chained state and credited against a
//! capped entropy counter. Extraction hashes the state with a counter and debits
//! the credit. Pool contents are never logged.

use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};
use viornd::EntropySink;

/// Maximum entropy the pool credits, in bits.
pub const POOL_CAPACITY_BITS: u64 = 4096;

struct PoolState {
    state: [u8; 32],
    entropy_bits: u64,
    deliveries: u64,
    bytes_mixed: u64,
    extractions: u64,
}

/// Entropy sink fed by the driver.
pub struct EntropyPool {
    inner: Mutex<PoolState>,
    grew: Condvar,
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyPool {
    /// Empty pool with no credited entropy.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolState {
                state: [0u8; 32],
                entropy_bits: 0,
                deliveries: 0,
                bytes_mixed: 0,
                extractions: 0,
            }),
            grew: Condvar::new(),
        }
    }

    /// Credited entropy, in bits.
    pub fn entropy_bits(&self) -> u64 {
        self.inner.lock().entropy_bits
    }

    /// Number of non-empty deliveries mixed in.
    pub fn deliveries(&self) -> u64 {
        self.inner.lock().deliveries
    }

    /// Total bytes mixed in.
    pub fn bytes_mixed(&self) -> u64 {
        self.inner.lock().bytes_mixed
    }

    /// Blocks until at least `count` deliveries arrived or `timeout` elapsed.
    pub fn wait_for_deliveries(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.deliveries < count {
            if self.grew.wait_until(&mut inner, deadline).timed_out() {
                return inner.deliveries >= count;
            }
        }
        true
    }

    /// Draws `len` bytes if the pool holds at least `len * 8` bits of credit.
    pub fn extract(&self, len: usize) -> Option<Vec<u8>> {
        let needed = (len as u64).saturating_mul(8);
        let mut inner = self.inner.lock();
        if inner.entropy_bits < needed {
            return None;
        }
        inner.entropy_bits -= needed;
        inner.extractions += 1;

        let mut out = Vec::with_capacity(len);
        let mut block = 0u64;
        while out.len() < len {
            let digest = Sha256::new()
                .chain_update(inner.state)
                .chain_update(inner.extractions.to_le_bytes())
                .chain_update(block.to_le_bytes())
                .finalize();
            let take = (len - out.len()).min(digest.len());
            out.extend_from_slice(&digest[..take]);
            block += 1;
        }
        // Ratchet.
        inner.state =
            Sha256::new().chain_update(inner.state).chain_update(b"ratchet").finalize().into();
        Some(out)
    }
}

impl EntropySink for EntropyPool {
    fn add_entropy(&self, bytes: &[u8], entropy_bits: u32) {
        if bytes.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.state =
            Sha256::new().chain_update(inner.state).chain_update(bytes).finalize().into();
        inner.entropy_bits = (inner.entropy_bits + u64::from(entropy_bits)).min(POOL_CAPACITY_BITS);
        inner.deliveries += 1;
        inner.bytes_mixed += bytes.len() as u64;
        trace!(
            "viorndd: pool: mixed {} bytes, credit {} bits",
            bytes.len(),
            inner.entropy_bits
        );
        drop(inner);
        self.grew.notify_all();
    }
}
