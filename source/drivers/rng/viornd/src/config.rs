// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harvest policy knobs.
//!
//! How much and how often to ask the host for entropy. Other hypervisor guests
//! use anywhere from 20 bytes/s to 16 bytes every few minutes; the defaults here
//! sit at the conservative end so a fleet of guests cannot drain the host pool.

use std::time::Duration;

use thiserror::Error;

/// Default delay between a completed harvest and the next request.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default bytes requested per harvest.
pub const DEFAULT_CHUNK_BYTES: usize = 16;

/// Upper bound for the chunk size.
pub const MAX_CHUNK_BYTES: usize = 256;

/// Default bound on how long detach waits for an in-flight request.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Entropy credited per byte from a virtualized source.
pub const VIRTUALIZED_BITS_PER_BYTE: u8 = 2;

/// Entropy credited per byte when the transport attests a hardware source.
pub const ATTESTED_BITS_PER_BYTE: u8 = 8;

/// Driver-wide harvest configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Delay between completion and the next request.
    pub interval: Duration,
    /// Bytes requested per harvest.
    pub chunk_bytes: usize,
    /// Bound on the detach drain wait.
    pub drain_timeout: Duration,
    /// Fixed entropy estimate per byte. `None` derives it from transport attestation.
    pub bits_per_byte: Option<u8>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            bits_per_byte: None,
        }
    }
}

impl HarvestConfig {
    /// Checks the configuration bounds.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.interval.is_zero() {
            return Err(InvalidConfig::ZeroInterval);
        }
        if self.chunk_bytes == 0 || self.chunk_bytes > MAX_CHUNK_BYTES {
            return Err(InvalidConfig::ChunkSize(self.chunk_bytes));
        }
        if let Some(bits) = self.bits_per_byte {
            if bits == 0 || bits > 8 {
                return Err(InvalidConfig::BitsPerByte(bits));
            }
        }
        Ok(())
    }

    /// Entropy estimate per byte for a transport with the given attestation.
    pub fn bits_per_byte_for(&self, attested: bool) -> u8 {
        match self.bits_per_byte {
            Some(bits) => bits,
            None if attested => ATTESTED_BITS_PER_BYTE,
            None => VIRTUALIZED_BITS_PER_BYTE,
        }
    }
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfig {
    /// The harvest interval must be non-zero.
    #[error("harvest interval must be non-zero")]
    ZeroInterval,
    /// Chunk size outside `1..=MAX_CHUNK_BYTES`.
    #[error("chunk size {0} outside 1..={max}", max = MAX_CHUNK_BYTES)]
    ChunkSize(usize),
    /// Entropy estimate outside `1..=8` bits per byte.
    #[error("entropy estimate {0} bits/byte outside 1..=8")]
    BitsPerByte(u8),
}
