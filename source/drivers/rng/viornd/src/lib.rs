// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: VirtIO entropy harvesting driver (interrupt-driven, rate limited)
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + `tests/` (lifecycle, harvest, teardown, properties)
//!
//! PUBLIC API:
//!   - Viornd: driver object; attach()/detach()/remove()/info()
//!   - Device: one attached virtio-rng instance
//!   - HarvestConfig: interval, chunk size, drain timeout, entropy estimate
//!   - EntropySink / CryptoRegistry / RandomProvider: external collaborators
//!
//! DEPENDENCIES:
//!   - viornd-hal::{QueueTransport, TimerFacility}: transport and timer seams
//!
//! SECURITY INVARIANTS:
//!   - Entropy bytes MUST NOT be logged
//!   - At most 16 bytes (configurable chunk) are requested per interval
//!   - At most one request is outstanding per device
//!
//! Control flow: attach() brings up the channel and arms the first timer. The timer
//! submits one device-writable buffer. The device interrupt hands the buffer back,
//! the bytes go to the entropy sink and the next timer is armed from there, so the
//! interval is measured from completion. detach() drains and unwinds in reverse.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod channel;
mod completion;
mod config;
mod error;
mod lifecycle;
pub mod provider;
mod scheduler;
mod state;
mod stats;

pub use channel::OutstandingRequest;
pub use completion::{estimate_entropy_bits, EntropySink};
pub use config::{
    HarvestConfig, InvalidConfig, ATTESTED_BITS_PER_BYTE, DEFAULT_CHUNK_BYTES,
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_INTERVAL, MAX_CHUNK_BYTES, VIRTUALIZED_BITS_PER_BYTE,
};
pub use error::{AttachError, ChannelError, DetachError, RemoveError};
pub use lifecycle::{AttachCmd, DetachCmd, Device, Linkage, ModuleInfo, Viornd};
pub use state::LifecycleState;
pub use stats::HarvestStats;

use viornd_hal::Features;

/// Features requested from the device. virtio-rng defines none.
pub const VIORND_FEATURES: Features = Features::empty();

/// Index of the request queue.
pub const REQUEST_QUEUE: u16 = 0;

/// Name given to the request queue.
pub const REQUEST_QUEUE_NAME: &str = "Entropy request";

/// Module identity shown by module listings.
pub const MODULE_IDENT: &str = "VirtIO Entropy Provider";
