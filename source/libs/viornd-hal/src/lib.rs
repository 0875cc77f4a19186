// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Queue transport and timer seams shared by paravirtualized drivers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 unit tests + `tests/transport.rs`
//!
//! PUBLIC API:
//!   - QueueTransport: virtqueue transport consumed by drivers
//!   - TimerFacility: one-shot timers with blocking cancellation
//!   - DmaBuffer: owned transfer buffer moved between driver and queue
//!   - DeviceStatus / Features: virtio status register and feature bits
//!
//! The transport owns descriptor rings, feature negotiation and the status
//! register. Drivers only see queue handles and owned buffers: a buffer handed to
//! `submit_buffer` belongs to the queue until `pop_used` returns it or
//! `free_queue` drops it.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Device status register bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeviceStatus: u8 {
        /// Guest has noticed the device.
        const ACKNOWLEDGE = 1;
        /// Guest knows how to drive the device.
        const DRIVER = 2;
        /// Driver is set up and ready to drive the device.
        const DRIVER_OK = 4;
        /// Feature negotiation is complete.
        const FEATURES_OK = 8;
        /// Something went wrong in the guest; the device has been given up on.
        const FAILED = 128;
    }
}

bitflags! {
    /// Transport-level feature bits offered by a device.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Features: u64 {
        /// Used/available event index suppression.
        const RING_EVENT_IDX = 1 << 29;
        /// Modern (non-legacy) device.
        const VERSION_1 = 1 << 32;
    }
}

/// Opaque identity of an attached device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentId(pub u32);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Handle to an allocated virtqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueHandle(u16);

impl QueueHandle {
    /// Wraps a queue index. Only transports mint handles.
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Queue index within the device.
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Identifies one buffer submission on a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferToken(pub u64);

/// Which side writes the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Device reads, driver wrote.
    DeviceReads,
    /// Device fills the buffer.
    DeviceWrites,
}

/// Owned transfer buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct DmaBuffer {
    bytes: Box<[u8]>,
}

impl DmaBuffer {
    /// Allocates a zeroed buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: vec![0u8; len].into_boxed_slice() }
    }

    /// Read access to the full buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Write access to the full buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Buffer capacity in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-capacity buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copies as much of `src` as fits and returns the number of bytes written.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = core::cmp::min(src.len(), self.bytes.len());
        self.bytes[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Zeroes the buffer contents.
    pub fn scrub(&mut self) {
        self.bytes.fill(0);
    }
}

// Contents are entropy; never print them.
impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer").field("len", &self.bytes.len()).finish()
    }
}

/// A buffer the device has finished with.
#[derive(Debug)]
pub struct UsedBuffer {
    /// Token returned by the matching `submit_buffer`.
    pub token: BufferToken,
    /// The buffer itself, ownership returned to the driver.
    pub buffer: DmaBuffer,
    /// Number of bytes the device wrote.
    pub written: usize,
}

/// Interrupt handler verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt belonged to this handler.
    Claimed,
    /// Not ours (shared line or nothing pending).
    Unclaimed,
}

/// Queue interrupt callback. Receives the attachment that raised the interrupt.
pub type InterruptHandler = Arc<dyn Fn(AttachmentId) -> IrqReturn + Send + Sync>;

/// Result alias for transport operations.
pub type Result<T> = core::result::Result<T, TransportError>;

/// Errors reported by a queue transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device refused the requested feature set.
    #[error("feature negotiation rejected (requested {requested:?})")]
    FeaturesRejected {
        /// Features the driver asked for.
        requested: Features,
    },
    /// No free descriptor on the queue.
    #[error("queue full")]
    QueueFull,
    /// The queue handle does not name an allocated queue.
    #[error("unknown queue {0}")]
    UnknownQueue(u16),
    /// Interrupt resources could not be obtained.
    #[error("interrupts unavailable")]
    InterruptsUnavailable,
    /// A handler is already registered for this device.
    #[error("interrupt handler already registered")]
    HandlerRegistered,
    /// `enable_interrupts` was called without a handler.
    #[error("no interrupt handler registered")]
    NoHandler,
    /// Device-specific failure.
    #[error("device error: {0}")]
    Device(String),
}

/// A failed submission hands the buffer back to the caller.
#[derive(Debug, Error)]
#[error("submit failed: {error}")]
pub struct SubmitError {
    /// Why the queue refused the buffer.
    pub error: TransportError,
    /// The buffer, returned unchanged.
    pub buffer: DmaBuffer,
}

/// Virtqueue transport consumed by drivers.
pub trait QueueTransport: Send + Sync {
    /// Identity of the attached device.
    fn attachment(&self) -> AttachmentId;

    /// Negotiates `requested` against the device offer and returns what was accepted.
    fn negotiate_features(&self, requested: Features) -> Result<Features>;

    /// Allocates queue `index` with `buf_count` buffers of `buf_size` bytes.
    fn alloc_queue(
        &self,
        index: u16,
        buf_size: usize,
        buf_count: usize,
        name: &str,
    ) -> Option<QueueHandle>;

    /// Places `buffer` on `queue` and notifies the device.
    fn submit_buffer(
        &self,
        queue: QueueHandle,
        buffer: DmaBuffer,
        direction: Direction,
    ) -> core::result::Result<BufferToken, SubmitError>;

    /// Pops the next completed buffer from the used ring, if any.
    fn pop_used(&self, queue: QueueHandle) -> Option<UsedBuffer>;

    /// Installs the queue interrupt handler.
    fn register_interrupt_handler(&self, handler: InterruptHandler) -> Result<()>;

    /// Enables interrupt delivery for the device.
    fn enable_interrupts(&self) -> Result<()>;

    /// Requests used-buffer notifications for `queue`.
    fn start_queue_interrupts(&self, queue: QueueHandle);

    /// Suppresses used-buffer notifications for `queue`.
    fn stop_queue_interrupts(&self, queue: QueueHandle);

    /// Removes the handler. Returns once no handler invocation is running.
    fn release_interrupts(&self);

    /// Frees `queue`, dropping any buffers it still owns.
    fn free_queue(&self, queue: QueueHandle);

    /// Adds `status` bits to the device status register.
    fn set_status(&self, status: DeviceStatus);

    /// Current device status register.
    fn status(&self) -> DeviceStatus;

    /// Whether the host vouches for the bytes coming from real hardware.
    fn attests_hardware_source(&self) -> bool {
        false
    }
}

/// Handle to an armed one-shot timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Work run when a timer expires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot timer facility. Firings of one timer never overlap.
pub trait TimerFacility: Send + Sync {
    /// Runs `callback` once after `delay`.
    fn arm_once(&self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Cancels `id`. Returns `true` if the callback will never run. If the callback
    /// is executing, waits for it to return and reports `false`.
    ///
    /// Must not be called from inside the callback being cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}
