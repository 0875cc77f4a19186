// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Entropy channel: one request queue, one transfer buffer, one request in flight.
//!
//! The transfer buffer is an owned value. It lives in the channel while idle, in the
//! queue while a request is outstanding, and comes back with the used buffer. A
//! request abandoned at teardown leaves the buffer with the queue, which drops it
//! in `free_queue`.

use std::time::{Duration, Instant};

use log::{debug, warn};
use viornd_hal::{
    BufferToken, Direction, DmaBuffer, QueueHandle, QueueTransport, SubmitError, UsedBuffer,
};

use crate::config::MAX_CHUNK_BYTES;
use crate::error::ChannelError;
use crate::lifecycle::{Device, DeviceInner};
use crate::state::LifecycleState;
use crate::{REQUEST_QUEUE, REQUEST_QUEUE_NAME};

/// A submitted, not yet completed harvest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutstandingRequest {
    token: BufferToken,
    submitted_at: Instant,
}

impl OutstandingRequest {
    /// Token of the buffer on the queue.
    pub fn token(&self) -> BufferToken {
        self.token
    }

    /// When the buffer was handed to the device.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Time since submission.
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Bytes delivered by one completion. Zeroed on drop.
pub(crate) struct Harvest {
    bytes: [u8; MAX_CHUNK_BYTES],
    len: usize,
    latency: Duration,
}

impl Harvest {
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn latency(&self) -> Duration {
        self.latency
    }
}

impl Drop for Harvest {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}

pub(crate) struct EntropyChannel {
    queue: QueueHandle,
    capacity: usize,
    buffer: Option<DmaBuffer>,
    outstanding: Option<OutstandingRequest>,
}

impl EntropyChannel {
    /// Allocates the request queue and its transfer buffer. `None` on exhaustion.
    pub(crate) fn open(transport: &dyn QueueTransport, chunk_bytes: usize) -> Option<Self> {
        let queue = transport.alloc_queue(REQUEST_QUEUE, chunk_bytes, 1, REQUEST_QUEUE_NAME)?;
        Some(Self {
            queue,
            capacity: chunk_bytes,
            buffer: Some(DmaBuffer::zeroed(chunk_bytes)),
            outstanding: None,
        })
    }

    pub(crate) fn queue(&self) -> QueueHandle {
        self.queue
    }

    pub(crate) fn outstanding(&self) -> Option<&OutstandingRequest> {
        self.outstanding.as_ref()
    }

    pub(crate) fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Hands the transfer buffer to the device. Never blocks.
    pub(crate) fn submit(&mut self, transport: &dyn QueueTransport) -> Result<(), ChannelError> {
        if self.outstanding.is_some() {
            return Err(ChannelError::Busy);
        }
        let Some(mut buffer) = self.buffer.take() else {
            return Err(ChannelError::Busy);
        };
        buffer.scrub();
        match transport.submit_buffer(self.queue, buffer, Direction::DeviceWrites) {
            Ok(token) => {
                self.outstanding = Some(OutstandingRequest { token, submitted_at: Instant::now() });
                Ok(())
            }
            Err(SubmitError { error, buffer }) => {
                self.buffer = Some(buffer);
                Err(ChannelError::Transport(error))
            }
        }
    }

    /// Matches `used` against the outstanding request. A match clears the request,
    /// takes the buffer back and copies out the delivered prefix. Anything else is
    /// returned untouched.
    pub(crate) fn complete(&mut self, used: UsedBuffer) -> Result<Harvest, UsedBuffer> {
        let Some(request) = self.outstanding else {
            return Err(used);
        };
        if request.token != used.token {
            return Err(used);
        }
        self.outstanding = None;

        let UsedBuffer { mut buffer, written, .. } = used;
        let len = written.min(self.capacity).min(buffer.len());
        let mut harvest = Harvest {
            bytes: [0u8; MAX_CHUNK_BYTES],
            len,
            latency: request.submitted_at.elapsed(),
        };
        harvest.bytes[..len].copy_from_slice(&buffer.as_slice()[..len]);
        buffer.scrub();
        self.buffer = Some(buffer);
        Ok(harvest)
    }

    /// Forgets the outstanding request. Teardown only.
    pub(crate) fn abandon(&mut self) -> Option<OutstandingRequest> {
        self.outstanding.take()
    }

    /// Frees the queue. Buffers still owned by the queue go with it.
    pub(crate) fn close(mut self, transport: &dyn QueueTransport) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.scrub();
        }
        transport.free_queue(self.queue);
    }
}

impl Device {
    /// Places one device-writable buffer on the request queue.
    ///
    /// Returns immediately. Fails with [`ChannelError::Busy`] while a request is
    /// outstanding and [`ChannelError::Closed`] unless the device is running.
    pub fn submit_request(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        self.submit_locked(&mut inner)
    }

    pub(crate) fn submit_locked(&self, inner: &mut DeviceInner) -> Result<(), ChannelError> {
        if inner.state != LifecycleState::Running {
            return Err(ChannelError::Closed);
        }
        let channel = inner.channel.as_mut().ok_or(ChannelError::Closed)?;
        match channel.submit(self.transport.as_ref()) {
            Ok(()) => {
                debug!("viornd: {}: requested {} bytes", self.attachment, channel.capacity);
                Ok(())
            }
            Err(err) => {
                inner.stats.submit_failures += 1;
                warn!("viornd: {}: request not submitted: {err}", self.attachment);
                Err(err)
            }
        }
    }
}
