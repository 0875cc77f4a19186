// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Simulated virtio-rng device.
//!
//! Implements [`QueueTransport`] for a single request queue. Submitted buffers
//! travel over a channel to a device thread that waits the configured latency,
//! fills them from a PRNG, moves them to the used ring and raises the queue
//! interrupt. Buffers still with the device thread when the queue is freed are
//! dropped on arrival.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use viornd_hal::{
    AttachmentId, BufferToken, DeviceStatus, Direction, DmaBuffer, Features, InterruptHandler,
    IrqReturn, QueueHandle, QueueTransport, SubmitError, TransportError, UsedBuffer,
};

/// Feature bits the simulated device offers.
pub const OFFERED_FEATURES: Features = Features::VERSION_1;

/// Simulated device parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// Time the device takes to fill a buffer.
    pub latency: Duration,
    /// Whether the host attests a hardware source.
    pub attest_hardware: bool,
    /// Fixed PRNG seed.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { latency: Duration::from_millis(2), attest_hardware: false, seed: None }
    }
}

struct FillRequest {
    generation: u64,
    token: BufferToken,
    buffer: DmaBuffer,
}

#[derive(Default)]
struct DeviceState {
    status: DeviceStatus,
    queue: Option<QueueHandle>,
    generation: u64,
    used: VecDeque<UsedBuffer>,
    handler: Option<InterruptHandler>,
    irq_enabled: bool,
    queue_irq: bool,
    in_handler: usize,
    next_token: u64,
    filled: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<DeviceState>,
    handler_idle: Condvar,
}

/// A virtio-rng device backed by a thread and a PRNG.
pub struct SimulatedRng {
    id: AttachmentId,
    attest_hardware: bool,
    shared: Arc<Shared>,
    requests: Mutex<Option<Sender<FillRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedRng {
    /// Powers up device `id`.
    pub fn spawn(id: AttachmentId, config: SimConfig) -> io::Result<Arc<Self>> {
        let shared = Arc::new(Shared::default());
        let (requests, inbox) = unbounded();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let device_shared = Arc::clone(&shared);
        let latency = config.latency;
        let worker = thread::Builder::new()
            .name(format!("viorndd-{id}"))
            .spawn(move || device_loop(id, &device_shared, &inbox, rng, latency))?;
        Ok(Arc::new(Self {
            id,
            attest_hardware: config.attest_hardware,
            shared,
            requests: Mutex::new(Some(requests)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Buffers the device has filled so far.
    pub fn filled(&self) -> u64 {
        self.shared.state.lock().filled
    }

    /// `true` while a queue is allocated.
    pub fn queue_allocated(&self) -> bool {
        self.shared.state.lock().queue.is_some()
    }

    /// `true` while an interrupt handler is installed.
    pub fn has_handler(&self) -> bool {
        self.shared.state.lock().handler.is_some()
    }

    /// Stops the device thread.
    pub fn power_off(&self) {
        drop(self.requests.lock().take());
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("viorndd: {}: device thread panicked", self.id);
        }
    }
}

impl std::fmt::Debug for SimulatedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRng")
            .field("id", &self.id)
            .field("attest_hardware", &self.attest_hardware)
            .finish_non_exhaustive()
    }
}

impl Drop for SimulatedRng {
    fn drop(&mut self) {
        self.power_off();
    }
}

fn device_loop(
    id: AttachmentId,
    shared: &Shared,
    inbox: &Receiver<FillRequest>,
    mut rng: StdRng,
    latency: Duration,
) {
    while let Ok(FillRequest { generation, token, mut buffer }) = inbox.recv() {
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        rng.fill_bytes(buffer.as_mut_slice());
        let written = buffer.len();

        let handler = {
            let mut state = shared.state.lock();
            if state.queue.is_none() || state.generation != generation {
                trace!("viorndd: {id}: queue gone, dropping buffer");
                continue;
            }
            state.filled += 1;
            state.used.push_back(UsedBuffer { token, buffer, written });
            if !(state.irq_enabled && state.queue_irq) {
                continue;
            }
            let Some(handler) = state.handler.clone() else {
                continue;
            };
            state.in_handler += 1;
            handler
        };

        if handler(id) == IrqReturn::Unclaimed {
            trace!("viorndd: {id}: interrupt unclaimed");
        }

        let mut state = shared.state.lock();
        state.in_handler -= 1;
        if state.in_handler == 0 {
            shared.handler_idle.notify_all();
        }
    }
}

impl QueueTransport for SimulatedRng {
    fn attachment(&self) -> AttachmentId {
        self.id
    }

    fn negotiate_features(&self, requested: Features) -> viornd_hal::Result<Features> {
        if !OFFERED_FEATURES.contains(requested) {
            return Err(TransportError::FeaturesRejected { requested });
        }
        self.shared.state.lock().status |= DeviceStatus::FEATURES_OK;
        Ok(requested)
    }

    fn alloc_queue(
        &self,
        index: u16,
        buf_size: usize,
        buf_count: usize,
        name: &str,
    ) -> Option<QueueHandle> {
        if index != 0 || buf_size == 0 || buf_count == 0 {
            return None;
        }
        let mut state = self.shared.state.lock();
        if state.queue.is_some() {
            return None;
        }
        let handle = QueueHandle::new(index);
        state.queue = Some(handle);
        state.generation += 1;
        debug!("viorndd: {}: queue {index} {name:?} ({buf_count} x {buf_size} bytes)", self.id);
        Some(handle)
    }

    fn submit_buffer(
        &self,
        queue: QueueHandle,
        buffer: DmaBuffer,
        direction: Direction,
    ) -> Result<BufferToken, SubmitError> {
        let mut state = self.shared.state.lock();
        if state.queue != Some(queue) {
            return Err(SubmitError { error: TransportError::UnknownQueue(queue.index()), buffer });
        }
        if direction != Direction::DeviceWrites {
            return Err(SubmitError {
                error: TransportError::Device("entropy queue is device-writable only".into()),
                buffer,
            });
        }
        state.next_token += 1;
        let token = BufferToken(state.next_token);
        let generation = state.generation;
        drop(state);

        let powered_off = || TransportError::Device("device powered off".into());
        let Some(requests) = self.requests.lock().clone() else {
            return Err(SubmitError { error: powered_off(), buffer });
        };
        requests
            .send(FillRequest { generation, token, buffer })
            .map_err(|err| SubmitError { error: powered_off(), buffer: err.into_inner().buffer })?;
        Ok(token)
    }

    fn pop_used(&self, queue: QueueHandle) -> Option<UsedBuffer> {
        let mut state = self.shared.state.lock();
        if state.queue != Some(queue) {
            return None;
        }
        state.used.pop_front()
    }

    fn register_interrupt_handler(&self, handler: InterruptHandler) -> viornd_hal::Result<()> {
        let mut state = self.shared.state.lock();
        if state.handler.is_some() {
            return Err(TransportError::HandlerRegistered);
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn enable_interrupts(&self) -> viornd_hal::Result<()> {
        let mut state = self.shared.state.lock();
        if state.handler.is_none() {
            return Err(TransportError::NoHandler);
        }
        state.irq_enabled = true;
        Ok(())
    }

    fn start_queue_interrupts(&self, _queue: QueueHandle) {
        self.shared.state.lock().queue_irq = true;
    }

    fn stop_queue_interrupts(&self, _queue: QueueHandle) {
        self.shared.state.lock().queue_irq = false;
    }

    fn release_interrupts(&self) {
        let mut state = self.shared.state.lock();
        state.handler = None;
        state.irq_enabled = false;
        while state.in_handler > 0 {
            self.shared.handler_idle.wait(&mut state);
        }
    }

    fn free_queue(&self, queue: QueueHandle) {
        let mut state = self.shared.state.lock();
        if state.queue == Some(queue) {
            state.queue = None;
            state.used.clear();
        }
    }

    fn set_status(&self, status: DeviceStatus) {
        self.shared.state.lock().status |= status;
    }

    fn status(&self) -> DeviceStatus {
        self.shared.state.lock().status
    }

    fn attests_hardware_source(&self) -> bool {
        self.attest_hardware
    }
}
