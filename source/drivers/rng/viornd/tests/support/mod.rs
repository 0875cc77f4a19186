// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared stubs for the viornd integration tests: a single-queue transport with
//! per-step failure injection, a manually driven timer facility, a recording
//! entropy sink and an in-memory crypto registry.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use viornd::provider::{
    CryptoRegistry, ProviderHandle, ProviderInfo, RandomProvider, RegistryError,
};
use viornd::{EntropySink, HarvestConfig, Viornd};
use viornd_hal::{
    AttachmentId, BufferToken, DeviceStatus, Direction, DmaBuffer, Features, InterruptHandler,
    IrqReturn, QueueHandle, QueueTransport, SubmitError, TimerCallback, TimerFacility, TimerId,
    TransportError, UsedBuffer,
};

/// Bring-up step at which the stub transport fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailAt {
    #[default]
    Nothing,
    Negotiate,
    Alloc,
    RegisterIrq,
    EnableIrq,
}

#[derive(Default)]
struct TransportState {
    status: DeviceStatus,
    queue: Option<(QueueHandle, usize, String)>,
    pending: VecDeque<(BufferToken, DmaBuffer)>,
    used: VecDeque<UsedBuffer>,
    handler: Option<InterruptHandler>,
    irq_enabled: bool,
    queue_irq: bool,
    next_token: u64,
    submits: usize,
    frees: usize,
    releases: usize,
}

pub struct StubTransport {
    id: AttachmentId,
    fail: FailAt,
    attested: bool,
    refuse_submit: AtomicBool,
    state: Mutex<TransportState>,
}

impl StubTransport {
    pub fn new(id: u32) -> Arc<Self> {
        Self::build(id, FailAt::Nothing, false)
    }

    pub fn failing(id: u32, fail: FailAt) -> Arc<Self> {
        Self::build(id, fail, false)
    }

    pub fn attested(id: u32) -> Arc<Self> {
        Self::build(id, FailAt::Nothing, true)
    }

    fn build(id: u32, fail: FailAt, attested: bool) -> Arc<Self> {
        Arc::new(Self {
            id: AttachmentId(id),
            fail,
            attested,
            refuse_submit: AtomicBool::new(false),
            state: Mutex::new(TransportState::default()),
        })
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn refuse_submits(&self, refuse: bool) {
        self.refuse_submit.store(refuse, Ordering::SeqCst);
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.state.lock().status
    }

    pub fn submits(&self) -> usize {
        self.state.lock().submits
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn queue_allocated(&self) -> bool {
        self.state.lock().queue.is_some()
    }

    pub fn queue_name(&self) -> Option<String> {
        self.state.lock().queue.as_ref().map(|(_, _, name)| name.clone())
    }

    pub fn queue_buf_size(&self) -> Option<usize> {
        self.state.lock().queue.as_ref().map(|(_, size, _)| *size)
    }

    pub fn frees(&self) -> usize {
        self.state.lock().frees
    }

    pub fn has_handler(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    /// Number of `release_interrupts` calls seen.
    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    pub fn interrupts_enabled(&self) -> bool {
        let state = self.state.lock();
        state.irq_enabled && state.queue_irq
    }

    /// The device fills the oldest pending buffer with `fill` and raises the interrupt.
    /// Returns `None` when nothing is pending or no handler is installed.
    pub fn complete(&self, fill: &[u8]) -> Option<IrqReturn> {
        if !self.finish(fill) {
            return None;
        }
        self.raise()
    }

    /// The device fills the oldest pending buffer but the interrupt is not delivered yet.
    pub fn finish(&self, fill: &[u8]) -> bool {
        let mut state = self.state.lock();
        let Some((token, mut buffer)) = state.pending.pop_front() else {
            return false;
        };
        let written = buffer.fill_from(fill);
        state.used.push_back(UsedBuffer { token, buffer, written });
        true
    }

    /// Places a used buffer the driver never submitted.
    pub fn inject_stray(&self, token: u64) {
        let used = UsedBuffer { token: BufferToken(token), buffer: DmaBuffer::zeroed(16), written: 16 };
        self.state.lock().used.push_back(used);
    }

    /// Delivers the queue interrupt. The handler runs without the stub lock held.
    pub fn raise(&self) -> Option<IrqReturn> {
        let handler = {
            let state = self.state.lock();
            if !state.irq_enabled {
                return None;
            }
            state.handler.clone()?
        };
        Some(handler(self.id))
    }
}

impl QueueTransport for StubTransport {
    fn attachment(&self) -> AttachmentId {
        self.id
    }

    fn negotiate_features(&self, requested: Features) -> viornd_hal::Result<Features> {
        if self.fail == FailAt::Negotiate {
            return Err(TransportError::FeaturesRejected { requested });
        }
        let mut state = self.state.lock();
        state.status |= DeviceStatus::FEATURES_OK;
        Ok(requested)
    }

    fn alloc_queue(
        &self,
        index: u16,
        buf_size: usize,
        _buf_count: usize,
        name: &str,
    ) -> Option<QueueHandle> {
        if self.fail == FailAt::Alloc {
            return None;
        }
        let handle = QueueHandle::new(index);
        self.state.lock().queue = Some((handle, buf_size, name.to_string()));
        Some(handle)
    }

    fn submit_buffer(
        &self,
        queue: QueueHandle,
        buffer: DmaBuffer,
        direction: Direction,
    ) -> Result<BufferToken, SubmitError> {
        assert_eq!(direction, Direction::DeviceWrites);
        if self.refuse_submit.load(Ordering::SeqCst) {
            return Err(SubmitError { error: TransportError::QueueFull, buffer });
        }
        let mut state = self.state.lock();
        if state.queue.as_ref().map(|(handle, _, _)| *handle) != Some(queue) {
            return Err(SubmitError { error: TransportError::UnknownQueue(queue.index()), buffer });
        }
        state.next_token += 1;
        state.submits += 1;
        let token = BufferToken(state.next_token);
        state.pending.push_back((token, buffer));
        Ok(token)
    }

    fn pop_used(&self, _queue: QueueHandle) -> Option<UsedBuffer> {
        self.state.lock().used.pop_front()
    }

    fn register_interrupt_handler(&self, handler: InterruptHandler) -> viornd_hal::Result<()> {
        if self.fail == FailAt::RegisterIrq {
            return Err(TransportError::InterruptsUnavailable);
        }
        let mut state = self.state.lock();
        if state.handler.is_some() {
            return Err(TransportError::HandlerRegistered);
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn enable_interrupts(&self) -> viornd_hal::Result<()> {
        if self.fail == FailAt::EnableIrq {
            return Err(TransportError::Device("msi-x vector busy".into()));
        }
        let mut state = self.state.lock();
        if state.handler.is_none() {
            return Err(TransportError::NoHandler);
        }
        state.irq_enabled = true;
        Ok(())
    }

    fn start_queue_interrupts(&self, _queue: QueueHandle) {
        self.state.lock().queue_irq = true;
    }

    fn stop_queue_interrupts(&self, _queue: QueueHandle) {
        self.state.lock().queue_irq = false;
    }

    fn release_interrupts(&self) {
        let mut state = self.state.lock();
        state.handler = None;
        state.irq_enabled = false;
        state.releases += 1;
    }

    fn free_queue(&self, _queue: QueueHandle) {
        let mut state = self.state.lock();
        state.queue = None;
        state.pending.clear();
        state.used.clear();
        state.frees += 1;
    }

    fn set_status(&self, status: DeviceStatus) {
        self.state.lock().status |= status;
    }

    fn status(&self) -> DeviceStatus {
        self.state.lock().status
    }

    fn attests_hardware_source(&self) -> bool {
        self.attested
    }
}

#[derive(Default)]
struct TimerState {
    next: u64,
    armed: BTreeMap<TimerId, (Duration, TimerCallback)>,
    delays: Vec<Duration>,
    cancelled: Vec<TimerId>,
}

/// Timer facility driven by the test: nothing fires until `fire_next`.
#[derive(Default)]
pub struct ManualTimers {
    state: Mutex<TimerState>,
}

impl ManualTimers {
    pub fn armed(&self) -> usize {
        self.state.lock().armed.len()
    }

    pub fn total_armed(&self) -> usize {
        self.state.lock().delays.len()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.state.lock().delays.clone()
    }

    pub fn cancelled(&self) -> usize {
        self.state.lock().cancelled.len()
    }

    /// Runs the earliest armed callback. The facility lock is released first.
    pub fn fire_next(&self) -> bool {
        let callback = {
            let mut state = self.state.lock();
            let Some(id) = state.armed.keys().next().copied() else {
                return false;
            };
            state.armed.remove(&id).map(|(_, callback)| callback)
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl TimerFacility for ManualTimers {
    fn arm_once(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let mut state = self.state.lock();
        state.next += 1;
        let id = TimerId(state.next);
        state.armed.insert(id, (delay, callback));
        state.delays.push(delay);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        state.cancelled.push(id);
        state.armed.remove(&id).is_some()
    }
}

/// Sink that remembers every delivery.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(Vec<u8>, u32)>>,
}

impl RecordingSink {
    pub fn deliveries(&self) -> Vec<(Vec<u8>, u32)> {
        self.deliveries.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }
}

impl EntropySink for RecordingSink {
    fn add_entropy(&self, bytes: &[u8], entropy_bits: u32) {
        self.deliveries.lock().push((bytes.to_vec(), entropy_bits));
    }
}

/// In-memory registry with switches for rejection and busy withdrawal.
#[derive(Default)]
pub struct StubRegistry {
    providers: Mutex<HashMap<ProviderHandle, (ProviderInfo, Arc<dyn RandomProvider>)>>,
    next: Mutex<u64>,
    reject: AtomicBool,
    busy: AtomicBool,
}

impl StubRegistry {
    pub fn reject_registrations(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn registered(&self) -> usize {
        self.providers.lock().len()
    }

    pub fn infos(&self) -> Vec<ProviderInfo> {
        self.providers.lock().values().map(|(info, _)| info.clone()).collect()
    }

    pub fn provider(&self) -> Option<Arc<dyn RandomProvider>> {
        self.providers.lock().values().next().map(|(_, provider)| Arc::clone(provider))
    }
}

impl CryptoRegistry for StubRegistry {
    fn register_provider(
        &self,
        info: ProviderInfo,
        provider: Arc<dyn RandomProvider>,
    ) -> Result<ProviderHandle, RegistryError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(RegistryError::Rejected("registry full".into()));
        }
        let mut next = self.next.lock();
        *next += 1;
        let handle = ProviderHandle(*next);
        self.providers.lock().insert(handle, (info, provider));
        Ok(handle)
    }

    fn unregister_provider(&self, handle: ProviderHandle) -> Result<(), RegistryError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(RegistryError::Busy);
        }
        self.providers.lock().remove(&handle).map(|_| ()).ok_or(RegistryError::UnknownHandle)
    }
}

/// A driver wired to fresh stubs.
pub struct Harness {
    pub driver: Viornd,
    pub registry: Arc<StubRegistry>,
    pub sink: Arc<RecordingSink>,
    pub timers: Arc<ManualTimers>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HarvestConfig::default())
    }

    pub fn with_config(config: HarvestConfig) -> Self {
        let registry = Arc::new(StubRegistry::default());
        let sink = Arc::new(RecordingSink::default());
        let timers = Arc::new(ManualTimers::default());
        let driver = Viornd::new(config, registry.clone(), sink.clone(), timers.clone())
            .expect("config should be valid");
        Self { driver, registry, sink, timers }
    }
}
