// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller.
//!
//! Bring-up runs negotiate, allocate, register provider, register interrupt,
//! enable, arm. Each step either succeeds or unwinds everything before it in
//! reverse, so a failed attach leaves no provider, interrupt callback, lookup
//! entry or timer behind.
//!
//! Teardown withdraws the provider first. A busy registry aborts the detach
//! before anything else is touched. After that the device drains: the timer is
//! cancelled, an in-flight request gets a bounded wait, interrupts are released,
//! anything still outstanding is abandoned and the queue is freed.
//!
//! Lock discipline: the device mutex is only held for state changes and channel
//! bookkeeping. Transport interrupt release and timer cancellation may wait on a
//! running callback that itself takes the device mutex, so both run unlocked.
//! Attach and detach are serialized by the instance map lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use viornd_hal::{
    AttachmentId, DeviceStatus, Features, InterruptHandler, QueueTransport, TimerFacility,
    TransportError,
};

use crate::channel::{EntropyChannel, OutstandingRequest};
use crate::completion::{dispatch_interrupt, EntropySink};
use crate::config::{HarvestConfig, InvalidConfig};
use crate::error::{AttachError, DetachError, RemoveError};
use crate::provider::{CryptoRegistry, ProviderHandle, RegistryError, ViorndProvider};
use crate::scheduler::{cancel_timer, HarvestScheduler};
use crate::state::LifecycleState;
use crate::stats::HarvestStats;
use crate::{MODULE_IDENT, VIORND_FEATURES};

/// Attach-side commands delivered by the device framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachCmd {
    /// Fresh attach.
    Attach,
    /// Resume after suspend.
    Resume,
    /// Power-management resume.
    PmResume,
}

/// Detach-side commands delivered by the device framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachCmd {
    /// Full detach.
    Detach,
    /// Suspend.
    Suspend,
    /// Power-management suspend.
    PmSuspend,
}

/// Subsystems the module links into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// Device driver framework.
    Driver,
    /// Crypto framework.
    Crypto,
}

/// Module identity for module listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Human-readable identity.
    pub ident: &'static str,
    /// Linkages, driver first.
    pub linkage: &'static [Linkage],
}

/// Collaborators shared by every device of one driver instance.
pub(crate) struct DriverContext {
    pub(crate) config: HarvestConfig,
    pub(crate) registry: Arc<dyn CryptoRegistry>,
    pub(crate) sink: Arc<dyn EntropySink>,
    pub(crate) timers: Arc<dyn TimerFacility>,
}

/// Mutable per-device state, guarded by [`Device::inner`].
pub(crate) struct DeviceInner {
    pub(crate) state: LifecycleState,
    pub(crate) features: Features,
    pub(crate) channel: Option<EntropyChannel>,
    pub(crate) scheduler: HarvestScheduler,
    pub(crate) provider: Option<ProviderHandle>,
    pub(crate) bits_per_byte: u8,
    pub(crate) stats: HarvestStats,
}

impl DeviceInner {
    fn transition(&mut self, next: LifecycleState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// One attached virtio-rng device.
pub struct Device {
    pub(crate) attachment: AttachmentId,
    pub(crate) transport: Arc<dyn QueueTransport>,
    pub(crate) ctx: Arc<DriverContext>,
    pub(crate) inner: Mutex<DeviceInner>,
    /// Signalled when a completion arrives while draining.
    pub(crate) drained: Condvar,
}

impl Device {
    fn new(
        transport: Arc<dyn QueueTransport>,
        ctx: Arc<DriverContext>,
        bits_per_byte: u8,
    ) -> Self {
        let inner = DeviceInner {
            state: LifecycleState::Unattached,
            features: Features::empty(),
            channel: None,
            scheduler: HarvestScheduler::new(ctx.config.interval),
            provider: None,
            bits_per_byte,
            stats: HarvestStats::default(),
        };
        Self {
            attachment: transport.attachment(),
            transport,
            ctx,
            inner: Mutex::new(inner),
            drained: Condvar::new(),
        }
    }

    /// Attachment this instance serves.
    pub fn attachment(&self) -> AttachmentId {
        self.attachment
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    /// Features accepted during negotiation.
    pub fn features(&self) -> Features {
        self.inner.lock().features
    }

    /// Snapshot of the harvest counters.
    pub fn stats(&self) -> HarvestStats {
        self.inner.lock().stats
    }

    /// Entropy credited per delivered byte.
    pub fn bits_per_byte(&self) -> u8 {
        self.inner.lock().bits_per_byte
    }

    /// `true` while a request is on the queue.
    pub fn is_request_outstanding(&self) -> bool {
        self.inner.lock().channel.as_ref().is_some_and(EntropyChannel::is_outstanding)
    }

    /// The in-flight request, if any.
    pub fn outstanding(&self) -> Option<OutstandingRequest> {
        self.inner.lock().channel.as_ref().and_then(|channel| channel.outstanding().copied())
    }

    /// `true` while a future harvest is scheduled.
    pub fn timer_armed(&self) -> bool {
        self.inner.lock().scheduler.is_armed()
    }

    fn enter(&self, next: LifecycleState) {
        self.inner.lock().transition(next);
    }

    fn bring_up(self: &Arc<Self>, table: &Arc<DeviceTable>) -> Result<(), AttachError> {
        let transport = self.transport.as_ref();
        transport.set_status(DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER);

        self.enter(LifecycleState::Negotiating);
        let accepted = match transport.negotiate_features(VIORND_FEATURES) {
            Ok(accepted) => accepted,
            Err(err) => {
                self.enter(LifecycleState::Failed);
                return Err(AttachError::Negotiation(err));
            }
        };
        let missing = VIORND_FEATURES.difference(accepted);
        if !missing.is_empty() {
            self.enter(LifecycleState::Failed);
            return Err(AttachError::MissingFeatures { missing });
        }
        {
            let mut inner = self.inner.lock();
            inner.features = accepted;
            inner.transition(LifecycleState::Ready);
        }

        let Some(channel) = EntropyChannel::open(transport, self.ctx.config.chunk_bytes) else {
            transport.set_status(DeviceStatus::FAILED);
            self.enter(LifecycleState::Failed);
            return Err(AttachError::Allocation);
        };

        let provider = ViorndProvider::new(self.attachment);
        let handle = match self.ctx.registry.register_provider(provider.info(), Arc::new(provider))
        {
            Ok(handle) => handle,
            Err(err) => {
                channel.close(transport);
                self.enter(LifecycleState::Failed);
                return Err(AttachError::Registration(err));
            }
        };
        transport.set_status(DeviceStatus::DRIVER_OK);

        table.insert(self);
        if let Err(err) = self.enable_interrupts(table, &channel) {
            table.remove(self.attachment);
            if let Err(unreg) = self.ctx.registry.unregister_provider(handle) {
                error!("viornd: {}: provider {handle} left registered: {unreg}", self.attachment);
            }
            channel.close(transport);
            transport.set_status(DeviceStatus::FAILED);
            self.enter(LifecycleState::Failed);
            return Err(AttachError::Interrupts(err));
        }

        let mut inner = self.inner.lock();
        inner.channel = Some(channel);
        inner.provider = Some(handle);
        inner.transition(LifecycleState::Running);
        inner.scheduler.arm(self.ctx.timers.as_ref(), Arc::downgrade(self));
        Ok(())
    }

    /// Installs the completion handler and enables delivery. A failure after the
    /// handler went in releases it again; a refused registration releases nothing.
    fn enable_interrupts(
        &self,
        table: &Arc<DeviceTable>,
        channel: &EntropyChannel,
    ) -> Result<(), TransportError> {
        let transport = self.transport.as_ref();
        transport.register_interrupt_handler(table.handler())?;
        transport.start_queue_interrupts(channel.queue());
        transport.enable_interrupts().inspect_err(|_| {
            transport.stop_queue_interrupts(channel.queue());
            transport.release_interrupts();
        })
    }

    fn tear_down(&self, table: &DeviceTable) -> Result<(), DetachError> {
        let handle = {
            let inner = self.inner.lock();
            if inner.state != LifecycleState::Running {
                return Err(DetachError::InvalidState(inner.state));
            }
            inner.provider
        };
        if let Some(handle) = handle {
            match self.ctx.registry.unregister_provider(handle) {
                Ok(()) => {}
                Err(RegistryError::Busy) => {
                    warn!("viornd: {}: provider {handle} busy, detach refused", self.attachment);
                    return Err(DetachError::ProviderBusy);
                }
                Err(err) => return Err(DetachError::Registry(err)),
            }
        }

        let timer = {
            let mut inner = self.inner.lock();
            inner.provider = None;
            inner.transition(LifecycleState::Draining);
            inner.scheduler.take()
        };
        if let Some(id) = timer {
            cancel_timer(self.ctx.timers.as_ref(), id, self);
        }

        let deadline = Instant::now() + self.ctx.config.drain_timeout;
        let queue = {
            let mut inner = self.inner.lock();
            while inner.channel.as_ref().is_some_and(EntropyChannel::is_outstanding) {
                if self.drained.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
            inner.channel.as_ref().map(EntropyChannel::queue)
        };

        let transport = self.transport.as_ref();
        if let Some(queue) = queue {
            transport.stop_queue_interrupts(queue);
        }
        transport.release_interrupts();
        table.remove(self.attachment);

        let channel = {
            let mut inner = self.inner.lock();
            let mut channel = inner.channel.take();
            if let Some(request) = channel.as_mut().and_then(EntropyChannel::abandon) {
                inner.stats.abandoned_requests += 1;
                warn!(
                    "viornd: {}: abandoned request outstanding for {:?}",
                    self.attachment,
                    request.age()
                );
            }
            channel
        };
        if let Some(channel) = channel {
            channel.close(transport);
        }

        self.enter(LifecycleState::Detached);
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("attachment", &self.attachment)
            .field("state", &self.inner.try_lock().map(|inner| inner.state))
            .finish_non_exhaustive()
    }
}

/// Attachment to device lookup used by the interrupt path. Holds no strong
/// references, so a device being torn down is never kept alive by it.
#[derive(Default)]
pub(crate) struct DeviceTable {
    entries: RwLock<HashMap<AttachmentId, Weak<Device>>>,
}

impl DeviceTable {
    fn insert(&self, device: &Arc<Device>) {
        self.entries.write().insert(device.attachment, Arc::downgrade(device));
    }

    fn remove(&self, attachment: AttachmentId) {
        self.entries.write().remove(&attachment);
    }

    pub(crate) fn lookup(&self, attachment: AttachmentId) -> Option<Arc<Device>> {
        self.entries.read().get(&attachment).and_then(Weak::upgrade)
    }

    fn handler(self: &Arc<Self>) -> InterruptHandler {
        let table = Arc::clone(self);
        Arc::new(move |attachment| dispatch_interrupt(&table, attachment))
    }
}

/// The driver: owns every attached device and the shared collaborators.
pub struct Viornd {
    ctx: Arc<DriverContext>,
    table: Arc<DeviceTable>,
    instances: Mutex<HashMap<AttachmentId, Arc<Device>>>,
}

impl Viornd {
    /// Creates the driver. Fails if `config` is out of bounds.
    pub fn new(
        config: HarvestConfig,
        registry: Arc<dyn CryptoRegistry>,
        sink: Arc<dyn EntropySink>,
        timers: Arc<dyn TimerFacility>,
    ) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(DriverContext { config, registry, sink, timers }),
            table: Arc::new(DeviceTable::default()),
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// Module identity.
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo { ident: MODULE_IDENT, linkage: &[Linkage::Driver, Linkage::Crypto] }
    }

    /// Active configuration.
    pub fn config(&self) -> &HarvestConfig {
        &self.ctx.config
    }

    /// Brings up the device behind `transport` and starts harvesting.
    pub fn attach(
        &self,
        transport: Arc<dyn QueueTransport>,
        cmd: AttachCmd,
    ) -> Result<Arc<Device>, AttachError> {
        let attachment = transport.attachment();
        if cmd != AttachCmd::Attach {
            warn!("viornd: {attachment}: {cmd:?} not supported");
            return Err(AttachError::Unsupported(cmd));
        }

        let mut instances = self.instances.lock();
        if instances.contains_key(&attachment) {
            warn!("viornd: {attachment}: already attached");
            return Err(AttachError::AlreadyAttached(attachment));
        }

        let bits_per_byte = self.ctx.config.bits_per_byte_for(transport.attests_hardware_source());
        let device = Arc::new(Device::new(transport, Arc::clone(&self.ctx), bits_per_byte));
        if let Err(err) = device.bring_up(&self.table) {
            error!("viornd: {attachment}: attach failed: {err}");
            return Err(err);
        }
        instances.insert(attachment, Arc::clone(&device));
        info!(
            "viornd: {attachment}: harvesting {} bytes every {:?} at {bits_per_byte} bits/byte",
            self.ctx.config.chunk_bytes, self.ctx.config.interval
        );
        Ok(device)
    }

    /// Stops harvesting on `attachment` and releases everything attach acquired.
    pub fn detach(&self, attachment: AttachmentId, cmd: DetachCmd) -> Result<(), DetachError> {
        if cmd != DetachCmd::Detach {
            warn!("viornd: {attachment}: {cmd:?} not supported");
            return Err(DetachError::Unsupported(cmd));
        }

        let mut instances = self.instances.lock();
        let device =
            instances.get(&attachment).cloned().ok_or(DetachError::NotAttached(attachment))?;
        device.tear_down(&self.table)?;
        instances.remove(&attachment);
        let stats = device.stats();
        info!(
            "viornd: {attachment}: detached after {} harvests ({} bytes)",
            stats.harvests, stats.bytes_delivered
        );
        Ok(())
    }

    /// Checks the module can be unloaded.
    pub fn remove(&self) -> Result<(), RemoveError> {
        let attached = self.instances.lock().len();
        if attached > 0 {
            debug!("viornd: remove refused, {attached} device(s) attached");
            return Err(RemoveError::Busy { attached });
        }
        Ok(())
    }

    /// The instance serving `attachment`.
    pub fn device(&self, attachment: AttachmentId) -> Option<Arc<Device>> {
        self.instances.lock().get(&attachment).cloned()
    }

    /// Attachments with an active instance, in ascending order.
    pub fn attached(&self) -> Vec<AttachmentId> {
        let mut ids: Vec<_> = self.instances.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}
