// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use viornd_hal::{AttachmentId, Features, TransportError};

use crate::lifecycle::{AttachCmd, DetachCmd};
use crate::provider::RegistryError;
use crate::state::LifecycleState;

/// Bring-up failures. Every variant leaves no registration behind.
#[derive(Debug, Error)]
pub enum AttachError {
    /// Resume-style commands; the driver has no power management.
    #[error("{0:?} not supported")]
    Unsupported(AttachCmd),
    /// The attachment already has an active instance.
    #[error("{0} already attached")]
    AlreadyAttached(AttachmentId),
    /// The transport failed feature negotiation.
    #[error("feature negotiation failed: {0}")]
    Negotiation(TransportError),
    /// The device accepted less than the baseline feature set.
    #[error("device lacks required features {missing:?}")]
    MissingFeatures {
        /// Required bits the device did not accept.
        missing: Features,
    },
    /// The request queue could not be allocated.
    #[error("request queue allocation failed")]
    Allocation,
    /// The crypto registry rejected the provider.
    #[error("provider registration failed: {0}")]
    Registration(RegistryError),
    /// Interrupt registration or enablement failed.
    #[error("interrupt setup failed: {0}")]
    Interrupts(TransportError),
}

/// Teardown failures.
#[derive(Debug, Error)]
pub enum DetachError {
    /// Suspend-style commands; the driver has no power management.
    #[error("{0:?} not supported")]
    Unsupported(DetachCmd),
    /// No instance for this attachment.
    #[error("{0} not attached")]
    NotAttached(AttachmentId),
    /// The registry still has consumers of the provider. Nothing was torn down.
    #[error("provider busy")]
    ProviderBusy,
    /// The registry refused the withdrawal for another reason.
    #[error("provider withdrawal failed: {0}")]
    Registry(RegistryError),
    /// The instance is not in a state that can be detached.
    #[error("cannot detach from state {0}")]
    InvalidState(LifecycleState),
}

/// Request submission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A request is already outstanding.
    #[error("channel busy")]
    Busy,
    /// The device is not running.
    #[error("channel closed")]
    Closed,
    /// The queue refused the buffer.
    #[error("queue refused buffer: {0}")]
    Transport(TransportError),
}

/// Module unload failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoveError {
    /// Devices are still attached.
    #[error("{attached} device(s) still attached")]
    Busy {
        /// Number of attached devices.
        attached: usize,
    },
}
