// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Crypto provider surface.
//!
//! The registry advertises random-number providers to consumers. This driver
//! registers one provider per attached device. Harvested bytes are pushed into
//! the host pool by the completion handler; the pull entry points below do not
//! read from the channel:
//!   - `seed()` accepts and drops caller-supplied seed material
//!   - `generate()` reports success without filling the buffer
//!
//! Both are known gaps, kept as no-ops until a buffering scheme for pull
//! consumers exists.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;
use viornd_hal::AttachmentId;

/// Longest description the registry displays.
pub const PROVIDER_DESCRIPTION_MAX: usize = 32;

/// Mechanism name advertised for the random-number capability.
pub const MECH_NAME: &str = "virtio_rand_mech";

bitflags! {
    /// Function groups a mechanism serves.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FuncGroup: u32 {
        /// Digest operations.
        const DIGEST = 0x0000_0001;
        /// Random-number generation.
        const RANDOM = 0x8000_0000;
    }
}

bitflags! {
    /// Flags passed to `seed`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SeedFlags: u32 {
        /// Mix immediately rather than deferring.
        const SEED_NOW = 0x0000_0001;
    }
}

/// Kind of provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderType {
    /// Backed by a device.
    Hardware,
}

/// Provider health as reported to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Accepting requests.
    Ready,
}

/// One mechanism the provider implements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MechInfo {
    /// Mechanism name.
    pub name: &'static str,
    /// Provider-local mechanism number.
    pub number: u32,
    /// Function groups served.
    pub func_groups: FuncGroup,
}

/// Capability descriptor handed to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Short human-readable description (at most [`PROVIDER_DESCRIPTION_MAX`] bytes).
    pub description: String,
    /// Provider kind.
    pub provider_type: ProviderType,
    /// Device backing the provider.
    pub attachment: AttachmentId,
    /// Supported mechanisms.
    pub mechanisms: Vec<MechInfo>,
}

impl ProviderInfo {
    /// Function groups across all mechanisms.
    pub fn func_groups(&self) -> FuncGroup {
        self.mechanisms.iter().fold(FuncGroup::empty(), |acc, mech| acc | mech.func_groups)
    }
}

/// Registry-assigned provider handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderHandle(pub u64);

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prov#{}", self.0)
    }
}

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Consumers still hold the provider.
    #[error("provider busy")]
    Busy,
    /// The handle is not registered.
    #[error("unknown provider handle")]
    UnknownHandle,
    /// The descriptor was refused.
    #[error("provider rejected: {0}")]
    Rejected(String),
}

/// Failures from provider entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The request is malformed.
    #[error("invalid argument")]
    InvalidArgument,
}

/// Entry points a random-number provider exposes to the registry.
pub trait RandomProvider: Send + Sync {
    /// Current health.
    fn status(&self) -> ProviderStatus;

    /// Accepts seed material with the caller's entropy estimate.
    fn seed(&self, buf: &[u8], entropy_est: u32, flags: SeedFlags) -> Result<(), CryptoError>;

    /// Fills `buf` with random bytes.
    fn generate(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Pluggable crypto-provider registry.
pub trait CryptoRegistry: Send + Sync {
    /// Advertises `provider` under `info`.
    fn register_provider(
        &self,
        info: ProviderInfo,
        provider: Arc<dyn RandomProvider>,
    ) -> Result<ProviderHandle, RegistryError>;

    /// Withdraws a provider. Fails with [`RegistryError::Busy`] while in use.
    fn unregister_provider(&self, handle: ProviderHandle) -> Result<(), RegistryError>;
}

/// The provider registered for one attached device.
#[derive(Debug)]
pub struct ViorndProvider {
    attachment: AttachmentId,
}

impl ViorndProvider {
    /// Provider for `attachment`.
    pub fn new(attachment: AttachmentId) -> Self {
        Self { attachment }
    }

    /// Capability descriptor: random-number generation only.
    pub fn info(&self) -> ProviderInfo {
        let mut description = format!("viornd/{} Virtio Entropy Source", self.attachment.0);
        truncate_on_char_boundary(&mut description, PROVIDER_DESCRIPTION_MAX);
        ProviderInfo {
            description,
            provider_type: ProviderType::Hardware,
            attachment: self.attachment,
            mechanisms: vec![MechInfo { name: MECH_NAME, number: 0, func_groups: FuncGroup::RANDOM }],
        }
    }
}

impl RandomProvider for ViorndProvider {
    fn status(&self) -> ProviderStatus {
        ProviderStatus::Ready
    }

    fn seed(&self, _buf: &[u8], _entropy_est: u32, _flags: SeedFlags) -> Result<(), CryptoError> {
        Ok(())
    }

    fn generate(&self, _buf: &mut [u8]) -> Result<(), CryptoError> {
        Ok(())
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
