// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory crypto provider registry.
//!
//! Consumers take a hold on a provider while using it; a held provider cannot
//! be withdrawn and `unregister_provider` reports busy until every hold is
//! released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use viornd::provider::{
    CryptoError, CryptoRegistry, FuncGroup, ProviderHandle, ProviderInfo, RandomProvider,
    RegistryError, PROVIDER_DESCRIPTION_MAX,
};

struct ProviderRecord {
    info: ProviderInfo,
    provider: Arc<dyn RandomProvider>,
    holds: usize,
}

/// Host stand-in for the kernel crypto framework.
#[derive(Default)]
pub struct KernelCryptoRegistry {
    providers: Mutex<HashMap<ProviderHandle, ProviderRecord>>,
    next: AtomicU64,
}

impl KernelCryptoRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    /// `true` when no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptors of every registered provider, ordered by handle.
    pub fn providers(&self) -> Vec<(ProviderHandle, ProviderInfo)> {
        let providers = self.providers.lock();
        let mut list: Vec<_> =
            providers.iter().map(|(handle, record)| (*handle, record.info.clone())).collect();
        list.sort_by_key(|(handle, _)| *handle);
        list
    }

    /// Takes a hold on the first provider serving `group`.
    pub fn acquire(&self, group: FuncGroup) -> Option<ProviderHandle> {
        let mut providers = self.providers.lock();
        let (handle, record) = providers
            .iter_mut()
            .filter(|(_, record)| record.info.func_groups().contains(group))
            .min_by_key(|(handle, _)| **handle)?;
        record.holds += 1;
        Some(*handle)
    }

    /// Drops a hold taken by [`acquire`](Self::acquire).
    pub fn release(&self, handle: ProviderHandle) {
        if let Some(record) = self.providers.lock().get_mut(&handle) {
            record.holds = record.holds.saturating_sub(1);
        }
    }

    /// Pull path: asks a held provider for random bytes.
    pub fn generate(&self, handle: ProviderHandle, buf: &mut [u8]) -> Result<(), CryptoError> {
        let provider = {
            let providers = self.providers.lock();
            let record = providers.get(&handle).ok_or(CryptoError::InvalidArgument)?;
            Arc::clone(&record.provider)
        };
        provider.generate(buf)
    }
}

impl CryptoRegistry for KernelCryptoRegistry {
    fn register_provider(
        &self,
        info: ProviderInfo,
        provider: Arc<dyn RandomProvider>,
    ) -> Result<ProviderHandle, RegistryError> {
        if info.description.is_empty() || info.description.len() > PROVIDER_DESCRIPTION_MAX {
            return Err(RegistryError::Rejected(format!(
                "description must be 1..={PROVIDER_DESCRIPTION_MAX} bytes"
            )));
        }
        if info.mechanisms.is_empty() {
            return Err(RegistryError::Rejected("no mechanisms".into()));
        }

        let mut providers = self.providers.lock();
        if providers.values().any(|record| record.info.attachment == info.attachment) {
            return Err(RegistryError::Rejected(format!(
                "{} already has a provider",
                info.attachment
            )));
        }
        let handle = ProviderHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        info!("viorndd: registry: {handle} registered as {:?}", info.description);
        providers.insert(handle, ProviderRecord { info, provider, holds: 0 });
        Ok(handle)
    }

    fn unregister_provider(&self, handle: ProviderHandle) -> Result<(), RegistryError> {
        let mut providers = self.providers.lock();
        let record = providers.get(&handle).ok_or(RegistryError::UnknownHandle)?;
        if record.holds > 0 {
            debug!("viorndd: registry: {handle} has {} hold(s)", record.holds);
            return Err(RegistryError::Busy);
        }
        providers.remove(&handle);
        info!("viorndd: registry: {handle} withdrawn");
        Ok(())
    }
}
