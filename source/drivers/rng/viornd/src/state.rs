// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Device lifecycle.
///
/// ```text
/// Unattached -> Negotiating -> Ready -> Running -> Draining -> Detached
///      \____________\____________\________\___________\---> Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, nothing touched yet.
    Unattached,
    /// Feature negotiation in progress.
    Negotiating,
    /// Features accepted; channel, provider and interrupts being set up.
    Ready,
    /// Harvesting.
    Running,
    /// Teardown in progress; no new requests.
    Draining,
    /// Torn down.
    Detached,
    /// Bring-up or teardown gave up.
    Failed,
}

impl LifecycleState {
    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Unattached, Negotiating)
            | (Negotiating, Ready)
            | (Ready, Running)
            | (Running, Draining)
            | (Draining, Detached) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// `Detached` and `Failed` have no successors.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Detached | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unattached => "unattached",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Detached => "detached",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
