use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::ConnectionId;

/// A device was already claimed by another connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device '{device}' is already bound by {holder}")]
pub struct ClaimConflict {
    /// The contested device.
    pub device: String,
    /// Connection holding the claim.
    pub holder: ConnectionId,
}

/// Registry of which connection owns each external device.
///
/// Shared by every connection of a graph instance. A device is claimed by at
/// most one connection for the lifetime of the instance.
#[derive(Debug, Default)]
pub struct DeviceClaims {
    holders: Mutex<HashMap<String, ConnectionId>>,
}

impl DeviceClaims {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims every device in `devices` for `connection`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimConflict`] naming the first device already held by a
    /// different connection.
    pub fn claim(
        &self,
        connection: ConnectionId,
        devices: &BTreeSet<String>,
    ) -> Result<(), ClaimConflict> {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        for device in devices {
            if let Some(&holder) = holders.get(device)
                && holder != connection
            {
                return Err(ClaimConflict {
                    device: device.clone(),
                    holder,
                });
            }
        }
        for device in devices {
            holders.insert(device.clone(), connection);
        }
        Ok(())
    }

    /// Drops every claim held by `connection`.
    pub fn release(&self, connection: ConnectionId) {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, holder| *holder != connection);
    }

    /// Connection currently holding `device`.
    #[must_use]
    pub fn holder(&self, device: &str) -> Option<ConnectionId> {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .copied()
    }
}
