//! Static wiring between device endpoints.
//!
//! A [`RoutingTable`] records which input endpoints each output endpoint
//! feeds. Devices are either local (simulated next to the table) or
//! external (owned by a client connection). Wiring is fixed before the graph
//! runs; afterwards the table only answers where an emitted message must go.
//! External destinations are reported per subscriber, so a connection owning
//! several destinations of one source receives each message once and uses its
//! `incoming_edges` map to fan it out.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::event::Endpoint;

/// Errors raised while building or subscribing to a routing table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The device name is already registered.
    #[error("device '{0}' is already registered")]
    DuplicateDevice(String),
    /// The device name is not registered.
    #[error("device '{0}' is not registered")]
    UnknownDevice(String),
    /// The device exists but is not external.
    #[error("device '{0}' is not an external device")]
    NotExternal(String),
    /// The wiring can no longer change.
    #[error("routing table is frozen")]
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Local,
    External,
}

/// Where a single message must be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fanout<S> {
    /// Local input endpoints, in endpoint order.
    pub local: Vec<Endpoint>,
    /// Subscribers owning at least one wired destination, in subscriber order.
    pub external: Vec<S>,
}

/// Destination of a unicast message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<S> {
    /// Deliver to a local device.
    Local,
    /// Deliver to the subscriber owning the device.
    External(S),
    /// The device is external but nobody owns it yet.
    Unclaimed,
}

/// Wiring of a graph instance.
#[derive(Debug, Clone)]
pub struct RoutingTable<S> {
    devices: BTreeMap<String, Placement>,
    src_to_dst: BTreeMap<Endpoint, BTreeSet<Endpoint>>,
    dst_to_src: BTreeMap<String, BTreeMap<String, BTreeSet<Endpoint>>>,
    subscribers: BTreeMap<Endpoint, BTreeSet<S>>,
    owners: BTreeMap<String, S>,
    frozen: bool,
}

impl<S> Default for RoutingTable<S> {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
            src_to_dst: BTreeMap::new(),
            dst_to_src: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            owners: BTreeMap::new(),
            frozen: false,
        }
    }
}

impl<S: Copy + Ord> RoutingTable<S> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a locally simulated device.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] when frozen or the name is taken.
    pub fn add_local(&mut self, device: &str) -> Result<(), RouterError> {
        self.add_device(device, Placement::Local)
    }

    /// Registers a device to be owned by a client connection.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] when frozen or the name is taken.
    pub fn add_external(&mut self, device: &str) -> Result<(), RouterError> {
        self.add_device(device, Placement::External)
    }

    fn add_device(&mut self, device: &str, placement: Placement) -> Result<(), RouterError> {
        if self.frozen {
            return Err(RouterError::Frozen);
        }
        if self.devices.contains_key(device) {
            return Err(RouterError::DuplicateDevice(device.to_owned()));
        }
        self.devices.insert(device.to_owned(), placement);
        Ok(())
    }

    /// Wires `src` to feed `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] when frozen or either device is unknown.
    pub fn add_edge(&mut self, dst: Endpoint, src: Endpoint) -> Result<(), RouterError> {
        if self.frozen {
            return Err(RouterError::Frozen);
        }
        for device in [dst.device(), src.device()] {
            if !self.devices.contains_key(device) {
                return Err(RouterError::UnknownDevice(device.to_owned()));
            }
        }
        self.dst_to_src
            .entry(dst.device().to_owned())
            .or_default()
            .entry(dst.port().to_owned())
            .or_default()
            .insert(src.clone());
        self.src_to_dst.entry(src).or_default().insert(dst);
        Ok(())
    }

    /// Prevents further changes to devices and edges.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the wiring is fixed.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether `device` is simulated locally.
    #[must_use]
    pub fn is_local(&self, device: &str) -> bool {
        self.devices.get(device) == Some(&Placement::Local)
    }

    /// Whether `device` is meant to be owned by a connection.
    #[must_use]
    pub fn is_external(&self, device: &str) -> bool {
        self.devices.get(device) == Some(&Placement::External)
    }

    /// Names of every external device.
    pub fn externals(&self) -> impl Iterator<Item = &str> {
        self.devices
            .iter()
            .filter(|(_, placement)| **placement == Placement::External)
            .map(|(name, _)| name.as_str())
    }

    /// Subscriber owning `device`, if claimed.
    #[must_use]
    pub fn owner(&self, device: &str) -> Option<S> {
        self.owners.get(device).copied()
    }

    /// Whether `src` feeds at least one endpoint.
    #[must_use]
    pub fn is_routed(&self, src: &Endpoint) -> bool {
        self.src_to_dst.contains_key(src)
    }

    /// Gives `subscriber` ownership of `devices` and returns their incoming
    /// edges as `{source: [owned input endpoint, ...]}`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownDevice`] or [`RouterError::NotExternal`]
    /// without changing the table when any device is unsuitable.
    pub fn subscribe(
        &mut self,
        subscriber: S,
        devices: &BTreeSet<String>,
    ) -> Result<BTreeMap<Endpoint, Vec<Endpoint>>, RouterError> {
        for device in devices {
            match self.devices.get(device) {
                None => return Err(RouterError::UnknownDevice(device.clone())),
                Some(Placement::Local) => return Err(RouterError::NotExternal(device.clone())),
                Some(Placement::External) => {}
            }
        }

        let mut incoming: BTreeMap<Endpoint, Vec<Endpoint>> = BTreeMap::new();
        for device in devices {
            self.owners.insert(device.clone(), subscriber);
            let Some(ports) = self.dst_to_src.get(device) else {
                continue;
            };
            for (port, sources) in ports {
                for src in sources {
                    incoming.entry(src.clone()).or_default().push(Endpoint::from_parts(
                        device.clone(),
                        port.clone(),
                    ));
                    self.subscribers
                        .entry(src.clone())
                        .or_default()
                        .insert(subscriber);
                }
            }
        }
        Ok(incoming)
    }

    /// Destinations of a message multicast from `src`.
    #[must_use]
    pub fn route(&self, src: &Endpoint) -> Fanout<S> {
        let local = self
            .src_to_dst
            .get(src)
            .into_iter()
            .flatten()
            .filter(|dst| self.is_local(dst.device()))
            .cloned()
            .collect();
        let external = self
            .subscribers
            .get(src)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        Fanout { local, external }
    }

    /// Destination of a message addressed to a single endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownDevice`] when `dst` names no device.
    pub fn route_unicast(&self, dst: &Endpoint) -> Result<Delivery<S>, RouterError> {
        match self.devices.get(dst.device()) {
            None => Err(RouterError::UnknownDevice(dst.device().to_owned())),
            Some(Placement::Local) => Ok(Delivery::Local),
            Some(Placement::External) => Ok(self
                .owner(dst.device())
                .map_or(Delivery::Unclaimed, Delivery::External)),
        }
    }
}
