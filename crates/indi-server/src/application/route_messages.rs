//! RoutingEngine: relays INDI messages between client and device connections.
//!
//! The server never stores property values.  For each inbound message it
//! works out which connections are interested, according to their
//! [`SubscriptionState`], and pushes the unmodified message onto each one's
//! [`MessageSink`].
//!
//! # Who talks to whom (for beginners)
//!
//! ```text
//!   client ──getProperties──►  server  ──getProperties──►  device(s)
//!   client ◄──def*/set*─────   server  ◄──def*/set*──────  device
//!   client ───new*──────────►  server  ───new*───────────►  device
//! ```
//!
//! - A *client* asks for properties (`getProperties`), changes them
//!   (`new*Vector`) and chooses whether it wants BLOBs (`enableBLOB`).
//! - A *device* (a driver, or another server we chained to) announces
//!   properties (`def*Vector`), reports updates (`set*Vector`), removes them
//!   (`delProperty`) and sends log lines (`message`).  A device may also send
//!   `getProperties` to snoop on other devices.
//!
//! # Architecture
//!
//! Every connection is a [`Party`].  The engine keeps them in a table that
//! only the register/unregister paths mutate; fan-out always iterates a
//! point-in-time snapshot of it.  A party's subscription state is only
//! mutated by messages that the party itself sent, which arrive in order on
//! its own read loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use indi_core::protocol::messages::{
    DefVector, DelProperty, DeviceMessage, EnableBlob, GetProperties, NewVector, SetVector,
};
use indi_core::protocol::timestamp::now_timestamp;
use indi_core::{BlobPolicy, IndiMessage, PropertyKind, PropertyState};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::subscriptions::SubscriptionState;

/// Unique identifier of one server-side connection.
pub type ConnectionId = Uuid;

/// Which side of the protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyKind {
    Client,
    Device,
}

/// Error returned when a message cannot be handed to a connection.
#[derive(Debug, Error, PartialEq)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    /// The connection's outbound queue is full: the peer is not reading.
    #[error("connection is not keeping up")]
    Full,
}

/// Outbound side of one connection.
///
/// Infrastructure implementations push onto the connection's writer
/// channel; test implementations record calls.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: &IndiMessage) -> Result<(), DeliveryError>;

    /// Stops accepting messages.  Messages already queued are still written.
    fn close(&self) {}
}

// ── Party ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PartyState {
    subscriptions: SubscriptionState,
    /// Device names this connection has announced (device parties only).
    aliases: HashSet<String>,
    /// `(device, property)` pairs this connection has defined and not deleted.
    defined: HashSet<(String, String)>,
}

/// One connection known to the routing engine.
pub struct Party {
    id: ConnectionId,
    kind: PartyKind,
    identifier: String,
    sink: Arc<dyn MessageSink>,
    state: Mutex<PartyState>,
}

impl Party {
    fn new(kind: PartyKind, identifier: &str, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            identifier: identifier.to_string(),
            sink,
            state: Mutex::new(PartyState::default()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> PartyKind {
        self.kind
    }

    /// Human-readable name: the peer address or the driver's `host:port`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_device(&self) -> bool {
        self.kind == PartyKind::Device
    }

    pub fn owns_alias(&self, device: &str) -> bool {
        self.state().aliases.contains(device)
    }

    /// Device names announced so far, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.state().aliases.iter().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn has_defined(&self, device: &str, property: &str) -> bool {
        self.state()
            .defined
            .contains(&(device.to_string(), property.to_string()))
    }

    /// A copy of the current subscription state.
    pub fn subscriptions(&self) -> SubscriptionState {
        self.state().subscriptions.clone()
    }

    pub fn deliver(&self, message: &IndiMessage) -> Result<(), DeliveryError> {
        self.sink.deliver(message)
    }

    fn state(&self) -> MutexGuard<'_, PartyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Party")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .finish()
    }
}

// ── Routing engine ────────────────────────────────────────────────────────────

/// Connection table plus the routing rules.
#[derive(Default)]
pub struct RoutingEngine {
    parties: RwLock<Vec<Arc<Party>>>,
}

impl RoutingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the table.
    ///
    /// A device connection is immediately asked for all its properties.
    pub fn register(
        &self,
        kind: PartyKind,
        identifier: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Arc<Party> {
        let party = Arc::new(Party::new(kind, identifier, sink));
        self.parties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&party));
        info!("registered {:?} connection {} ({})", kind, identifier, party.id);

        if party.is_device() {
            let request = IndiMessage::GetProperties(GetProperties::new(None, None));
            if let Err(e) = party.deliver(&request) {
                warn!("could not ask {identifier} for its properties: {e}");
            }
        }
        party
    }

    /// Removes a connection from the table.
    ///
    /// The party's sink is closed.  When a device goes away, every party
    /// listening to one of its remaining aliases (by device or by single
    /// property) receives `delProperty` for that alias.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Party>> {
        let party = {
            let mut parties = self.parties.write().unwrap_or_else(PoisonError::into_inner);
            let index = parties.iter().position(|p| p.id == id)?;
            parties.remove(index)
        };
        party.sink.close();
        info!("unregistered connection {} ({})", party.identifier, id);

        if party.is_device() {
            for alias in party.aliases() {
                let mut del = DelProperty::new(&alias, None);
                del.timestamp = Some(now_timestamp());
                let message = IndiMessage::DelProperty(del);
                self.fan_out(id, &message, |recipient| {
                    recipient.state().subscriptions.listens_to_any_of(&alias)
                });
            }
        }
        Some(party)
    }

    /// Point-in-time copy of the connection table.
    pub fn snapshot(&self) -> Vec<Arc<Party>> {
        self.parties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn party(&self, id: ConnectionId) -> Option<Arc<Party>> {
        self.snapshot().into_iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.parties.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes one message received from `from`.
    pub fn route(&self, from: &Party, message: IndiMessage) {
        debug!("{} sent {}", from.identifier, message.tag());
        match message {
            IndiMessage::GetProperties(m) => self.route_get_properties(from, m),
            IndiMessage::DefVector(m) if from.is_device() => self.route_def(from, m),
            IndiMessage::SetVector(m) if from.is_device() => self.route_set(from, m),
            IndiMessage::Message(m) if from.is_device() => self.route_message(from, m),
            IndiMessage::DelProperty(m) if from.is_device() => self.route_del(from, m),
            IndiMessage::NewVector(m) => self.route_new(from, m),
            IndiMessage::EnableBlob(m) if !from.is_device() => self.route_enable_blob(from, m),
            other => {
                debug!("ignoring {} from {:?} {}", other.tag(), from.kind, from.identifier);
            }
        }
    }

    // ── Per-message rules ─────────────────────────────────────────────────────

    fn route_get_properties(&self, from: &Party, m: GetProperties) {
        if from.kind == PartyKind::Client && m.version.is_empty() {
            warn!("getProperties without version from {}; ignored", from.identifier);
            return;
        }

        let device = m.device.clone().filter(|d| !d.is_empty());
        let name = m.name.clone().filter(|n| !n.is_empty());
        {
            let mut state = from.state();
            match (&device, &name) {
                (None, _) => state.subscriptions.listen_to_all(),
                (Some(d), None) => state.subscriptions.listen_to_device(d),
                (Some(d), Some(n)) => state.subscriptions.listen_to_property(d, n),
            }
        }

        let message = IndiMessage::GetProperties(m);
        match device {
            Some(device) if self.snapshot().iter().any(|p| p.owns_alias(&device)) => {
                self.fan_out(from.id, &message, |p| p.owns_alias(&device));
            }
            _ => {
                self.fan_out(from.id, &message, Party::is_device);
            }
        }
    }

    fn route_def(&self, from: &Party, m: DefVector) {
        if m.device.is_empty() || m.name.is_empty() {
            debug!("def{}Vector without device or name from {}; ignored", m.kind, from.identifier);
            return;
        }
        if PropertyState::from_wire(&m.state).is_none() {
            debug!("def{}Vector with invalid state {:?}; ignored", m.kind, m.state);
            return;
        }

        {
            let mut state = from.state();
            state.aliases.insert(m.device.clone());
            state.defined.insert((m.device.clone(), m.name.clone()));
        }

        let (device, name) = (m.device.clone(), m.name.clone());
        let message = IndiMessage::DefVector(m);
        self.fan_out(from.id, &message, |p| {
            p.state().subscriptions.listens_to_property(&device, &name)
        });
    }

    fn route_set(&self, from: &Party, m: SetVector) {
        if !from.owns_alias(&m.device) {
            debug!("set{}Vector for unowned device {:?}; ignored", m.kind, m.device);
            return;
        }

        let is_blob = m.kind == PropertyKind::Blob;
        let (device, name) = (m.device.clone(), m.name.clone());
        let message = IndiMessage::SetVector(m);
        self.fan_out(from.id, &message, |p| {
            let state = p.state();
            let subscriptions = &state.subscriptions;
            if !subscriptions.listens_to_property(&device, &name) {
                return false;
            }
            if is_blob {
                subscriptions.blob_accepted(&device, &name)
            } else {
                subscriptions.non_blobs_accepted(&device)
            }
        });
    }

    fn route_message(&self, from: &Party, m: DeviceMessage) {
        let device = m.device.clone().filter(|d| !d.is_empty());
        let message = IndiMessage::Message(m);
        self.fan_out_device_scoped(from, &message, device.as_deref());
    }

    fn route_del(&self, from: &Party, m: DelProperty) {
        let device = m.device.clone().filter(|d| !d.is_empty());
        if let Some(device) = &device {
            let mut state = from.state();
            match m.name.as_deref().filter(|n| !n.is_empty()) {
                Some(name) => {
                    state.defined.remove(&(device.clone(), name.to_string()));
                }
                None => {
                    state.defined.retain(|(d, _)| d != device);
                    state.aliases.remove(device);
                }
            }
        }
        let message = IndiMessage::DelProperty(m);
        self.fan_out_device_scoped(from, &message, device.as_deref());
    }

    fn route_new(&self, from: &Party, m: NewVector) {
        let listens = from
            .state()
            .subscriptions
            .listens_to_property(&m.device, &m.name);
        if !listens {
            debug!(
                "new{}Vector for {}.{} from {}, which does not listen to it; ignored",
                m.kind, m.device, m.name, from.identifier
            );
            return;
        }

        let target = self
            .snapshot()
            .into_iter()
            .find(|p| p.id != from.id && p.has_defined(&m.device, &m.name));
        match target {
            Some(device) => {
                let message = IndiMessage::NewVector(m);
                if let Err(e) = device.deliver(&message) {
                    warn!("delivery of {} to {} failed: {e}; dropping it", message.tag(), device.identifier);
                    self.unregister(device.id);
                }
            }
            None => debug!("new{}Vector for undefined {}.{}; ignored", m.kind, m.device, m.name),
        }
    }

    fn route_enable_blob(&self, from: &Party, m: EnableBlob) {
        let Some(policy) = BlobPolicy::from_wire(&m.policy) else {
            debug!("enableBLOB with unknown policy {:?}; ignored", m.policy);
            return;
        };
        let name = m.name.as_deref().filter(|n| !n.is_empty());

        let mut state = from.state();
        let listens = match name {
            Some(name) => state.subscriptions.listens_to_property(&m.device, name),
            None => state.subscriptions.listens_to_device(&m.device),
        };
        if listens {
            state.subscriptions.set_blob_rule(&m.device, name, policy);
        } else {
            debug!("enableBLOB for {} which {} does not listen to; ignored", m.device, from.identifier);
        }
    }

    // ── Fan-out ───────────────────────────────────────────────────────────────

    /// `message`/`delProperty` delivery: broadcast to clients when no device
    /// is named, otherwise to everyone listening to the device or to any of
    /// its properties.
    fn fan_out_device_scoped(&self, from: &Party, message: &IndiMessage, device: Option<&str>) {
        let delivered = match device {
            None => self.fan_out(from.id, message, |p| p.kind == PartyKind::Client),
            Some(device) => self.fan_out(from.id, message, |p| {
                p.state().subscriptions.listens_to_any_of(device)
            }),
        };
        debug!("{} delivered to {delivered} connection(s)", message.tag());
    }

    /// Delivers `message` to every party in a snapshot of the table that
    /// `wants` it, except the sender.  Returns the number of deliveries.
    ///
    /// Parties whose delivery failed are unregistered afterwards.
    fn fan_out(
        &self,
        sender: ConnectionId,
        message: &IndiMessage,
        wants: impl Fn(&Party) -> bool,
    ) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for party in self.snapshot() {
            if party.id == sender || !wants(&party) {
                continue;
            }
            match party.deliver(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("delivery of {} to {} failed: {e}; dropping it", message.tag(), party.identifier);
                    failed.push(party.id);
                }
            }
        }
        // A party that cannot take a message is out of sync from here on.
        for id in failed {
            self.unregister(id);
        }
        delivered
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
