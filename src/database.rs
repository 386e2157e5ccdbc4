//! Component A — Circuit Database (`spec.md` §4.A).
//!
//! The flattened representation of instances, devices, nets, and
//! per-terminal adjacency lists. Produced by the (out-of-scope) CDL
//! parser/flattener; the engine consumes it as read-only except for the
//! `DeviceStatus` bitsets, which the propagation engine mutates in place.

use bitflags::bitflags;

use crate::equivalence::EquivalenceMap;
use crate::model::{Model, Terminal};
use crate::power::Power;
use crate::types::{DeviceId, InstanceId, ModelId, NetId};

bitflags! {
    /// Net-level status bits, grounded on the original `netStatus_t` enum
    /// (`ANALOG, MIN_POWER, SIM_POWER, MAX_POWER, NEEDS_MIN_CHECK,
    /// NEEDS_MAX_CHECK, NEEDS_MIN_CONNECTION, NEEDS_MAX_CONNECTION`).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct NetStatus: u16 {
        const ANALOG                  = 1 << 0;
        const MIN_POWER                = 1 << 1;
        const SIM_POWER                = 1 << 2;
        const MAX_POWER                = 1 << 3;
        const NEEDS_MIN_CHECK          = 1 << 4;
        const NEEDS_MAX_CHECK          = 1 << 5;
        const NEEDS_MIN_CONNECTION     = 1 << 6;
        const NEEDS_MAX_CONNECTION     = 1 << 7;
    }
}

bitflags! {
    /// Per-queue pending/inactive bits for one device, grounded on the
    /// original `deviceStatus_t` enum (`MIN_INACTIVE, MIN_PENDING,
    /// MAX_INACTIVE, MAX_PENDING, SIM_INACTIVE, SIM_PENDING`). Invariant 4
    /// (`spec.md` §3): the `*_PENDING` bit is set iff the device currently
    /// occupies a slot of that queue.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DeviceStatus: u8 {
        const MIN_INACTIVE = 1 << 0;
        const MIN_PENDING  = 1 << 1;
        const MAX_INACTIVE = 1 << 2;
        const MAX_PENDING  = 1 << 3;
        const SIM_INACTIVE = 1 << 4;
        const SIM_PENDING  = 1 << 5;
    }
}

/// Which of the three propagation queues a status bit or adjacency
/// traversal refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Queue {
    Min,
    Max,
    Sim,
}

impl Queue {
    fn pending_bit(self) -> DeviceStatus {
        match self {
            Queue::Min => DeviceStatus::MIN_PENDING,
            Queue::Max => DeviceStatus::MAX_PENDING,
            Queue::Sim => DeviceStatus::SIM_PENDING,
        }
    }

    fn inactive_bit(self) -> DeviceStatus {
        match self {
            Queue::Min => DeviceStatus::MIN_INACTIVE,
            Queue::Max => DeviceStatus::MAX_INACTIVE,
            Queue::Sim => DeviceStatus::SIM_INACTIVE,
        }
    }
}

/// A net record. Nets are created during flattening and never destroyed
/// (`spec.md` §3).
#[derive(Clone, Debug)]
pub struct Net {
    pub parent_instance: InstanceId,
    pub status: NetStatus,
    pub power: Option<Power>,
}

/// Raw (pre-equivalence) terminal nets of a device. `bulk` is `None` in
/// SOI mode (3-terminal mosfets), matching `spec.md` §3.
#[derive(Copy, Clone, Debug)]
pub struct RawTerminals {
    pub source: NetId,
    pub gate: NetId,
    pub drain: NetId,
    pub bulk: Option<NetId>,
}

/// A device record.
#[derive(Clone, Debug)]
pub struct Device {
    pub parent_instance: InstanceId,
    pub model_ref: ModelId,
    pub terminals: RawTerminals,
    pub params: crate::model::DeviceParams,
    pub cell_name: String,
    pub status: DeviceStatus,
    /// Whether source/drain have been committed to a direction; mosfet
    /// terminals are otherwise interchangeable (`spec.md` §3).
    pub direction_committed: bool,
}

impl Device {
    pub fn pending(&self, queue: Queue) -> bool {
        self.status.contains(queue.pending_bit())
    }

    pub fn inactive(&self, queue: Queue) -> bool {
        self.status.contains(queue.inactive_bit())
    }

    pub fn set_pending(&mut self, queue: Queue, value: bool) {
        self.status.set(queue.pending_bit(), value);
    }

    pub fn set_inactive(&mut self, queue: Queue, value: bool) {
        self.status.set(queue.inactive_bit(), value);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("net id {0:?} out of range")]
    NetOutOfRange(NetId),
    #[error("device id {0:?} out of range")]
    DeviceOutOfRange(DeviceId),
    #[error("model id {0:?} out of range")]
    ModelOutOfRange(ModelId),
}

/// Singly-linked intrusive adjacency lists, one set per terminal role,
/// grounded on the original `firstDevice_p`/`nextDevice_p` raw
/// back-pointers (`spec.md` §9: "implement as arena + integer indices").
#[derive(Clone, Debug, Default)]
struct Adjacency {
    first_source: Vec<Option<DeviceId>>,
    first_gate: Vec<Option<DeviceId>>,
    first_drain: Vec<Option<DeviceId>>,
    first_bulk: Vec<Option<DeviceId>>,
    next_source: Vec<Option<DeviceId>>,
    next_gate: Vec<Option<DeviceId>>,
    next_drain: Vec<Option<DeviceId>>,
    next_bulk: Vec<Option<DeviceId>>,
}

impl Adjacency {
    fn new(net_count: usize, device_count: usize) -> Self {
        Adjacency {
            first_source: vec![None; net_count],
            first_gate: vec![None; net_count],
            first_drain: vec![None; net_count],
            first_bulk: vec![None; net_count],
            next_source: vec![None; device_count],
            next_gate: vec![None; device_count],
            next_drain: vec![None; device_count],
            next_bulk: vec![None; device_count],
        }
    }

    fn first_mut(&mut self, t: Terminal) -> &mut Vec<Option<DeviceId>> {
        match t {
            Terminal::Source => &mut self.first_source,
            Terminal::Gate => &mut self.first_gate,
            Terminal::Drain => &mut self.first_drain,
            Terminal::Bulk => &mut self.first_bulk,
        }
    }

    fn first(&self, t: Terminal) -> &Vec<Option<DeviceId>> {
        match t {
            Terminal::Source => &self.first_source,
            Terminal::Gate => &self.first_gate,
            Terminal::Drain => &self.first_drain,
            Terminal::Bulk => &self.first_bulk,
        }
    }

    fn next_mut(&mut self, t: Terminal) -> &mut Vec<Option<DeviceId>> {
        match t {
            Terminal::Source => &mut self.next_source,
            Terminal::Gate => &mut self.next_gate,
            Terminal::Drain => &mut self.next_drain,
            Terminal::Bulk => &mut self.next_bulk,
        }
    }

    fn next(&self, t: Terminal) -> &Vec<Option<DeviceId>> {
        match t {
            Terminal::Source => &self.next_source,
            Terminal::Gate => &self.next_gate,
            Terminal::Drain => &self.next_drain,
            Terminal::Bulk => &self.next_bulk,
        }
    }

    /// Prepend `device` to the adjacency list of `net` at role `t`.
    fn insert(&mut self, t: Terminal, net: NetId, device: DeviceId) {
        let head = self.first(t)[net.as_usize()];
        self.next_mut(t)[device.as_usize()] = head;
        self.first_mut(t)[net.as_usize()] = Some(device);
    }
}

/// The flattened circuit database (component A).
#[derive(Clone, Debug)]
pub struct CircuitDb {
    pub nets: Vec<Net>,
    pub devices: Vec<Device>,
    pub models: Vec<Model>,
    adjacency: Adjacency,
}

impl CircuitDb {
    /// Build a database from already-flattened nets/devices/models and
    /// raw (pre-equivalence) terminal connectivity. This is the one
    /// constructor the (out-of-scope) CDL flattener would call; tests and
    /// `ingest.rs` call it directly.
    pub fn build(nets: Vec<Net>, mut devices: Vec<Device>, models: Vec<Model>) -> Self {
        let mut adjacency = Adjacency::new(nets.len(), devices.len());
        for (idx, device) in devices.iter_mut().enumerate() {
            let id = DeviceId(idx as u32);
            let t = device.terminals;
            adjacency.insert(Terminal::Source, t.source, id);
            adjacency.insert(Terminal::Gate, t.gate, id);
            adjacency.insert(Terminal::Drain, t.drain, id);
            if let Some(bulk) = t.bulk {
                adjacency.insert(Terminal::Bulk, bulk, id);
            }
        }
        CircuitDb { nets, devices, models, adjacency }
    }

    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn model_of(&self, device: DeviceId) -> Result<&Model, DatabaseError> {
        let model_ref = self
            .devices
            .get(device.as_usize())
            .ok_or(DatabaseError::DeviceOutOfRange(device))?
            .model_ref;
        self.models
            .get(model_ref.as_usize())
            .ok_or(DatabaseError::ModelOutOfRange(model_ref))
    }

    /// Resolve a device's raw terminal nets through the equivalence map
    /// (`spec.md` §4.A: `terminal_nets(device) -> (s,g,d,b)`).
    pub fn terminal_nets(&self, device: DeviceId, equiv: &EquivalenceMap) -> Result<RawTerminals, DatabaseError> {
        let d = self.devices.get(device.as_usize()).ok_or(DatabaseError::DeviceOutOfRange(device))?;
        let t = d.terminals;
        Ok(RawTerminals {
            source: equiv.canonical(t.source),
            gate: equiv.canonical(t.gate),
            drain: equiv.canonical(t.drain),
            bulk: t.bulk.map(|b| equiv.canonical(b)),
        })
    }

    /// Iterate devices with terminal `role` attached to `net`'s own raw
    /// adjacency list. This is exact only for a net that was never merged
    /// by equivalence; a canonical net that absorbed other nets (any
    /// `SWITCH_ON` union, `spec.md` §4.B) has members whose devices live
    /// in *their* raw adjacency lists, never this one's — callers
    /// iterating post-equivalence must use [`CircuitDb::devices_at_canonical`]
    /// instead. `exclude_inactive_for` optionally filters out devices
    /// marked inactive in the named queue.
    pub fn devices_at(
        &self,
        net: NetId,
        role: Terminal,
        exclude_inactive_for: Option<Queue>,
    ) -> impl Iterator<Item = DeviceId> + '_ {
        let mut cursor = self.adjacency.first(role).get(net.as_usize()).copied().flatten();
        std::iter::from_fn(move || {
            loop {
                let current = cursor?;
                cursor = self.adjacency.next(role)[current.as_usize()];
                if let Some(queue) = exclude_inactive_for {
                    if self.devices[current.as_usize()].inactive(queue) {
                        continue;
                    }
                }
                return Some(current);
            }
        })
    }

    /// Iterate devices with terminal `role` attached to any raw net that
    /// equivalence merged into `canonical` (`spec.md` §4.B rule 2's
    /// `CNetMap`) — the union every canonical-net adjacency walk must use,
    /// since merging nets repoints `EquivalenceMap::canonical` without
    /// rewriting the merged-away net's own adjacency list. `canonical`
    /// should already be a canonical representative.
    pub fn devices_at_canonical<'a>(
        &'a self,
        equiv: &'a EquivalenceMap,
        canonical: NetId,
        role: Terminal,
        exclude_inactive_for: Option<Queue>,
    ) -> impl Iterator<Item = DeviceId> + 'a {
        equiv
            .members(canonical)
            .iter()
            .flat_map(move |&member| self.devices_at(member, role, exclude_inactive_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equivalence::EquivalenceMap;
    use crate::model::{ModelBuilder, ModelTag};

    fn simple_db() -> CircuitDb {
        let nets = vec![
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None }, // 0 GND
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None }, // 1 VDD
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None }, // 2 A
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None }, // 3 Y
        ];
        let models = vec![
            ModelBuilder::new("nmos", ModelTag::Nmos).vth_mv(300).build(),
            ModelBuilder::new("pmos", ModelTag::Pmos).vth_mv(-300).build(),
        ];
        let devices = vec![
            Device {
                parent_instance: InstanceId(0),
                model_ref: ModelId(0),
                terminals: RawTerminals { source: NetId(0), gate: NetId(2), drain: NetId(3), bulk: Some(NetId(0)) },
                params: Default::default(),
                cell_name: "INV".into(),
                status: DeviceStatus::empty(),
                direction_committed: false,
            },
            Device {
                parent_instance: InstanceId(0),
                model_ref: ModelId(1),
                terminals: RawTerminals { source: NetId(1), gate: NetId(2), drain: NetId(3), bulk: Some(NetId(1)) },
                params: Default::default(),
                cell_name: "INV".into(),
                status: DeviceStatus::empty(),
                direction_committed: false,
            },
        ];
        CircuitDb::build(nets, devices, models)
    }

    #[test]
    fn devices_at_follows_adjacency_list() {
        let db = simple_db();
        let at_gate: Vec<_> = db.devices_at(NetId(2), Terminal::Gate, None).collect();
        assert_eq!(at_gate.len(), 2);
        assert!(at_gate.contains(&DeviceId(0)));
        assert!(at_gate.contains(&DeviceId(1)));
    }

    #[test]
    fn devices_at_excludes_inactive_for_named_queue() {
        let mut db = simple_db();
        db.devices[0].set_inactive(Queue::Min, true);
        let at_gate: Vec<_> = db.devices_at(NetId(2), Terminal::Gate, Some(Queue::Min)).collect();
        assert_eq!(at_gate, vec![DeviceId(1)]);
    }

    #[test]
    fn devices_at_canonical_walks_every_merged_net() {
        // GND(0) --SWITCH_ON-- GND2(1); an nmos gate sits only on GND2's
        // own (raw, pre-merge) adjacency list.
        let nets = vec![
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None },
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None },
        ];
        let models = vec![ModelBuilder::new("sw", ModelTag::SwitchOn).build(), ModelBuilder::new("nmos", ModelTag::Nmos).vth_mv(300).build()];
        let devices = vec![
            Device {
                parent_instance: InstanceId(0),
                model_ref: ModelId(0),
                terminals: RawTerminals { source: NetId(0), gate: NetId(0), drain: NetId(1), bulk: None },
                params: Default::default(),
                cell_name: "SW".into(),
                status: DeviceStatus::empty(),
                direction_committed: false,
            },
            Device {
                parent_instance: InstanceId(0),
                model_ref: ModelId(1),
                terminals: RawTerminals { source: NetId(1), gate: NetId(1), drain: NetId(1), bulk: None },
                params: Default::default(),
                cell_name: "INV".into(),
                status: DeviceStatus::empty(),
                direction_committed: false,
            },
        ];
        let db = CircuitDb::build(nets, devices, models);
        let (equiv, _leaks, _power) = crate::equivalence::resolve(&db).unwrap();
        let canonical = equiv.canonical(NetId(1));
        // Raw adjacency on the canonical net alone misses the nmos (it
        // lives on net 1's own list, not necessarily net 0's).
        let via_canonical: Vec<_> = db.devices_at_canonical(&equiv, canonical, Terminal::Source, None).collect();
        assert!(via_canonical.contains(&DeviceId(1)));
    }

    #[test]
    fn model_of_resolves_tag() {
        let db = simple_db();
        assert_eq!(db.model_of(DeviceId(0)).unwrap().tag, ModelTag::Nmos);
        assert_eq!(db.model_of(DeviceId(1)).unwrap().tag, ModelTag::Pmos);
    }

    #[test]
    fn terminal_nets_resolves_through_equivalence() {
        let db = simple_db();
        let equiv = EquivalenceMap::identity(db.net_count());
        let t = db.terminal_nets(DeviceId(0), &equiv).unwrap();
        assert_eq!(t.source, NetId(0));
        assert_eq!(t.gate, NetId(2));
        assert_eq!(t.drain, NetId(3));
    }

    #[test]
    fn device_status_pending_bit_round_trips() {
        let mut d = simple_db().devices.remove(0);
        assert!(!d.pending(Queue::Max));
        d.set_pending(Queue::Max, true);
        assert!(d.pending(Queue::Max));
        d.set_pending(Queue::Max, false);
        assert!(!d.pending(Queue::Max));
    }
}
