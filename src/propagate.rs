//! Component E — Propagation Engine (`spec.md` §4.E).
//!
//! Three coupled passes (min, max, sim) dequeue events from the matching
//! [`crate::event_queue::EventQueue`], materialize a [`Connection`] view of
//! a device's resolved terminals, classify by [`ModelTag`], and — when the
//! device conducts — re-point the virtual net on the less-driven side
//! (`shift`) and re-enqueue its neighbors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::database::{CircuitDb, Queue};
use crate::equivalence::EquivalenceMap;
use crate::event_queue::{max_key, min_key, EventQueue};
use crate::model::{Model, ModelTag, Terminal};
use crate::power::Power;
use crate::types::{DeviceId, NetId, Resistance, Voltage};
use crate::virtual_net::VirtualNetVector;

#[derive(Debug, thiserror::Error)]
pub enum PropagationError {
    #[error(transparent)]
    Database(#[from] crate::database::DatabaseError),
}

/// One terminal's resolved view: its equivalence-canonical net, the final
/// net and accumulated resistance that net's virtual-net chain leads to,
/// and the voltage at that final net (`UNKNOWN` unless the final net is a
/// power anchor for the pass in question).
#[derive(Copy, Clone, Debug)]
pub struct TerminalView {
    pub net: NetId,
    pub final_net: NetId,
    pub final_res: Resistance,
    pub voltage: Voltage,
}

/// A device's four terminals, materialized against one queue's virtual-net
/// vector (`spec.md` §4.E step 2).
#[derive(Copy, Clone, Debug)]
pub struct Connection {
    pub source: TerminalView,
    pub gate: TerminalView,
    pub drain: TerminalView,
    pub bulk: Option<TerminalView>,
}

fn power_voltage(power: &HashMap<NetId, Power>, queue: Queue, net: NetId) -> Voltage {
    power
        .get(&net)
        .and_then(|p| match queue {
            Queue::Min => p.min,
            Queue::Max => p.max,
            Queue::Sim => p.sim,
        })
        .unwrap_or(Voltage::UNKNOWN)
}

fn terminal_view(vnet: &mut VirtualNetVector, power: &HashMap<NetId, Power>, queue: Queue, net: NetId) -> TerminalView {
    let (final_net, final_res) = vnet.resolve(net);
    let voltage = if vnet.is_terminal(final_net) { power_voltage(power, queue, final_net) } else { Voltage::UNKNOWN };
    TerminalView { net, final_net, final_res, voltage }
}

/// A net's resolved voltage against `queue`'s vector — the same lookup
/// [`terminal_view`] does, exposed standalone for callers (the error
/// detectors, `spec.md` §4.F) that need a net's value without a device's
/// full four-terminal [`Connection`].
pub fn net_voltage(vnet: &mut VirtualNetVector, power: &HashMap<NetId, Power>, queue: Queue, net: NetId) -> Voltage {
    let (final_net, _) = vnet.resolve(net);
    if vnet.is_terminal(final_net) {
        power_voltage(power, queue, final_net)
    } else {
        Voltage::UNKNOWN
    }
}

/// Materialize a [`Connection`] for `device_id` against `queue`'s vector
/// (`spec.md` §4.E step 2).
pub fn connection(
    db: &CircuitDb,
    equiv: &EquivalenceMap,
    vnet: &mut VirtualNetVector,
    power: &HashMap<NetId, Power>,
    queue: Queue,
    device_id: DeviceId,
) -> Result<Connection, crate::database::DatabaseError> {
    let t = db.terminal_nets(device_id, equiv)?;
    Ok(Connection {
        source: terminal_view(vnet, power, queue, t.source),
        gate: terminal_view(vnet, power, queue, t.gate),
        drain: terminal_view(vnet, power, queue, t.drain),
        bulk: t.bulk.map(|b| terminal_view(vnet, power, queue, b)),
    })
}

/// Whether `net` currently has a real path to a known-voltage power net in
/// this direction. A self-terminal net is ambiguous on its own (`spec.md`
/// §4.C: "either a power anchor or has no path to power"); this resolves
/// the ambiguity by checking whether the final net actually carries a
/// known voltage for `queue`.
fn is_connected(vnet: &mut VirtualNetVector, power: &HashMap<NetId, Power>, queue: Queue, net: NetId) -> bool {
    let (final_net, _) = vnet.resolve(net);
    vnet.is_terminal(final_net) && power_voltage(power, queue, final_net).is_known()
}

/// `shift_virtual_nets` (`spec.md` §4.E step 3): re-point `to`'s `next`
/// through `from` at cost `hop`, but only if `from` itself has a real path
/// to power and the move either newly connects `to` or strictly improves
/// its accumulated resistance. Returns whether an update happened, which is
/// also how cycle-breaking falls out for free: once a cycle's first
/// arrival settles a node, the second arrival's candidate is never better
/// than what's already there, so the later write is skipped (`spec.md`
/// §4.E step 5 — the `last_update` stamp check, reproduced here by the
/// strict-improvement test rather than a separate stamp field).
fn shift(vnet: &mut VirtualNetVector, power: &HashMap<NetId, Power>, queue: Queue, from: NetId, to: NetId, hop: Resistance) -> bool {
    if !is_connected(vnet, power, queue, from) {
        return false;
    }
    let (from_final, from_res) = vnet.resolve(from);
    if to == from_final {
        return false;
    }
    let candidate = from_res.add(hop);
    if is_connected(vnet, power, queue, to) {
        let (_, to_res) = vnet.resolve(to);
        if to_res.0 <= candidate.0 {
            return false;
        }
    }
    vnet.set(to, from, hop);
    true
}

/// Resistance of a device of this model given its parameters, rounded and
/// saturated into the [`Resistance`] domain (evaluation itself stays in
/// `f64`; see `Model::resistance_ohms`).
fn device_resistance(model: &Model, device: &crate::database::Device) -> Resistance {
    let ohms = model.resistance_ohms(&device.params);
    if !ohms.is_finite() || ohms >= crate::types::MAX_RESISTANCE as f64 {
        Resistance::MAX
    } else if ohms <= 0.0 {
        Resistance::ZERO
    } else {
        Resistance(ohms.round() as u32)
    }
}

/// Envelope (min/max pass) mosfet conduction: worst-case Vgs comparison
/// against one already-known terminal (`spec.md` §4.E: "conducts on the
/// max pass when the gate is high; conducts on the min pass when the
/// source/drain voltage exceeds gate - Vth").
fn envelope_mos_conducts(nmos_like: bool, queue: Queue, gate_v: Voltage, ref_v: Voltage, vth: Voltage) -> bool {
    if !gate_v.is_known() || !ref_v.is_known() || !vth.is_known() {
        return false;
    }
    match (nmos_like, queue) {
        (true, Queue::Max) => gate_v.0 >= ref_v.0 + vth.0,
        (true, Queue::Min) => ref_v.0 >= gate_v.0 - vth.0,
        (false, Queue::Max) => gate_v.0 <= ref_v.0 + vth.0,
        (false, Queue::Min) => ref_v.0 <= gate_v.0 + vth.0,
        (_, Queue::Sim) => false,
    }
}

/// Sim-pass mosfet conduction: exact `Vgs` comparison against `Vth`
/// (`spec.md` §4.E: "when a mos gate is known, conduction is evaluated
/// exactly: Vgs > Vth for n, < -|Vth| for p").
fn exact_mos_conducts(nmos_like: bool, gate_v: Voltage, ref_v: Voltage, vth: Voltage) -> bool {
    if !gate_v.is_known() || !ref_v.is_known() || !vth.is_known() {
        return false;
    }
    let vgs = gate_v.0 - ref_v.0;
    if nmos_like {
        vgs > vth.0
    } else {
        vgs < vth.0
    }
}

/// Classify `device` by model tag and attempt to propagate through it,
/// returning the final nets that were actually updated (0, 1, or 2 — a
/// two-terminal edge improves at most one side per call, but a mosfet
/// tries both directions independently since either terminal could be the
/// driven one).
fn classify_and_propagate(
    queue: Queue,
    model: &Model,
    device: &crate::database::Device,
    conn: &Connection,
    power: &HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
) -> Vec<NetId> {
    let mut changed = Vec::new();
    match model.tag {
        ModelTag::Capacitor | ModelTag::SwitchOff | ModelTag::FuseOff | ModelTag::Bipolar | ModelTag::Box_ => {
            // Never propagates: capacitors/open switches/blown fuses block
            // DC paths by construction; bipolar and box devices attach to
            // nets but the classifier never dispatches a conduction rule
            // for them, matching the source (DESIGN.md open question 2).
        }
        ModelTag::Resistor | ModelTag::SwitchOn | ModelTag::FuseOn => {
            let hop = if model.tag == ModelTag::Resistor { device_resistance(model, device) } else { Resistance::ZERO };
            if shift(vnet, power, queue, conn.source.final_net, conn.drain.final_net, hop) {
                changed.push(conn.drain.final_net);
            }
            if shift(vnet, power, queue, conn.drain.final_net, conn.source.final_net, hop) {
                changed.push(conn.source.final_net);
            }
        }
        ModelTag::Diode => {
            // Ideal diode: forward conduction cathode->anode on the min
            // pass, anode->cathode on the max pass (`spec.md` §4.E); sim
            // uses the anode->cathode sense whenever the anode's exact
            // value is known. Treated as a zero-resistance path once
            // conducting — the model's own `resistance` field is not
            // consulted for standalone diode devices.
            match queue {
                Queue::Min => {
                    if shift(vnet, power, queue, conn.drain.final_net, conn.source.final_net, Resistance::ZERO) {
                        changed.push(conn.source.final_net);
                    }
                }
                Queue::Max | Queue::Sim => {
                    if shift(vnet, power, queue, conn.source.final_net, conn.drain.final_net, Resistance::ZERO) {
                        changed.push(conn.drain.final_net);
                    }
                }
            }
        }
        ModelTag::Nmos | ModelTag::Lddn | ModelTag::Pmos | ModelTag::Lddp => {
            let nmos_like = model.tag.is_nmos_like();
            let hop = device_resistance(model, device);
            let conducts = |gate_v: Voltage, ref_v: Voltage| match queue {
                Queue::Sim => exact_mos_conducts(nmos_like, gate_v, ref_v, model.vth),
                Queue::Min | Queue::Max => envelope_mos_conducts(nmos_like, queue, gate_v, ref_v, model.vth),
            };
            if conducts(conn.gate.voltage, conn.source.voltage)
                && shift(vnet, power, queue, conn.source.final_net, conn.drain.final_net, hop)
            {
                changed.push(conn.drain.final_net);
            }
            if conducts(conn.gate.voltage, conn.drain.voltage)
                && shift(vnet, power, queue, conn.drain.final_net, conn.source.final_net, hop)
            {
                changed.push(conn.source.final_net);
            }
        }
    }
    changed
}

/// Every device with a terminal of any role attached to `net`'s canonical
/// class, filtered by `queue`'s inactive bit. `net` must already be a
/// canonical representative: the lookup walks every raw net equivalence
/// merged into it (`spec.md` §4.B rule 2's `CNetMap`), not just `net`'s own
/// adjacency list, since a merged-away net's devices never move to the
/// canonical net's list. Collected eagerly so the borrow of `db` ends
/// before the caller mutates `db.devices` to re-enqueue them.
fn neighbor_device_ids(db: &CircuitDb, equiv: &EquivalenceMap, net: NetId, queue: Queue) -> Vec<DeviceId> {
    let mut ids = Vec::new();
    for role in [Terminal::Source, Terminal::Gate, Terminal::Drain, Terminal::Bulk] {
        ids.extend(db.devices_at_canonical(equiv, net, role, Some(queue)));
    }
    ids
}

#[allow(clippy::too_many_arguments)]
fn enqueue_neighbors(
    db: &mut CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
    queue: &mut EventQueue,
    tag: Queue,
    net: NetId,
    exclude: DeviceId,
) {
    let (final_net, final_res) = vnet.resolve(net);
    let voltage = power_voltage(power, tag, final_net);
    let key = match tag {
        Queue::Min => min_key(voltage, final_res),
        Queue::Max => max_key(voltage, final_res),
        Queue::Sim => queue.next_sim_key(),
    };
    for id in neighbor_device_ids(db, equiv, net, tag) {
        if id == exclude {
            continue;
        }
        queue.enqueue(&mut db.devices[id.as_usize()], id, key);
    }
}

/// Seed `queue` from every canonical net with a known voltage for `tag`,
/// kicking off propagation to their attached devices (`spec.md` §4.E:
/// "seed the queue from every net that has a declared min/max voltage").
fn seed_envelope(db: &mut CircuitDb, equiv: &EquivalenceMap, power: &HashMap<NetId, Power>, queue: &mut EventQueue, tag: Queue) {
    let net_count = db.net_count();
    for n in 0..net_count as u32 {
        let net = NetId(n);
        if equiv.canonical(net) != net {
            continue;
        }
        let voltage = power_voltage(power, tag, net);
        if !voltage.is_known() {
            continue;
        }
        let key = match tag {
            Queue::Min => min_key(voltage, Resistance::ZERO),
            Queue::Max => max_key(voltage, Resistance::ZERO),
            Queue::Sim => unreachable!("seed_envelope is only used for min/max"),
        };
        for id in neighbor_device_ids(db, equiv, net, tag) {
            queue.enqueue(&mut db.devices[id.as_usize()], id, key);
        }
    }
}

fn run_envelope_pass(
    db: &mut CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
    tag: Queue,
    interrupt: &AtomicBool,
) -> Result<(), PropagationError> {
    let mut queue = EventQueue::new(tag);
    seed_envelope(db, equiv, power, &mut queue, tag);

    while let Some((device_id, _key)) = queue.dequeue(&mut db.devices) {
        if interrupt.load(Ordering::Relaxed) {
            debug!(target: "cvc::propagate", pass = ?tag, "interrupted; draining queue and returning");
            break;
        }
        if db.devices[device_id.as_usize()].inactive(tag) {
            continue;
        }
        let model = db.model_of(device_id)?.clone();
        let conn = connection(db, equiv, vnet, power, tag, device_id)?;
        let device = db.devices[device_id.as_usize()].clone();
        let changed = classify_and_propagate(tag, &model, &device, &conn, power, vnet);
        for net in changed {
            enqueue_neighbors(db, equiv, power, vnet, &mut queue, tag, net, device_id);
        }
    }
    Ok(())
}

/// Run the min pass to completion (`spec.md` §4.E).
pub fn run_min_pass(
    db: &mut CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
    interrupt: &AtomicBool,
) -> Result<(), PropagationError> {
    run_envelope_pass(db, equiv, power, vnet, Queue::Min, interrupt)
}

/// Run the max pass to completion (`spec.md` §4.E).
pub fn run_max_pass(
    db: &mut CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
    interrupt: &AtomicBool,
) -> Result<(), PropagationError> {
    run_envelope_pass(db, equiv, power, vnet, Queue::Max, interrupt)
}

/// A net's declared sim voltage, or — absent one — the envelope value if
/// the min and max passes converged to the same known voltage
/// (`spec.md` §4.E: "seeded only from nets that have a declared sim
/// voltage or have min == max after the min/max passes").
fn sim_seed_voltage(
    net: NetId,
    power: &HashMap<NetId, Power>,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
) -> Option<Voltage> {
    if let Some(v) = power.get(&net).and_then(|p| p.sim) {
        return Some(v);
    }
    let (min_final, _) = min_vnet.resolve(net);
    let (max_final, _) = max_vnet.resolve(net);
    let min_v = power_voltage(power, Queue::Min, min_final);
    let max_v = power_voltage(power, Queue::Max, max_final);
    if min_v.is_known() && max_v == min_v {
        Some(min_v)
    } else {
        None
    }
}

/// Run the sim pass to completion (`spec.md` §4.E). `scrc` is accepted and
/// logged but does not (yet) run dedicated subthreshold-reduction power
/// propagation; see `DESIGN.md`'s open-question entry on this. Likewise
/// the two-sub-phase power/fuse split and cross-coupled-latch
/// disambiguation collapse into one coherent fixed-point pass: nets that
/// would require guessing a stable latch state are left at
/// `Voltage::UNKNOWN` rather than picking one arbitrarily.
pub fn run_sim_pass(
    db: &mut CircuitDb,
    equiv: &EquivalenceMap,
    power: &mut HashMap<NetId, Power>,
    vnet: &mut VirtualNetVector,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
    scrc: bool,
    interrupt: &AtomicBool,
) -> Result<(), PropagationError> {
    if scrc {
        debug!(target: "cvc::propagate", "CVC_SCRC enabled; dedicated subthreshold-reduction propagation is not implemented, falling back to the coherent sim pass");
    }

    let mut queue = EventQueue::new(Queue::Sim);
    let net_count = db.net_count();
    for n in 0..net_count as u32 {
        let net = NetId(n);
        if equiv.canonical(net) != net {
            continue;
        }
        if let Some(v) = sim_seed_voltage(net, power, min_vnet, max_vnet) {
            // A net seeded only because min == max has no `power.sim`
            // entry of its own; without recording one here, every
            // terminal-voltage lookup downstream (inside this pass and in
            // the error detectors that run after it) would read this net
            // back as `Voltage::UNKNOWN` and nothing could conduct from it
            // (`spec.md` §4.E: "seeded ... or have min == max").
            power.entry(net).or_insert_with(Power::default).sim.get_or_insert(v);
            let key = queue.next_sim_key();
            for id in neighbor_device_ids(db, equiv, net, Queue::Sim) {
                queue.enqueue(&mut db.devices[id.as_usize()], id, key);
            }
        }
    }

    while let Some((device_id, _key)) = queue.dequeue(&mut db.devices) {
        if interrupt.load(Ordering::Relaxed) {
            debug!(target: "cvc::propagate", "sim pass interrupted; draining queue and returning");
            break;
        }
        if db.devices[device_id.as_usize()].inactive(Queue::Sim) {
            continue;
        }
        let model = db.model_of(device_id)?.clone();
        let conn = connection(db, equiv, vnet, power, Queue::Sim, device_id)?;
        let device = db.devices[device_id.as_usize()].clone();
        let changed = classify_and_propagate(Queue::Sim, &model, &device, &conn, power, vnet);
        for net in changed {
            enqueue_neighbors(db, equiv, power, vnet, &mut queue, Queue::Sim, net, device_id);
        }
    }
    Ok(())
}
