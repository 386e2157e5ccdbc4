//! Component F — Error Detectors (`spec.md` §4.F).
//!
//! Eight device- or net-level predicates, each evaluated against a fully
//! resolved [`crate::propagate::Connection`] view (or, for the net-level
//! predicates, a directly resolved net voltage). Findings are recorded as
//! [`ErrorRecord`]s and throttled per `(circuit, device, kind)`
//! (`spec.md` §4.F, §7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::database::{CircuitDb, DatabaseError, Queue};
use crate::equivalence::EquivalenceMap;
use crate::model::ModelTag;
use crate::power::Power;
use crate::propagate::{connection, net_voltage, Connection};
use crate::types::{DeviceId, InstanceId, NetId, Voltage};
use crate::virtual_net::VirtualNetVector;

/// Grounded on the original `cvcError_t` enum (`spec.md` §4.F table plus
/// the per-polarity/"logic ok" split each family actually has upstream).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ForwardDiode,
    OvervoltageVbg,
    OvervoltageVbgLogicOk,
    OvervoltageVbs,
    OvervoltageVbsLogicOk,
    OvervoltageVds,
    OvervoltageVdsLogicOk,
    OvervoltageVgs,
    OvervoltageVgsLogicOk,
    NmosSourceBulk,
    PmosSourceBulk,
    NmosGateSource,
    PmosGateSource,
    NmosPossibleLeak,
    PmosPossibleLeak,
    FloatingInput,
    ExpectedValue,
    LddSource,
}

/// `(kind, device_id, signature)` per `spec.md` §4.F. `signature` is a
/// short human-readable explanation (the report formatter that would turn
/// this into a `.err.gz` line is out of scope).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub device: Option<DeviceId>,
    pub net: Option<NetId>,
    pub signature: String,
    /// False once this `(circuit, device, kind)` triple has already hit
    /// `circuit_error_limit` — the record still counts toward totals
    /// (`spec.md` §4.F: "keeps counting totals") but detail printing
    /// would be suppressed by the (out-of-scope) report formatter.
    pub detail_suppressed: bool,
}

/// Per-`(circuit, device, kind)` throttle plus running totals
/// (`spec.md` §7: "counted globally and per `(circuit, device, kind)`").
/// `circuit` is approximated by the device's `parent_instance`, the
/// closest concept this crate's flattened model has to "circuit" absent
/// the (out-of-scope) hierarchical hookup the original source tracks.
#[derive(Debug, Default)]
pub struct ErrorThrottle {
    per_circuit_device: HashMap<(InstanceId, DeviceId, ErrorKind), u32>,
    pub totals: HashMap<ErrorKind, u64>,
}

impl ErrorThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence, returning whether detail printing is still
    /// allowed for this triple (`count <= limit`).
    fn record(&mut self, circuit: InstanceId, device: DeviceId, kind: ErrorKind, limit: u32) -> bool {
        *self.totals.entry(kind).or_insert(0) += 1;
        let count = self.per_circuit_device.entry((circuit, device, kind)).or_insert(0);
        *count += 1;
        *count <= limit.max(1)
    }
}

/// The subset of `.cvcrc` keys (`spec.md` §6) that the error detectors
/// consult. `crate::config::CvcConfig::detect_config` builds one of these
/// from the parsed configuration.
#[derive(Copy, Clone, Debug)]
pub struct DetectConfig {
    pub circuit_error_limit: u32,
    pub leak_limit_ua: f64,
    pub forward_error_threshold_mv: i32,
    pub vgs_error_threshold_mv: i32,
    pub vds_error_threshold_mv: i32,
    pub vbs_error_threshold_mv: i32,
    pub vbg_error_threshold_mv: i32,
    pub ignore_no_leak_floating: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        DetectConfig {
            circuit_error_limit: 1,
            leak_limit_ua: 200.0,
            forward_error_threshold_mv: 0,
            vgs_error_threshold_mv: 0,
            vds_error_threshold_mv: 0,
            vbs_error_threshold_mv: 0,
            vbg_error_threshold_mv: 0,
            ignore_no_leak_floating: false,
        }
    }
}

/// All three queues' resolved connections for one device — the input the
/// predicates below actually read (`spec.md` §4.F: "a fully-populated
/// `Connection` view").
struct DeviceView {
    min: Connection,
    max: Connection,
    sim: Connection,
}

fn device_view(
    db: &CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
    sim_vnet: &mut VirtualNetVector,
    device_id: DeviceId,
) -> Result<DeviceView, DatabaseError> {
    Ok(DeviceView {
        min: connection(db, equiv, min_vnet, power, Queue::Min, device_id)?,
        max: connection(db, equiv, max_vnet, power, Queue::Max, device_id)?,
        sim: connection(db, equiv, sim_vnet, power, Queue::Sim, device_id)?,
    })
}

fn forward_diode(view: &DeviceView, threshold_mv: i32) -> bool {
    let anode_max = view.max.source.voltage;
    let cathode_min = view.min.drain.voltage;
    anode_max.is_known() && cathode_min.is_known() && (anode_max.0 - cathode_min.0) > threshold_mv
}

enum Tolerance {
    Ok,
    LogicOk,
    Violated,
}

/// `a`/`b` are the two terminals whose spread is being checked (e.g. drain
/// and source for Vds). The envelope check is direction-agnostic (either
/// terminal can be the higher one); the sim check compares the single
/// coherent values (`spec.md` §4.F: "a 'logic ok' variant fires when only
/// the leak envelope ... breaches the limit while sim values don't").
fn tolerance(limit: Voltage, max_a: Voltage, min_a: Voltage, max_b: Voltage, min_b: Voltage, sim_a: Voltage, sim_b: Voltage, threshold_mv: i32) -> Tolerance {
    if !limit.is_known() {
        return Tolerance::Ok;
    }
    let limit_mv = limit.0.unsigned_abs() as i32 + threshold_mv;
    let envelope_violated = (max_a.is_known() && min_b.is_known() && (max_a.0 - min_b.0) > limit_mv)
        || (max_b.is_known() && min_a.is_known() && (max_b.0 - min_a.0) > limit_mv);
    if !envelope_violated {
        return Tolerance::Ok;
    }
    let sim_known = sim_a.is_known() && sim_b.is_known();
    let sim_violated = sim_known && (sim_a.0 - sim_b.0).unsigned_abs() as i32 > limit_mv;
    if sim_known && !sim_violated {
        Tolerance::LogicOk
    } else {
        Tolerance::Violated
    }
}

fn source_bulk_violation(nmos_like: bool, bulk: Voltage, source: Voltage, drain: Voltage) -> bool {
    if !bulk.is_known() {
        return false;
    }
    let bound = match (source.is_known(), drain.is_known()) {
        (true, true) if nmos_like => Some(source.0.min(drain.0)),
        (true, true) => Some(source.0.max(drain.0)),
        (true, false) => Some(source.0),
        (false, true) => Some(drain.0),
        (false, false) => None,
    };
    match bound {
        Some(bound) if nmos_like => bulk.0 > bound,
        Some(bound) => bulk.0 < bound,
        None => false,
    }
}

/// `spec.md` §4.F: "`min gate > min source + Vth` (n) ... with the drain at
/// the opposing rail" — grounded on the original's
/// `FindNmosGateVsSourceErrors`/`FindPmosGateVsSourceErrors`. The gate must
/// be driven past the conducting threshold relative to *one* terminal while
/// sitting strictly inside the *other* terminal's envelope (not driven all
/// the way to its rail) — a gate caught in an indeterminate conduction
/// band, checked symmetrically against source-as-reference and
/// drain-as-reference.
fn gate_source_violation(nmos_like: bool, view: &DeviceView, vth: Voltage) -> bool {
    if !vth.is_known() {
        return false;
    }
    if nmos_like {
        let gate = view.min.gate.voltage;
        let source = view.min.source.voltage;
        let drain_max = view.max.drain.voltage;
        let cond1 = gate.is_known()
            && source.is_known()
            && drain_max.is_known()
            && gate.0 > source.0.min(source.0 + vth.0)
            && gate.0 < drain_max.0
            && view.min.gate.net != view.max.drain.net;
        let drain = view.min.drain.voltage;
        let source_max = view.max.source.voltage;
        let cond2 = gate.is_known()
            && drain.is_known()
            && source_max.is_known()
            && gate.0 > drain.0.min(drain.0 + vth.0)
            && gate.0 < source_max.0
            && view.min.gate.net != view.max.source.net;
        cond1 || cond2
    } else {
        let gate = view.max.gate.voltage;
        let source = view.max.source.voltage;
        let drain_min = view.min.drain.voltage;
        let cond1 = gate.is_known()
            && source.is_known()
            && drain_min.is_known()
            && gate.0 < source.0.max(source.0 + vth.0)
            && gate.0 > drain_min.0
            && view.max.gate.net != view.min.drain.net;
        let drain = view.max.drain.voltage;
        let source_min = view.min.source.voltage;
        let cond2 = gate.is_known()
            && drain.is_known()
            && source_min.is_known()
            && gate.0 < drain.0.max(drain.0 + vth.0)
            && gate.0 > source_min.0
            && view.max.gate.net != view.min.source.net;
        cond1 || cond2
    }
}

fn leak_current_amps(delta_mv: i32, resistance_ohms: f64) -> f64 {
    let v = delta_mv.unsigned_abs() as f64 / 1000.0;
    v / resistance_ohms.max(1.0)
}

/// Grounded on `FindNmosPossibleLeakErrors`/`FindPmosPossibleLeakErrors`:
/// both only run when the device's own gate sim voltage is *unknown* —
/// a device whose gate is pinned to a definite logic level has a definite
/// conduction state already covered by the gate-source/overvoltage checks,
/// so this predicate only covers the indeterminate-gate case.
fn possible_leak(view: &DeviceView, resistance_ohms: f64, leak_limit_a: f64) -> bool {
    if view.sim.gate.voltage.is_known() {
        return false;
    }
    let sim_s = view.sim.source.voltage;
    let sim_d = view.sim.drain.voltage;
    if sim_s.is_known() && sim_d.is_known() {
        if sim_s.0 == sim_d.0 {
            return false;
        }
        return leak_current_amps(sim_s.0 - sim_d.0, resistance_ohms) > leak_limit_a;
    }
    let mut worst = 0i32;
    if view.max.source.voltage.is_known() && view.min.drain.voltage.is_known() {
        worst = worst.max((view.max.source.voltage.0 - view.min.drain.voltage.0).max(0));
    }
    if view.max.drain.voltage.is_known() && view.min.source.voltage.is_known() {
        worst = worst.max((view.max.drain.voltage.0 - view.min.source.voltage.0).max(0));
    }
    worst > 0 && leak_current_amps(worst, resistance_ohms) > leak_limit_a
}

fn ldd_source_violation(tag: ModelTag, view: &DeviceView, gate_conducts: bool) -> bool {
    if !tag.is_ldd() || gate_conducts {
        return false;
    }
    let s = view.min.source.voltage;
    let d = view.min.drain.voltage;
    s.is_known() && d.is_known() && s.0 > d.0
}

/// Run every device-level predicate over `db`, plus the two net-level
/// predicates (floating input, expected value), returning every
/// [`ErrorRecord`] found and the throttle's running totals.
#[allow(clippy::too_many_arguments)]
pub fn run(
    db: &CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
    sim_vnet: &mut VirtualNetVector,
    config: &DetectConfig,
    interrupt: &AtomicBool,
) -> Result<(Vec<ErrorRecord>, ErrorThrottle), DatabaseError> {
    let mut records = Vec::new();
    let mut throttle = ErrorThrottle::new();
    let leak_limit_a = config.leak_limit_ua * 1e-6;

    for idx in 0..db.device_count() {
        if interrupt.load(Ordering::Relaxed) {
            debug!(target: "cvc::detect", "interrupted mid-sweep; returning partial findings");
            break;
        }
        let device_id = DeviceId(idx as u32);
        let model = db.model_of(device_id)?;
        let device = &db.devices[idx];
        let mut push = |kind: ErrorKind, net: Option<NetId>, signature: String, records: &mut Vec<ErrorRecord>, throttle: &mut ErrorThrottle| {
            let detail_ok = throttle.record(device.parent_instance, device_id, kind, config.circuit_error_limit);
            records.push(ErrorRecord { kind, device: Some(device_id), net, signature, detail_suppressed: !detail_ok });
        };

        if model.tag == ModelTag::Diode {
            let view = device_view(db, equiv, power, min_vnet, max_vnet, sim_vnet, device_id)?;
            if forward_diode(&view, config.forward_error_threshold_mv) {
                push(ErrorKind::ForwardDiode, None, format!("{device_id} forward-biased"), &mut records, &mut throttle);
            }
        }

        if model.tag.is_mos() {
            let view = device_view(db, equiv, power, min_vnet, max_vnet, sim_vnet, device_id)?;
            let nmos_like = model.tag.is_nmos_like();

            match tolerance(
                model.max_vgs,
                view.max.gate.voltage,
                view.min.gate.voltage,
                view.max.source.voltage,
                view.min.source.voltage,
                view.sim.gate.voltage,
                view.sim.source.voltage,
                config.vgs_error_threshold_mv,
            ) {
                Tolerance::Violated => push(ErrorKind::OvervoltageVgs, None, format!("{device_id} Vgs overvoltage"), &mut records, &mut throttle),
                Tolerance::LogicOk => push(ErrorKind::OvervoltageVgsLogicOk, None, format!("{device_id} Vgs overvoltage (logic ok)"), &mut records, &mut throttle),
                Tolerance::Ok => {}
            }
            match tolerance(
                model.max_vds,
                view.max.drain.voltage,
                view.min.drain.voltage,
                view.max.source.voltage,
                view.min.source.voltage,
                view.sim.drain.voltage,
                view.sim.source.voltage,
                config.vds_error_threshold_mv,
            ) {
                Tolerance::Violated => push(ErrorKind::OvervoltageVds, None, format!("{device_id} Vds overvoltage"), &mut records, &mut throttle),
                Tolerance::LogicOk => push(ErrorKind::OvervoltageVdsLogicOk, None, format!("{device_id} Vds overvoltage (logic ok)"), &mut records, &mut throttle),
                Tolerance::Ok => {}
            }
            if let (Some(max_bulk), Some(min_bulk), Some(sim_bulk)) = (view.max.bulk, view.min.bulk, view.sim.bulk) {
                match tolerance(
                    model.max_vbs,
                    max_bulk.voltage,
                    min_bulk.voltage,
                    view.max.source.voltage,
                    view.min.source.voltage,
                    sim_bulk.voltage,
                    view.sim.source.voltage,
                    config.vbs_error_threshold_mv,
                ) {
                    Tolerance::Violated => push(ErrorKind::OvervoltageVbs, None, format!("{device_id} Vbs overvoltage"), &mut records, &mut throttle),
                    Tolerance::LogicOk => push(ErrorKind::OvervoltageVbsLogicOk, None, format!("{device_id} Vbs overvoltage (logic ok)"), &mut records, &mut throttle),
                    Tolerance::Ok => {}
                }
                match tolerance(
                    model.max_vbg,
                    max_bulk.voltage,
                    min_bulk.voltage,
                    view.max.gate.voltage,
                    view.min.gate.voltage,
                    sim_bulk.voltage,
                    view.sim.gate.voltage,
                    config.vbg_error_threshold_mv,
                ) {
                    Tolerance::Violated => push(ErrorKind::OvervoltageVbg, None, format!("{device_id} Vbg overvoltage"), &mut records, &mut throttle),
                    Tolerance::LogicOk => push(ErrorKind::OvervoltageVbgLogicOk, None, format!("{device_id} Vbg overvoltage (logic ok)"), &mut records, &mut throttle),
                    Tolerance::Ok => {}
                }

                if source_bulk_violation(nmos_like, sim_bulk.voltage, view.sim.source.voltage, view.sim.drain.voltage) {
                    let kind = if nmos_like { ErrorKind::NmosSourceBulk } else { ErrorKind::PmosSourceBulk };
                    push(kind, None, format!("{device_id} bulk not dominated by source/drain"), &mut records, &mut throttle);
                }
            }

            if gate_source_violation(nmos_like, &view, model.vth) {
                let kind = if nmos_like { ErrorKind::NmosGateSource } else { ErrorKind::PmosGateSource };
                push(kind, None, format!("{device_id} gate-source below Vth margin"), &mut records, &mut throttle);
            }

            let resistance_ohms = model.resistance_ohms(&device.params);
            if possible_leak(&view, resistance_ohms, leak_limit_a) {
                let kind = if nmos_like { ErrorKind::NmosPossibleLeak } else { ErrorKind::PmosPossibleLeak };
                push(kind, None, format!("{device_id} possible leak path"), &mut records, &mut throttle);
            }

            if model.tag.is_ldd() {
                let gate_conducts = view.sim.gate.voltage.is_known()
                    && view.sim.source.voltage.is_known()
                    && if nmos_like {
                        view.sim.gate.voltage.0 - view.sim.source.voltage.0 > model.vth.0
                    } else {
                        view.sim.gate.voltage.0 - view.sim.source.voltage.0 < model.vth.0
                    };
                if ldd_source_violation(model.tag, &view, gate_conducts) {
                    push(ErrorKind::LddSource, None, format!("{device_id} LDD source/drain direction reversed"), &mut records, &mut throttle);
                }
            }
        }
    }

    floating_input(db, equiv, power, min_vnet, max_vnet, sim_vnet, config, &mut records, &mut throttle)?;
    expected_value(db, equiv, power, min_vnet, max_vnet, sim_vnet, &mut records, &mut throttle);

    Ok((records, throttle))
}

fn floating_input(
    db: &CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
    sim_vnet: &mut VirtualNetVector,
    config: &DetectConfig,
    records: &mut Vec<ErrorRecord>,
    throttle: &mut ErrorThrottle,
) -> Result<(), DatabaseError> {
    for n in 0..db.net_count() as u32 {
        let net = NetId(n);
        if equiv.canonical(net) != net {
            continue;
        }
        let gates: Vec<DeviceId> = db.devices_at_canonical(equiv, net, crate::model::Terminal::Gate, None).collect();
        if gates.is_empty() {
            continue;
        }
        let sim_v = net_voltage(sim_vnet, power, Queue::Sim, net);
        let min_v = net_voltage(min_vnet, power, Queue::Min, net);
        let max_v = net_voltage(max_vnet, power, Queue::Max, net);
        if sim_v.is_known() || min_v.is_known() || max_v.is_known() {
            continue;
        }
        let has_leak_path = gates.iter().any(|&g| {
            db.model_of(g).map(|m| !m.tag.conducts_never()).unwrap_or(false)
        });
        if !has_leak_path && !config.ignore_no_leak_floating {
            // No conducting device at all on this gate: nothing can leak
            // through it either way, so there is nothing to report.
            continue;
        }
        if has_leak_path || !config.ignore_no_leak_floating {
            let device_id = gates[0];
            let detail_ok = throttle.record(db.devices[device_id.as_usize()].parent_instance, device_id, ErrorKind::FloatingInput, config.circuit_error_limit);
            records.push(ErrorRecord {
                kind: ErrorKind::FloatingInput,
                device: Some(device_id),
                net: Some(net),
                signature: format!("{net} floating gate input"),
                detail_suppressed: !detail_ok,
            });
        }
    }
    Ok(())
}

fn expected_value(
    db: &CircuitDb,
    equiv: &EquivalenceMap,
    power: &HashMap<NetId, Power>,
    min_vnet: &mut VirtualNetVector,
    max_vnet: &mut VirtualNetVector,
    sim_vnet: &mut VirtualNetVector,
    records: &mut Vec<ErrorRecord>,
    throttle: &mut ErrorThrottle,
) {
    for n in 0..db.net_count() as u32 {
        let net = NetId(n);
        if equiv.canonical(net) != net {
            continue;
        }
        let Some(power_decl) = power.get(&net) else { continue };
        let Some(expected) = &power_decl.expected else { continue };

        let mut mismatch = None;
        if let Some(want) = expected.min {
            let got = net_voltage(min_vnet, power, Queue::Min, net);
            if got != want {
                mismatch = Some(format!("{net} expected min {want:?}, resolved {got:?}"));
            }
        }
        if let Some(want) = expected.sim {
            let got = net_voltage(sim_vnet, power, Queue::Sim, net);
            if got != want {
                mismatch = Some(format!("{net} expected sim {want:?}, resolved {got:?}"));
            }
        }
        if let Some(want) = expected.max {
            let got = net_voltage(max_vnet, power, Queue::Max, net);
            if got != want {
                mismatch = Some(format!("{net} expected max {want:?}, resolved {got:?}"));
            }
        }

        if let Some(signature) = mismatch {
            // Expected-value checks have no single owning device; throttle
            // keyed on the net's parent instance with a sentinel device id
            // of 0, matching the original's net-level error bucket.
            let instance = db.nets[net.as_usize()].parent_instance;
            let detail_ok = throttle.record(instance, DeviceId(0), ErrorKind::ExpectedValue, u32::MAX);
            records.push(ErrorRecord { kind: ErrorKind::ExpectedValue, device: None, net: Some(net), signature, detail_suppressed: !detail_ok });
        }
    }
}
