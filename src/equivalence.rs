//! Component B — Equivalence Resolver (`spec.md` §4.B).
//!
//! Unions the two non-gate terminals of every `SWITCH_ON` device, with a
//! power-consistency check, producing a canonical representative map such
//! that `equiv[n] <= n` and iterated application reaches a fixed point
//! (`spec.md` §3, invariant 1).

use std::collections::HashMap;

use tracing::{info, warn};

use crate::database::CircuitDb;
use crate::model::ModelTag;
use crate::power::Power;
use crate::types::NetId;

#[derive(Debug, thiserror::Error)]
pub enum EquivalenceError {
    /// Canonical chain exceeded the net count — a structural invariant
    /// violation signaling a (out-of-scope) parser bug, per `spec.md`
    /// §4.B: "the engine panics with a database-error code". We return a
    /// typed error instead of panicking so callers can decide how fatal
    /// this really is; the top-level driver still treats it as fatal.
    #[error("equivalence chain for net {0:?} did not converge within {1} hops (net count)")]
    ChainDidNotConverge(NetId, usize),
}

/// A leak recorded when two power-declared nets are shorted together by
/// an always-on switch and they are *not* equal-by-definition
/// (`spec.md` §4.B, union rule 3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PowerShortLeak {
    pub switch: crate::types::DeviceId,
    pub net_a: NetId,
    pub net_b: NetId,
}

/// The equivalence map produced by resolution: `equiv[n]` is the
/// canonical representative of `n`'s class.
#[derive(Clone, Debug)]
pub struct EquivalenceMap {
    equiv: Vec<NetId>,
    /// `spec.md` §4.B rule 2's `CNetMap`: for each canonical net, every raw
    /// net (including itself) that equivalence merged into it. Union
    /// merges re-point `equiv[]` but never rewrite a merged-away net's own
    /// intrusive adjacency lists, so any caller enumerating "devices
    /// attached to this canonical net" must walk every member's adjacency,
    /// not just the canonical net's own.
    members: Vec<Vec<NetId>>,
}

impl EquivalenceMap {
    /// The trivial map where every net is its own representative —
    /// useful for circuits with no always-on switches, and for tests.
    pub fn identity(net_count: usize) -> Self {
        EquivalenceMap {
            equiv: (0..net_count as u32).map(NetId).collect(),
            members: (0..net_count as u32).map(|n| vec![NetId(n)]).collect(),
        }
    }

    /// Canonical representative of `net`. After [`resolve`] this is a
    /// single array lookup (invariant 1: `equiv[equiv[n]] == equiv[n]`).
    #[inline]
    pub fn canonical(&self, net: NetId) -> NetId {
        self.equiv[net.as_usize()]
    }

    /// Every raw net (including `canonical` itself) that was unioned into
    /// `canonical`'s class — the `CNetMap` union a canonical-net adjacency
    /// iteration must walk. `canonical` should already be a canonical
    /// representative (pass it through [`EquivalenceMap::canonical`]
    /// first); a non-canonical argument returns an empty slice.
    #[inline]
    pub fn members(&self, canonical: NetId) -> &[NetId] {
        &self.members[canonical.as_usize()]
    }
}

/// Run the full "always-on switch" union-find sweep over `db`, returning
/// the canonical map plus any power-short leaks discovered along the way
/// (`spec.md` §4.B).
pub fn resolve(
    db: &CircuitDb,
) -> Result<(EquivalenceMap, Vec<PowerShortLeak>, HashMap<NetId, Power>), EquivalenceError> {
    let net_count = db.net_count();
    let mut equiv: Vec<NetId> = (0..net_count as u32).map(NetId).collect();
    // Side table tracking, for each canonical representative currently in
    // use, the power declaration that should apply after merges — this is
    // `CNetMap` in `spec.md` §4.B rule 2, used to re-point power pointers
    // quickly on subsequent merges instead of re-scanning.
    let mut power_of_canonical: HashMap<NetId, Option<Power>> = HashMap::new();
    for (idx, net) in db.nets.iter().enumerate() {
        power_of_canonical.insert(NetId(idx as u32), net.power.clone());
    }

    let mut leaks = Vec::new();

    let find = |equiv: &Vec<NetId>, mut n: NetId| -> NetId {
        while equiv[n.as_usize()] != n {
            n = equiv[n.as_usize()];
        }
        n
    };

    for (idx, device) in db.devices.iter().enumerate() {
        if db.model_of(crate::types::DeviceId(idx as u32)).map(|m| m.tag) != Ok(ModelTag::SwitchOn) {
            continue;
        }
        // Union the two non-gate terminals: source and drain.
        let x = find(&equiv, device.terminals.source);
        let y = find(&equiv, device.terminals.drain);
        if x == y {
            continue;
        }
        let (a, b) = if x.0 < y.0 { (x, y) } else { (y, x) };

        let power_a = power_of_canonical.get(&a).cloned().flatten();
        let power_b = power_of_canonical.get(&b).cloned().flatten();

        match (power_a.as_ref(), power_b.as_ref()) {
            (Some(pa), Some(pb)) => {
                if pa.equal_by_definition(pb) {
                    info!(target: "cvc::equivalence", net_a = a.0, net_b = b.0, "ignored short between same power");
                } else {
                    warn!(target: "cvc::equivalence", switch = idx, net_a = a.0, net_b = b.0, "power-consistency conflict on always-on switch; merging and continuing");
                    leaks.push(PowerShortLeak {
                        switch: crate::types::DeviceId(idx as u32),
                        net_a: a,
                        net_b: b,
                    });
                }
            }
            _ => {}
        }

        // Rule 1: equiv[b] = a (a < b).
        equiv[b.as_usize()] = a;
        // Rule 2: fold b's power entry into a's slot so later merges see
        // one consistent lookup.
        let merged_power = power_a.or(power_b);
        power_of_canonical.insert(a, merged_power);
        power_of_canonical.remove(&b);
    }

    // Final compression pass: every entry points directly at its
    // canonical representative (invariant 1).
    for n in 0..net_count {
        let net = NetId(n as u32);
        let mut hops = 0usize;
        let mut cur = net;
        while equiv[cur.as_usize()] != cur {
            cur = equiv[cur.as_usize()];
            hops += 1;
            if hops > net_count {
                return Err(EquivalenceError::ChainDidNotConverge(net, net_count));
            }
        }
        equiv[net.as_usize()] = cur;
    }

    // Build the canonical-net member union (`CNetMap`, rule 2): every raw
    // net, including nets that were never merged, is a member of its own
    // final canonical representative's class.
    let mut members: Vec<Vec<NetId>> = vec![Vec::new(); net_count];
    for n in 0..net_count {
        let net = NetId(n as u32);
        members[equiv[n].as_usize()].push(net);
    }

    // Every entry still keyed in `power_of_canonical` after the sweep
    // belongs to a net that is canonical post-compression (non-canonical
    // keys were removed by rule 1 at merge time); filter out the `None`s
    // (plain analog nets) to get the authoritative per-canonical-net power
    // map the propagation engine seeds itself from.
    let merged_power: HashMap<NetId, Power> = power_of_canonical
        .into_iter()
        .filter(|(n, _)| equiv[n.as_usize()] == *n)
        .filter_map(|(n, p)| p.map(|p| (n, p)))
        .collect();

    Ok((EquivalenceMap { equiv, members }, leaks, merged_power))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{CircuitDb, Device, DeviceStatus, Net, NetStatus, RawTerminals};
    use crate::model::{ModelBuilder, ModelTag};
    use crate::types::{DeviceId, InstanceId, ModelId};

    fn db_with_switch(power_a: Option<Power>, power_b: Option<Power>) -> CircuitDb {
        let nets = vec![
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: power_a },
            Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: power_b },
        ];
        let models = vec![ModelBuilder::new("sw", ModelTag::SwitchOn).build()];
        let devices = vec![Device {
            parent_instance: InstanceId(0),
            model_ref: ModelId(0),
            terminals: RawTerminals { source: NetId(0), gate: NetId(0), drain: NetId(1), bulk: None },
            params: Default::default(),
            cell_name: "SW".into(),
            status: DeviceStatus::empty(),
            direction_committed: false,
        }];
        CircuitDb::build(nets, devices, models)
    }

    #[test]
    fn union_is_canonical_after_resolve() {
        let db = db_with_switch(None, None);
        let (equiv, leaks, _power) = resolve(&db).unwrap();
        assert!(leaks.is_empty());
        assert_eq!(equiv.canonical(NetId(0)), NetId(0));
        assert_eq!(equiv.canonical(NetId(1)), NetId(0));
        // invariant 1
        assert_eq!(equiv.canonical(equiv.canonical(NetId(1))), equiv.canonical(NetId(1)));
    }

    #[test]
    fn compatible_power_merges_without_leak() {
        let p = Power { min: Some(crate::types::Voltage(0)), sim: Some(crate::types::Voltage(0)), max: Some(crate::types::Voltage(0)), ..Default::default() };
        let db = db_with_switch(Some(p.clone()), Some(p.clone()));
        let (_equiv, leaks, power) = resolve(&db).unwrap();
        assert!(leaks.is_empty());
        assert_eq!(power.get(&NetId(0)), Some(&p));
    }

    #[test]
    fn incompatible_power_records_leak_but_still_merges() {
        let gnd = Power { min: Some(crate::types::Voltage(0)), sim: Some(crate::types::Voltage(0)), max: Some(crate::types::Voltage(0)), ..Default::default() };
        let vdd = Power { min: Some(crate::types::Voltage(1200)), sim: Some(crate::types::Voltage(1200)), max: Some(crate::types::Voltage(1200)), ..Default::default() };
        let db = db_with_switch(Some(gnd), Some(vdd));
        let (equiv, leaks, _power) = resolve(&db).unwrap();
        assert_eq!(leaks.len(), 1);
        // still merged, so downstream analysis remains useful
        assert_eq!(equiv.canonical(NetId(0)), equiv.canonical(NetId(1)));
    }

    #[test]
    fn members_union_includes_the_merged_away_net() {
        let db = db_with_switch(None, None);
        let (equiv, _leaks, _power) = resolve(&db).unwrap();
        let canonical = equiv.canonical(NetId(1));
        let mut members = equiv.members(canonical).to_vec();
        members.sort_by_key(|n| n.0);
        assert_eq!(members, vec![NetId(0), NetId(1)]);
    }

    #[test]
    fn identity_map_is_fixed_point() {
        let m = EquivalenceMap::identity(5);
        for i in 0..5 {
            assert_eq!(m.canonical(NetId(i)), NetId(i));
        }
    }
}
