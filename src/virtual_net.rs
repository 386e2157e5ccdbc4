//! Component C — Virtual-Net Vectors (`spec.md` §4.C).
//!
//! Three parallel vectors (min/sim/max) mapping each net to a "next net +
//! accumulated resistance" record, with path compression and lazy update.
//! `propagate.rs` owns one [`VirtualNetVector`] per direction plus the two
//! leak snapshots named in `spec.md` §4.C.

use tracing::warn;

use crate::types::{NetId, Resistance};

/// One net's record in a [`VirtualNetVector`].
#[derive(Copy, Clone, Debug)]
struct VirtualNet {
    next: NetId,
    res: Resistance,
    final_net: NetId,
    final_res: Resistance,
    /// Global vector version this entry's `final_*` cache was computed
    /// against; stale whenever it differs from the vector's current
    /// version (i.e. *any* net in the vector has been `set` since).
    cached_version: u64,
}

/// A per-direction vector of [`VirtualNet`] records plus path-compression
/// cache invalidated by a monotonic update counter (`spec.md` §4.C).
#[derive(Clone, Debug)]
pub struct VirtualNetVector {
    entries: Vec<VirtualNet>,
    version: u64,
}

impl VirtualNetVector {
    /// Every net starts as its own terminal (no path to power yet).
    pub fn new(net_count: usize) -> Self {
        let entries = (0..net_count as u32)
            .map(|n| VirtualNet {
                next: NetId(n),
                res: Resistance::ZERO,
                final_net: NetId(n),
                final_res: Resistance::ZERO,
                cached_version: 0,
            })
            .collect();
        VirtualNetVector { entries, version: 0 }
    }

    /// `set(n, next, res, stamp)`: writes `next`/`res` and bumps the
    /// vector's global update counter, invalidating every cached
    /// `final_*` in the vector (a conservative but always-correct
    /// simplification of `spec.md`'s per-entry staleness check).
    pub fn set(&mut self, n: NetId, next: NetId, res: Resistance) {
        self.version += 1;
        let entry = &mut self.entries[n.as_usize()];
        entry.next = next;
        entry.res = res;
    }

    /// True iff `n` is currently a terminal of the chain (anchored to
    /// power, or has no known path to power in this direction).
    pub fn is_terminal(&self, n: NetId) -> bool {
        self.entries[n.as_usize()].next == n
    }

    pub fn next_of(&self, n: NetId) -> NetId {
        self.entries[n.as_usize()].next
    }

    pub fn hop_resistance(&self, n: NetId) -> Resistance {
        self.entries[n.as_usize()].res
    }

    /// Resolve `n` to its fixed point, returning `(final_net,
    /// accumulated_resistance)`. Walks `next` pointers, saturating
    /// resistance at [`crate::types::MAX_RESISTANCE`], detecting a cycle
    /// by counting hops against the net count (`spec.md` §4.C), and
    /// back-filling the path-compression cache for every node it
    /// touched.
    pub fn resolve(&mut self, n: NetId) -> (NetId, Resistance) {
        {
            let entry = self.entries[n.as_usize()];
            if entry.cached_version == self.version {
                return (entry.final_net, entry.final_res);
            }
        }

        let net_count = self.entries.len();
        let mut path = Vec::new();
        let mut cur = n;
        let mut acc = Resistance::ZERO;
        let mut hops = 0usize;
        loop {
            path.push((cur, acc));
            if self.is_terminal(cur) {
                break;
            }
            let entry = self.entries[cur.as_usize()];
            let next_acc = acc.add(entry.res);
            if next_acc.saturated() && !acc.saturated() {
                warn!(target: "cvc::virtual_net", net = cur.0, "resistance saturated at MAX_RESISTANCE while resolving virtual net chain");
            }
            acc = next_acc;
            cur = entry.next;
            hops += 1;
            if hops > net_count {
                // Cycle that never reached a terminal. Treat the current
                // node as its own final net rather than looping forever;
                // this can only happen if `propagate.rs`'s cycle-breaking
                // discipline (last_update stamp check before each write)
                // was bypassed, which is an internal invariant violation
                // upstream, not something this vector can repair.
                break;
            }
        }

        let final_net = cur;
        let final_res = acc;
        for (visited, prefix_res) in path {
            let remaining = Resistance(final_res.0.saturating_sub(prefix_res.0));
            let entry = &mut self.entries[visited.as_usize()];
            entry.final_net = final_net;
            entry.final_res = Resistance(remaining.0.min(Resistance::MAX.0));
            entry.cached_version = self.version;
        }
        (final_net, final_res)
    }
}
