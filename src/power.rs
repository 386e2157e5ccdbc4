//! Power declarations (`spec.md` §3, §6).
//!
//! A [`Power`] declaration pins a net (or a set of nets expanded from a
//! bus/wildcard) to one or more of `{min, sim, max, expected, Hi-Z,
//! reference}`. The power-*file* grammar that would produce these from
//! text is out of scope (`spec.md` §1); callers construct `Power` values
//! directly. The bus-name *expansion algorithm* (`A<1:0>`, `A[1:0]`,
//! `A(1:0)`, `A{1:0}`) is implemented here as a pure function since it has
//! no dependency on the file reader and is directly testable.

use crate::types::Voltage;

/// Scoping tag for Hi-Z propagation, `spec.md` §3 ("family").
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Family(pub Option<String>);

/// An expected-value check on a net, `spec.md` §4.F ("Expected value").
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Expected {
    pub min: Option<Voltage>,
    pub sim: Option<Voltage>,
    pub max: Option<Voltage>,
}

/// A power declaration for a single (already bus-expanded) net name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Power {
    pub min: Option<Voltage>,
    pub sim: Option<Voltage>,
    pub max: Option<Voltage>,
    pub expected: Option<Expected>,
    /// High-impedance: a declared net with no fixed voltage, scoped by
    /// `family` for Hi-Z propagation purposes.
    pub hi_z: bool,
    pub family: Family,
    /// Indirection through a `#define NAME ...` macro; resolved before
    /// the engine consumes the declaration (`spec.md` §6).
    pub macro_name: Option<String>,
    pub is_input: bool,
}

impl Power {
    /// Two declarations are *equal-by-definition* (`spec.md` §4.B, union
    /// rule 3) when every explicitly-set field matches.
    pub fn equal_by_definition(&self, other: &Power) -> bool {
        self.min == other.min
            && self.sim == other.sim
            && self.max == other.max
            && self.hi_z == other.hi_z
    }

    /// Power-consistency check (`spec.md` §3, invariant 2): two
    /// declarations may be merged iff they are identical, or one is
    /// wholly absent (a plain analog net with no declaration at all).
    pub fn compatible(a: Option<&Power>, b: Option<&Power>) -> bool {
        match (a, b) {
            (None, _) | (_, None) => true,
            (Some(x), Some(y)) => x.equal_by_definition(y),
        }
    }
}

/// Expand a bus-style net name into its constituent single-bit names.
///
/// Recognizes `A<1:0>`, `A[1:0]`, `A(1:0)`, `A{1:0}` (any of the four
/// bracket styles named in `spec.md` §6) and both ascending and
/// descending ranges (`A<0:1>` expands low-to-high, `A<1:0>` high-to-low,
/// exactly as written). A name with no bracket suffix expands to itself.
pub fn expand_bus_name(name: &str) -> Vec<String> {
    const PAIRS: [(char, char); 4] = [('<', '>'), ('[', ']'), ('(', ')'), ('{', '}')];

    for (open, close) in PAIRS {
        if let Some(open_pos) = name.rfind(open) {
            if name.ends_with(close) {
                let base = &name[..open_pos];
                let inner = &name[open_pos + 1..name.len() - 1];
                if let Some((hi_str, lo_str)) = inner.split_once(':') {
                    if let (Ok(hi), Ok(lo)) = (hi_str.trim().parse::<i64>(), lo_str.trim().parse::<i64>()) {
                        let mut out = Vec::new();
                        if hi <= lo {
                            let mut i = hi;
                            while i <= lo {
                                out.push(format!("{base}{i}"));
                                i += 1;
                            }
                        } else {
                            let mut i = hi;
                            while i >= lo {
                                out.push(format!("{base}{i}"));
                                i -= 1;
                            }
                        }
                        return out;
                    }
                }
            }
        }
    }
    vec![name.to_string()]
}
