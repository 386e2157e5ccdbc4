//! Device models (component data, `spec.md` §3).
//!
//! A [`Model`] is the compile-time-bound record describing a device class:
//! tag, threshold/tolerance voltages, a resistance formula, optional
//! parameter-range and cell-name conditions, and a parasitic diode list.
//! The model-file grammar that would otherwise produce these values is out
//! of scope (`spec.md` §1); callers construct `Model` values directly or
//! via [`ModelBuilder`].

use regex::Regex;

use crate::types::Voltage;

/// Device class tag, grounded on the original `modelType_t` enum
/// (`NMOS, PMOS, RESISTOR, CAPACITOR, DIODE, BIPOLAR, FUSE_ON, FUSE_OFF,
/// SWITCH_ON, SWITCH_OFF, LDDN, LDDP, BOX`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelTag {
    Nmos,
    Pmos,
    Lddn,
    Lddp,
    Resistor,
    Capacitor,
    Diode,
    Bipolar,
    FuseOn,
    FuseOff,
    SwitchOn,
    SwitchOff,
    Box_,
}

impl ModelTag {
    #[inline]
    pub fn is_mos(self) -> bool {
        matches!(self, ModelTag::Nmos | ModelTag::Pmos | ModelTag::Lddn | ModelTag::Lddp)
    }

    #[inline]
    pub fn is_nmos_like(self) -> bool {
        matches!(self, ModelTag::Nmos | ModelTag::Lddn)
    }

    #[inline]
    pub fn is_pmos_like(self) -> bool {
        matches!(self, ModelTag::Pmos | ModelTag::Lddp)
    }

    #[inline]
    pub fn is_ldd(self) -> bool {
        matches!(self, ModelTag::Lddn | ModelTag::Lddp)
    }

    #[inline]
    pub fn conducts_never(self) -> bool {
        matches!(self, ModelTag::Capacitor | ModelTag::SwitchOff | ModelTag::FuseOff)
    }

    #[inline]
    pub fn always_shorts(self) -> bool {
        matches!(self, ModelTag::SwitchOn)
    }
}

/// A device parameter used by [`ResistanceExpr`] and [`ParamRange`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    /// Channel length.
    L,
    /// Channel width.
    W,
    /// Explicit resistance parameter (used by plain resistors).
    R,
}

/// A tiny formula language over `{L, W, R}`, grounded on the original's
/// `DEFAULT_MOS_RESISTANCE = "L/W*7000"` and `DEFAULT_RESISTANCE = "R"`
/// string constants. The model-file grammar that would parse free text
/// into this tree is out of scope; callers build the tree directly.
#[derive(Clone, Debug, PartialEq)]
pub enum ResistanceExpr {
    Literal(f64),
    Param(Param),
    Add(Box<ResistanceExpr>, Box<ResistanceExpr>),
    Sub(Box<ResistanceExpr>, Box<ResistanceExpr>),
    Mul(Box<ResistanceExpr>, Box<ResistanceExpr>),
    Div(Box<ResistanceExpr>, Box<ResistanceExpr>),
}

impl ResistanceExpr {
    /// `DEFAULT_MOS_RESISTANCE`: `L / W * 7000`.
    pub fn default_mos() -> ResistanceExpr {
        ResistanceExpr::Mul(
            Box::new(ResistanceExpr::Div(
                Box::new(ResistanceExpr::Param(Param::L)),
                Box::new(ResistanceExpr::Param(Param::W)),
            )),
            Box::new(ResistanceExpr::Literal(7000.0)),
        )
    }

    /// `DEFAULT_RESISTANCE`: the `R` parameter verbatim.
    pub fn default_resistor() -> ResistanceExpr {
        ResistanceExpr::Param(Param::R)
    }

    /// Evaluate against a concrete device's parameters. Division by zero
    /// yields `f64::INFINITY` rather than panicking, since a malformed
    /// `L`/`W` is a user-data problem the (out-of-scope) model-file
    /// parser would normally have already rejected.
    pub fn eval(&self, params: &DeviceParams) -> f64 {
        match self {
            ResistanceExpr::Literal(v) => *v,
            ResistanceExpr::Param(Param::L) => params.l,
            ResistanceExpr::Param(Param::W) => params.w,
            ResistanceExpr::Param(Param::R) => params.r,
            ResistanceExpr::Add(a, b) => a.eval(params) + b.eval(params),
            ResistanceExpr::Sub(a, b) => a.eval(params) - b.eval(params),
            ResistanceExpr::Mul(a, b) => a.eval(params) * b.eval(params),
            ResistanceExpr::Div(a, b) => a.eval(params) / b.eval(params),
        }
    }
}

/// Per-device parameters consumed by [`ResistanceExpr::eval`] and
/// [`ParamRange`] predicates.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DeviceParams {
    pub l: f64,
    pub w: f64,
    pub r: f64,
}

/// One parameter-range predicate, e.g. `condition=(L<0.4u w>=1.2u)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParamRange {
    pub param: Param,
    pub min_inclusive: Option<f64>,
    pub max_exclusive: Option<f64>,
}

impl ParamRange {
    pub fn matches(&self, params: &DeviceParams) -> bool {
        let v = match self.param {
            Param::L => params.l,
            Param::W => params.w,
            Param::R => params.r,
        };
        if let Some(min) = self.min_inclusive {
            if v < min {
                return false;
            }
        }
        if let Some(max) = self.max_exclusive {
            if v >= max {
                return false;
            }
        }
        true
    }
}

/// Ordered pair of terminal roles forming a parasitic diode junction,
/// e.g. `(Source, Bulk)` for a bulk-source parasitic diode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Terminal {
    Source,
    Gate,
    Drain,
    Bulk,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DiodeJunction {
    pub anode: Terminal,
    pub cathode: Terminal,
}

/// A device-class model.
#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub tag: ModelTag,
    pub vth: Voltage,
    pub max_vgs: Voltage,
    pub max_vds: Voltage,
    pub max_vbs: Voltage,
    pub max_vbg: Voltage,
    pub resistance: ResistanceExpr,
    pub param_ranges: Vec<ParamRange>,
    pub cell_filter: Option<Regex>,
    pub diodes: Vec<DiodeJunction>,
}

impl Model {
    /// Whether `params`/`cell_name` satisfy every condition attached to
    /// this model (parameter ranges AND, when present, the cell-name
    /// regex). Matches `spec.md` §3's "optional parameter-range
    /// predicates and cell-name regex".
    pub fn parameter_match(&self, params: &DeviceParams, cell_name: &str) -> bool {
        if let Some(re) = &self.cell_filter {
            if !re.is_match(cell_name) {
                return false;
            }
        }
        self.param_ranges.iter().all(|r| r.matches(params))
    }

    /// Resistance of a device of this model with the given parameters, as
    /// a millivolt-per-milliamp-scale ohm value rounded to `u32`, then
    /// wrapped in [`crate::types::Resistance`] by the caller (saturation
    /// happens in the virtual-net vectors, not here).
    pub fn resistance_ohms(&self, params: &DeviceParams) -> f64 {
        self.resistance.eval(params).max(0.0)
    }
}

/// Ergonomic constructor mirroring the teacher's `ProverBuilder` /
/// `VerifierBuilder` pattern in `api.rs`: safe defaults, override only
/// what a test or fixture cares about.
#[derive(Clone, Debug)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>, tag: ModelTag) -> Self {
        ModelBuilder {
            model: Model {
                name: name.into(),
                tag,
                vth: Voltage::UNKNOWN,
                max_vgs: Voltage::UNKNOWN,
                max_vds: Voltage::UNKNOWN,
                max_vbs: Voltage::UNKNOWN,
                max_vbg: Voltage::UNKNOWN,
                resistance: if tag.is_mos() {
                    ResistanceExpr::default_mos()
                } else {
                    ResistanceExpr::default_resistor()
                },
                param_ranges: Vec::new(),
                cell_filter: None,
                diodes: Vec::new(),
            },
        }
    }

    pub fn vth_mv(mut self, mv: i32) -> Self {
        self.model.vth = Voltage(mv);
        self
    }

    pub fn max_vgs_mv(mut self, mv: i32) -> Self {
        self.model.max_vgs = Voltage(mv);
        self
    }

    pub fn max_vds_mv(mut self, mv: i32) -> Self {
        self.model.max_vds = Voltage(mv);
        self
    }

    pub fn max_vbs_mv(mut self, mv: i32) -> Self {
        self.model.max_vbs = Voltage(mv);
        self
    }

    pub fn max_vbg_mv(mut self, mv: i32) -> Self {
        self.model.max_vbg = Voltage(mv);
        self
    }

    pub fn resistance(mut self, expr: ResistanceExpr) -> Self {
        self.model.resistance = expr;
        self
    }

    pub fn diode(mut self, anode: Terminal, cathode: Terminal) -> Self {
        self.model.diodes.push(DiodeJunction { anode, cathode });
        self
    }

    pub fn build(self) -> Model {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mos_resistance_matches_original_formula() {
        let expr = ResistanceExpr::default_mos();
        let params = DeviceParams { l: 0.28, w: 1.4, r: 0.0 };
        let got = expr.eval(&params);
        let want = 0.28 / 1.4 * 7000.0;
        assert!((got - want).abs() < 1e-9);
    }

    #[test]
    fn param_range_is_min_inclusive_max_exclusive() {
        let range = ParamRange { param: Param::L, min_inclusive: Some(0.2), max_exclusive: Some(0.4) };
        assert!(range.matches(&DeviceParams { l: 0.2, w: 0.0, r: 0.0 }));
        assert!(!range.matches(&DeviceParams { l: 0.4, w: 0.0, r: 0.0 }));
        assert!(!range.matches(&DeviceParams { l: 0.1, w: 0.0, r: 0.0 }));
    }

    #[test]
    fn cell_filter_regex_gates_parameter_match() {
        let model = ModelBuilder::new("nmos_hv", ModelTag::Nmos)
            .vth_mv(300)
            .build();
        let mut model = model;
        model.cell_filter = Some(Regex::new(r"^HV_").unwrap());
        let params = DeviceParams::default();
        assert!(model.parameter_match(&params, "HV_INV"));
        assert!(!model.parameter_match(&params, "LV_INV"));
    }

    #[test]
    fn model_tag_classification() {
        assert!(ModelTag::Lddn.is_mos());
        assert!(ModelTag::Lddn.is_nmos_like());
        assert!(ModelTag::Lddn.is_ldd());
        assert!(!ModelTag::Resistor.is_mos());
        assert!(ModelTag::Capacitor.conducts_never());
        assert!(ModelTag::SwitchOn.always_shorts());
    }
}
