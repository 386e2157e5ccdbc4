//! Ingestion fixture format (`SPEC_FULL.md` §10).
//!
//! The CDL netlist parser, model-file grammar, and power-file grammar are
//! out of scope (`spec.md` §1). This module defines a small JSON fixture
//! format — flat, no hierarchy, no bus expansion, no SI-suffix parsing —
//! that the CLI binary and integration tests use to build a [`CircuitDb`]
//! end to end.

use std::collections::HashMap;

use serde::Deserialize;

use crate::database::{CircuitDb, Device, DeviceStatus, Net, NetStatus, RawTerminals};
use crate::model::{DeviceParams, DiodeJunction, Model, ModelTag, ResistanceExpr, Terminal};
use crate::power::Power;
use crate::types::{InstanceId, ModelId, NetId, Voltage};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed fixture JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("device {0} references unknown net {1:?}")]
    UnknownNet(usize, String),
    #[error("device {0} references unknown model {1:?}")]
    UnknownModel(usize, String),
    #[error("power declaration references unknown net {0:?}")]
    UnknownPowerNet(String),
    #[error("unrecognized model tag {0:?}")]
    UnknownModelTag(String),
}

#[derive(Debug, Deserialize)]
pub struct PowerEntry {
    pub net: String,
    pub min: Option<i32>,
    pub sim: Option<i32>,
    pub max: Option<i32>,
    #[serde(default)]
    pub hi_z: bool,
}

#[derive(Debug, Deserialize)]
pub struct DiodeEntry {
    pub anode: String,
    pub cathode: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub vth: Option<i32>,
    #[serde(default)]
    pub max_vgs: Option<i32>,
    #[serde(default)]
    pub max_vds: Option<i32>,
    #[serde(default)]
    pub max_vbs: Option<i32>,
    #[serde(default)]
    pub max_vbg: Option<i32>,
    #[serde(default)]
    pub diodes: Vec<DiodeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub model: String,
    pub source: String,
    pub gate: String,
    pub drain: String,
    #[serde(default)]
    pub bulk: Option<String>,
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub r: f64,
    #[serde(default)]
    pub cell_name: String,
}

/// The whole fixture: a flat net-name list, power declarations, model
/// definitions, and devices referencing both by name.
#[derive(Debug, Deserialize)]
pub struct CircuitDescription {
    pub nets: Vec<String>,
    #[serde(default)]
    pub power: Vec<PowerEntry>,
    pub models: Vec<ModelEntry>,
    pub devices: Vec<DeviceEntry>,
}

impl CircuitDescription {
    pub fn from_json(source: &str) -> Result<CircuitDescription, IngestError> {
        Ok(serde_json::from_str(source)?)
    }
}

fn parse_tag(tag: &str) -> Result<ModelTag, IngestError> {
    Ok(match tag {
        "Nmos" => ModelTag::Nmos,
        "Pmos" => ModelTag::Pmos,
        "Lddn" => ModelTag::Lddn,
        "Lddp" => ModelTag::Lddp,
        "Resistor" => ModelTag::Resistor,
        "Capacitor" => ModelTag::Capacitor,
        "Diode" => ModelTag::Diode,
        "Bipolar" => ModelTag::Bipolar,
        "FuseOn" => ModelTag::FuseOn,
        "FuseOff" => ModelTag::FuseOff,
        "SwitchOn" => ModelTag::SwitchOn,
        "SwitchOff" => ModelTag::SwitchOff,
        "Box" => ModelTag::Box_,
        other => return Err(IngestError::UnknownModelTag(other.to_string())),
    })
}

fn terminal(name: &str) -> Terminal {
    match name {
        "source" => Terminal::Source,
        "gate" => Terminal::Gate,
        "drain" => Terminal::Drain,
        _ => Terminal::Bulk,
    }
}

/// Lower a [`CircuitDescription`] into a [`CircuitDb`] plus its model
/// table, resolving net/model names to indices.
pub fn build_database(desc: &CircuitDescription) -> Result<CircuitDb, IngestError> {
    let mut net_index: HashMap<&str, NetId> = HashMap::new();
    let mut nets = Vec::with_capacity(desc.nets.len());
    for (idx, name) in desc.nets.iter().enumerate() {
        net_index.insert(name.as_str(), NetId(idx as u32));
        nets.push(Net { parent_instance: InstanceId(0), status: NetStatus::empty(), power: None });
    }

    for entry in &desc.power {
        let id = *net_index.get(entry.net.as_str()).ok_or_else(|| IngestError::UnknownPowerNet(entry.net.clone()))?;
        nets[id.as_usize()].power = Some(Power {
            min: entry.min.map(Voltage),
            sim: entry.sim.map(Voltage),
            max: entry.max.map(Voltage),
            expected: None,
            hi_z: entry.hi_z,
            family: Default::default(),
            macro_name: None,
            is_input: false,
        });
    }

    let mut model_index: HashMap<&str, ModelId> = HashMap::new();
    let mut models = Vec::with_capacity(desc.models.len());
    for (idx, entry) in desc.models.iter().enumerate() {
        model_index.insert(entry.name.as_str(), ModelId(idx as u32));
        let tag = parse_tag(&entry.tag)?;
        let diodes = entry
            .diodes
            .iter()
            .map(|d| DiodeJunction { anode: terminal(&d.anode), cathode: terminal(&d.cathode) })
            .collect();
        models.push(Model {
            name: entry.name.clone(),
            tag,
            vth: entry.vth.map(Voltage).unwrap_or(Voltage::UNKNOWN),
            max_vgs: entry.max_vgs.map(Voltage).unwrap_or(Voltage::UNKNOWN),
            max_vds: entry.max_vds.map(Voltage).unwrap_or(Voltage::UNKNOWN),
            max_vbs: entry.max_vbs.map(Voltage).unwrap_or(Voltage::UNKNOWN),
            max_vbg: entry.max_vbg.map(Voltage).unwrap_or(Voltage::UNKNOWN),
            resistance: if tag.is_mos() { ResistanceExpr::default_mos() } else { ResistanceExpr::default_resistor() },
            param_ranges: Vec::new(),
            cell_filter: None,
            diodes,
        });
    }

    let mut devices = Vec::with_capacity(desc.devices.len());
    for (idx, entry) in desc.devices.iter().enumerate() {
        let lookup = |name: &str| net_index.get(name).copied().ok_or_else(|| IngestError::UnknownNet(idx, name.to_string()));
        let source = lookup(&entry.source)?;
        let gate = lookup(&entry.gate)?;
        let drain = lookup(&entry.drain)?;
        let bulk = entry.bulk.as_deref().map(lookup).transpose()?;
        let model_ref = *model_index.get(entry.model.as_str()).ok_or_else(|| IngestError::UnknownModel(idx, entry.model.clone()))?;
        devices.push(Device {
            parent_instance: InstanceId(0),
            model_ref,
            terminals: RawTerminals { source, gate, drain, bulk },
            params: DeviceParams { l: entry.l, w: entry.w, r: entry.r },
            cell_name: entry.cell_name.clone(),
            status: DeviceStatus::empty(),
            direction_committed: false,
        });
    }

    Ok(CircuitDb::build(nets, devices, models))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVERTER: &str = r#"{
        "nets": ["GND", "VDD", "A", "Y"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "nmos", "tag": "Nmos", "vth": 300 },
            { "name": "pmos", "tag": "Pmos", "vth": -300 }
        ],
        "devices": [
            { "model": "nmos", "source": "GND", "gate": "A", "drain": "Y", "bulk": "GND" },
            { "model": "pmos", "source": "VDD", "gate": "A", "drain": "Y", "bulk": "VDD" }
        ]
    }"#;

    #[test]
    fn builds_a_two_transistor_inverter() {
        let desc = CircuitDescription::from_json(INVERTER).unwrap();
        let db = build_database(&desc).unwrap();
        assert_eq!(db.net_count(), 4);
        assert_eq!(db.device_count(), 2);
        assert_eq!(db.nets[0].power.as_ref().unwrap().min, Some(Voltage(0)));
        assert_eq!(db.model_of(crate::types::DeviceId(0)).unwrap().tag, ModelTag::Nmos);
    }

    #[test]
    fn unknown_net_reference_is_an_error() {
        let desc = CircuitDescription::from_json(
            r#"{"nets": ["A"], "power": [], "models": [{"name":"nmos","tag":"Nmos"}], "devices": [{"model":"nmos","source":"A","gate":"A","drain":"MISSING"}]}"#,
        )
        .unwrap();
        assert!(matches!(build_database(&desc), Err(IngestError::UnknownNet(0, _))));
    }

    #[test]
    fn unknown_model_tag_is_an_error() {
        let desc = CircuitDescription::from_json(
            r#"{"nets": ["A"], "power": [], "models": [{"name":"x","tag":"Quantum"}], "devices": []}"#,
        )
        .unwrap();
        assert!(matches!(build_database(&desc), Err(IngestError::UnknownModelTag(_))));
    }
}
