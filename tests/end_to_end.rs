//! End-to-end scenarios exercising the full pipeline through the public
//! `ingest`/`engine` surface, one per named case.

use cvc::config::CvcConfig;
use cvc::detect::ErrorKind;
use cvc::engine::Engine;
use cvc::ingest::{build_database, CircuitDescription};

fn run_fixture(json: &str) -> cvc::engine::VerificationReport {
    let desc = CircuitDescription::from_json(json).unwrap();
    let db = build_database(&desc).unwrap();
    let mut engine = Engine::new(db, CvcConfig::default());
    engine.run().unwrap()
}

#[test]
fn two_inverter_chain_propagates_correctly_with_no_errors() {
    let json = r#"{
        "nets": ["GND", "VDD", "A", "M", "Y"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 },
            { "net": "A", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "nmos", "tag": "Nmos", "vth": 300 },
            { "name": "pmos", "tag": "Pmos", "vth": -300 }
        ],
        "devices": [
            { "model": "nmos", "source": "GND", "gate": "A", "drain": "M", "bulk": "GND" },
            { "model": "pmos", "source": "VDD", "gate": "A", "drain": "M", "bulk": "VDD" },
            { "model": "nmos", "source": "GND", "gate": "M", "drain": "Y", "bulk": "GND" },
            { "model": "pmos", "source": "VDD", "gate": "M", "drain": "Y", "bulk": "VDD" }
        ]
    }"#;

    let desc = CircuitDescription::from_json(json).unwrap();
    let db = build_database(&desc).unwrap();

    let (equiv, leaks, mut power) = cvc::equivalence::resolve(&db).unwrap();
    assert!(leaks.is_empty());

    let mut min_vnet = cvc::virtual_net::VirtualNetVector::new(db.net_count());
    let mut max_vnet = cvc::virtual_net::VirtualNetVector::new(db.net_count());
    let mut sim_vnet = cvc::virtual_net::VirtualNetVector::new(db.net_count());
    let interrupt = std::sync::atomic::AtomicBool::new(false);
    let mut db = db;
    cvc::propagate::run_min_pass(&mut db, &equiv, &power, &mut min_vnet, &interrupt).unwrap();
    cvc::propagate::run_max_pass(&mut db, &equiv, &power, &mut max_vnet, &interrupt).unwrap();
    cvc::propagate::run_sim_pass(&mut db, &equiv, &mut power, &mut sim_vnet, &mut min_vnet, &mut max_vnet, false, &interrupt).unwrap();

    let net = |name: &str| {
        let idx = desc.nets.iter().position(|n| n == name).unwrap() as u32;
        cvc::NetId(idx)
    };
    let sim_of = |n: cvc::NetId| cvc::propagate::net_voltage(&mut sim_vnet, &power, cvc::database::Queue::Sim, equiv.canonical(n));

    assert_eq!(sim_of(net("A")), cvc::Voltage(1200));
    assert_eq!(sim_of(net("M")), cvc::Voltage(0));
    assert_eq!(sim_of(net("Y")), cvc::Voltage(1200));

    let report = run_fixture(json);
    assert!(report.error_records.is_empty());
}

#[test]
fn nmos_conducting_with_no_gate_source_error() {
    let json = r#"{
        "nets": ["GND", "VDD"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "nmos", "tag": "Nmos", "vth": 300, "max_vds": 2000 }
        ],
        "devices": [
            { "model": "nmos", "source": "GND", "gate": "VDD", "drain": "VDD", "bulk": "GND" }
        ]
    }"#;
    let report = run_fixture(json);
    assert!(!report.error_records.iter().any(|r| r.kind == ErrorKind::NmosGateSource));
    assert!(!report.error_records.iter().any(|r| r.kind == ErrorKind::OvervoltageVds));
}

#[test]
fn nmos_drain_source_overvoltage_is_reported_when_over_limit() {
    let json = r#"{
        "nets": ["GND", "VDD"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "nmos", "tag": "Nmos", "vth": 300, "max_vds": 900 }
        ],
        "devices": [
            { "model": "nmos", "source": "GND", "gate": "VDD", "drain": "VDD", "bulk": "GND" }
        ]
    }"#;
    let report = run_fixture(json);
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::OvervoltageVds));
}

#[test]
fn pmos_overvoltage_supply_reports_vbs_and_source_bulk() {
    let json = r#"{
        "nets": ["GND", "VDD", "HI"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 },
            { "net": "HI", "min": 1800, "sim": 1800, "max": 1800 }
        ],
        "models": [
            { "name": "pmos", "tag": "Pmos", "vth": -300, "max_vbs": 400 }
        ],
        "devices": [
            { "model": "pmos", "source": "HI", "gate": "GND", "drain": "VDD", "bulk": "VDD" }
        ]
    }"#;
    let report = run_fixture(json);
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::OvervoltageVbs));
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::PmosSourceBulk));
    // each (circuit, device, kind) triple is reported once, not duplicated.
    let vbs_count = report.error_records.iter().filter(|r| r.kind == ErrorKind::OvervoltageVbs).count();
    assert_eq!(vbs_count, 1);
}

#[test]
fn floating_gate_with_leak_path_reports_floating_input() {
    let json = r#"{
        "nets": ["GND", "VDD", "FLOAT", "Y"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "nmos", "tag": "Nmos", "vth": 300 }
        ],
        "devices": [
            { "model": "nmos", "source": "GND", "gate": "FLOAT", "drain": "Y", "bulk": "GND" }
        ]
    }"#;
    let report = run_fixture(json);
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::FloatingInput));
}

#[test]
fn forward_biased_diode_between_power_rails_is_reported() {
    let json = r#"{
        "nets": ["GND", "VDD"],
        "power": [
            { "net": "GND", "min": 0, "sim": 0, "max": 0 },
            { "net": "VDD", "min": 1200, "sim": 1200, "max": 1200 }
        ],
        "models": [
            { "name": "diode", "tag": "Diode" }
        ],
        "devices": [
            { "model": "diode", "source": "VDD", "gate": "VDD", "drain": "GND" }
        ]
    }"#;
    let report = run_fixture(json);
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::ForwardDiode));
}

#[test]
fn expected_value_check_passes_at_declared_voltage_and_fails_off_by_one() {
    let ok = r#"{
        "nets": ["NET_X"],
        "power": [
            { "net": "NET_X", "min": 600, "sim": 600, "max": 600 }
        ],
        "models": [],
        "devices": []
    }"#;
    let report = run_fixture(ok);
    assert!(!report.error_records.iter().any(|r| r.kind == ErrorKind::ExpectedValue));

    let mut desc: CircuitDescription = serde_json::from_str(ok).unwrap();
    desc.power[0].sim = Some(601);
    let mut db = build_database(&desc).unwrap();
    db.nets[0].power.as_mut().unwrap().expected = Some(cvc::power::Expected { min: None, sim: Some(cvc::Voltage(600)), max: None });
    let mut engine = Engine::new(db, CvcConfig::default());
    let report = engine.run().unwrap();
    assert!(report.error_records.iter().any(|r| r.kind == ErrorKind::ExpectedValue));
}
