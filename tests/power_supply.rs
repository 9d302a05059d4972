mod common;

use common::{quick_config, Harness};
use podbench::ioboard::Gpio;
use podbench::product::steps::{check_power_supply, power_supply};
use podbench::sequencer::{OnlineReport, TestContext};
use std::sync::atomic::AtomicBool;

fn measure(harness: &Harness) -> (serde_json::Value, bool) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config(dir.path());
    config.power_supply.window_ms = 200;
    config.power_supply.window_3v3_ms = 150;
    let mut rig = harness.rig(&config);
    let mut context = TestContext::new();
    let cancel = AtomicBool::new(false);
    let value = power_supply(&mut rig, &mut context, &cancel).unwrap();
    let pass = check_power_supply(&mut rig, &value, &mut context, &mut OnlineReport::default()).unwrap();
    (value, pass)
}

#[test]
fn nominal_rails_pass() {
    let harness = Harness::new();
    let (value, pass) = measure(&harness);
    assert!(pass, "{value}");
    assert!((value["5V"].as_f64().unwrap() - 5.0).abs() < 1e-6);
    assert!((value["3V3"].as_f64().unwrap() - 3.3).abs() < 1e-6);
    assert!((value["3V3_RADAR"].as_f64().unwrap() - 3.3).abs() < 1e-6);

    let bench = harness.bench.lock();
    assert!(!bench.level(Gpio::EnPowerPoe));
    assert!(!bench.level(Gpio::EnSwa));
}

#[test]
fn over_voltage_fails() {
    let harness = Harness::new();
    harness.bench.lock().rail_5v = 6.0;
    let (value, pass) = measure(&harness);
    assert!(!pass);
    assert!((value["5V"].as_f64().unwrap() - 6.0).abs() < 1e-6);
}

#[test]
fn low_radar_rail_fails() {
    let harness = Harness::new();
    harness.bench.lock().rail_radar = 3.0;
    let (_, pass) = measure(&harness);
    assert!(!pass);
}
