mod common;

use common::{quick_config, Harness};
use podbench::boot::BootState;
use podbench::mcu::SomPin;
use podbench::product::steps::{
    check_external_io, check_security_keys, check_send_keys, check_st_to_som, get_security_keys,
    print_label, ONLINE_RECORD_KEY,
};
use podbench::product::{LabelPrinter, LabelRequest, Rig};
use podbench::sbc::WIFI_DISABLED;
use podbench::sequencer::{OnlineReport, TestContext};
use podbench::serial::fake::FakeSerialPort;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

const SERIAL: &str = "203031000000015";

fn identity_text(wifi: &str) -> String {
    format!(
        "CPU_Serial : 10000000abcdef01\r\nEthermet_mac_address : DC:A6:32:01:02:03\r\n\
         Wifi_mac_address : {wifi}\r\nRegistration_ID : {}\r\nEndorsment_Key : {}\r\n\
         Cam_serial : 12345678\r\n",
        "R".repeat(52),
        "K".repeat(424)
    )
}

/// Answers each print from a script and records the serials it saw.
#[derive(Clone, Default)]
struct ScriptedPrinter {
    answers: Arc<Mutex<VecDeque<bool>>>,
    printed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrinter {
    fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers.iter().copied().collect())),
            ..Self::default()
        }
    }

    fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap().clone()
    }
}

impl LabelPrinter for ScriptedPrinter {
    fn print(&mut self, label: &LabelRequest) -> podbench::Result<bool> {
        self.printed.lock().unwrap().push(label.serial.clone());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(true))
    }
}

fn rig_in(dir: &Path, harness: &Harness) -> Rig {
    let mut rig = harness.rig(&quick_config(dir));
    rig.settings.sequential_number_path = dir.join("sequential_number.txt");
    rig
}

fn check(
    f: fn(&mut Rig, &Value, &mut TestContext, &mut OnlineReport) -> podbench::Result<bool>,
    value: Value,
) -> bool {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    f(&mut rig, &value, &mut TestContext::new(), &mut OnlineReport::default()).unwrap()
}

#[test]
fn security_keys_fill_online_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    rig.settings.retry_existing_serial = Some(SERIAL.to_string());
    let mut context = TestContext::new();
    let mut online = OnlineReport::default();

    let value = json!(identity_text("DC:A6:32:01:02:04"));
    assert!(check_security_keys(&mut rig, &value, &mut context, &mut online).unwrap());

    let pod = online.pod();
    assert_eq!(pod["PodType"], "MAX");
    assert_eq!(pod["PodSerial"], SERIAL);
    assert_eq!(pod["WifiEnabled"], true);
    assert_eq!(pod["SOM"]["CPUSerial"], "10000000abcdef01");
    assert_eq!(pod["SOM"]["EthernetMACAddress"], "DC:A6:32:01:02:03");
    assert_eq!(pod["SOM"]["WifiMACAddress"], "DC:A6:32:01:02:04");
    assert_eq!(pod["TPM"]["RegistrationID"], "R".repeat(52));
    assert_eq!(pod["TPM"]["EndorsementKey"], "K".repeat(424));
    assert_eq!(pod["CAMERA"]["CamSerial"], "12345678");
    assert_eq!(context.get_str("pod_serial"), Some(SERIAL));
    assert_eq!(context.get(ONLINE_RECORD_KEY), Some(&online.to_value()));
}

#[test]
fn security_keys_without_wifi() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    rig.settings.retry_existing_serial = Some(SERIAL.to_string());
    let mut online = OnlineReport::default();

    let value = json!(identity_text(WIFI_DISABLED));
    assert!(check_security_keys(&mut rig, &value, &mut TestContext::new(), &mut online).unwrap());
    assert_eq!(online.pod()["WifiEnabled"], false);
    assert_eq!(online.pod()["SOM"]["WifiMACAddress"], WIFI_DISABLED);
}

#[test]
fn security_keys_generate_serial_from_counter() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    std::fs::write(&rig.settings.sequential_number_path, "15\n").unwrap();
    let mut context = TestContext::new();
    let mut online = OnlineReport::default();

    let value = json!(identity_text(WIFI_DISABLED));
    assert!(check_security_keys(&mut rig, &value, &mut context, &mut online).unwrap());
    let serial = context.get_str("pod_serial").unwrap();
    assert_eq!(serial.len(), 15);
    assert_eq!(&serial[8..14], "000015");
    assert_eq!(online.pod()["PodSerial"], serial);
}

#[test]
fn security_keys_reject_missing_data() {
    assert!(!check(check_security_keys, Value::Null));
}

#[test]
fn incomplete_identity_gives_null() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config(dir.path());
    config.sbc.timeouts.id_script_ms = 40;
    config.sbc.timeouts.id_read_retries = 2;
    config.sbc.timeouts.id_script_attempts = 2;
    let sbc = FakeSerialPort::with_responder(|_| {
        b"CPU_Serial : 10000000abcdef01\r\nCam_serial : 12345678\r\npego@CM4:~\r\n".to_vec()
    })
    .named("sim-sbc");
    let mut rig = Harness::new().rig_with_sbc(&config, sbc.clone());
    rig.boot.status().set(BootState::Booted);

    let value = get_security_keys(&mut rig, &mut TestContext::new(), &AtomicBool::new(false)).unwrap();
    assert_eq!(value, Value::Null);
    assert_eq!(sbc.writes().len(), 2);
}

#[test]
fn complete_identity_is_returned_raw() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config(dir.path());
    config.sbc.timeouts.id_script_ms = 40;
    config.sbc.timeouts.id_read_retries = 2;
    let text = identity_text(WIFI_DISABLED);
    let sbc = FakeSerialPort::with_responder(move |_| text.clone().into_bytes()).named("sim-sbc");
    let mut rig = Harness::new().rig_with_sbc(&config, sbc);
    rig.boot.status().set(BootState::Booted);

    let value = get_security_keys(&mut rig, &mut TestContext::new(), &AtomicBool::new(false)).unwrap();
    assert!(value.as_str().unwrap().contains("Cam_serial : 12345678"));
}

#[test]
fn label_advances_counter_only_when_printed() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    std::fs::write(&rig.settings.sequential_number_path, "41\n").unwrap();
    let printer = ScriptedPrinter::answering(&[false, true]);
    rig.printer = Box::new(printer.clone());
    let mut context = TestContext::new();
    context.set("pod_serial", SERIAL);
    let cancel = AtomicBool::new(false);

    assert_eq!(print_label(&mut rig, &mut context, &cancel).unwrap(), json!(false));
    assert_eq!(rig.counter().read().unwrap(), 41);

    assert_eq!(print_label(&mut rig, &mut context, &cancel).unwrap(), json!(true));
    assert_eq!(rig.counter().read().unwrap(), 42);
    assert_eq!(printer.printed(), vec![SERIAL.to_string(), SERIAL.to_string()]);
}

#[test]
fn existing_serial_skips_printing() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    std::fs::write(&rig.settings.sequential_number_path, "41\n").unwrap();
    rig.settings.retry_existing_serial = Some(SERIAL.to_string());
    let printer = ScriptedPrinter::answering(&[true]);
    rig.printer = Box::new(printer.clone());

    let value = print_label(&mut rig, &mut TestContext::new(), &AtomicBool::new(false)).unwrap();
    assert_eq!(value, json!(true));
    assert!(printer.printed().is_empty());
    assert_eq!(rig.counter().read().unwrap(), 41);
}

#[test]
fn label_needs_a_serial() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig_in(dir.path(), &Harness::new());
    rig.printer = Box::new(ScriptedPrinter::default());
    assert!(print_label(&mut rig, &mut TestContext::new(), &AtomicBool::new(false)).is_err());
}

#[test]
fn send_keys_passes_only_on_delivery() {
    assert!(check(check_send_keys, json!(true)));
    assert!(!check(check_send_keys, json!("ONLINE delivery failed: recording server returned 500")));
    assert!(!check(check_send_keys, Value::Null));
}

#[test]
fn external_io_levels() {
    let high = [true; 6];
    let low = [false; 6];
    assert!(check(check_external_io, json!({ "OFF": high, "ON": low })));

    let mut stuck_low = high;
    stuck_low[3] = false;
    assert!(!check(check_external_io, json!({ "OFF": stuck_low, "ON": low })));

    let mut stuck_high = low;
    stuck_high[0] = true;
    assert!(!check(check_external_io, json!({ "OFF": high, "ON": stuck_high })));

    assert!(!check(check_external_io, json!({ "OFF": high })));
}

fn som_outputs() -> Map<String, Value> {
    let mut outputs = Map::new();
    outputs.insert("WDG_SOM".to_string(), json!("Test WDG_SOM Succeeded"));
    for pin in SomPin::ALL {
        let key = format!("GPIO_{}", pin.number());
        outputs.insert(key.clone(), json!(format!("Test {key} Succeeded")));
    }
    outputs
}

#[test]
fn st_to_som_needs_every_pin() {
    assert!(check(check_st_to_som, Value::Object(som_outputs())));

    let mut missing = som_outputs();
    missing.remove("GPIO_23");
    assert!(!check(check_st_to_som, Value::Object(missing)));

    let mut failed = som_outputs();
    failed.insert("GPIO_25".to_string(), json!("Test failed: GPIO_25"));
    assert!(!check(check_st_to_som, Value::Object(failed)));
}
