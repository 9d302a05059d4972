//! Perform and check functions of the BASE catalog.
//!
//! Perform functions leave the jig lines they touched in their resting state before
//! returning. Checks only read the step value, fill in the online report and ping the
//! operator hooks.

use super::serial_number::generate;
use super::{LabelRequest, Rig};
use crate::boot::BootState;
use crate::ioboard::{Gpio, IoBoard};
use crate::mcu::{CommandResult, McuCommand, Sensor, SomPin};
use crate::recorder::Destinations;
use crate::sbc::{provision_pattern, script_passed, SbcIdentity, SbcScript, WIFI_DISABLED};
use crate::sequencer::{default_check, OnlineReport, TestContext};
use crate::{Error, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::Link;

const UID_LEN: usize = 32;
const EXTERNAL_GPIOS: [Gpio; 6] = [Gpio::Gp0, Gpio::Gp1, Gpio::Gp2, Gpio::Gp3, Gpio::Gp4, Gpio::Gp5];
const CMD_EL_PERIOD: Duration = Duration::from_millis(500);

/// Key under which the online record travels from GET_SECURITY_KEYS to SEND_KEYS.
pub const ONLINE_RECORD_KEY: &str = "online_test_results";

fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| Error::Parse(format!("step value: {err}")))
}

fn data_of(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(|result| result.get("data"))
        .is_some_and(default_check)
}

fn log_command(label: &str, result: &CommandResult<bool>) {
    if result.success {
        info!("{label} OK");
    } else {
        error!("{label} fail : {:?}", result.raw);
    }
}

pub fn power_supply(rig: &mut Rig, _: &mut TestContext, cancel: &AtomicBool) -> Result<Value> {
    info!("Enable POE...");
    rig.io.write_gpio(Gpio::EnPowerPoe, true)?;
    settle(rig.settings.delays.poe_settle_ms);

    rig.io.write_gpios(&[
        (Gpio::SelectPairVoltMeas, false),
        (Gpio::SelectTargetVoltMeas, false),
        (Gpio::EnSwa, true),
    ])?;

    let long = Duration::from_millis(rig.limits.window_ms);
    let short = Duration::from_millis(rig.limits.window_3v3_ms);
    let rails = [
        ("5V", [true, false, false], long),
        ("3V3", [true, true, false], short),
        ("3V3_RADAR", [false, true, false], short),
    ];
    let mut measures = Map::new();
    for (rail, [a0, a1, a2], window) in rails {
        info!("Measure {rail}");
        rig.io
            .write_gpios(&[(Gpio::A0Swa, a0), (Gpio::A1Swa, a1), (Gpio::A2Swa, a2)])?;
        settle(100);
        let volts = rig.measure_voltage(window, cancel)?;
        measures.insert(rail.to_string(), json!(volts));
    }

    rig.io.write_gpios(&[
        (Gpio::SelectTargetVoltMeas, false),
        (Gpio::EnSwa, false),
        (Gpio::EnPowerPoe, false),
    ])?;
    Ok(Value::Object(measures))
}

pub fn check_power_supply(
    rig: &mut Rig,
    value: &Value,
    _: &mut TestContext,
    _: &mut OnlineReport,
) -> Result<bool> {
    let limits = &rig.limits;
    let windows = [
        ("5V", limits.v5_min, limits.v5_max),
        ("3V3", limits.v3v3_min, limits.v3v3_max),
        ("3V3_RADAR", limits.radar_min, limits.radar_max),
    ];
    let mut correct = true;
    for (rail, min, max) in windows {
        let Some(volts) = value.get(rail).and_then(Value::as_f64) else {
            error!("no measure received for {rail}");
            return Ok(false);
        };
        info!("{rail} measured : {volts}");
        if !(min < volts && volts < max) {
            error!("Wrong voltage for {rail} !");
            correct = false;
        }
    }
    Ok(correct)
}

pub fn read_id(rig: &mut Rig, context: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.io.write_gpio(Gpio::EnPowerPoe, true)?;
    rig.io.write_gpio(Gpio::EnProgStm, true)?;
    settle(rig.settings.delays.prog_settle_ms);

    let uid = rig.programmer.read_uid()?.unwrap_or_default();
    info!("UID : {uid}");
    context.set("UID", uid.as_str());
    Ok(if uid.len() == UID_LEN { json!(uid) } else { json!(false) })
}

pub fn flash_st(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    settle(1_000);
    let firmware = rig.settings.stm32_firmware.clone();
    let flashed = rig.programmer.flash(&firmware)?;
    rig.io.write_gpio(Gpio::EnProgStm, false)?;

    rig.io.write_gpio(Gpio::EnPowerPoe, false)?;
    settle(rig.settings.delays.power_cycle_off_ms);
    rig.io.write_gpio(Gpio::EnPowerPoe, true)?;
    settle(rig.settings.delays.power_cycle_on_ms);
    Ok(json!(flashed))
}

/// Powers the SBC and starts the background boot; later steps join it.
pub fn init_som(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.io.write_gpio(Gpio::EnPowerPoe, true)?;
    rig.io
        .write_gpios(&[(Gpio::EnBootCm4, false), (Gpio::EnUartCm4, true)])?;
    rig.boot.start()?;
    Ok(json!(true))
}

fn heat_sensors(rig: &Rig) -> Vec<Sensor> {
    if rig.settings.pod_version.has_extra_heat_sensors() {
        Sensor::ALL.to_vec()
    } else {
        vec![Sensor::One, Sensor::Three]
    }
}

pub fn heat_sensor(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    settle(100);
    let mut results = Map::new();
    for sensor in heat_sensors(rig) {
        let result = rig.mcu.run(McuCommand::Heat(sensor))?;
        info!("HEAT_{} : {:?}", sensor.number(), result.raw);
        results.insert(format!("HEAT_{}", sensor.number()), to_value(&result)?);
    }
    rig.uart_stm32(false)?;
    Ok(Value::Object(results))
}

pub fn check_heat_sensor(
    rig: &mut Rig,
    value: &Value,
    _: &mut TestContext,
    _: &mut OnlineReport,
) -> Result<bool> {
    let fitted = heat_sensors(rig);
    let mut all_ok = true;
    for sensor in Sensor::ALL {
        let n = sensor.number();
        if !fitted.contains(&sensor) {
            info!("Pod {}, skipping check HEAT_{n}", rig.settings.pod_version);
            continue;
        }
        let ok = data_of(value, &format!("HEAT_{n}"));
        if ok {
            info!("HEAT_{n} OK");
        } else {
            error!("HEAT_{n} fail");
            all_ok = false;
        }
        rig.hooks.report_sensor(&format!("heat{n}"), ok);
    }
    Ok(all_ok)
}

pub fn tof_sensor(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    settle(200);
    let mut results = Map::new();
    for sensor in Sensor::ALL {
        let result = rig.mcu.run(McuCommand::Tof(sensor))?;
        results.insert(format!("TOF_{}", sensor.number()), to_value(&result)?);
    }
    rig.uart_stm32(false)?;
    Ok(Value::Object(results))
}

pub fn check_tof_sensor(
    rig: &mut Rig,
    value: &Value,
    _: &mut TestContext,
    _: &mut OnlineReport,
) -> Result<bool> {
    let mut all_ok = true;
    for sensor in Sensor::ALL {
        let n = sensor.number();
        let ok = data_of(value, &format!("TOF_{n}"));
        if ok {
            info!("TOF_{n} OK");
        } else {
            error!("TOF_{n} fail");
            all_ok = false;
        }
        rig.hooks.report_sensor(&format!("tof{n}"), ok);
    }
    Ok(all_ok)
}

pub fn dac_i2c(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    settle(100);
    let dac1 = rig.mcu.run(McuCommand::Dac1)?;
    log_command("DAC1", &dac1);
    let dac2 = rig.mcu.run(McuCommand::Dac2)?;
    log_command("DAC2", &dac2);
    rig.uart_stm32(false)?;
    Ok(json!([to_value(&dac1)?, to_value(&dac2)?]))
}

pub fn check_dac_i2c(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    let Some(results) = value.as_array() else {
        error!("no data received");
        return Ok(false);
    };
    Ok(!results.is_empty()
        && results
            .iter()
            .all(|result| result.get("data").is_some_and(default_check)))
}

/// Operator confirms the shutter toggles between white and transparent.
pub fn check_window(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    settle(100);
    rig.mcu.run(McuCommand::ShutterOn)?;
    settle(200);
    let answer = rig.hooks.ask_operator(
        "Check shutter",
        "Is the shutter toggle between white and transparent ?",
    );
    rig.mcu.run(McuCommand::ShutterOff)?;
    rig.uart_stm32(false)?;
    Ok(json!(answer))
}

pub fn radar_status_clear(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    info!("Setting plate in front of Radar...");
    rig.io
        .write_gpios(&[(Gpio::EnUartStm32, true), (Gpio::CmdEl, true)])?;
    settle(200);

    let square_wave = rig.mcu.run(McuCommand::RadarSquareWave)?;
    let noise = rig.mcu.run(McuCommand::RadarNoise)?;
    let no_motion = rig.mcu.run(McuCommand::RadarNoMotion)?;

    rig.io.write_gpio(Gpio::CmdEl, false)?;
    rig.uart_stm32(false)?;
    Ok(json!({
        "SquareWave": to_value(&square_wave)?,
        "Noise": to_value(&noise)?,
        "NoMotion": to_value(&no_motion)?,
    }))
}

/// Only the no-motion reading decides the step.
pub fn check_radar_clear(rig: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    info!("Radar result: {value}");
    let ok = data_of(value, "NoMotion");
    if !ok {
        rig.hooks.report_sensor("radar", false);
    }
    Ok(ok)
}

/// Toggles the electromagnet every half second until `done` is raised or `count`
/// toggles went by.
fn toggle_cmd_el(io: &mut IoBoard<Link>, count: u32, done: &AtomicBool, cancel: &AtomicBool) -> Result<()> {
    let mut level = false;
    for _ in 0..count {
        if done.load(Ordering::SeqCst) || cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        thread::sleep(CMD_EL_PERIOD);
        if done.load(Ordering::SeqCst) {
            return Ok(());
        }
        io.write_gpio(Gpio::CmdEl, level)?;
        level = !level;
    }
    error!("Timeout raised for radar motion !");
    Ok(())
}

pub fn radar_status_movement(rig: &mut Rig, _: &mut TestContext, cancel: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    settle(200);

    let result = if rig.settings.use_handwave {
        rig.hooks
            .ask_operator("Radar Motion", "Wave a hand in front of the radar");
        rig.mcu.run(McuCommand::RadarMotion)?
    } else {
        let count = rig.settings.radar_toggle_count;
        let done = AtomicBool::new(false);
        let Rig { io, mcu, .. } = &mut *rig;
        let (motion, toggled) = thread::scope(|scope| {
            let toggler = scope.spawn(|| toggle_cmd_el(io, count, &done, cancel));
            let motion = mcu.run(McuCommand::RadarMotion);
            done.store(true, Ordering::SeqCst);
            let toggled = toggler
                .join()
                .unwrap_or_else(|_| Err(Error::Cancelled("CMD_EL toggle thread panicked".into())));
            (motion, toggled)
        });
        toggled?;
        motion?
    };

    rig.uart_stm32(false)?;
    to_value(&result)
}

pub fn check_radar_movement(
    rig: &mut Rig,
    value: &Value,
    _: &mut TestContext,
    _: &mut OnlineReport,
) -> Result<bool> {
    let ok = value.get("data").is_some_and(default_check);
    if ok {
        debug!("Radar Motion OK");
    } else {
        error!("Radar Motion KO : {value}");
    }
    rig.hooks.report_sensor("radar", ok);
    Ok(ok)
}

fn read_external_gpios(io: &mut IoBoard<Link>) -> Result<Vec<bool>> {
    EXTERNAL_GPIOS.iter().map(|gpio| io.read_gpio(*gpio)).collect()
}

/// Lines idle high (5 V); the MCU driving them pulls them low.
pub fn external_io(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    info!("Enable 5V RJ45...");
    rig.io
        .write_gpios(&[(Gpio::En5vRj45Io, true), (Gpio::EnUartStm32, true)])?;
    settle(100);

    info!("Set GPIOs OFF");
    rig.mcu.set_external_gpios(false)?;
    settle(100);
    let off = read_external_gpios(&mut rig.io)?;
    debug!("measures GPIOs OFF : {off:?}");

    info!("Set GPIOs ON");
    rig.mcu.set_external_gpios(true)?;
    settle(100);
    let on = read_external_gpios(&mut rig.io)?;
    debug!("measures GPIOs ON : {on:?}");

    rig.mcu.set_external_gpios(false)?;
    rig.io
        .write_gpios(&[(Gpio::En5vRj45Io, false), (Gpio::EnUartStm32, false)])?;
    Ok(json!({ "OFF": off, "ON": on }))
}

pub fn check_external_io(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    let levels = |key: &str| -> Option<Vec<bool>> {
        value
            .get(key)?
            .as_array()?
            .iter()
            .map(Value::as_bool)
            .collect()
    };
    let (Some(off), Some(on)) = (levels("OFF"), levels("ON")) else {
        error!("No data received !");
        return Ok(false);
    };
    if off.iter().any(|level| !level) {
        error!("Get 0 on a gpio OFF");
        return Ok(false);
    }
    if on.iter().any(|level| *level) {
        error!("Get 1 on a gpio ON");
        return Ok(false);
    }
    Ok(true)
}

fn require_boot(rig: &mut Rig) -> Result<()> {
    match rig.boot_if_needed()? {
        BootState::Booted => Ok(()),
        state => Err(Error::UnexpectedResponse(format!("SBC not booted ({state})"))),
    }
}

pub fn som_to_st(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    require_boot(rig)?;

    if rig.settings.test_led_rj45 {
        rig.sbc().run_script(SbcScript::Leds)?;
        rig.hooks.ask_operator("LEDs Test", "Stop LEDs test ?");
        rig.sbc().cancel_script()?;
    }

    rig.sbc().run_script(SbcScript::WdgStm)?;
    settle(800);
    let wdg_stm = rig.mcu.run(McuCommand::WdgStm)?;
    rig.sbc().cancel_script()?;
    info!("WDG_STM : {:?}", wdg_stm.raw);
    settle(100);

    rig.uart_stm32(false)?;
    to_value(&wdg_stm)
}

/// Passes on the `data` field of a single console result.
pub fn check_command_data(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    info!("{value}");
    Ok(value.get("data").is_some_and(default_check))
}

pub fn st_to_som(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    require_boot(rig)?;

    let mut outputs = Map::new();
    info!("Check WDG_SOM...");
    rig.mcu.run(McuCommand::WdgSomOn)?;
    settle(100);
    let wdg_som = rig.sbc().run_script(SbcScript::WdgSom)?;
    outputs.insert("WDG_SOM".to_string(), json!(wdg_som));
    rig.mcu.run(McuCommand::WdgSomOff)?;

    for pin in SomPin::ALL {
        let key = format!("GPIO_{}", pin.number());
        info!("Check {key}...");
        rig.mcu.run(McuCommand::SomGpio { pin, on: true })?;
        settle(100);
        let output = rig.sbc().run_script(SbcScript::PinTest(pin))?;
        outputs.insert(key, json!(output));
        rig.mcu.run(McuCommand::SomGpio { pin, on: false })?;
    }

    rig.uart_stm32(false)?;
    Ok(Value::Object(outputs))
}

pub fn check_st_to_som(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    let keys = std::iter::once("WDG_SOM".to_string())
        .chain(SomPin::ALL.iter().map(|pin| format!("GPIO_{}", pin.number())));
    for key in keys {
        let passed = value.get(&key).and_then(Value::as_str).is_some_and(script_passed);
        if !passed {
            debug!("{key} failed!");
            return Ok(false);
        }
    }
    info!("All gpio correct");
    Ok(true)
}

pub fn flash_final_firmware(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.io.write_gpio(Gpio::EnProgStm, true)?;
    settle(100);

    info!("Flashing final firmware...");
    let firmware = rig.settings.stm32_final_firmware.clone();
    let flashed = rig.programmer.flash(&firmware)?;
    settle(300);
    info!("Activating ReadMemoryProtection...");
    let protected = rig.programmer.read_memory_protection()?;

    rig.io.write_gpio(Gpio::EnProgStm, false)?;
    Ok(json!(flashed && protected))
}

pub fn take_picture(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    rig.uart_stm32(true)?;
    require_boot(rig)?;
    settle(75);

    let mut sbc = rig.sbc();
    let capture = sbc.take_image()?;
    let check = sbc.run_script(SbcScript::CheckImage)?;
    Ok(json!([capture, check]))
}

pub fn check_take_picture(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    let image_ok = Regex::new(r"Image\s*ok").map_err(|err| Error::Parse(err.to_string()))?;
    Ok(value
        .get(1)
        .and_then(Value::as_str)
        .is_some_and(|check| image_ok.is_match(check)))
}

/// Raw output of the ID script, or null when it never printed a complete identity.
pub fn get_security_keys(rig: &mut Rig, _: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    require_boot(rig)?;
    info!("Start CM4 ID script...");
    let read = rig.sbc().read_identity();
    match read {
        Ok((raw, _)) => Ok(json!(raw)),
        Err(Error::Parse(reason)) => {
            error!("CM4 ID script: {reason}");
            Ok(Value::Null)
        }
        Err(err) => Err(err),
    }
}

fn pod_serial(rig: &Rig) -> Result<String> {
    if let Some(serial) = &rig.settings.retry_existing_serial {
        warn!("Use of existing serial number...");
        return Ok(serial.clone());
    }
    info!("Generate new serial");
    let sequential = rig.counter().read()?;
    generate(
        rig.settings.pod_version,
        &rig.settings.hardware_version,
        chrono::Local::now().date_naive(),
        sequential,
    )
}

pub fn check_security_keys(
    rig: &mut Rig,
    value: &Value,
    context: &mut TestContext,
    online: &mut OnlineReport,
) -> Result<bool> {
    let Some(raw) = value.as_str() else {
        error!("No data provided");
        return Ok(false);
    };

    online.set("PodType", rig.settings.pod_version.as_str());
    let serial = pod_serial(rig)?;
    online.set("PodSerial", serial.as_str());
    context.set("pod_serial", serial.as_str());

    let identity = match SbcIdentity::parse(raw) {
        Ok(identity) => identity,
        Err(err) => {
            error!("{err}");
            return Ok(false);
        }
    };
    online.set_in("SOM", "CPUSerial", identity.cpu_serial.as_str());
    online.set_in("SOM", "EthernetMACAddress", identity.ethernet_mac.as_str());
    online.set_in("SOM", "WifiMACAddress", identity.wifi_mac.as_str());
    online.set("WifiEnabled", identity.wifi_enabled());
    online.set_in("TPM", "RegistrationID", identity.registration_id.as_str());
    online.set_in("TPM", "EndorsementKey", identity.endorsement_key.as_str());
    online.set_in("CAMERA", "CamSerial", identity.cam_serial.as_str());

    context.set("cpu_serial", identity.cpu_serial.as_str());
    context.set("ethernet_mac_address", identity.ethernet_mac.as_str());
    context.set("wifi_mac_address", identity.wifi_mac.as_str());
    context.set("registration_id", identity.registration_id.as_str());
    context.set("endorsment_key", identity.endorsement_key.as_str());
    context.set("cam_serial", identity.cam_serial.as_str());
    context.set(ONLINE_RECORD_KEY, online.to_value());
    Ok(true)
}

/// Provisions the pod under its serial, then shuts the SBC down.
pub fn pod_provision(rig: &mut Rig, context: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    let serial = context
        .get_str("pod_serial")
        .ok_or_else(|| Error::NotFound("pod_serial in test context".into()))?
        .to_string();
    let mut sbc = rig.sbc();
    let output = sbc.provision(&serial)?;
    sbc.shutdown()?;
    Ok(json!(output))
}

pub fn check_pod_provision(
    _: &mut Rig,
    value: &Value,
    context: &mut TestContext,
    _: &mut OnlineReport,
) -> Result<bool> {
    let (Some(output), Some(serial)) = (value.as_str(), context.get_str("pod_serial")) else {
        error!("No data provided");
        return Ok(false);
    };
    Ok(provision_pattern(serial)?.is_match(output))
}

/// True once the recording server accepted the online record, otherwise the
/// delivery error as text.
pub fn send_keys(rig: &mut Rig, context: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    info!("Send data to the recording server...");
    let Some(recorder) = &rig.recorder else {
        warn!("recorder disabled, keys not sent");
        return Ok(Value::Null);
    };
    let Some(record) = context.get(ONLINE_RECORD_KEY).cloned() else {
        error!("no online record in test context");
        return Ok(Value::Null);
    };
    match recorder.record_and_wait(Arc::new(record), Destinations::ONLINE, rig.recorder_wait) {
        Ok(()) => {
            debug!("ONLINE database record saved");
            Ok(json!(true))
        }
        Err(err) => {
            error!("Couldn't record in ONLINE database : {err}");
            Ok(json!(err.to_string()))
        }
    }
}

pub fn check_send_keys(_: &mut Rig, value: &Value, _: &mut TestContext, _: &mut OnlineReport) -> Result<bool> {
    Ok(value == &Value::Bool(true))
}

pub fn print_label(rig: &mut Rig, context: &mut TestContext, _: &AtomicBool) -> Result<Value> {
    if rig.settings.retry_existing_serial.is_some() {
        warn!("Skipping printing because of existing POD serial...");
        return Ok(json!(true));
    }
    let serial = context
        .get_str("pod_serial")
        .ok_or_else(|| Error::NotFound("pod_serial in test context".into()))?;
    let wifi_enabled = context.get_str("wifi_mac_address") != Some(WIFI_DISABLED);
    let label = LabelRequest::new(
        serial,
        &rig.settings.hardware_version,
        wifi_enabled,
        rig.settings.pod_version,
    );
    let printed = rig.printer.print(&label)?;
    if printed {
        rig.counter().increment()?;
    }
    Ok(json!(printed))
}
