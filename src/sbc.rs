//! Serial console of the SBC under test.

use crate::channel::{compile, CommandChannel, LineProtocol, Request, Response};
use crate::mcu::SomPin;
use crate::serial::{SerialLink, Transcript};
use crate::{Error, Result, SBC_TARGET};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

pub const PROMPT_PATTERNS: [&str; 2] = [r"pego@CM4:~", r"pego@p[0-9]{15}:~\$"];
pub const LOGIN_PATTERNS: [&str; 2] = [r"CM4 login:", r"p[0-9]{15} login:"];
pub const KERNEL_PANIC: &str = "Kernel panic:";
pub const MARKER_FILE: &str = "CM4_ID_script.sh";
pub const WIFI_DISABLED: &str = "WIFI NOT ENABLED";

const MAC: &str = r"[0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5}";
const SCRIPT_PASS: &str = "Succeeded";
const SCRIPT_FAIL: &str = "Test failed:";

/// Script timings, in milliseconds unless named otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbcTimeouts {
    pub take_image_ms: u64,
    pub take_image_attempts: u32,
    pub take_image_read_retries: u32,
    pub check_image_ms: u64,
    pub wdg_stm_ms: u64,
    pub wdg_som_ms: u64,
    pub pin_script_ms: u64,
    pub provision_ms: u64,
    pub provision_attempts: u32,
    pub leds_ms: u64,
    pub id_script_ms: u64,
    pub id_script_attempts: u32,
    pub id_read_retries: u32,
    pub cancel_ms: u64,
    pub shutdown_ms: u64,
    pub shutdown_delay_ms: u64,
}

impl Default for SbcTimeouts {
    fn default() -> Self {
        Self {
            take_image_ms: 10_000,
            take_image_attempts: 2,
            take_image_read_retries: 6,
            check_image_ms: 45_000,
            wdg_stm_ms: 1_000,
            wdg_som_ms: 11_000,
            pin_script_ms: 11_000,
            provision_ms: 30_000,
            provision_attempts: 2,
            leds_ms: 1_000,
            id_script_ms: 5_000,
            id_script_attempts: 3,
            id_read_retries: 10,
            cancel_ms: 1_000,
            shutdown_ms: 1_000,
            shutdown_delay_ms: 6_000,
        }
    }
}

/// Diagnostic scripts installed on the SBC image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbcScript {
    CheckImage,
    WdgStm,
    WdgSom,
    PinTest(SomPin),
    Leds,
}

impl SbcScript {
    pub fn command(&self) -> String {
        match self {
            SbcScript::CheckImage => "python3 ./PI_Tests/image_check.py".to_string(),
            SbcScript::WdgStm => "sudo ./PI_Tests/test_wdg_stm.sh".to_string(),
            SbcScript::WdgSom => "sudo ./PI_Tests/test_wdg_som.sh".to_string(),
            SbcScript::PinTest(pin) => format!("sudo ./PI_Tests/test_pin_{}.sh", pin.number()),
            SbcScript::Leds => "sudo ./PI_Tests/LEDs_test.sh".to_string(),
        }
    }

    pub fn end_flags(&self) -> &'static [&'static str] {
        match self {
            SbcScript::CheckImage => &[
                "Image ok",
                "Too many black pixels",
                "Too many white pixels",
                "raspberrypi:~",
            ],
            SbcScript::WdgSom | SbcScript::PinTest(_) => &[SCRIPT_PASS, SCRIPT_FAIL],
            SbcScript::WdgStm | SbcScript::Leds => &[],
        }
    }

    pub fn timeout(&self, timeouts: &SbcTimeouts) -> Duration {
        Duration::from_millis(match self {
            SbcScript::CheckImage => timeouts.check_image_ms,
            SbcScript::WdgStm => timeouts.wdg_stm_ms,
            SbcScript::WdgSom => timeouts.wdg_som_ms,
            SbcScript::PinTest(_) => timeouts.pin_script_ms,
            SbcScript::Leds => timeouts.leds_ms,
        })
    }
}

/// Whether a pass/fail script printed its pass marker.
pub fn script_passed(output: &str) -> bool {
    output.contains(SCRIPT_PASS)
}

/// Identity block printed by the ID script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SbcIdentity {
    pub cpu_serial: String,
    pub ethernet_mac: String,
    /// A MAC address, or [`WIFI_DISABLED`].
    pub wifi_mac: String,
    pub registration_id: String,
    pub endorsement_key: String,
    pub cam_serial: String,
}

impl SbcIdentity {
    pub fn wifi_enabled(&self) -> bool {
        self.wifi_mac != WIFI_DISABLED
    }

    /// Extracts every field from the concatenated script output.
    pub fn parse(output: &str) -> Result<Self> {
        Ok(Self {
            cpu_serial: capture(output, r"CPU_Serial\s*:\s*([0-9a-fA-F]{16})", "CPU_Serial")?,
            // The script prints this label misspelled.
            ethernet_mac: capture(
                output,
                &format!(r"Ethermet_mac_address\s*:\s*({MAC})"),
                "Ethermet_mac_address",
            )?,
            wifi_mac: capture(
                output,
                &format!(r"Wifi_mac_address\s*:\s*({MAC}|{WIFI_DISABLED})"),
                "Wifi_mac_address",
            )?,
            registration_id: capture(
                output,
                r"Registration_ID\s*:\s*([0-9a-zA-Z]{52})",
                "Registration_ID",
            )?,
            endorsement_key: capture(output, r"Endorsment_Key\s*:\s*(.{424})", "Endorsment_Key")?,
            cam_serial: capture(output, r"Cam_serial\s*:\s*([0-9]{8})", "Cam_serial")?,
        })
    }
}

fn capture(text: &str, pattern: &str, field: &str) -> Result<String> {
    compile(pattern)?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::Parse(format!("{field} missing from SBC identity")))
}

pub fn provision_pattern(serial: &str) -> Result<Regex> {
    compile(&format!(
        r"Pod\s*provision\s*script\s*finished\s*with\s*Serial\s*{}",
        regex::escape(serial)
    ))
}

pub fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p)).collect()
}

pub fn sbc_protocol() -> LineProtocol {
    LineProtocol {
        line_ending: "\n",
        failure_markers: Vec::new(),
        transcript: Transcript::Logged(SBC_TARGET),
    }
}

pub struct SbcClient<L> {
    channel: CommandChannel<L>,
    timeouts: SbcTimeouts,
}

/// Shared between the boot supervisor and the sequencer steps.
pub type SharedSbc<L> = Arc<Mutex<SbcClient<L>>>;

pub fn lock_sbc<L>(sbc: &SharedSbc<L>) -> MutexGuard<'_, SbcClient<L>> {
    match sbc.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<L: SerialLink> SbcClient<L> {
    pub fn new(link: L, attempts: u32, default_timeout: Duration, timeouts: SbcTimeouts) -> Self {
        Self {
            channel: CommandChannel::new(link, sbc_protocol(), default_timeout, attempts),
            timeouts,
        }
    }

    pub fn port_name(&self) -> String {
        self.channel.link_name()
    }

    pub fn timeouts(&self) -> &SbcTimeouts {
        &self.timeouts
    }

    /// Sends one shell line and returns the concatenated output.
    pub fn command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        end_flags: &[&str],
    ) -> Result<String> {
        let terminal = compile_all(end_flags)?;
        let mut request = Request::new(command, &terminal);
        request.timeout = timeout;
        let response = self.channel.send(&request)?;
        Ok(self.report(response))
    }

    /// Full control over the request, used by the login handshake.
    pub fn send(&mut self, request: &Request<'_>) -> Result<Response> {
        self.channel.send(request)
    }

    /// Reads console output without sending anything.
    pub fn read_until(
        &mut self,
        timeout: Duration,
        terminal: &[Regex],
        stop: Option<&AtomicBool>,
    ) -> Result<Vec<String>> {
        Ok(self.channel.read_until(timeout, terminal, stop)?.lines)
    }

    fn report(&self, response: Response) -> String {
        let output = response.concatenated();
        if response.lines.is_empty() {
            warn!(target: SBC_TARGET, "no data received");
        } else {
            debug!(target: SBC_TARGET, "returned: {output}");
        }
        output
    }

    pub fn run_script(&mut self, script: SbcScript) -> Result<String> {
        let timeout = script.timeout(&self.timeouts);
        self.command(&script.command(), Some(timeout), script.end_flags())
    }

    /// Captures a picture. The script is re-sent when no capture line showed up after
    /// the configured number of reads.
    pub fn take_image(&mut self) -> Result<String> {
        let command = "sudo ./PI_Tests/cam_test.sh";
        let captured = compile(r"Image\s*Captured")?;
        let mut terminal = vec![captured.clone()];
        terminal.extend(compile_all(&PROMPT_PATTERNS)?);
        let timeout = Duration::from_millis(self.timeouts.take_image_ms);
        let mut reads_left = self.timeouts.take_image_read_retries;
        let mut data = String::new();

        for attempt in 1..=self.timeouts.take_image_attempts.max(1) {
            debug!(target: SBC_TARGET, "TX: {command}");
            self.channel.write_raw(&format!("{command}\n"))?;
            while reads_left > 0 {
                let lines = self.channel.read_until(timeout, &terminal, None)?.lines;
                data.push_str(&lines.concat());
                if captured.is_match(&data) {
                    info!(target: SBC_TARGET, "image captured");
                    return Ok(data);
                }
                reads_left -= 1;
                debug!(target: SBC_TARGET, reads_left, "retry read");
            }
            warn!(target: SBC_TARGET, attempt, "retry cam_test.sh");
        }
        Ok(data)
    }

    /// Runs the ID script until its output parses.
    pub fn read_identity(&mut self) -> Result<(String, SbcIdentity)> {
        let command = "sudo ./CM4_ID_script.sh";
        let cam_serial = compile(r"Cam_serial\s*:\s*([0-9]{8})")?;
        let mut terminal = vec![cam_serial.clone()];
        terminal.extend(compile_all(&PROMPT_PATTERNS)?);
        let timeout = Duration::from_millis(self.timeouts.id_script_ms);
        let mut last_error = Error::Parse("SBC identity not received".into());

        for attempt in 1..=self.timeouts.id_script_attempts.max(1) {
            debug!(target: SBC_TARGET, "TX: {command}");
            self.channel.clear_input()?;
            self.channel.write_raw(&format!("{command}\n"))?;
            let mut output = String::new();
            for _ in 0..self.timeouts.id_read_retries.max(1) {
                let lines = self.channel.read_until(timeout, &terminal, None)?.lines;
                output.push_str(&lines.concat());
                if cam_serial.is_match(&output) {
                    break;
                }
            }
            match SbcIdentity::parse(&output) {
                Ok(identity) => {
                    info!(target: SBC_TARGET, "identity returned: {output}");
                    return Ok((output, identity));
                }
                Err(err) => {
                    error!(target: SBC_TARGET, attempt, error = %err, "retry CM4_ID_script");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Runs the provisioning script for `serial`, re-running it once more when the
    /// completion line is missing.
    pub fn provision(&mut self, serial: &str) -> Result<String> {
        let command = format!("sudo ./pod_provision.sh {serial}");
        let done = provision_pattern(serial)?;
        let mut terminal = vec![done.clone()];
        terminal.extend(compile_all(&PROMPT_PATTERNS)?);
        let timeout = Duration::from_millis(self.timeouts.provision_ms);
        let mut output = String::new();

        for _ in 0..self.timeouts.provision_attempts.max(1) {
            let request = Request::new(&command, &terminal).timeout(timeout);
            let response = self.channel.send(&request)?;
            output = self.report(response);
            if done.is_match(&output) {
                info!(target: SBC_TARGET, "provision OK");
                return Ok(output);
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(output)
    }

    /// Interrupts whatever runs in the foreground.
    pub fn cancel_script(&mut self) -> Result<String> {
        let timeout = Duration::from_millis(self.timeouts.cancel_ms);
        self.command("\x03", Some(timeout), &[r"\^C", PROMPT_PATTERNS[0]])
    }

    pub fn shutdown(&mut self) -> Result<()> {
        let timeout = Duration::from_millis(self.timeouts.shutdown_ms);
        self.command("sudo shutdown now", Some(timeout), &[])?;
        std::thread::sleep(Duration::from_millis(self.timeouts.shutdown_delay_ms));
        Ok(())
    }
}
