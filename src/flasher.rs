//! MCU programming through the external programmer CLI.
//!
//! The tool runs as a child process bounded by a deadline. Its argument lists come from
//! configuration, with `{log}` and `{hex}` substituted per call.

use crate::channel::compile;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const FLASH_OK: &str = "Download verified successfully";
pub const PROTECTION_OK: &str = "Option Bytes successfully programmed";
pub const UID_PATTERN: &str =
    r"^[0-9]{2}:[0-9]{2}:[0-9]{2}:[0-9]{3}\s0x1FFF7A10\s:\s([A-F0-9]{8})\s([A-F0-9]{8})\s([A-F0-9]{8})\s*([A-F0-9]{8})\s*$";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOG_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlasherConfig {
    pub program: PathBuf,
    pub timeout_ms: u64,
    pub log_dir: PathBuf,
    pub flash_args: Vec<String>,
    pub protection_args: Vec<String>,
    pub read_uid_args: Vec<String>,
}

fn split(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(
                "/opt/STMicroelectronics/STM32Cube/STM32CubeProgrammer/bin/STM32_Programmer_CLI",
            ),
            timeout_ms: 25_000,
            log_dir: PathBuf::from("./logs"),
            flash_args: split(
                "-log {log} -q -c port=SWD mode=UR freq=4000 -rdu -e all -d {hex} 0x08000000 -v",
            ),
            protection_args: split("-log {log} -q -c port=SWD mode=UR freq=4000 -ob rdp=0x1"),
            read_uid_args: split("-log {log} -c port=SWD mode=UR freq=4000 -rdu -r32 0x1FFF7A10 0x10"),
        }
    }
}

/// What a bounded child run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exited_ok: bool,
    pub timed_out: bool,
    /// Non-empty stdout lines, trimmed.
    pub output: Vec<String>,
}

impl ProcessOutput {
    pub fn contains(&self, marker: &str) -> bool {
        self.output.iter().any(|line| line.contains(marker))
    }
}

/// Runs `program`, killing it once `timeout` elapses.
pub fn run_bounded(program: &Path, args: &[String], timeout: Duration) -> Result<ProcessOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| Error::Flash(format!("cannot start {}: {err}", program.display())))?;

    let reader = child.stdout.take().map(|stdout| {
        std::thread::spawn(move || {
            BufReader::new(stdout)
                .lines()
                .map_while(std::result::Result::ok)
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .inspect(|line| debug!("{line}"))
                .collect::<Vec<_>>()
        })
    });

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            error!(program = %program.display(), ?timeout, "timeout raised, killing child");
            timed_out = true;
            child.kill()?;
            break child.wait()?;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let output = match reader {
        Some(handle) => handle.join().unwrap_or_default(),
        None => Vec::new(),
    };
    info!(program = %program.display(), code = ?status.code(), "child finished");
    Ok(ProcessOutput {
        exited_ok: status.success() && !timed_out,
        timed_out,
        output,
    })
}

/// Extracts the 96-bit UID (four words) from a programmer log.
pub fn parse_uid(log: &str) -> Result<Option<String>> {
    let pattern = compile(UID_PATTERN)?;
    Ok(log.lines().find_map(|line| {
        let caps = pattern.captures(line.trim_end())?;
        Some((1..=4).filter_map(|i| caps.get(i)).map(|m| m.as_str()).collect())
    }))
}

/// Programming operations the product steps need.
pub trait Programmer: Send {
    fn flash(&mut self, hex_file: &str) -> Result<bool>;
    fn read_memory_protection(&mut self) -> Result<bool>;
    /// `None` when the UID could not be read.
    fn read_uid(&mut self) -> Result<Option<String>>;
}

pub struct StLinkFlasher {
    config: FlasherConfig,
}

impl StLinkFlasher {
    pub fn new(config: FlasherConfig) -> Self {
        Self { config }
    }

    fn log_path(&self, subdir: &str, suffix: &str) -> Result<PathBuf> {
        let dir = self.config.log_dir.join(subdir);
        std::fs::create_dir_all(&dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Ok(dir.join(format!("{stamp}_{suffix}.log")))
    }

    fn run(&self, template: &[String], log: &Path, hex: &str) -> Result<ProcessOutput> {
        let args = expand_args(template, log, hex);
        run_bounded(
            &self.config.program,
            &args,
            Duration::from_millis(self.config.timeout_ms),
        )
    }
}

pub fn expand_args(template: &[String], log: &Path, hex: &str) -> Vec<String> {
    let log = log.display().to_string();
    template
        .iter()
        .map(|arg| arg.replace("{log}", &log).replace("{hex}", hex))
        .collect()
}

impl Programmer for StLinkFlasher {
    fn flash(&mut self, hex_file: &str) -> Result<bool> {
        let log = self.log_path("STLink_logs", "STLink_Flash")?;
        let out = self.run(&self.config.flash_args, &log, hex_file)?;
        let ok = out.contains(FLASH_OK);
        info!(hex_file, ok, "flash finished");
        Ok(ok)
    }

    fn read_memory_protection(&mut self) -> Result<bool> {
        let log = self.log_path("STLink_logs", "STLink_RMP")?;
        let out = self.run(&self.config.protection_args, &log, "")?;
        Ok(out.contains(PROTECTION_OK))
    }

    fn read_uid(&mut self) -> Result<Option<String>> {
        let log = self.log_path("ID_Logs", "STLink_readID")?;
        self.run(&self.config.read_uid_args, &log, "")?;
        std::thread::sleep(LOG_SETTLE);
        let bytes = match std::fs::read(&log) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(log = %log.display(), error = %err, "programmer log missing");
                return Ok(None);
            }
        };
        let uid = parse_uid(&String::from_utf8_lossy(&bytes))?;
        match &uid {
            Some(uid) => info!("UID : {uid}"),
            None => error!("couldn't find UID-96"),
        }
        Ok(uid)
    }
}
