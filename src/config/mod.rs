//! Station configuration, read from one TOML document.
//!
//! Every section is optional; missing keys take the built-in defaults. The SBC
//! password and the recording server token can come from the environment instead of
//! the file.

use crate::boot::BootSettings;
use crate::flasher::FlasherConfig;
use crate::mcu::McuTimeouts;
use crate::product::{PowerSupplyLimits, ProductSettings};
use crate::sbc::SbcTimeouts;
use crate::serial::{UsbId, FTDI_USB_IDS, IO_BOARD_USB_IDS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PODBENCH_CONFIG";
pub const PASSWORD_ENV: &str = "PODBENCH_SBC_PASSWORD";
pub const TOKEN_ENV: &str = "PODBENCH_RECORDER_TOKEN";
pub const DEFAULT_CONFIG_FILE: &str = "podbench.toml";
pub const DEFAULT_SERVER_URL: &str = "https://pego-pod-api.azurewebsites.net/Pod/AddPods";

fn usb_ids(ids: &[UsbId]) -> Vec<String> {
    ids.iter().map(UsbId::to_string).collect()
}

/// Parses the configured `vvvv:pppp` discovery ids.
pub fn parse_usb_ids(ids: &[String]) -> Result<Vec<UsbId>> {
    ids.iter().map(|id| id.parse()).collect()
}

/// `port` wins over discovery by `usb_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoBoardConfig {
    pub port: Option<String>,
    pub usb_ids: Vec<String>,
    pub timeout_ms: u64,
    pub attempts: u32,
}

impl Default for IoBoardConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_ids: usb_ids(&IO_BOARD_USB_IDS),
            timeout_ms: 1_000,
            attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McuConfig {
    pub port: Option<String>,
    pub usb_ids: Vec<String>,
    pub attempts: u32,
    pub timeout_ms: u64,
    pub timeouts: McuTimeouts,
}

impl Default for McuConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_ids: usb_ids(&FTDI_USB_IDS),
            attempts: crate::mcu::DEFAULT_ATTEMPTS,
            timeout_ms: 2_000,
            timeouts: McuTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbcConfig {
    pub port: Option<String>,
    pub usb_ids: Vec<String>,
    pub attempts: u32,
    pub timeout_ms: u64,
    pub timeouts: SbcTimeouts,
    pub boot: BootSettings,
}

impl Default for SbcConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_ids: usb_ids(&FTDI_USB_IDS),
            attempts: crate::sbc::DEFAULT_ATTEMPTS,
            timeout_ms: 2_000,
            timeouts: SbcTimeouts::default(),
            boot: BootSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltmeterConfig {
    pub port: Option<String>,
    pub usb_ids: Vec<String>,
}

impl Default for VoltmeterConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_ids: usb_ids(&FTDI_USB_IDS),
        }
    }
}

/// Where local records go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRecording {
    Disabled,
    /// A new timestamped file under `folder` at each start.
    Automatic { folder: PathBuf },
    File { path: PathBuf },
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub disabled: bool,
    pub local: LocalRecording,
    pub pretty: bool,
    /// Also enqueue each run report to the local destination.
    pub record_runs_locally: bool,
    pub server_url: Option<String>,
    /// Sent as `XApiKey`. Never logged.
    pub token: String,
    pub request_timeout_ms: u64,
    /// How long SEND_KEYS blocks on the server.
    pub wait_ms: u64,
    pub queue_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            local: LocalRecording::Automatic {
                folder: PathBuf::from("./records"),
            },
            pretty: true,
            record_runs_locally: false,
            server_url: Some(DEFAULT_SERVER_URL.to_string()),
            token: String::new(),
            request_timeout_ms: 20_000,
            wait_ms: 30_000,
            queue_capacity: crate::recorder::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl std::fmt::Debug for RecorderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderConfig")
            .field("disabled", &self.disabled)
            .field("local", &self.local)
            .field("pretty", &self.pretty)
            .field("record_runs_locally", &self.record_runs_locally)
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("wait_ms", &self.wait_ms)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub variant: String,
    pub skip: Vec<String>,
    pub step_delay_ms: u64,
    pub results_dir: PathBuf,
    pub jig_poll_ms: u64,
    #[serde(flatten)]
    pub product: ProductSettings,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            variant: "BASE".to_string(),
            skip: Vec::new(),
            step_delay_ms: 1_000,
            results_dir: PathBuf::from("./results"),
            jig_poll_ms: 100,
            product: ProductSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub io_board: IoBoardConfig,
    pub mcu: McuConfig,
    pub sbc: SbcConfig,
    pub voltmeter: VoltmeterConfig,
    pub flasher: FlasherConfig,
    pub recorder: RecorderConfig,
    pub sequence: SequenceConfig,
    pub power_supply: PowerSupplyLimits,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| Error::Config(err.to_string()))
    }

    /// Reads `path` and applies the environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        let mut config = Self::parse(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// `$PODBENCH_CONFIG`, else `./podbench.toml`, else defaults. A path named by the
    /// environment must exist.
    pub fn load_or_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.sbc.boot.password = password;
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            self.recorder.token = token;
        }
    }
}
