//! The pod product: its settings, step catalog and bench wiring.

pub mod rig;
pub mod serial_number;
pub mod steps;

pub use rig::{Link, Rig};

use crate::sequencer::{Catalog, StepDef};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

pub const VARIANTS: [&str; 1] = ["BASE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PodVersion {
    Max,
    Mini,
}

impl PodVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodVersion::Max => "MAX",
            PodVersion::Mini => "MINI",
        }
    }

    pub fn serial_digit(&self) -> char {
        match self {
            PodVersion::Max => '2',
            PodVersion::Mini => '1',
        }
    }

    /// MAX pods carry all four heat sensors.
    pub fn has_extra_heat_sensors(&self) -> bool {
        matches!(self, PodVersion::Max)
    }
}

impl fmt::Display for PodVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PodVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MAX" => Ok(PodVersion::Max),
            "MINI" => Ok(PodVersion::Mini),
            other => Err(Error::InvalidArgs(format!("unknown pod version '{other}'"))),
        }
    }
}

/// Voltage windows, exclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSupplyLimits {
    #[serde(rename = "5V_min")]
    pub v5_min: f64,
    #[serde(rename = "5V_max")]
    pub v5_max: f64,
    #[serde(rename = "3V3_min")]
    pub v3v3_min: f64,
    #[serde(rename = "3V3_max")]
    pub v3v3_max: f64,
    #[serde(rename = "3V3_RADAR_min")]
    pub radar_min: f64,
    #[serde(rename = "3V3_RADAR_max")]
    pub radar_max: f64,
    /// Sampling window of the 5V rail.
    pub window_ms: u64,
    /// Sampling window of both 3V3 rails.
    pub window_3v3_ms: u64,
}

impl Default for PowerSupplyLimits {
    fn default() -> Self {
        Self {
            v5_min: 4.75,
            v5_max: 5.25,
            v3v3_min: 3.1,
            v3v3_max: 3.5,
            radar_min: 3.135,
            radar_max: 3.465,
            window_ms: 1_500,
            window_3v3_ms: 1_000,
        }
    }
}

/// Settle times around power and programming changes, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDelays {
    pub poe_settle_ms: u64,
    pub prog_settle_ms: u64,
    pub power_cycle_off_ms: u64,
    pub power_cycle_on_ms: u64,
}

impl Default for StepDelays {
    fn default() -> Self {
        Self {
            poe_settle_ms: 4_000,
            prog_settle_ms: 2_000,
            power_cycle_off_ms: 4_000,
            power_cycle_on_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductSettings {
    pub pod_version: PodVersion,
    pub hardware_version: String,
    pub stm32_firmware: String,
    pub stm32_final_firmware: String,
    /// Re-test with this serial instead of allocating a new one; disables labels.
    pub retry_existing_serial: Option<String>,
    pub sequential_number_path: PathBuf,
    pub use_handwave: bool,
    pub test_led_rj45: bool,
    /// Half-second CMD_EL toggles while waiting for radar motion.
    pub radar_toggle_count: u32,
    pub delays: StepDelays,
}

impl Default for ProductSettings {
    fn default() -> Self {
        Self {
            pod_version: PodVersion::Max,
            hardware_version: "1.0.0".to_string(),
            stm32_firmware: "09_4DMOD_v2.hex".to_string(),
            stm32_final_firmware: "Final_STM_Software.hex".to_string(),
            retry_existing_serial: None,
            sequential_number_path: PathBuf::from("./sequential_number/sequential_number.txt"),
            use_handwave: false,
            test_led_rj45: false,
            radar_toggle_count: 15,
            delays: StepDelays::default(),
        }
    }
}

/// Data printed on the pod label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelRequest {
    pub serial: String,
    pub qr_code: String,
    pub hardware_version: String,
    pub wifi_enabled: bool,
    pub pod_version: PodVersion,
}

impl LabelRequest {
    pub fn new(serial: &str, hardware_version: &str, wifi_enabled: bool, pod_version: PodVersion) -> Self {
        Self {
            serial: serial.to_string(),
            qr_code: format!("https://activatePods.pego.io/{serial}"),
            hardware_version: hardware_version.to_string(),
            wifi_enabled,
            pod_version,
        }
    }
}

pub trait LabelPrinter: Send {
    /// `Ok(true)` once the label is out.
    fn print(&mut self, label: &LabelRequest) -> Result<bool>;
}

/// Used when no printer is wired; every label counts as printed.
pub struct SkipPrinting;

impl LabelPrinter for SkipPrinting {
    fn print(&mut self, label: &LabelRequest) -> Result<bool> {
        warn!(serial = %label.serial, "skip printing");
        Ok(true)
    }
}

/// Step catalog of a product variant.
pub fn catalog(variant: &str) -> Result<Catalog<Rig>> {
    match variant {
        "BASE" => Ok(Catalog {
            variant: "BASE",
            steps: base_steps(),
        }),
        other => Err(Error::NotFound(format!("product variant '{other}'"))),
    }
}

fn base_steps() -> Vec<StepDef<Rig>> {
    use steps::*;
    vec![
        StepDef::checked("POWER_SUPPLY", power_supply, check_power_supply),
        StepDef::new("READ_ID", read_id),
        StepDef::new("FLASH_ST", flash_st),
        StepDef::new("INIT_SOM", init_som),
        StepDef::checked("HEAT_SENSOR", heat_sensor, check_heat_sensor),
        StepDef::checked("TOF_SENSOR", tof_sensor, check_tof_sensor),
        StepDef::checked("DAC_I2C", dac_i2c, check_dac_i2c),
        StepDef::new("CHECK_WINDOW", check_window),
        StepDef::checked("RADAR_STATUS_CLEAR", radar_status_clear, check_radar_clear),
        StepDef::checked("RADAR_STATUS_MOVEMENT", radar_status_movement, check_radar_movement),
        StepDef::checked("EXTERNAL_IO", external_io, check_external_io),
        StepDef::checked("SOM_TO_ST_CONNEXION", som_to_st, check_command_data),
        StepDef::checked("ST_TO_SOM_CONNEXION", st_to_som, check_st_to_som),
        StepDef::new("FLASH_FINAL_FIRMWARE", flash_final_firmware),
        StepDef::checked("TAKE_PICTURE", take_picture, check_take_picture),
        StepDef::checked("GET_SECURITY_KEYS", get_security_keys, check_security_keys),
        StepDef::checked("POD_PROVISION", pod_provision, check_pod_provision),
        StepDef::checked("SEND_KEYS", send_keys, check_send_keys),
        StepDef::new("PRINT_LABEL", print_label),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_catalog_order() {
        let catalog = catalog("BASE").unwrap();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(names.len(), 19);
        assert_eq!(names.first(), Some(&"POWER_SUPPLY"));
        assert_eq!(names.last(), Some(&"PRINT_LABEL"));
        assert!(catalog.contains("SEND_KEYS"));
    }

    #[test]
    fn unknown_variant() {
        assert!(matches!(catalog("DELUXE"), Err(Error::NotFound(_))));
    }

    #[test]
    fn pod_version_parses() {
        assert_eq!("mini".parse::<PodVersion>().unwrap(), PodVersion::Mini);
        assert_eq!(PodVersion::Max.to_string(), "MAX");
    }

    #[test]
    fn limits_deserialise_with_rail_names() {
        let limits: PowerSupplyLimits = toml::from_str("5V_min = 4.8\nwindow_ms = 200").unwrap();
        assert_eq!(limits.v5_min, 4.8);
        assert_eq!(limits.v5_max, 5.25);
        assert_eq!(limits.window_ms, 200);
        assert_eq!(limits.window_3v3_ms, 1_000);
    }

    #[test]
    fn label_qr_points_at_activation() {
        let label = LabelRequest::new("203031000000015", "1.0.0", true, PodVersion::Max);
        assert_eq!(label.qr_code, "https://activatePods.pego.io/203031000000015");
    }
}
