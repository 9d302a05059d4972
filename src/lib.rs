//! Engine for the pod production test station.
//!
//! The crate talks to three pieces of test hardware over serial links (the IO board
//! with its framed binary protocol, the MCU and SBC of the device under test with
//! line protocols, and a DPM802 panel voltmeter), sequences the product test catalog
//! and hands sealed run reports to the recorder.

pub mod app;
pub mod boot;
pub mod channel;
pub mod cli;
pub mod config;
pub mod flasher;
pub mod ioboard;
pub mod mcu;
pub mod product;
pub mod recorder;
pub mod sbc;
pub mod sequencer;
pub mod serial;
pub mod supervised;
pub mod voltmeter;

use thiserror::Error;

/// Log target carrying run outcomes. Kept out of the ordinary log layers.
pub const RESULT_TARGET: &str = "RESULT";

/// Log target for the SBC console transcript.
pub const SBC_TARGET: &str = "sbc";

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("command '{command}' failed after {attempts} attempts")]
    CommandFailed {
        command: String,
        attempts: u32,
        last_response: Vec<String>,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("flash error: {0}")]
    Flash(String),
}

impl Error {
    /// Errors the command channels are allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Io(_) | Error::Serial(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
