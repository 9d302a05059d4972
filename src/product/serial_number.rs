//! Pod serial numbers and the sequential counter they draw from.

use super::PodVersion;
use crate::{Error, Result};
use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SERIAL_LEN: usize = 15;

/// `10 - ((3 * sum_even + sum_odd) mod 10)`, with 10 folded to 0. Indices are 0-based.
pub fn check_digit(digits: &[u8]) -> u8 {
    let (even, odd) = digits
        .iter()
        .enumerate()
        .fold((0u32, 0u32), |(even, odd), (i, d)| {
            if i % 2 == 0 {
                (even + u32::from(*d), odd)
            } else {
                (even, odd + u32::from(*d))
            }
        });
    ((10 - (even * 3 + odd) % 10) % 10) as u8
}

/// Builds the 15-digit serial: variant, ISO week, year code, hardware version,
/// sequential number, check digit.
pub fn generate(version: PodVersion, hardware: &str, date: NaiveDate, sequential: u32) -> Result<String> {
    let hw: Vec<char> = hardware.chars().collect();
    let hw_digits = match hw.as_slice() {
        [a, '.', b, '.', c] if [a, b, c].iter().all(|ch| ch.is_ascii_digit()) => [*a, *b, *c],
        _ => {
            return Err(Error::InvalidArgs(format!(
                "hardware version '{hardware}' is not X.Y.Z"
            )))
        }
    };
    if sequential > 999_999 {
        return Err(Error::InvalidArgs(format!("sequential number {sequential} overflows")));
    }
    let year = date.year() - 2020 + 1;
    if !(0..100).contains(&year) {
        return Err(Error::InvalidArgs(format!("year {} outside serial range", date.year())));
    }

    let mut serial = String::with_capacity(SERIAL_LEN);
    serial.push(version.serial_digit());
    serial.push_str(&format!("{:02}", date.iso_week().week()));
    serial.push_str(&format!("{year:02}"));
    serial.extend(hw_digits);
    serial.push_str(&format!("{sequential:06}"));

    let digits: Vec<u8> = serial.bytes().map(|b| b - b'0').collect();
    serial.push(char::from(b'0' + check_digit(&digits)));
    debug!("generated serial {serial}");
    Ok(serial)
}

/// Counter file holding the next sequential number as decimal text.
#[derive(Debug, Clone)]
pub struct SequentialCounter {
    path: PathBuf,
}

impl SequentialCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<u32> {
        let text = std::fs::read_to_string(&self.path)?;
        let first = text.lines().next().unwrap_or_default().trim();
        first
            .parse()
            .map_err(|_| Error::Parse(format!("sequential number '{first}' in {}", self.path.display())))
    }

    pub fn increment(&self) -> Result<u32> {
        let current = self.read()?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgs(format!("sequential number {current} cannot grow")))?;
        debug!("increment {current} to {next}");
        std::fs::write(&self.path, next.to_string())?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_digit_vector() {
        assert_eq!(check_digit(&[2, 0, 3, 0, 3, 1, 0, 0, 0, 0, 0, 0, 0, 0]), 5);
    }

    #[test]
    fn check_digit_folds_ten_to_zero() {
        assert_eq!(check_digit(&[0; 14]), 0);
    }

    #[test]
    fn serial_layout() {
        let date = NaiveDate::from_ymd_opt(2022, 1, 12).unwrap();
        let serial = generate(PodVersion::Max, "1.0.0", date, 15).unwrap();
        assert_eq!(serial.len(), SERIAL_LEN);
        assert_eq!(&serial[..14], "20203100000015");
        let digits: Vec<u8> = serial[..14].bytes().map(|b| b - b'0').collect();
        assert_eq!(serial.as_bytes()[14] - b'0', check_digit(&digits));
    }

    #[test]
    fn mini_uses_digit_one() {
        let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert!(generate(PodVersion::Mini, "2.1.3", date, 7).unwrap().starts_with('1'));
    }

    #[test]
    fn bad_hardware_version_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert!(generate(PodVersion::Max, "10.0", date, 1).is_err());
    }

    #[test]
    fn counter_increments_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequential_number.txt");
        std::fs::write(&path, "41\n").unwrap();
        let counter = SequentialCounter::new(&path);
        assert_eq!(counter.read().unwrap(), 41);
        assert_eq!(counter.increment().unwrap(), 42);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42");
    }

    #[test]
    fn counter_refuses_to_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequential_number.txt");
        std::fs::write(&path, u32::MAX.to_string()).unwrap();
        let counter = SequentialCounter::new(&path);
        assert!(matches!(counter.increment(), Err(Error::InvalidArgs(_))));
        assert_eq!(counter.read().unwrap(), u32::MAX);
    }
}
