//! Configuration loading and calibration settings.
//!
//! Two YAML maps describe the LED bank, in the same shape the firmware
//! tooling has always used:
//!
//! ```yaml
//! # leds.yaml: driver pin to LED wavelength (nm)
//! leds:
//!   6: 350
//!   9: 450
//! ```
//!
//! ```yaml
//! # pwm.yaml: wavelength (nm) to duty cycle
//! pwm:
//!   350: 4096
//!   450: 3596
//! ```
//!
//! [`CalibrationSettings`] carries every tunable of the protocol layer and
//! the feedback loop; all fields have defaults, so a settings file only
//! needs the values it changes. Durations use humantime syntax (`1s`,
//! `250ms`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LpmError, LpmResult};
use crate::protocol::Sentinel;

#[derive(Debug, Deserialize)]
struct LedMapFile {
    leds: BTreeMap<u8, u16>,
}

#[derive(Debug, Deserialize)]
struct PwmMapFile {
    pwm: BTreeMap<u16, u16>,
}

/// Loads the `pin -> wavelength` map from a YAML file.
pub fn load_led_map(path: &Path) -> LpmResult<BTreeMap<u8, u16>> {
    let data = fs::read_to_string(path)?;
    let file: LedMapFile = serde_yaml::from_str(&data)?;
    if file.leds.is_empty() {
        return Err(LpmError::Config(format!(
            "{}: LED map is empty",
            path.display()
        )));
    }
    Ok(file.leds)
}

/// Loads the `wavelength -> duty` map from a YAML file.
pub fn load_pwm_map(path: &Path) -> LpmResult<BTreeMap<u16, u16>> {
    let data = fs::read_to_string(path)?;
    let file: PwmMapFile = serde_yaml::from_str(&data)?;
    Ok(file.pwm)
}

/// Tunables of the protocol layer and the equalization loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationSettings {
    /// Target spectral peak intensity.
    pub threshold: f32,
    /// Acceptance band around the threshold.
    pub epsilon: f32,
    /// Duty-cycle decrement per rejected iteration.
    pub step: u16,
    /// Duty cycle below which acceptance is forced.
    pub floor: u16,
    /// Starting candidate duty cycle.
    pub ceiling: u16,
    /// LED/PWM rise time waited after each state change.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Deadline for each protocol line read.
    #[serde(with = "humantime_serde")]
    pub line_timeout: Duration,
    /// Response line budget before a command fails with a protocol timeout.
    pub max_read_attempts: u32,
    /// Consecutive transient measurement faults tolerated per LED before the
    /// LED is recorded as failed.
    pub max_measure_retries: u32,
    /// End-of-response marker of the connected firmware revision.
    pub sentinel: Sentinel,
    /// Serial baud rate of the LED driver board.
    pub baud_rate: u32,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            threshold: 0.000_025,
            epsilon: 0.000_005,
            step: 500,
            floor: 1000,
            ceiling: 4096,
            settle: Duration::from_secs(1),
            line_timeout: Duration::from_millis(1000),
            max_read_attempts: 128,
            max_measure_retries: 5,
            sentinel: Sentinel::default(),
            baud_rate: 115_200,
        }
    }
}

impl CalibrationSettings {
    /// Loads settings from a YAML file and validates them.
    pub fn load(path: &Path) -> LpmResult<Self> {
        let data = fs::read_to_string(path)?;
        let settings: CalibrationSettings = serde_yaml::from_str(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings that would break the loop's termination guarantee.
    pub fn validate(&self) -> LpmResult<()> {
        if self.step == 0 {
            return Err(LpmError::Config("step must be positive".to_string()));
        }
        if self.floor > self.ceiling {
            return Err(LpmError::Config(format!(
                "floor {} exceeds ceiling {}",
                self.floor, self.ceiling
            )));
        }
        if self.epsilon <= 0.0 {
            return Err(LpmError::Config("epsilon must be positive".to_string()));
        }
        if self.max_read_attempts == 0 {
            return Err(LpmError::Config(
                "max_read_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn led_map_parses_pin_to_wavelength() {
        let f = write_temp("leds:\n  6: 350\n  9: 450\n");
        let map = load_led_map(f.path()).unwrap();
        assert_eq!(map.get(&6), Some(&350));
        assert_eq!(map.get(&9), Some(&450));
        // BTreeMap iteration is pin-ascending.
        let pins: Vec<u8> = map.keys().copied().collect();
        assert_eq!(pins, vec![6, 9]);
    }

    #[test]
    fn empty_led_map_is_rejected() {
        let f = write_temp("leds: {}\n");
        assert!(matches!(load_led_map(f.path()), Err(LpmError::Config(_))));
    }

    #[test]
    fn pwm_map_parses_wavelength_to_duty() {
        let f = write_temp("pwm:\n  350: 4096\n  450: 3596\n");
        let map = load_pwm_map(f.path()).unwrap();
        assert_eq!(map.get(&350), Some(&4096));
        assert_eq!(map.get(&450), Some(&3596));
    }

    #[test]
    fn settings_defaults_match_the_bench_values() {
        let s = CalibrationSettings::default();
        assert_eq!(s.step, 500);
        assert_eq!(s.floor, 1000);
        assert_eq!(s.ceiling, 4096);
        assert_eq!(s.settle, Duration::from_secs(1));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn shipped_settings_file_loads_with_the_defaults() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/lpm.yaml");
        let s = CalibrationSettings::load(&path).unwrap();
        assert!(s.sentinel.matches("\u{4}"));
        assert_eq!(s.step, 500);
        assert_eq!(s.settle, Duration::from_secs(1));
        assert_eq!(s.baud_rate, 115_200);
    }

    #[test]
    fn settings_file_overrides_and_parses_durations() {
        let f = write_temp("step: 250\nsettle: 50ms\nsentinel: \"*\"\n");
        let s = CalibrationSettings::load(f.path()).unwrap();
        assert_eq!(s.step, 250);
        assert_eq!(s.settle, Duration::from_millis(50));
        assert!(s.sentinel.matches("*"));
        // Untouched fields keep their defaults.
        assert_eq!(s.floor, 1000);
    }

    #[test]
    fn zero_step_fails_validation() {
        let s = CalibrationSettings {
            step: 0,
            ..CalibrationSettings::default()
        };
        assert!(matches!(s.validate(), Err(LpmError::Config(_))));
    }

    #[test]
    fn floor_above_ceiling_fails_validation() {
        let s = CalibrationSettings {
            floor: 5000,
            ..CalibrationSettings::default()
        };
        assert!(matches!(s.validate(), Err(LpmError::Config(_))));
    }
}
