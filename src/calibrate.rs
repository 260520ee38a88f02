//! Calibration orchestrator: runs the feedback loop over the whole bank.
//!
//! LEDs are processed strictly sequentially in pin-ascending order (both
//! the driver board and the spectrometer are single physical instruments
//! with global state). The orchestrator owns the transport and meter
//! handles for the duration of a run and hands them to the loop by
//! reference; nothing else may touch them concurrently.

use std::collections::BTreeMap;
use std::thread;

use log::{error, info, warn};

use crate::config::CalibrationSettings;
use crate::equalize::{equalize, Led};
use crate::error::{LpmError, LpmResult};
use crate::meter::{SpectralMeter, Spectrum};
use crate::protocol::LedDriver;
use crate::transport::LineTransport;

/// Result of a calibration run, keyed by wavelength.
#[derive(Debug, Default)]
pub struct CalibrationOutcome {
    /// Accepted duty cycle per wavelength.
    pub pwm: BTreeMap<u16, u16>,
    /// Accepted spectrum per wavelength.
    pub spectra: BTreeMap<u16, Spectrum>,
    /// LEDs whose measurement permanently failed, with the reason. Never
    /// silently dropped, never given a default duty cycle.
    pub failures: BTreeMap<u16, String>,
}

/// Result of a photo/spectrum sweep, keyed by wavelength.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Measured spectrum per wavelength.
    pub spectra: BTreeMap<u16, Spectrum>,
    /// LEDs that produced no spectrum, with the reason.
    pub failures: BTreeMap<u16, String>,
}

/// Which optional stages a sweep performs.
#[derive(Debug, Clone, Copy)]
pub struct SweepStages {
    /// Trigger the camera shutter for each LED.
    pub take_photo: bool,
    /// Measure a spectrum for each LED.
    pub measure_spectrum: bool,
}

impl Default for SweepStages {
    fn default() -> Self {
        Self {
            take_photo: true,
            measure_spectrum: true,
        }
    }
}

/// Equalizes every LED of the bank and assembles the calibration table.
///
/// After each LED, converged or not, the board is reset so no LED stays
/// energized; reset failures are logged and do not abort the run. A meter
/// that refuses to start, or a dead serial link, aborts the whole run
/// after that cleanup reset.
pub fn run_calibration<T, M>(
    driver: &mut LedDriver<T>,
    meter: &mut M,
    leds: &BTreeMap<u8, u16>,
    settings: &CalibrationSettings,
) -> LpmResult<CalibrationOutcome>
where
    T: LineTransport,
    M: SpectralMeter,
{
    settings.validate()?;
    let mut outcome = CalibrationOutcome::default();

    for (&pin, &wavelength_nm) in leds {
        info!("equalizing {}nm LED on pin {}", wavelength_nm, pin);
        let led = Led { pin, wavelength_nm };
        let result = equalize(driver, meter, led, settings);

        reset_after(driver, pin, settings);

        match result {
            Ok((pwm, spectrum)) => {
                outcome.pwm.insert(wavelength_nm, pwm);
                outcome.spectra.insert(wavelength_nm, spectrum);
            }
            Err(e @ LpmError::MeterStart) | Err(e @ LpmError::Transport(_)) => {
                error!("aborting calibration at pin {}: {}", pin, e);
                return Err(e);
            }
            Err(e) => {
                warn!("{}nm LED on pin {} failed: {}", wavelength_nm, pin, e);
                outcome.failures.insert(wavelength_nm, e.to_string());
            }
        }
    }

    Ok(outcome)
}

/// Drives every LED at its configured duty cycle, optionally photographing
/// it and measuring its spectrum.
///
/// Per-LED problems (missing table entry, failed measurement) are recorded
/// in the outcome and the sweep continues; only a meter start refusal or a
/// dead serial link aborts it.
pub fn run_sweep<T, M>(
    driver: &mut LedDriver<T>,
    mut meter: Option<&mut M>,
    leds: &BTreeMap<u8, u16>,
    pwm_table: &BTreeMap<u16, u16>,
    settings: &CalibrationSettings,
    stages: SweepStages,
) -> LpmResult<SweepOutcome>
where
    T: LineTransport,
    M: SpectralMeter,
{
    // Checked before any LED is driven, so a misconfigured sweep never
    // leaves one energized.
    if stages.measure_spectrum && meter.is_none() {
        return Err(LpmError::Config(
            "spectral sweep requires a meter".to_string(),
        ));
    }

    let mut outcome = SweepOutcome::default();

    for (&pin, &wavelength_nm) in leds {
        let Some(&duty) = pwm_table.get(&wavelength_nm) else {
            warn!("no duty cycle configured for {}nm LED", wavelength_nm);
            outcome
                .failures
                .insert(wavelength_nm, "no duty cycle configured".to_string());
            continue;
        };

        info!(
            "driving {}nm LED on pin {} at duty {}",
            wavelength_nm, pin, duty
        );
        driver.set_pwm(pin, duty)?;
        thread::sleep(settings.settle);

        if stages.take_photo {
            info!("triggering camera shutter for {}nm LED", wavelength_nm);
            driver.shoot()?;
            thread::sleep(settings.settle);
        }

        if stages.measure_spectrum {
            let meter = meter
                .as_deref_mut()
                .ok_or_else(|| LpmError::Config("sweep needs a meter".to_string()))?;
            match sweep_measurement(meter) {
                Ok(spectrum) => {
                    outcome.spectra.insert(wavelength_nm, spectrum);
                }
                Err(e @ LpmError::MeterStart) | Err(e @ LpmError::Transport(_)) => {
                    reset_after(driver, pin, settings);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "unable to measure {}nm LED on pin {} at duty {}: {}",
                        wavelength_nm, pin, duty, e
                    );
                    outcome.failures.insert(wavelength_nm, e.to_string());
                }
            }
            thread::sleep(settings.settle);
        }

        reset_after(driver, pin, settings);
    }

    Ok(outcome)
}

/// One start/measure/stop cycle for the sweep.
fn sweep_measurement<M: SpectralMeter>(meter: &mut M) -> LpmResult<Spectrum> {
    if !meter.start()? {
        if let Err(e) = meter.stop() {
            warn!("meter stop after failed start: {}", e);
        }
        return Err(LpmError::MeterStart);
    }
    let result = (|| {
        meter.units(true)?;
        if !meter.measure()? {
            return Err(LpmError::Measurement(
                "instrument reported no usable data".to_string(),
            ));
        }
        let spectrum = meter.spectral()?;
        if spectrum.is_empty() {
            return Err(LpmError::Measurement("empty spectrum".to_string()));
        }
        Ok(spectrum)
    })();
    if let Err(e) = meter.stop() {
        warn!("meter stop failed: {}", e);
    }
    result
}

/// Unconditional cleanup so the LED does not stay energized.
fn reset_after<T: LineTransport>(driver: &mut LedDriver<T>, pin: u8, settings: &CalibrationSettings) {
    if let Err(e) = driver.reset() {
        warn!("reset after pin {} failed: {}", pin, e);
    }
    thread::sleep(settings.settle);
}
