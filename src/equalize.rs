//! Per-LED PWM equalization feedback loop.
//!
//! Searches downward from the duty-cycle ceiling for the highest PWM value
//! whose measured spectral peak sits within `epsilon` of the target
//! threshold. Acceptance is decided only after a successful measurement;
//! once the candidate has dropped below the floor, the next measurement is
//! still taken and whatever value was actually set is the accepted one
//! (the floor is a gate, not a clamp).

use std::thread;

use log::{debug, info, warn};

use crate::config::CalibrationSettings;
use crate::error::{LpmError, LpmResult};
use crate::meter::{SpectralMeter, Spectrum};
use crate::protocol::LedDriver;
use crate::transport::LineTransport;

/// One LED of the bank. Identity is the driver pin; the wavelength labels
/// the LED in maps, logs, and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Led {
    /// Driver board pin.
    pub pin: u8,
    /// Nominal wavelength, in nm.
    pub wavelength_nm: u16,
}

/// Finds the accepted duty cycle and spectrum for one LED.
///
/// Transient faults (a failed measurement, a protocol timeout while
/// driving the LED) are retried at the same candidate, up to
/// `max_measure_retries` consecutive failures; after that the LED is
/// reported failed via `LpmError::Measurement`. A meter that refuses to
/// start is fatal and surfaces as `LpmError::MeterStart` after one
/// best-effort stop.
pub fn equalize<T, M>(
    driver: &mut LedDriver<T>,
    meter: &mut M,
    led: Led,
    settings: &CalibrationSettings,
) -> LpmResult<(u16, Spectrum)>
where
    T: LineTransport,
    M: SpectralMeter,
{
    let mut candidate = settings.ceiling;
    let mut consecutive_failures = 0u32;

    loop {
        debug!(
            "driving {}nm LED on pin {} at duty {}",
            led.wavelength_nm, led.pin, candidate
        );
        if let Err(e) = driver.set_pwm(led.pin, candidate) {
            match e {
                LpmError::ProtocolTimeout { .. } => {
                    note_transient(&mut consecutive_failures, settings, led, e)?;
                    continue;
                }
                other => return Err(other),
            }
        }
        thread::sleep(settings.settle);

        if !meter.start()? {
            if let Err(e) = meter.stop() {
                warn!("meter stop after failed start: {}", e);
            }
            return Err(LpmError::MeterStart);
        }

        let outcome = measure_once(meter);
        if let Err(e) = meter.stop() {
            warn!("meter stop failed: {}", e);
        }

        match outcome {
            Ok(spectrum) => {
                consecutive_failures = 0;
                let peak = spectrum.peak().unwrap_or(0.0);
                let diff = (peak - settings.threshold).abs();
                debug!(
                    "pin {} duty {}: peak {:e}, |peak - threshold| = {:e}",
                    led.pin, candidate, peak, diff
                );
                // A saturated candidate of 0 is accepted even under a floor
                // of 0, so the loop terminates for any floor.
                if diff < settings.epsilon || candidate < settings.floor || candidate == 0 {
                    info!(
                        "{}nm LED on pin {} accepted at duty {} (peak {:e})",
                        led.wavelength_nm, led.pin, candidate, peak
                    );
                    return Ok((candidate, spectrum));
                }
                candidate = candidate.saturating_sub(settings.step);
            }
            Err(e @ (LpmError::Measurement(_) | LpmError::ProtocolTimeout { .. })) => {
                note_transient(&mut consecutive_failures, settings, led, e)?;
            }
            Err(other) => return Err(other),
        }
    }
}

/// One measurement in the fixed collaborator order.
fn measure_once<M: SpectralMeter>(meter: &mut M) -> LpmResult<Spectrum> {
    meter.units(true)?;
    if !meter.measure()? {
        return Err(LpmError::Measurement(
            "instrument reported no usable data".to_string(),
        ));
    }
    match meter.config() {
        Ok(cfg) => debug!("meter config: {}", cfg),
        Err(e) => debug!("meter config query failed: {}", e),
    }
    let spectrum = meter.spectral()?;
    if spectrum.is_empty() {
        return Err(LpmError::Measurement("empty spectrum".to_string()));
    }
    Ok(spectrum)
}

/// Counts a transient fault; the candidate is left untouched so the next
/// iteration retries the same duty cycle.
fn note_transient(
    consecutive_failures: &mut u32,
    settings: &CalibrationSettings,
    led: Led,
    err: LpmError,
) -> LpmResult<()> {
    *consecutive_failures += 1;
    if *consecutive_failures >= settings.max_measure_retries {
        warn!(
            "pin {}: giving up after {} consecutive faults: {}",
            led.pin, consecutive_failures, err
        );
        return Err(LpmError::Measurement(format!(
            "{} consecutive faults, last: {}",
            consecutive_failures, err
        )));
    }
    warn!(
        "pin {}: transient fault ({}), retrying at the same duty cycle",
        led.pin, err
    );
    Ok(())
}
