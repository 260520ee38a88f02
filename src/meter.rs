//! Spectroradiometer collaborator contract and the PR-655 wrapper.
//!
//! The calibration core only ever talks to the meter through the
//! [`SpectralMeter`] trait, in the fixed per-measurement order
//! `start -> units -> measure -> (config) -> spectral -> stop`. The
//! remote-mode wire protocol of the instrument stays behind this seam;
//! tests substitute [`crate::mock::MockMeter`].

use std::time::Duration;

use log::trace;

use crate::error::{LpmError, LpmResult};
use crate::transport::LineTransport;

/// One spectral sample: intensities over evenly spaced wavelength bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Wavelength of the first bin, in nm.
    pub wavelength_start: f32,
    /// Bin spacing, in nm.
    pub wavelength_step: f32,
    /// One intensity per bin.
    pub intensities: Vec<f32>,
}

impl Spectrum {
    /// Maximum intensity across all bins; `None` for an empty sample.
    pub fn peak(&self) -> Option<f32> {
        self.intensities
            .iter()
            .copied()
            .fold(None, |max, v| match max {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }

    /// Wavelengths of the bins, in order.
    pub fn wavelengths(&self) -> impl Iterator<Item = f32> + '_ {
        let start = self.wavelength_start;
        let step = self.wavelength_step;
        (0..self.intensities.len()).map(move |i| start + i as f32 * step)
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// Whether the sample holds no bins.
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }
}

/// External spectroradiometer collaborator.
pub trait SpectralMeter {
    /// Enters remote mode. `Ok(false)` means the instrument refused, which
    /// is fatal for a calibration run.
    fn start(&mut self) -> LpmResult<bool>;

    /// Selects photometric (`true`) or radiometric units.
    fn units(&mut self, photometric: bool) -> LpmResult<()>;

    /// Takes a measurement. `Ok(false)` means the instrument produced no
    /// usable data for this exposure.
    fn measure(&mut self) -> LpmResult<bool>;

    /// Downloads the spectral data of the last measurement.
    fn spectral(&mut self) -> LpmResult<Spectrum>;

    /// Instrument configuration metadata for the last measurement.
    fn config(&mut self) -> LpmResult<String>;

    /// Leaves remote mode. Best-effort; callers log failures.
    fn stop(&mut self) -> LpmResult<()>;
}

/// Photo Research PR-655 SpectraScan over its remote-mode serial interface.
///
/// A thin I/O wrapper: command strings in, reply lines parsed into
/// [`Spectrum`]. Nothing here is calibration logic.
pub struct Pr655<T: LineTransport> {
    io: T,
    timeout: Duration,
}

impl<T: LineTransport> Pr655<T> {
    /// Wraps an open transport to the instrument.
    pub fn new(io: T) -> Self {
        Self {
            io,
            timeout: Duration::from_millis(5000),
        }
    }

    fn command(&mut self, cmd: &str) -> LpmResult<Vec<String>> {
        trace!("pr655 tx: '{}'", cmd);
        self.io.send_line(cmd)?;
        let mut lines = Vec::new();
        while let Some(line) = self.io.read_line(self.timeout)? {
            trace!("pr655 rx: '{}'", line.escape_default());
            lines.push(line);
        }
        Ok(lines)
    }
}

#[cfg(feature = "instrument_serial")]
impl Pr655<crate::transport::SerialTransport> {
    /// Opens the instrument on a serial device path. The PR-655 talks at
    /// 9600 baud.
    pub fn open(path: &str) -> LpmResult<Self> {
        let io = crate::transport::SerialTransport::open(path, 9600)?;
        Ok(Self::new(io))
    }
}

impl<T: LineTransport> SpectralMeter for Pr655<T> {
    fn start(&mut self) -> LpmResult<bool> {
        // "PHOTO" puts the instrument into remote mode; it acknowledges
        // with a line containing REMOTE MODE.
        let reply = self.command("PHOTO")?;
        Ok(reply.iter().any(|l| l.contains("REMOTE MODE")))
    }

    fn units(&mut self, photometric: bool) -> LpmResult<()> {
        let cmd = if photometric { "SU1" } else { "SU0" };
        self.command(cmd)?;
        Ok(())
    }

    fn measure(&mut self) -> LpmResult<bool> {
        let reply = self.command("M5")?;
        let status = reply
            .first()
            .ok_or_else(|| LpmError::Measurement("no reply to M5".to_string()))?;
        Ok(parse_status(status) == Some(0))
    }

    fn spectral(&mut self) -> LpmResult<Spectrum> {
        let reply = self.command("D5")?;
        parse_spectral(&reply)
    }

    fn config(&mut self) -> LpmResult<String> {
        let reply = self.command("D601")?;
        Ok(reply.join("; "))
    }

    fn stop(&mut self) -> LpmResult<()> {
        self.command("Q")?;
        Ok(())
    }
}

/// Leading error code of a PR-655 reply line (`0` = success).
fn parse_status(line: &str) -> Option<i32> {
    line.split(',').next()?.trim().parse().ok()
}

/// Parses a spectral download: a status/header line followed by one
/// `wavelength,intensity` line per bin.
fn parse_spectral(lines: &[String]) -> LpmResult<Spectrum> {
    let mut bins: Vec<(f32, f32)> = Vec::new();
    for line in lines.iter().skip(1) {
        let Some((wl, value)) = line.split_once(',') else {
            continue;
        };
        let (Ok(wl), Ok(value)) = (wl.trim().parse::<f32>(), value.trim().parse::<f32>()) else {
            continue;
        };
        bins.push((wl, value));
    }
    if bins.is_empty() {
        return Err(LpmError::Measurement(
            "spectral download held no wavelength bins".to_string(),
        ));
    }
    let wavelength_start = bins[0].0;
    let wavelength_step = if bins.len() > 1 {
        bins[1].0 - bins[0].0
    } else {
        0.0
    };
    Ok(Spectrum {
        wavelength_start,
        wavelength_step,
        intensities: bins.into_iter().map(|(_, v)| v).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_of_spectrum() {
        let s = Spectrum {
            wavelength_start: 380.0,
            wavelength_step: 4.0,
            intensities: vec![0.1, 0.7, 0.3],
        };
        assert_eq!(s.peak(), Some(0.7));
        let empty = Spectrum {
            wavelength_start: 380.0,
            wavelength_step: 4.0,
            intensities: vec![],
        };
        assert_eq!(empty.peak(), None);
    }

    #[test]
    fn wavelength_bins_are_evenly_spaced() {
        let s = Spectrum {
            wavelength_start: 380.0,
            wavelength_step: 4.0,
            intensities: vec![0.0; 3],
        };
        let wl: Vec<f32> = s.wavelengths().collect();
        assert_eq!(wl, vec![380.0, 384.0, 388.0]);
    }

    #[test]
    fn spectral_download_parses_bins() {
        let lines: Vec<String> = vec![
            "0,0,550.0".to_string(),
            "380.0,1.0e-05".to_string(),
            "384.0,2.5e-05".to_string(),
            "388.0,1.5e-05".to_string(),
        ];
        let s = parse_spectral(&lines).unwrap();
        assert_eq!(s.wavelength_start, 380.0);
        assert_eq!(s.wavelength_step, 4.0);
        assert_eq!(s.intensities.len(), 3);
        assert_eq!(s.peak(), Some(2.5e-05));
    }

    #[test]
    fn spectral_download_without_bins_is_an_error() {
        let lines = vec!["0".to_string()];
        assert!(matches!(
            parse_spectral(&lines),
            Err(LpmError::Measurement(_))
        ));
    }

    #[test]
    fn status_line_parses_error_code() {
        assert_eq!(parse_status("0,0,550.0"), Some(0));
        assert_eq!(parse_status("-8"), Some(-8));
        assert_eq!(parse_status("garbage"), None);
    }
}
