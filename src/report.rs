//! Output artifacts: the accepted-PWM table, the spectral dump, and the
//! per-LED error log.
//!
//! The PWM table is written in the same `pwm:` YAML shape the configuration
//! loader reads, so a calibration run's output can be fed straight back in
//! as the next sweep's duty-cycle map.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::LpmResult;
use crate::meter::Spectrum;

/// Writes the wavelength -> duty table as a `pwm:` YAML block.
pub fn write_pwm_table<W: Write>(mut out: W, pwm: &BTreeMap<u16, u16>) -> LpmResult<()> {
    writeln!(out, "pwm:")?;
    for (wavelength, duty) in pwm {
        writeln!(out, "  {} : {}", wavelength, duty)?;
    }
    Ok(())
}

/// Writes the spectral dump as CSV: a header row of wavelength bins taken
/// from the first spectrum, then one row per LED with its intensities.
///
/// All spectra of one run share the instrument's bin grid, so the first
/// spectrum's bins label every row.
pub fn write_spectral_csv<W: Write>(
    out: W,
    spectra: &BTreeMap<u16, Spectrum>,
) -> LpmResult<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["led".to_string()];
    if let Some(first) = spectra.values().next() {
        header.extend(first.wavelengths().map(|wl| format!("{}", wl)));
    }
    writer.write_record(&header)?;

    for (wavelength, spectrum) in spectra {
        let mut record = vec![wavelength.to_string()];
        record.extend(spectrum.intensities.iter().map(|v| format!("{}", v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes one line per failed LED.
pub fn write_error_log<W: Write>(
    mut out: W,
    failures: &BTreeMap<u16, String>,
) -> LpmResult<()> {
    for (wavelength, reason) in failures {
        writeln!(out, "{}nm: {}", wavelength, reason)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(intensities: Vec<f32>) -> Spectrum {
        Spectrum {
            wavelength_start: 380.0,
            wavelength_step: 4.0,
            intensities,
        }
    }

    #[test]
    fn pwm_table_roundtrips_through_the_config_loader() {
        let mut table = BTreeMap::new();
        table.insert(350u16, 4096u16);
        table.insert(450u16, 3596u16);

        let mut buf = Vec::new();
        write_pwm_table(&mut buf, &table).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "pwm:\n  350 : 4096\n  450 : 3596\n");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        let loaded = crate::config::load_pwm_map(file.path()).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn spectral_csv_header_comes_from_the_first_spectrum() {
        let mut spectra = BTreeMap::new();
        spectra.insert(350u16, spectrum(vec![0.1, 0.2, 0.3]));
        spectra.insert(450u16, spectrum(vec![0.4, 0.5, 0.6]));

        let mut buf = Vec::new();
        write_spectral_csv(&mut buf, &spectra).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "led,380,384,388");
        assert_eq!(lines[1], "350,0.1,0.2,0.3");
        assert_eq!(lines[2], "450,0.4,0.5,0.6");
    }

    #[test]
    fn empty_spectra_still_produce_a_header() {
        let spectra = BTreeMap::new();
        let mut buf = Vec::new();
        write_spectral_csv(&mut buf, &spectra).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "led\n");
    }

    #[test]
    fn error_log_lists_failed_leds() {
        let mut failures = BTreeMap::new();
        failures.insert(630u16, "5 consecutive faults".to_string());
        let mut buf = Vec::new();
        write_error_log(&mut buf, &failures).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "630nm: 5 consecutive faults\n");
    }
}
