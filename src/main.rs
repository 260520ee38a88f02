//! CLI entry point for the LED pseudo-monochromator tools.
//!
//! Three subcommands cover the bench workflows:
//!
//! ```bash
//! # One-shot device command (info, reset, shoot, pwm <pin>,<duty>)
//! lpm command --device /dev/ttyACM0 "pwm 10,2000"
//!
//! # Photograph and measure every configured LED at its configured duty
//! lpm sweep --device /dev/ttyACM0 --meter /dev/ttyUSB0 \
//!     --leds config/leds.yaml --pwm config/pwm.yaml
//!
//! # Equalize perceived brightness across the bank
//! lpm calibrate --device /dev/ttyACM0 --meter /dev/ttyUSB0 \
//!     --leds config/leds.yaml
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); protocol traffic is
//! visible at `trace`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lpm::CalibrationSettings;

#[derive(Parser)]
#[command(name = "lpm")]
#[command(about = "LED pseudo-monochromator control and calibration", long_about = None)]
struct Cli {
    /// Calibration settings YAML; built-in defaults when omitted.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single device command and print the drained reply
    Command {
        /// Serial device of the LED driver board
        #[arg(long)]
        device: PathBuf,

        /// Command line, e.g. "info" or "pwm 10,2000"
        input: String,
    },

    /// Drive each LED at its configured duty cycle; photograph and measure it
    Sweep {
        /// Serial device of the LED driver board
        #[arg(long)]
        device: PathBuf,

        /// Serial device of the PR-655 (required unless --skip-spectrum)
        #[arg(long)]
        meter: Option<PathBuf>,

        /// LED map YAML (pin -> wavelength)
        #[arg(long)]
        leds: PathBuf,

        /// PWM map YAML (wavelength -> duty)
        #[arg(long)]
        pwm: PathBuf,

        /// Skip the camera shutter trigger
        #[arg(long)]
        skip_photo: bool,

        /// Skip spectral measurements
        #[arg(long)]
        skip_spectrum: bool,

        /// Directory for spectral.txt and error.txt
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },

    /// Equalize perceived brightness across the bank
    Calibrate {
        /// Serial device of the LED driver board
        #[arg(long)]
        device: PathBuf,

        /// Serial device of the PR-655
        #[arg(long)]
        meter: PathBuf,

        /// LED map YAML (pin -> wavelength)
        #[arg(long)]
        leds: PathBuf,

        /// Directory for pwm.txt, spectral.txt and error.txt
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => CalibrationSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => CalibrationSettings::default(),
    };

    run(cli.command, settings)
}

#[cfg(feature = "instrument_serial")]
fn run(command: Commands, settings: CalibrationSettings) -> Result<()> {
    use hardware::*;

    match command {
        Commands::Command { device, input } => run_command(&device, &input, &settings),
        Commands::Sweep {
            device,
            meter,
            leds,
            pwm,
            skip_photo,
            skip_spectrum,
            out_dir,
        } => run_sweep_cmd(
            &device,
            meter.as_deref(),
            &leds,
            &pwm,
            skip_photo,
            skip_spectrum,
            &out_dir,
            &settings,
        ),
        Commands::Calibrate {
            device,
            meter,
            leds,
            out_dir,
        } => run_calibrate_cmd(&device, &meter, &leds, &out_dir, &settings),
    }
}

#[cfg(not(feature = "instrument_serial"))]
fn run(_command: Commands, _settings: CalibrationSettings) -> Result<()> {
    anyhow::bail!("serial support not enabled; rebuild with --features instrument_serial")
}

#[cfg(feature = "instrument_serial")]
mod hardware {
    use super::*;
    use std::fs::{self, File};
    use std::path::Path;

    use log::{info, warn};

    use lpm::calibrate::{run_calibration, run_sweep, SweepStages};
    use lpm::config::{load_led_map, load_pwm_map};
    use lpm::meter::Pr655;
    use lpm::protocol::{DeviceCommand, LedDriver, ProtocolOptions};
    use lpm::report;
    use lpm::transport::SerialTransport;

    fn open_driver(
        device: &Path,
        settings: &CalibrationSettings,
    ) -> Result<LedDriver<SerialTransport>> {
        let path = device.to_string_lossy();
        let transport = SerialTransport::open(&path, settings.baud_rate)
            .with_context(|| format!("opening LED driver board on {}", path))?;
        Ok(LedDriver::new(
            transport,
            ProtocolOptions {
                sentinel: settings.sentinel.clone(),
                line_timeout: settings.line_timeout,
                max_read_attempts: settings.max_read_attempts,
            },
        ))
    }

    fn open_meter(device: &Path) -> Result<Pr655<SerialTransport>> {
        let path = device.to_string_lossy();
        Pr655::open(&path).with_context(|| format!("opening PR-655 on {}", path))
    }

    pub fn run_command(device: &Path, input: &str, settings: &CalibrationSettings) -> Result<()> {
        let command: DeviceCommand = input.parse()?;
        let mut driver = open_driver(device, settings)?;
        let reply = driver.execute(&command)?;
        for line in reply {
            println!("{}", line);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run_sweep_cmd(
        device: &Path,
        meter: Option<&Path>,
        leds: &Path,
        pwm: &Path,
        skip_photo: bool,
        skip_spectrum: bool,
        out_dir: &Path,
        settings: &CalibrationSettings,
    ) -> Result<()> {
        let led_map = load_led_map(leds)?;
        let pwm_map = load_pwm_map(pwm)?;
        log_bank(&led_map);

        let mut driver = open_driver(device, settings)?;
        let mut meter = if skip_spectrum {
            None
        } else {
            let path = meter.context("--meter is required unless --skip-spectrum is set")?;
            Some(open_meter(path)?)
        };

        let stages = SweepStages {
            take_photo: !skip_photo,
            measure_spectrum: !skip_spectrum,
        };
        let outcome = run_sweep(
            &mut driver,
            meter.as_mut(),
            &led_map,
            &pwm_map,
            settings,
            stages,
        )?;

        fs::create_dir_all(out_dir)?;
        if !skip_spectrum {
            report::write_spectral_csv(File::create(out_dir.join("spectral.txt"))?, &outcome.spectra)?;
        }
        report::write_error_log(File::create(out_dir.join("error.txt"))?, &outcome.failures)?;

        info!(
            "sweep done: {} spectra, {} failures",
            outcome.spectra.len(),
            outcome.failures.len()
        );
        Ok(())
    }

    pub fn run_calibrate_cmd(
        device: &Path,
        meter: &Path,
        leds: &Path,
        out_dir: &Path,
        settings: &CalibrationSettings,
    ) -> Result<()> {
        settings.validate()?;
        let led_map = load_led_map(leds)?;
        log_bank(&led_map);

        let mut driver = open_driver(device, settings)?;
        let mut meter = open_meter(meter)?;

        info!("starting thresholding process for {} LEDs", led_map.len());
        let outcome = run_calibration(&mut driver, &mut meter, &led_map, settings)?;

        fs::create_dir_all(out_dir)?;
        report::write_pwm_table(File::create(out_dir.join("pwm.txt"))?, &outcome.pwm)?;
        report::write_spectral_csv(File::create(out_dir.join("spectral.txt"))?, &outcome.spectra)?;
        report::write_error_log(File::create(out_dir.join("error.txt"))?, &outcome.failures)?;

        info!(
            "calibration done: {} LEDs accepted, {} failed",
            outcome.pwm.len(),
            outcome.failures.len()
        );
        for (wavelength, reason) in &outcome.failures {
            warn!("{}nm: {}", wavelength, reason);
        }
        Ok(())
    }

    fn log_bank(led_map: &std::collections::BTreeMap<u8, u16>) {
        for (pin, wavelength) in led_map {
            info!("pin: {} -- wavelength: {}nm", pin, wavelength);
        }
    }
}
