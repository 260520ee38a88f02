//! Test doubles for the transport and the spectroradiometer.
//!
//! Both mocks are deterministic and script-driven so tests can assert on
//! exact traffic and call counts without hardware attached.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::error::{LpmError, LpmResult};
use crate::meter::{SpectralMeter, Spectrum};
use crate::transport::LineTransport;

/// In-memory transport: records every written line and replays a scripted
/// sequence of reply lines. An exhausted script reads as a quiet link
/// (`Ok(None)`), which is how echo drains finish on the real hardware.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Reply lines still to be served.
    pub script: VecDeque<String>,
    /// Every line written, in order, without terminators.
    pub written: Vec<String>,
}

impl MockTransport {
    /// A transport that will reply with `lines`, one per read.
    pub fn with_script(lines: &[&str]) -> Self {
        Self::with_script_owned(lines.iter().map(|s| s.to_string()).collect())
    }

    /// As [`MockTransport::with_script`], from owned strings.
    pub fn with_script_owned(lines: Vec<String>) -> Self {
        Self {
            script: lines.into(),
            written: Vec::new(),
        }
    }

    /// Reply lines not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl LineTransport for MockTransport {
    fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.written.push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> std::io::Result<Option<String>> {
        Ok(self.script.pop_front())
    }
}

/// Scripted spectroradiometer.
///
/// Each successful `measure`/`spectral` pair consumes the next peak from
/// the script; when the script runs out, the last peak repeats (a bank
/// whose brightness no longer changes). Faults and start refusals are
/// injected per call index.
#[derive(Debug)]
pub struct MockMeter {
    peaks: VecDeque<f32>,
    last_peak: f32,
    fail_on: HashSet<usize>,
    no_data_on: HashSet<usize>,
    accept_start: bool,
    started: bool,
    measured: bool,
    /// Number of `start` calls so far.
    pub start_calls: usize,
    /// Number of `stop` calls so far.
    pub stop_calls: usize,
    /// Number of `measure` calls so far.
    pub measure_calls: usize,
}

impl MockMeter {
    /// A meter whose successive measurements peak at `peaks`.
    pub fn with_peaks(peaks: Vec<f32>) -> Self {
        let last_peak = peaks.last().copied().unwrap_or(0.0);
        Self {
            peaks: peaks.into(),
            last_peak,
            fail_on: HashSet::new(),
            no_data_on: HashSet::new(),
            accept_start: true,
            started: false,
            measured: false,
            start_calls: 0,
            stop_calls: 0,
            measure_calls: 0,
        }
    }

    /// Makes the given 0-based `measure` calls fail with a transient fault.
    pub fn fail_measures(&mut self, calls: &[usize]) {
        self.fail_on = calls.iter().copied().collect();
    }

    /// Makes the given 0-based `measure` calls report no usable data
    /// (`Ok(false)`) instead of faulting.
    pub fn no_data_measures(&mut self, calls: &[usize]) {
        self.no_data_on = calls.iter().copied().collect();
    }

    /// Makes every `start` call refuse remote mode.
    pub fn refuse_start(&mut self) {
        self.accept_start = false;
    }

    fn next_peak(&mut self) -> f32 {
        if let Some(p) = self.peaks.pop_front() {
            self.last_peak = p;
        }
        self.last_peak
    }
}

impl SpectralMeter for MockMeter {
    fn start(&mut self) -> LpmResult<bool> {
        self.start_calls += 1;
        if self.accept_start {
            self.started = true;
        }
        Ok(self.accept_start)
    }

    fn units(&mut self, _photometric: bool) -> LpmResult<()> {
        Ok(())
    }

    fn measure(&mut self) -> LpmResult<bool> {
        let call = self.measure_calls;
        self.measure_calls += 1;
        if !self.started {
            return Err(LpmError::Measurement("measure outside remote mode".to_string()));
        }
        if self.fail_on.contains(&call) {
            return Err(LpmError::Measurement("injected fault".to_string()));
        }
        if self.no_data_on.contains(&call) {
            return Ok(false);
        }
        self.measured = true;
        Ok(true)
    }

    fn spectral(&mut self) -> LpmResult<Spectrum> {
        if !self.measured {
            return Err(LpmError::Measurement("no measurement taken".to_string()));
        }
        self.measured = false;
        let peak = self.next_peak();
        Ok(Spectrum {
            wavelength_start: 380.0,
            wavelength_step: 4.0,
            intensities: vec![peak * 0.25, peak, peak * 0.5],
        })
    }

    fn config(&mut self) -> LpmResult<String> {
        Ok("mock meter".to_string())
    }

    fn stop(&mut self) -> LpmResult<()> {
        self.stop_calls += 1;
        self.started = false;
        self.measured = false;
        Ok(())
    }
}
