//! Command protocol layer for the LED driver board.
//!
//! The firmware speaks a line-oriented ASCII protocol:
//!
//! ```text
//! info           query pin/wavelength information for all LEDs
//! reset          turn off every LED that is on
//! pwm <pin>,<duty>   drive one LED at a 12-bit duty cycle
//! shoot          trigger the IR LED for the camera shutter
//! ```
//!
//! Every command is answered by zero or more echoed text lines followed by a
//! sentinel line. Firmware revisions disagree on the sentinel (`\x04` on
//! current boards, `*` on older ones), so it is part of the connection
//! configuration, never a literal in this module.
//!
//! Each exchange is independent: `Idle -> Sent -> Draining -> Idle` on the
//! sentinel (or a quiet link), `-> Failed` when the device keeps talking past
//! the read-attempt budget. No state is carried across commands and no
//! partial line is left unconsumed, so the next command can be issued
//! immediately.

use std::str::FromStr;
use std::time::Duration;

use log::{debug, trace};
use serde::Deserialize;

use crate::error::{LpmError, LpmResult};
use crate::transport::LineTransport;

/// End-of-response marker, compared against a whole received line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Sentinel(String);

impl Sentinel {
    /// EOT byte, sent by current firmware.
    pub fn eot() -> Self {
        Sentinel("\u{4}".to_string())
    }

    /// `*`, sent by pre-2016 firmware revisions.
    pub fn star() -> Self {
        Sentinel("*".to_string())
    }

    /// Whether `line` is this sentinel.
    pub fn matches(&self, line: &str) -> bool {
        line == self.0
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Sentinel::eot()
    }
}

/// Connection-time protocol parameters.
#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    /// End-of-response marker for this firmware revision.
    pub sentinel: Sentinel,
    /// Deadline for each individual line read.
    pub line_timeout: Duration,
    /// Maximum lines read per response before giving up on the sentinel.
    pub max_read_attempts: u32,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            sentinel: Sentinel::default(),
            line_timeout: Duration::from_millis(1000),
            max_read_attempts: 128,
        }
    }
}

/// A single operation from the device's fixed command vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Query LED pin/wavelength information.
    Info,
    /// Turn off all LEDs.
    Reset,
    /// Drive one LED.
    Pwm {
        /// Driver board pin.
        pin: u8,
        /// 12-bit duty cycle.
        duty: u16,
    },
    /// Trigger the camera shutter LED.
    Shoot,
}

impl DeviceCommand {
    /// The exact line sent over the wire.
    pub fn wire(&self) -> String {
        match self {
            DeviceCommand::Info => "info".to_string(),
            DeviceCommand::Reset => "reset".to_string(),
            DeviceCommand::Pwm { pin, duty } => format!("pwm {},{}", pin, duty),
            DeviceCommand::Shoot => "shoot".to_string(),
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = LpmError;

    fn from_str(s: &str) -> LpmResult<Self> {
        let input = s.trim();
        match input {
            "info" => return Ok(DeviceCommand::Info),
            "reset" => return Ok(DeviceCommand::Reset),
            "shoot" => return Ok(DeviceCommand::Shoot),
            _ => {}
        }
        if let Some(args) = input.strip_prefix("pwm ") {
            let (pin, duty) = args
                .split_once(',')
                .ok_or_else(|| LpmError::UnknownCommand(input.to_string()))?;
            let pin = pin
                .trim()
                .parse::<u8>()
                .map_err(|_| LpmError::UnknownCommand(input.to_string()))?;
            let duty = duty
                .trim()
                .parse::<u16>()
                .map_err(|_| LpmError::UnknownCommand(input.to_string()))?;
            return Ok(DeviceCommand::Pwm { pin, duty });
        }
        Err(LpmError::UnknownCommand(input.to_string()))
    }
}

/// Protocol layer over a [`LineTransport`] to the LED driver board.
///
/// `reset`, `shoot` and `set_pwm` are fire-and-forget: their physical effect
/// is committed once the write succeeds, and the echoed output is drained
/// only so the link is clean for the next command. `info` is a true query
/// with a structured multi-line reply.
pub struct LedDriver<T: LineTransport> {
    transport: T,
    options: ProtocolOptions,
}

impl<T: LineTransport> LedDriver<T> {
    /// Creates a driver over `transport` with the given protocol options.
    pub fn new(transport: T, options: ProtocolOptions) -> Self {
        Self { transport, options }
    }

    /// The underlying transport (used by tests to inspect traffic).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Writes one command line. The device-side effect is committed once
    /// this returns `Ok`, even if draining the reply fails afterwards.
    pub fn send(&mut self, command: &str) -> LpmResult<()> {
        self.transport.send_line(command)?;
        Ok(())
    }

    /// Sends `command` and collects the reply lines, sentinel excluded,
    /// in the order received.
    pub fn send_and_collect(&mut self, command: &str) -> LpmResult<Vec<String>> {
        self.send(command)?;
        self.collect_response()
    }

    /// Runs one parsed command and returns the drained reply.
    pub fn execute(&mut self, command: &DeviceCommand) -> LpmResult<Vec<String>> {
        self.send_and_collect(&command.wire())
    }

    /// Queries LED pin information; the reply is the structured multi-line
    /// table printed by the firmware.
    pub fn info(&mut self) -> LpmResult<Vec<String>> {
        self.execute(&DeviceCommand::Info)
    }

    /// Turns off all LEDs, draining the echoed output.
    pub fn reset(&mut self) -> LpmResult<Vec<String>> {
        self.execute(&DeviceCommand::Reset)
    }

    /// Triggers the camera shutter LED, draining the echoed output.
    pub fn shoot(&mut self) -> LpmResult<Vec<String>> {
        self.execute(&DeviceCommand::Shoot)
    }

    /// Drives the LED on `pin` at `duty`, draining the echoed output.
    pub fn set_pwm(&mut self, pin: u8, duty: u16) -> LpmResult<Vec<String>> {
        self.execute(&DeviceCommand::Pwm { pin, duty })
    }

    fn collect_response(&mut self) -> LpmResult<Vec<String>> {
        let mut lines = Vec::new();
        for attempt in 0..self.options.max_read_attempts {
            match self.transport.read_line(self.options.line_timeout)? {
                None => {
                    // Link went quiet without a sentinel: the drain is done.
                    trace!("response drain complete after {} lines (quiet link)", lines.len());
                    return Ok(lines);
                }
                Some(line) if self.options.sentinel.matches(&line) => {
                    trace!("sentinel after {} lines ({} reads)", lines.len(), attempt + 1);
                    return Ok(lines);
                }
                Some(line) => lines.push(line),
            }
        }
        debug!(
            "device still talking after {} reads without a sentinel",
            self.options.max_read_attempts
        );
        Err(LpmError::ProtocolTimeout {
            attempts: self.options.max_read_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn driver(script: &[&str]) -> LedDriver<MockTransport> {
        LedDriver::new(MockTransport::with_script(script), ProtocolOptions::default())
    }

    #[test]
    fn set_pwm_encodes_exact_wire_form() {
        let mut drv = driver(&["\u{4}"]);
        drv.set_pwm(10, 2000).unwrap();
        assert_eq!(drv.transport.written, vec!["pwm 10,2000".to_string()]);
    }

    #[test]
    fn collect_excludes_sentinel_and_preserves_order() {
        let mut drv = driver(&["pin 6 on", "duty 2000", "\u{4}", "stale"]);
        let lines = drv.send_and_collect("pwm 6,2000").unwrap();
        assert_eq!(lines, vec!["pin 6 on".to_string(), "duty 2000".to_string()]);
        // The line after the sentinel belongs to the next exchange.
        assert_eq!(drv.transport.remaining(), 1);
    }

    #[test]
    fn quiet_link_completes_drain_without_sentinel() {
        let mut drv = driver(&["ok"]);
        let lines = drv.send_and_collect("reset").unwrap();
        assert_eq!(lines, vec!["ok".to_string()]);
    }

    #[test]
    fn star_sentinel_firmware_is_supported() {
        let mut drv = LedDriver::new(
            MockTransport::with_script(&["LED bank v1", "*"]),
            ProtocolOptions {
                sentinel: Sentinel::star(),
                ..ProtocolOptions::default()
            },
        );
        let lines = drv.info().unwrap();
        assert_eq!(lines, vec!["LED bank v1".to_string()]);
    }

    #[test]
    fn chatty_device_without_sentinel_times_out() {
        let script: Vec<String> = (0..200).map(|i| format!("noise {}", i)).collect();
        let mut drv = LedDriver::new(
            MockTransport::with_script_owned(script),
            ProtocolOptions {
                max_read_attempts: 16,
                ..ProtocolOptions::default()
            },
        );
        match drv.send_and_collect("info") {
            Err(LpmError::ProtocolTimeout { attempts }) => assert_eq!(attempts, 16),
            other => panic!("expected ProtocolTimeout, got {:?}", other.map(|l| l.len())),
        }
    }

    #[test]
    fn commands_parse_and_roundtrip() {
        assert_eq!("info".parse::<DeviceCommand>().unwrap(), DeviceCommand::Info);
        assert_eq!(
            "pwm 10,2000".parse::<DeviceCommand>().unwrap(),
            DeviceCommand::Pwm { pin: 10, duty: 2000 }
        );
        assert_eq!(
            DeviceCommand::Pwm { pin: 10, duty: 2000 }.wire(),
            "pwm 10,2000"
        );
        assert!("blink 3".parse::<DeviceCommand>().is_err());
        assert!("pwm ten,5".parse::<DeviceCommand>().is_err());
    }
}
